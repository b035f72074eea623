//! Three-way diff planner
//!
//! Compares the last verified state with fresh local and remote snapshots
//! and decides, per path, what has to happen. The result is an
//! [`ActionPlan`]: ordered deletions and transfers, plus the bookkeeping
//! (confirmations, stale entries, conflicts) the orchestrator applies.
//!
//! ## Decision rules
//!
//! | state | local | remote | outcome |
//! |-------|-------|--------|---------|
//! | yes   | -     | yes    | `DeleteRemote` |
//! | yes   | yes   | -      | `DeleteLocal` |
//! | no    | yes   | -      | `Upload` |
//! | no    | -     | yes    | `Download` |
//! | yes   | -     | -      | stale |
//! | any   | yes   | yes    | compare contents |
//!
//! When both sides hold a file, equal hashes mean nothing to transfer.
//! Otherwise a state entry that still matches one side means only the
//! other side changed, and that side wins. Without usable state the newer
//! modification time wins, beyond a tolerance; a tie with differing
//! content is a conflict.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use brandybox_core::config::SyncConfig;
use brandybox_core::domain::{
    ContentHash, EntryKind, LocalEntry, LocalSnapshot, RelativePath, RemoteEntry, RemoteSnapshot,
    SyncedEntry,
};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Downloads above this count may indicate a wrong sync folder
const SUSPICIOUS_DOWNLOADS: usize = 1000;

/// ...when they also outnumber uploads by this factor
const SUSPICIOUS_RATIO: usize = 10;

/// Planner tunables
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOptions {
    /// Seconds two modification times may differ and still count as equal
    pub mtime_tolerance: f64,
    /// Remote file deletions above this count trigger the mass-delete guard
    pub mass_delete_threshold: usize,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            mtime_tolerance: 2.0,
            mass_delete_threshold: 50,
        }
    }
}

impl From<&SyncConfig> for PlanOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            mtime_tolerance: config.mtime_tolerance_secs,
            mass_delete_threshold: config.mass_delete_threshold,
        }
    }
}

/// One step of the plan
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    DeleteLocal {
        path: RelativePath,
        kind: EntryKind,
    },
    DeleteRemote {
        path: RelativePath,
        kind: EntryKind,
    },
    /// Send local content (or create a remote directory)
    Upload {
        path: RelativePath,
        kind: EntryKind,
        size: u64,
        hash: Option<ContentHash>,
        /// Local mtime seen at planning time
        modified: f64,
    },
    /// Fetch remote content (or create a local directory)
    Download {
        path: RelativePath,
        kind: EntryKind,
        size: Option<u64>,
        hash: Option<ContentHash>,
        /// Remote mtime, applied to the local copy
        modified: f64,
    },
}

impl Action {
    pub fn path(&self) -> &RelativePath {
        match self {
            Self::DeleteLocal { path, .. }
            | Self::DeleteRemote { path, .. }
            | Self::Upload { path, .. }
            | Self::Download { path, .. } => path,
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            Self::DeleteLocal { kind, .. }
            | Self::DeleteRemote { kind, .. }
            | Self::Upload { kind, .. }
            | Self::Download { kind, .. } => *kind,
        }
    }

    pub fn is_deletion(&self) -> bool {
        matches!(self, Self::DeleteLocal { .. } | Self::DeleteRemote { .. })
    }

    /// Short verb used in logs and CLI output
    pub fn label(&self) -> &'static str {
        match self {
            Self::DeleteLocal { .. } => "delete-local",
            Self::DeleteRemote { .. } => "delete-remote",
            Self::Upload { .. } => "upload",
            Self::Download { .. } => "download",
        }
    }

    fn download_from(path: RelativePath, remote: &RemoteEntry) -> Self {
        Self::Download {
            path,
            kind: remote.kind,
            size: remote.size,
            hash: remote.hash.clone(),
            modified: remote.modified,
        }
    }

    fn upload_from(path: RelativePath, local: &LocalEntry) -> Self {
        Self::Upload {
            path,
            kind: local.kind,
            size: local.size,
            hash: local.hash.clone(),
            modified: local.modified,
        }
    }
}

/// Why a path was left alone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ConflictReason {
    /// A file on one side, a directory on the other
    TypeMismatch { local: EntryKind, remote: EntryKind },
    /// Both sides differ in content with no usable ordering between them
    ConcurrentEdit,
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TypeMismatch { local, remote } => {
                write!(f, "{local} locally, {remote} remotely")
            }
            Self::ConcurrentEdit => write!(f, "changed on both sides at the same time"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub path: RelativePath,
    #[serde(flatten)]
    pub reason: ConflictReason,
}

/// Output of one planning pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActionPlan {
    /// Deletions (deepest first), then directory creations (shallowest
    /// first), then file transfers
    pub actions: Vec<Action>,
    /// Paths found identical on both sides, to be (re)recorded
    pub confirmations: Vec<SyncedEntry>,
    /// State entries to drop without touching either side
    pub stale: Vec<RelativePath>,
    pub conflicts: Vec<Conflict>,
    /// Remote deletions turned into downloads by the mass-delete guard
    pub guarded_deletions: usize,
}

impl ActionPlan {
    /// True when the plan neither acts nor changes state
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.confirmations.is_empty() && self.stale.is_empty()
    }

    pub fn deletions(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter().filter(|a| a.is_deletion())
    }

    pub fn transfers(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter().filter(|a| !a.is_deletion())
    }

    /// Number of file uploads
    pub fn upload_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, Action::Upload { kind: EntryKind::File, .. }))
            .count()
    }

    /// Number of file downloads
    pub fn download_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, Action::Download { kind: EntryKind::File, .. }))
            .count()
    }

    /// Many more downloads than uploads usually means the configured sync
    /// folder is not the one that was synced before
    pub fn looks_like_wrong_folder(&self) -> bool {
        let downloads = self.download_count();
        downloads > SUSPICIOUS_DOWNLOADS
            && downloads > SUSPICIOUS_RATIO * self.upload_count().max(1)
    }
}

/// Computes [`ActionPlan`]s
#[derive(Debug, Clone, Default)]
pub struct DiffPlanner {
    options: PlanOptions,
}

impl DiffPlanner {
    pub fn new(options: PlanOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PlanOptions {
        &self.options
    }

    /// Plans one cycle from the last verified state and both snapshots
    pub fn plan(
        &self,
        state: &BTreeMap<RelativePath, SyncedEntry>,
        local: &LocalSnapshot,
        remote: &RemoteSnapshot,
    ) -> ActionPlan {
        let mut plan = ActionPlan::default();
        let mut actions = Vec::new();

        let paths: BTreeSet<&RelativePath> = state
            .keys()
            .chain(local.entries.keys())
            .chain(remote.entries.keys())
            .collect();

        let mut mismatched: Vec<RelativePath> = Vec::new();

        for path in paths {
            if local.is_unreadable(path) {
                debug!(%path, "Unreadable locally, leaving untouched this cycle");
                continue;
            }
            if mismatched.iter().any(|m| path.is_descendant_of(m)) {
                debug!(%path, "Below a type conflict, skipping");
                continue;
            }

            let known = state.get(path);
            match (local.get(path), remote.get(path)) {
                (None, None) => {
                    if known.is_some() {
                        plan.stale.push(path.clone());
                    }
                }
                (Some(l), None) => match known {
                    Some(s) if s.kind == l.kind => actions.push(Action::DeleteLocal {
                        path: path.clone(),
                        kind: l.kind,
                    }),
                    _ => {
                        if known.is_some() {
                            plan.stale.push(path.clone());
                        }
                        if l.kind == EntryKind::File || remote.explicit_directories {
                            actions.push(Action::upload_from(path.clone(), l));
                        }
                    }
                },
                (None, Some(r)) => match known {
                    Some(s) if s.kind == r.kind => actions.push(Action::DeleteRemote {
                        path: path.clone(),
                        kind: r.kind,
                    }),
                    _ => {
                        if known.is_some() {
                            plan.stale.push(path.clone());
                        }
                        actions.push(Action::download_from(path.clone(), r));
                    }
                },
                (Some(l), Some(r)) => {
                    if l.kind != r.kind {
                        mismatched.push(path.clone());
                    }
                    self.compare(path, known, l, r, &mut plan, &mut actions);
                }
            }
        }

        self.guard_mass_delete(local, remote, &mut actions, &mut plan);
        suppress_shadowed_directory_deletions(local, remote, &mut actions, &mut plan);
        plan.actions = order(actions);

        info!(
            actions = plan.actions.len(),
            uploads = plan.upload_count(),
            downloads = plan.download_count(),
            deletions = plan.deletions().count(),
            confirmations = plan.confirmations.len(),
            stale = plan.stale.len(),
            conflicts = plan.conflicts.len(),
            "Sync plan computed"
        );
        plan
    }

    fn compare(
        &self,
        path: &RelativePath,
        known: Option<&SyncedEntry>,
        local: &LocalEntry,
        remote: &RemoteEntry,
        plan: &mut ActionPlan,
        actions: &mut Vec<Action>,
    ) {
        if local.kind != remote.kind {
            warn!(
                %path,
                local = %local.kind,
                remote = %remote.kind,
                "Type conflict, skipping path"
            );
            plan.conflicts.push(Conflict {
                path: path.clone(),
                reason: ConflictReason::TypeMismatch {
                    local: local.kind,
                    remote: remote.kind,
                },
            });
            return;
        }

        if local.kind == EntryKind::Directory {
            confirm(path, known, local, remote, plan);
            return;
        }

        if let (Some(lh), Some(rh)) = (&local.hash, &remote.hash) {
            if lh == rh {
                confirm(path, known, local, remote, plan);
                return;
            }
        }

        if let Some(s) = known.filter(|s| s.kind == EntryKind::File) {
            match (s.matches_local(local), s.matches_remote(remote)) {
                (true, true) => {
                    confirm(path, known, local, remote, plan);
                    return;
                }
                (false, true) => {
                    debug!(%path, "Changed locally only");
                    actions.push(Action::upload_from(path.clone(), local));
                    return;
                }
                (true, false) => {
                    debug!(%path, "Changed remotely only");
                    actions.push(Action::download_from(path.clone(), remote));
                    return;
                }
                (false, false) => {}
            }
        }

        let delta = local.modified - remote.modified;
        if delta > self.options.mtime_tolerance {
            debug!(%path, delta, "Local copy is newer");
            actions.push(Action::upload_from(path.clone(), local));
        } else if delta < -self.options.mtime_tolerance {
            debug!(%path, delta, "Remote copy is newer");
            actions.push(Action::download_from(path.clone(), remote));
        } else if contents_differ(local, remote) {
            warn!(%path, delta, "Both sides changed within the mtime tolerance, skipping path");
            plan.conflicts.push(Conflict {
                path: path.clone(),
                reason: ConflictReason::ConcurrentEdit,
            });
        } else {
            confirm(path, known, local, remote, plan);
        }
    }

    fn guard_mass_delete(
        &self,
        local: &LocalSnapshot,
        remote: &RemoteSnapshot,
        actions: &mut [Action],
        plan: &mut ActionPlan,
    ) {
        let remote_file_deletes = actions
            .iter()
            .filter(|a| matches!(a, Action::DeleteRemote { kind: EntryKind::File, .. }))
            .count();
        let local_files = local.file_count();

        if remote_file_deletes <= self.options.mass_delete_threshold
            || remote_file_deletes <= local_files
        {
            return;
        }

        warn!(
            remote_file_deletes,
            local_files,
            threshold = self.options.mass_delete_threshold,
            "Refusing mass remote deletion, downloading instead (new device or wrong sync folder?)"
        );

        for action in actions.iter_mut() {
            if let Action::DeleteRemote { path, .. } = action {
                if let Some(r) = remote.get(path) {
                    *action = Action::download_from(path.clone(), r);
                    plan.guarded_deletions += 1;
                }
            }
        }
    }
}

/// Records `path` as in sync unless the stored entry already says so
fn confirm(
    path: &RelativePath,
    known: Option<&SyncedEntry>,
    local: &LocalEntry,
    remote: &RemoteEntry,
    plan: &mut ActionPlan,
) {
    let fresh = SyncedEntry::verified(path.clone(), local, Some(remote));
    if known.map_or(true, |s| !same_record(s, &fresh, remote.hash.is_some())) {
        plan.confirmations.push(fresh);
    }
}

/// Whether re-recording `fresh` would change nothing that later
/// comparisons look at
///
/// Directory entries carry no content. With a remote hash available the
/// recorded remote mtime is never consulted, so it is not refreshed.
fn same_record(known: &SyncedEntry, fresh: &SyncedEntry, remote_hashed: bool) -> bool {
    if known.kind != fresh.kind {
        return false;
    }
    if known.kind == EntryKind::Directory {
        return true;
    }
    known.hash == fresh.hash
        && known.size == fresh.size
        && known.modified == fresh.modified
        && (remote_hashed || known.remote_modified == fresh.remote_modified)
}

fn contents_differ(local: &LocalEntry, remote: &RemoteEntry) -> bool {
    if local.hash.is_some() && remote.hash.is_some() {
        // Equal hashes were handled before
        return true;
    }
    remote.size.is_some_and(|size| size != local.size)
}

/// Drops directory deletions that would take surviving children with them
///
/// The directory's state entry is discarded instead; a later cycle sees
/// the directory as new on one side and re-establishes it.
fn suppress_shadowed_directory_deletions(
    local: &LocalSnapshot,
    remote: &RemoteSnapshot,
    actions: &mut Vec<Action>,
    plan: &mut ActionPlan,
) {
    let deleted_local: BTreeSet<RelativePath> = actions
        .iter()
        .filter(|a| matches!(a, Action::DeleteLocal { .. }))
        .map(|a| a.path().clone())
        .collect();
    let deleted_remote: BTreeSet<RelativePath> = actions
        .iter()
        .filter(|a| matches!(a, Action::DeleteRemote { .. }))
        .map(|a| a.path().clone())
        .collect();

    let mut suppressed = Vec::new();
    actions.retain(|action| {
        let survivor = match action {
            Action::DeleteLocal {
                path,
                kind: EntryKind::Directory,
            } => local
                .entries
                .keys()
                .chain(local.unreadable.iter())
                .find(|p| p.is_descendant_of(path) && !deleted_local.contains(*p)),
            Action::DeleteRemote {
                path,
                kind: EntryKind::Directory,
            } => remote
                .entries
                .keys()
                .find(|p| p.is_descendant_of(path) && !deleted_remote.contains(*p)),
            _ => None,
        };

        match survivor {
            Some(child) => {
                info!(
                    path = %action.path(),
                    survivor = %child,
                    "Keeping directory with surviving children"
                );
                suppressed.push(action.path().clone());
                false
            }
            None => true,
        }
    });

    plan.stale.extend(suppressed);
}

/// Deletions deepest first, then directory creations shallowest first,
/// then file transfers in path order
fn order(actions: Vec<Action>) -> Vec<Action> {
    let (mut deletions, rest): (Vec<_>, Vec<_>) =
        actions.into_iter().partition(Action::is_deletion);
    let (mut directories, files): (Vec<_>, Vec<_>) = rest
        .into_iter()
        .partition(|a| a.kind() == EntryKind::Directory);

    deletions.sort_by(|a, b| {
        (Reverse(a.path().depth()), a.path()).cmp(&(Reverse(b.path().depth()), b.path()))
    });
    directories.sort_by(|a, b| (a.path().depth(), a.path()).cmp(&(b.path().depth(), b.path())));

    deletions.extend(directories);
    deletions.extend(files);
    deletions
}
