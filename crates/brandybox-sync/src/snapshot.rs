//! Snapshot collection for both sides of a sync
//!
//! The local snapshot comes from walking the sync root; the remote snapshot
//! from the store's listing call. A failed listing aborts the cycle: the
//! planner never sees a partial remote view.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use brandybox_core::domain::{
    EntryKind, LocalEntry, LocalSnapshot, RelativePath, RemoteEntry, RemoteSnapshot, SyncedEntry,
};
use brandybox_core::ports::{ILocalFileSystem, IRemoteStore};
use tracing::{debug, info, instrument, warn};

use crate::ignore;
use crate::SyncError;

/// Builds [`LocalSnapshot`]s and [`RemoteSnapshot`]s through the ports
pub struct SnapshotCollector {
    local: Arc<dyn ILocalFileSystem>,
    remote: Arc<dyn IRemoteStore>,
}

impl SnapshotCollector {
    pub fn new(local: Arc<dyn ILocalFileSystem>, remote: Arc<dyn IRemoteStore>) -> Self {
        Self { local, remote }
    }

    /// Walks `root` and fingerprints every file
    ///
    /// A file's hash is taken from `known` when its size and mtime still
    /// match the verified entry; otherwise it is computed from content.
    /// Paths that cannot be read end up in [`LocalSnapshot::unreadable`].
    #[instrument(skip(self, root, known), fields(root = %root.display()))]
    pub async fn collect_local(
        &self,
        root: &Path,
        known: &BTreeMap<RelativePath, SyncedEntry>,
    ) -> Result<LocalSnapshot, SyncError> {
        let outcome = self
            .local
            .walk(root)
            .await
            .map_err(|source| SyncError::RootUnavailable {
                path: root.to_path_buf(),
                source,
            })?;

        let mut snapshot = LocalSnapshot::new();
        snapshot.unreadable = outcome
            .errors
            .into_iter()
            .map(|(p, _)| p)
            .collect::<BTreeSet<_>>();

        let mut hashed = 0usize;
        let mut reused = 0usize;

        for walked in outcome.entries {
            if snapshot.is_unreadable(&walked.path) {
                continue;
            }

            if walked.kind == EntryKind::Directory {
                snapshot
                    .entries
                    .insert(walked.path, LocalEntry::directory(walked.modified));
                continue;
            }

            let candidate = LocalEntry::file(walked.size, walked.modified, None);
            let cached = known
                .get(&walked.path)
                .filter(|entry| entry.matches_local(&candidate))
                .and_then(|entry| entry.hash.clone());

            let hash = match cached {
                Some(hash) => {
                    reused += 1;
                    hash
                }
                None => match self.local.compute_hash(&walked.path.to_local(root)).await {
                    Ok(hash) => {
                        hashed += 1;
                        hash
                    }
                    Err(e) => {
                        warn!(
                            path = %walked.path,
                            error = %e,
                            "Cannot hash file, skipping this cycle"
                        );
                        snapshot.unreadable.insert(walked.path);
                        continue;
                    }
                },
            };

            snapshot.entries.insert(
                walked.path,
                LocalEntry::file(walked.size, walked.modified, Some(hash)),
            );
        }

        info!(
            entries = snapshot.entries.len(),
            unreadable = snapshot.unreadable.len(),
            hashed,
            reused,
            "Local snapshot collected"
        );
        Ok(snapshot)
    }

    /// Lists the remote store
    ///
    /// Items with unusable paths are dropped with a warning. When the store
    /// does not model directories, every ancestor of a file is added as an
    /// implied directory.
    #[instrument(skip(self))]
    pub async fn collect_remote(&self) -> Result<RemoteSnapshot, SyncError> {
        let items = self.remote.list_remote().await?;
        let explicit = self.remote.models_directories();
        let mut snapshot = RemoteSnapshot::new(explicit);
        let mut dropped = 0usize;

        for item in items {
            let path = match RelativePath::new(item.path.as_str()) {
                Ok(path) => path,
                Err(e) => {
                    warn!(path = %item.path, error = %e, "Dropping remote item with invalid path");
                    dropped += 1;
                    continue;
                }
            };

            if ignore::is_ignored(path.as_str()) {
                debug!(%path, "Ignoring remote item");
                continue;
            }

            if let Some(existing) = snapshot.get(&path) {
                if existing.kind != item.kind {
                    warn!(%path, "Remote listing reports the path twice with different kinds");
                }
            }

            let entry = RemoteEntry {
                kind: item.kind,
                size: item.size,
                modified: item.modified,
                hash: item.hash,
            };

            match (explicit, entry.kind) {
                (true, _) => {
                    snapshot.entries.insert(path, entry);
                }
                (false, EntryKind::File) => snapshot.insert_file_with_parents(path, entry),
                (false, EntryKind::Directory) => {
                    debug!(%path, "Store does not model directories, ignoring directory item");
                }
            }
        }

        info!(
            entries = snapshot.entries.len(),
            dropped,
            explicit_directories = explicit,
            "Remote snapshot collected"
        );
        Ok(snapshot)
    }
}
