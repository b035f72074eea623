//! Snapshot and state entries
//!
//! A sync cycle compares three views of the tree: the local snapshot, the
//! remote snapshot, and the set of [`SyncedEntry`] records verified by
//! earlier cycles. All three are keyed by [`RelativePath`] and kept in
//! `BTreeMap`s so iteration order is stable.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{ContentHash, RelativePath};

/// Two modification times closer than this are the same stat value
const MTIME_EPSILON: f64 = 1e-3;

/// Whether a path is a regular file or a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    #[must_use]
    pub fn is_dir(self) -> bool {
        matches!(self, Self::Directory)
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Directory => write!(f, "directory"),
        }
    }
}

/// Content identity of a file
///
/// A hash is authoritative when both sides have one; otherwise the
/// size/mtime pair is the best available evidence.
#[derive(Debug, Clone, PartialEq)]
pub enum Fingerprint {
    Hash(ContentHash),
    SizeMtime { size: u64, modified: f64 },
}

// ============================================================================
// Snapshot entries
// ============================================================================

/// One entry of the local filesystem walk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalEntry {
    pub kind: EntryKind,
    pub size: u64,
    /// Modification time in seconds since the Unix epoch
    pub modified: f64,
    pub hash: Option<ContentHash>,
}

impl LocalEntry {
    #[must_use]
    pub fn file(size: u64, modified: f64, hash: Option<ContentHash>) -> Self {
        Self {
            kind: EntryKind::File,
            size,
            modified,
            hash,
        }
    }

    #[must_use]
    pub fn directory(modified: f64) -> Self {
        Self {
            kind: EntryKind::Directory,
            size: 0,
            modified,
            hash: None,
        }
    }
}

/// One entry of the remote listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub kind: EntryKind,
    /// Size in bytes, when the server reports it
    pub size: Option<u64>,
    /// Modification time in seconds since the Unix epoch
    pub modified: f64,
    pub hash: Option<ContentHash>,
}

impl RemoteEntry {
    #[must_use]
    pub fn file(size: Option<u64>, modified: f64, hash: Option<ContentHash>) -> Self {
        Self {
            kind: EntryKind::File,
            size,
            modified,
            hash,
        }
    }

    #[must_use]
    pub fn directory(modified: f64) -> Self {
        Self {
            kind: EntryKind::Directory,
            size: None,
            modified,
            hash: None,
        }
    }
}

/// Result of walking the sync root
#[derive(Debug, Clone, Default)]
pub struct LocalSnapshot {
    pub entries: BTreeMap<RelativePath, LocalEntry>,
    /// Paths that could not be read during the walk
    ///
    /// These (and everything below them) are left out of every decision
    /// for the cycle, deletions included.
    pub unreadable: BTreeSet<RelativePath>,
}

impl LocalSnapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, path: &RelativePath) -> Option<&LocalEntry> {
        self.entries.get(path)
    }

    /// True when `path` or one of its ancestors was unreadable
    #[must_use]
    pub fn is_unreadable(&self, path: &RelativePath) -> bool {
        if self.unreadable.is_empty() {
            return false;
        }
        self.unreadable.contains(path) || path.ancestors().any(|a| self.unreadable.contains(&a))
    }

    /// Number of regular files in the snapshot
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.kind == EntryKind::File)
            .count()
    }
}

/// Result of the remote listing call
#[derive(Debug, Clone, Default)]
pub struct RemoteSnapshot {
    pub entries: BTreeMap<RelativePath, RemoteEntry>,
    /// Whether the transport reports directories itself
    ///
    /// When false, directories exist only as ancestors of files and an
    /// empty local directory has nothing to be uploaded as.
    pub explicit_directories: bool,
}

impl RemoteSnapshot {
    #[must_use]
    pub fn new(explicit_directories: bool) -> Self {
        Self {
            entries: BTreeMap::new(),
            explicit_directories,
        }
    }

    #[must_use]
    pub fn get(&self, path: &RelativePath) -> Option<&RemoteEntry> {
        self.entries.get(path)
    }

    /// Insert a file and every missing ancestor as an implied directory
    pub fn insert_file_with_parents(&mut self, path: RelativePath, entry: RemoteEntry) {
        for ancestor in path.ancestors() {
            self.entries
                .entry(ancestor)
                .or_insert_with(|| RemoteEntry::directory(entry.modified));
        }
        self.entries.insert(path, entry);
    }
}

// ============================================================================
// Verified state
// ============================================================================

/// A path confirmed present and identical on both sides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedEntry {
    pub path: RelativePath,
    pub kind: EntryKind,
    #[serde(default)]
    pub hash: Option<ContentHash>,
    pub size: u64,
    /// Local modification time at verification
    pub modified: f64,
    /// Remote modification time at verification
    #[serde(default)]
    pub remote_modified: Option<f64>,
    pub verified_at: DateTime<Utc>,
}

impl SyncedEntry {
    /// Record a path as verified on both sides
    #[must_use]
    pub fn verified(
        path: RelativePath,
        local: &LocalEntry,
        remote: Option<&RemoteEntry>,
    ) -> Self {
        let hash = local
            .hash
            .clone()
            .or_else(|| remote.and_then(|r| r.hash.clone()));
        Self {
            path,
            kind: local.kind,
            hash,
            size: local.size,
            modified: local.modified,
            remote_modified: remote.map(|r| r.modified),
            verified_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        match &self.hash {
            Some(h) => Fingerprint::Hash(h.clone()),
            None => Fingerprint::SizeMtime {
                size: self.size,
                modified: self.modified,
            },
        }
    }

    /// True when the local file has not been touched since verification
    #[must_use]
    pub fn matches_local(&self, local: &LocalEntry) -> bool {
        if self.kind != local.kind {
            return false;
        }
        if self.kind.is_dir() {
            return true;
        }
        if let (Some(known), Some(current)) = (&self.hash, &local.hash) {
            if known != current {
                return false;
            }
        }
        self.size == local.size && (self.modified - local.modified).abs() < MTIME_EPSILON
    }

    /// True when the remote copy has not changed since verification
    #[must_use]
    pub fn matches_remote(&self, remote: &RemoteEntry) -> bool {
        if self.kind != remote.kind {
            return false;
        }
        if self.kind.is_dir() {
            return true;
        }
        if let (Some(known), Some(current)) = (&self.hash, &remote.hash) {
            return known == current;
        }
        if let Some(size) = remote.size {
            if size != self.size {
                return false;
            }
        }
        // Entries recorded from an upload receipt may lack the server mtime;
        // the size check above is then all there is to go on
        match self.remote_modified {
            Some(m) => (m - remote.modified).abs() < MTIME_EPSILON,
            None => true,
        }
    }
}
