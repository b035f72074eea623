//! Durable record of the last verified synchronized state
//!
//! The [`StateStore`] owns every [`SyncedEntry`] and is mutated only by the
//! running cycle. Each mutating call persists the whole state before it
//! returns, so a crash mid-cycle loses at most the step in flight.
//!
//! On disk the state is a JSON document:
//!
//! ```json
//! {
//!   "version": 1,
//!   "sync_root": "/home/user/brandyBox",
//!   "entries": {
//!     "docs/report.pdf": {
//!       "kind": "file", "hash": "…", "size": 1024,
//!       "modified": 1700000000.0, "remote_modified": 1700000000.0,
//!       "verified_at": "2024-01-01T00:00:00Z"
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use brandybox_core::domain::{ContentHash, EntryKind, RelativePath, SyncedEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::SyncError;

const STATE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    #[serde(default)]
    sync_root: Option<PathBuf>,
    #[serde(default)]
    entries: BTreeMap<RelativePath, StoredEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    kind: EntryKind,
    #[serde(default)]
    hash: Option<ContentHash>,
    size: u64,
    modified: f64,
    #[serde(default)]
    remote_modified: Option<f64>,
    verified_at: DateTime<Utc>,
}

impl StoredEntry {
    fn from_entry(entry: &SyncedEntry) -> Self {
        Self {
            kind: entry.kind,
            hash: entry.hash.clone(),
            size: entry.size,
            modified: entry.modified,
            remote_modified: entry.remote_modified,
            verified_at: entry.verified_at,
        }
    }

    fn into_entry(self, path: RelativePath) -> SyncedEntry {
        SyncedEntry {
            path,
            kind: self.kind,
            hash: self.hash,
            size: self.size,
            modified: self.modified,
            remote_modified: self.remote_modified,
            verified_at: self.verified_at,
        }
    }
}

/// File-backed store of verified entries
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    sync_root: Option<PathBuf>,
    entries: BTreeMap<RelativePath, SyncedEntry>,
}

impl StateStore {
    /// Opens the state at `path`, starting empty if the file does not exist
    ///
    /// An unreadable or corrupt file is moved aside to `<name>.corrupt` and
    /// the store starts empty. With no state every path on both sides is
    /// new, which only ever produces transfers, never deletions.
    #[instrument(skip(path), fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self, SyncError> {
        let mut store = Self {
            path: path.to_path_buf(),
            sync_root: None,
            entries: BTreeMap::new(),
        };

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No sync state yet, starting empty");
                return Ok(store);
            }
            Err(e) => return Err(SyncError::State(format!("reading {}: {e}", path.display()))),
        };

        match serde_json::from_slice::<StateFile>(&bytes) {
            Ok(file) if file.version == STATE_VERSION => {
                store.sync_root = file.sync_root;
                store.entries = file
                    .entries
                    .into_iter()
                    .map(|(p, e)| (p.clone(), e.into_entry(p)))
                    .collect();
                info!(entries = store.entries.len(), "Loaded sync state");
            }
            Ok(file) => {
                warn!(
                    version = file.version,
                    "Unsupported sync state version, starting empty"
                );
                store.set_aside().await;
            }
            Err(e) => {
                warn!(error = %e, "Sync state is corrupt, starting empty");
                store.set_aside().await;
            }
        }

        Ok(store)
    }

    async fn set_aside(&self) {
        let mut backup = self.path.clone().into_os_string();
        backup.push(".corrupt");
        if let Err(e) = tokio::fs::rename(&self.path, &backup).await {
            warn!(error = %e, "Could not move corrupt sync state aside");
        }
    }

    /// Location of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sync root the entries belong to
    pub fn sync_root(&self) -> Option<&Path> {
        self.sync_root.as_deref()
    }

    /// Binds the state to `root`, clearing it if it belonged to another root
    ///
    /// Returns true when existing entries were discarded.
    pub async fn ensure_root(&mut self, root: &Path) -> Result<bool, SyncError> {
        if self.sync_root.as_deref() == Some(root) {
            return Ok(false);
        }

        let cleared = !self.entries.is_empty();
        if cleared {
            warn!(
                old_root = ?self.sync_root,
                new_root = %root.display(),
                entries = self.entries.len(),
                "Sync root changed, discarding sync state"
            );
        }
        self.entries.clear();
        self.sync_root = Some(root.to_path_buf());
        self.save().await?;
        Ok(cleared)
    }

    pub fn get(&self, path: &RelativePath) -> Option<&SyncedEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &RelativePath) -> bool {
        self.entries.contains_key(path)
    }

    pub fn entries(&self) -> &BTreeMap<RelativePath, SyncedEntry> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds or replaces a verified entry and persists
    pub async fn upsert(&mut self, entry: SyncedEntry) -> Result<(), SyncError> {
        self.entries.insert(entry.path.clone(), entry);
        self.save().await
    }

    /// Removes an entry and persists
    pub async fn remove(&mut self, path: &RelativePath) -> Result<Option<SyncedEntry>, SyncError> {
        let removed = self.entries.remove(path);
        if removed.is_some() {
            self.save().await?;
        }
        Ok(removed)
    }

    /// Applies several upserts and removals with a single write
    pub async fn apply_batch(
        &mut self,
        upserts: Vec<SyncedEntry>,
        removals: &[RelativePath],
    ) -> Result<(), SyncError> {
        if upserts.is_empty() && removals.is_empty() {
            return Ok(());
        }
        for path in removals {
            self.entries.remove(path);
        }
        for entry in upserts {
            self.entries.insert(entry.path.clone(), entry);
        }
        self.save().await
    }

    /// Drops every entry and persists
    pub async fn clear(&mut self) -> Result<(), SyncError> {
        self.entries.clear();
        self.save().await
    }

    /// Writes the state atomically (temp file in the same directory + rename)
    pub async fn save(&self) -> Result<(), SyncError> {
        let file = StateFile {
            version: STATE_VERSION,
            sync_root: self.sync_root.clone(),
            entries: self
                .entries
                .iter()
                .map(|(p, e)| (p.clone(), StoredEntry::from_entry(e)))
                .collect(),
        };
        let bytes = serde_json::to_vec(&file)
            .map_err(|e| SyncError::State(format!("serializing state: {e}")))?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SyncError::State(format!("creating {}: {e}", parent.display()))
            })?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| SyncError::State(format!("writing {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| SyncError::State(format!("replacing {}: {e}", self.path.display())))?;

        debug!(entries = self.entries.len(), "Sync state saved");
        Ok(())
    }
}
