//! Local filesystem adapter (secondary/driven adapter)
//!
//! Implements [`ILocalFileSystem`] using `tokio::fs` for file I/O and
//! `walkdir` (on a blocking thread) for the tree walk.
//!
//! ## Design Decisions
//!
//! - **Atomic writes**: content streams into a hidden `.name.brandybox-part`
//!   sibling that is renamed over the target once fully written and synced.
//!   The walk ignores those names, so an interrupted download never shows
//!   up as a local file.
//! - **Streaming SHA-256**: hashes are computed in fixed-size chunks while
//!   reading or writing; file content is never held in memory whole.
//! - **Symlinks** are not followed and not synced.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use brandybox_core::domain::{ContentHash, EntryKind, RelativePath};
use brandybox_core::ports::{
    ByteReader, FileSystemState, FsError, ILocalFileSystem, WalkOutcome, WalkedEntry, WriteOutcome,
};
use filetime::FileTime;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::ignore;

const CHUNK_SIZE: usize = 64 * 1024;

/// Adapter that bridges the [`ILocalFileSystem`] port to the real filesystem.
///
/// Zero-sized: all context comes from the path arguments.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystemAdapter;

impl LocalFileSystemAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Modification time of `meta` in seconds since the Unix epoch
fn mtime_secs(meta: &std::fs::Metadata) -> f64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn digest_to_hash(hasher: Sha256, path: &Path) -> Result<ContentHash, FsError> {
    ContentHash::from_digest(&hasher.finalize()).map_err(|e| FsError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn walkdir_error(root: &Path, err: &walkdir::Error) -> FsError {
    let path = err.path().unwrap_or(root);
    match err.io_error() {
        Some(io) => FsError::from_io(path, io),
        None => FsError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        },
    }
}

fn walk_blocking(root: &Path) -> Result<WalkOutcome, FsError> {
    let meta = std::fs::metadata(root).map_err(|e| FsError::from_io(root, &e))?;
    if !meta.is_dir() {
        return Err(FsError::Io {
            path: root.to_path_buf(),
            message: "sync root is not a directory".to_string(),
        });
    }
    std::fs::read_dir(root).map_err(|e| FsError::from_io(root, &e))?;

    let mut outcome = WalkOutcome::default();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !e.file_name().to_str().is_some_and(ignore::is_ignored));

    for item in walker {
        let entry = match item {
            Ok(entry) => entry,
            Err(err) => {
                let fs_err = walkdir_error(root, &err);
                match err.path() {
                    Some(p) if p == root => return Err(fs_err),
                    Some(p) => match RelativePath::from_local(root, p) {
                        Ok(rel) => {
                            warn!(path = %rel, error = %fs_err, "Cannot read path, skipping");
                            outcome.errors.push((rel, fs_err));
                        }
                        Err(e) => warn!(error = %e, "Cannot read path with unsupported name"),
                    },
                    None => warn!(error = %fs_err, "Walk error without a path"),
                }
                continue;
            }
        };

        let rel = match RelativePath::from_local(root, entry.path()) {
            Ok(rel) => rel,
            Err(e) => {
                warn!(error = %e, "Skipping path with unsupported name");
                continue;
            }
        };

        let file_type = entry.file_type();
        let kind = if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            debug!(path = %rel, "Skipping symlink or special file");
            continue;
        };

        match entry.metadata() {
            Ok(meta) => outcome.entries.push(WalkedEntry {
                path: rel,
                kind,
                size: if kind.is_dir() { 0 } else { meta.len() },
                modified: mtime_secs(&meta),
            }),
            Err(err) => {
                let fs_err = walkdir_error(root, &err);
                warn!(path = %rel, error = %fs_err, "Cannot stat path, skipping");
                outcome.errors.push((rel, fs_err));
            }
        }
    }

    Ok(outcome)
}

/// Removes a directory that left the sync, never recursively.
///
/// Leftover OS metadata files and partial downloads are cleared first.
/// Anything else still inside (a `.git` tree, a file created after the
/// snapshot) keeps the directory and fails the delete.
async fn remove_synced_directory(path: &Path) -> Result<(), FsError> {
    let mut entries = tokio::fs::read_dir(path)
        .await
        .map_err(|e| FsError::from_io(path, &e))?;
    let mut disposable = Vec::new();
    let mut remaining = Vec::new();

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| FsError::from_io(path, &e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_file = entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false);
        if is_file
            && (ignore::IGNORED_BASENAMES.contains(&name.as_str()) || ignore::is_partial_name(&name))
        {
            disposable.push(entry.path());
        } else {
            remaining.push(name);
        }
    }

    if !remaining.is_empty() {
        remaining.sort();
        return Err(FsError::Io {
            path: path.to_path_buf(),
            message: format!("directory not empty, keeping {}", remaining.join(", ")),
        });
    }

    for file in disposable {
        match tokio::fs::remove_file(&file).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(FsError::from_io(&file, &e)),
        }
    }

    // Fails if something appeared since the listing
    tokio::fs::remove_dir(path)
        .await
        .map_err(|e| FsError::from_io(path, &e))
}

fn join_error(path: &Path, err: tokio::task::JoinError) -> FsError {
    FsError::Io {
        path: path.to_path_buf(),
        message: format!("blocking task failed: {err}"),
    }
}

#[async_trait::async_trait]
impl ILocalFileSystem for LocalFileSystemAdapter {
    #[instrument(skip(self, root), fields(root = %root.display()))]
    async fn walk(&self, root: &Path) -> Result<WalkOutcome, FsError> {
        let owned = root.to_path_buf();
        let outcome = tokio::task::spawn_blocking(move || walk_blocking(&owned))
            .await
            .map_err(|e| join_error(root, e))??;
        debug!(
            entries = outcome.entries.len(),
            errors = outcome.errors.len(),
            "walk complete"
        );
        Ok(outcome)
    }

    #[instrument(skip(self, path), fields(path = %path.display()))]
    async fn get_state(&self, path: &Path) -> Result<FileSystemState, FsError> {
        let meta = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("path not found");
                return Ok(FileSystemState::not_found());
            }
            Err(e) => return Err(FsError::from_io(path, &e)),
        };

        let kind = if meta.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        Ok(FileSystemState {
            exists: true,
            kind,
            size: if kind.is_dir() { 0 } else { meta.len() },
            modified: mtime_secs(&meta),
        })
    }

    #[instrument(skip(self, path), fields(path = %path.display()))]
    async fn open_read(&self, path: &Path) -> Result<ByteReader, FsError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| FsError::from_io(path, &e))?;
        Ok(Box::new(file))
    }

    #[instrument(skip(self, path, reader), fields(path = %path.display()))]
    async fn write_atomic(
        &self,
        path: &Path,
        mut reader: ByteReader,
        expected_size: Option<u64>,
        expected_hash: Option<&ContentHash>,
    ) -> Result<WriteOutcome, FsError> {
        let parent = path.parent().ok_or_else(|| FsError::Io {
            path: path.to_path_buf(),
            message: "target has no parent directory".to_string(),
        })?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FsError::Io {
                path: path.to_path_buf(),
                message: "target has no valid file name".to_string(),
            })?;

        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| FsError::from_io(parent, &e))?;

        let tmp_path: PathBuf = parent.join(ignore::partial_name_for(file_name));
        debug!(?tmp_path, "writing to temporary file");

        let result = async {
            let mut file = tokio::fs::File::create(&tmp_path)
                .await
                .map_err(|e| FsError::from_io(&tmp_path, &e))?;
            let mut hasher = Sha256::new();
            let mut size = 0u64;
            let mut buf = vec![0u8; CHUNK_SIZE];

            loop {
                let n = reader.read(&mut buf).await.map_err(|e| FsError::Io {
                    path: path.to_path_buf(),
                    message: format!("reading source stream: {e}"),
                })?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                file.write_all(&buf[..n])
                    .await
                    .map_err(|e| FsError::from_io(&tmp_path, &e))?;
                size += n as u64;
            }

            file.flush().await.map_err(|e| FsError::from_io(&tmp_path, &e))?;
            file.sync_all()
                .await
                .map_err(|e| FsError::from_io(&tmp_path, &e))?;
            drop(file);

            let hash = digest_to_hash(hasher, path)?;
            if let Some(expected) = expected_size.filter(|&e| e != size) {
                return Err(FsError::Mismatch {
                    path: path.to_path_buf(),
                    message: format!("expected {expected} bytes, received {size}"),
                });
            }
            if let Some(expected) = expected_hash.filter(|&e| *e != hash) {
                return Err(FsError::Mismatch {
                    path: path.to_path_buf(),
                    message: format!("expected hash {expected}, received {hash}"),
                });
            }

            tokio::fs::rename(&tmp_path, path)
                .await
                .map_err(|e| FsError::from_io(path, &e))?;

            Ok::<_, FsError>(WriteOutcome { size, hash })
        }
        .await;

        if result.is_err() {
            if let Err(e) = tokio::fs::remove_file(&tmp_path).await {
                if e.kind() != ErrorKind::NotFound {
                    warn!(error = %e, "Could not remove partial download");
                }
            }
        }

        if let Ok(outcome) = &result {
            debug!(bytes = outcome.size, "write complete");
        }
        result
    }

    #[instrument(skip(self, path), fields(path = %path.display()))]
    async fn delete(&self, path: &Path, kind: EntryKind) -> Result<(), FsError> {
        match kind {
            EntryKind::File => tokio::fs::remove_file(path)
                .await
                .map_err(|e| FsError::from_io(path, &e))?,
            EntryKind::Directory => remove_synced_directory(path).await?,
        }
        debug!(%kind, "delete complete");
        Ok(())
    }

    #[instrument(skip(self, path), fields(path = %path.display()))]
    async fn create_directory(&self, path: &Path) -> Result<(), FsError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| FsError::from_io(path, &e))?;
        debug!("directory created");
        Ok(())
    }

    #[instrument(skip(self, path), fields(path = %path.display()))]
    async fn compute_hash(&self, path: &Path) -> Result<ContentHash, FsError> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| FsError::from_io(path, &e))?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| FsError::from_io(path, &e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        let hash = digest_to_hash(hasher, path)?;
        debug!(%hash, "hash computed");
        Ok(hash)
    }

    #[instrument(skip(self, path), fields(path = %path.display()))]
    async fn set_modified(&self, path: &Path, modified: f64) -> Result<(), FsError> {
        let secs = modified.trunc() as i64;
        let nanos = ((modified - modified.trunc()) * 1e9)
            .round()
            .clamp(0.0, 999_999_999.0) as u32;
        let time = FileTime::from_unix_time(secs, nanos);
        let owned = path.to_path_buf();

        tokio::task::spawn_blocking(move || filetime::set_file_mtime(&owned, time))
            .await
            .map_err(|e| join_error(path, e))?
            .map_err(|e| FsError::from_io(path, &e))
    }

    #[instrument(skip(self, root, path), fields(path = %path.display()))]
    async fn prune_empty_parents(&self, root: &Path, path: &Path) -> Result<(), FsError> {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == root || !dir.starts_with(root) {
                break;
            }
            match tokio::fs::remove_dir(dir).await {
                Ok(()) => debug!(dir = %dir.display(), "removed empty directory"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                // Not empty (or not ours to remove): stop climbing
                Err(_) => break,
            }
            current = dir.parent();
        }
        Ok(())
    }
}

// ============================================================================
// Unit tests
// ============================================================================
