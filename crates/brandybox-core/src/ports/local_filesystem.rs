//! Local filesystem port (driven/secondary port)
//!
//! This module defines the interface for the local side of a sync: walking
//! the sync root, streaming file content in and out, and adjusting
//! metadata after a verified transfer.
//!
//! ## Design Notes
//!
//! - Paths passed in are absolute; the engine resolves [`RelativePath`]s
//!   against the sync root before calling the port.
//! - Errors are classified into [`FsError`] so a permission problem on one
//!   path can be skipped while a missing sync root aborts the cycle.
//! - `write_atomic` never leaves a partially written file at the target
//!   path: content goes to a temporary sibling that is renamed into place,
//!   and only once its size and hash match the expectation.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::remote_store::ByteReader;
use crate::domain::{ContentHash, EntryKind, RelativePath};

/// Local filesystem failure categories
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FsError {
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("Not found: {0}")]
    NotFound(PathBuf),

    #[error("I/O error on {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// Written content did not match what the source announced
    #[error("Content mismatch on {path}: {message}")]
    Mismatch { path: PathBuf, message: String },
}

impl FsError {
    /// Classify a `std::io::Error` raised while touching `path`
    #[must_use]
    pub fn from_io(path: &Path, err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                message: err.to_string(),
            },
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

/// Current state of one path on disk
#[derive(Debug, Clone, PartialEq)]
pub struct FileSystemState {
    pub exists: bool,
    pub kind: EntryKind,
    pub size: u64,
    /// Seconds since the Unix epoch
    pub modified: f64,
}

impl FileSystemState {
    /// Returns a state representing a non-existent path
    #[must_use]
    pub fn not_found() -> Self {
        Self {
            exists: false,
            kind: EntryKind::File,
            size: 0,
            modified: 0.0,
        }
    }

    #[must_use]
    pub fn is_regular_file(&self) -> bool {
        self.exists && self.kind == EntryKind::File
    }
}

/// One path discovered by [`ILocalFileSystem::walk`]
#[derive(Debug, Clone, PartialEq)]
pub struct WalkedEntry {
    pub path: RelativePath,
    pub kind: EntryKind,
    pub size: u64,
    pub modified: f64,
}

/// Everything a walk found, plus the paths it could not read
#[derive(Debug, Clone, Default)]
pub struct WalkOutcome {
    pub entries: Vec<WalkedEntry>,
    pub errors: Vec<(RelativePath, FsError)>,
}

/// Result of a streamed atomic write
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub size: u64,
    pub hash: ContentHash,
}

/// Local filesystem operations
#[async_trait::async_trait]
pub trait ILocalFileSystem: Send + Sync {
    /// Walks the tree below `root`
    ///
    /// Only an unreadable `root` is an error. Unreadable children are
    /// reported in [`WalkOutcome::errors`] and skipped.
    async fn walk(&self, root: &Path) -> Result<WalkOutcome, FsError>;

    /// Returns the current metadata of `path`
    async fn get_state(&self, path: &Path) -> Result<FileSystemState, FsError>;

    /// Opens `path` for streamed reading
    async fn open_read(&self, path: &Path) -> Result<ByteReader, FsError>;

    /// Streams `reader` into `path` atomically, creating parent directories
    ///
    /// When an expected size or hash is given and the streamed content
    /// differs, the target is left untouched and [`FsError::Mismatch`] is
    /// returned.
    async fn write_atomic(
        &self,
        path: &Path,
        reader: ByteReader,
        expected_size: Option<u64>,
        expected_hash: Option<&ContentHash>,
    ) -> Result<WriteOutcome, FsError>;

    /// Deletes a file, or a directory with whatever it still contains
    async fn delete(&self, path: &Path, kind: EntryKind) -> Result<(), FsError>;

    /// Creates a directory and any missing parents
    async fn create_directory(&self, path: &Path) -> Result<(), FsError>;

    /// Computes the SHA-256 of a file's content
    async fn compute_hash(&self, path: &Path) -> Result<ContentHash, FsError>;

    /// Sets the modification time of `path` (seconds since the Unix epoch)
    async fn set_modified(&self, path: &Path, modified: f64) -> Result<(), FsError>;

    /// Removes now-empty directories above `path`, stopping at `root`
    async fn prune_empty_parents(&self, root: &Path, path: &Path) -> Result<(), FsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_classifies() {
        let path = Path::new("/tmp/x");

        let err = FsError::from_io(path, &io::Error::from(io::ErrorKind::NotFound));
        assert!(err.is_not_found());

        let err = FsError::from_io(path, &io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(err.is_permission_denied());

        let err = FsError::from_io(path, &io::Error::new(io::ErrorKind::Other, "disk full"));
        assert_eq!(err.to_string(), "I/O error on /tmp/x: disk full");
    }

    #[test]
    fn test_not_found_state() {
        let state = FileSystemState::not_found();
        assert!(!state.exists);
        assert!(!state.is_regular_file());
    }
}
