//! Remote store port (driven/secondary port)
//!
//! The interface the engine uses to reach the per-account file store.
//! Implementations own authentication and wire details; the engine sees
//! listings as [`RemoteItem`]s and content as streamed [`ByteReader`]s.
//!
//! ## Design Notes
//!
//! - Errors are classified into [`TransportError`] so the engine can tell
//!   a cycle-aborting failure from a retryable or skippable one.
//! - `delete` is idempotent: deleting an absent path succeeds.
//! - Stores that have no notion of directories keep the default
//!   `models_directories() == false`; directories are then implied by the
//!   paths of the files inside them.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::domain::{ContentHash, EntryKind, RelativePath};

/// Streamed content passed across the port
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

/// Transport failure categories
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Credentials missing, expired or rejected (401/403)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The path does not exist on the server (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// The server asked us to slow down (429)
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Server-supplied hint, if any
        retry_after: Option<Duration>,
    },

    /// Connection, DNS or timeout failure
    #[error("Network error: {0}")]
    Network(String),

    /// Server-side failure
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The response could not be interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// Whether retrying the same request may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Network(_) => true,
            // 507: the account is out of storage, retrying will not help
            Self::Server { status, .. } => *status >= 500 && *status != 507,
            Self::Unauthorized(_) | Self::NotFound(_) | Self::InvalidResponse(_) => false,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Server-supplied backoff hint for rate limiting
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// One item of the remote listing, as reported by the store
///
/// Paths are raw strings here; the snapshot collector validates them and
/// drops anything that is not a valid [`RelativePath`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub path: String,
    pub kind: EntryKind,
    pub size: Option<u64>,
    /// Modification time in seconds since the Unix epoch
    pub modified: f64,
    pub hash: Option<ContentHash>,
}

/// What the store reports back after an upload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadReceipt {
    pub size: Option<u64>,
    pub hash: Option<ContentHash>,
    /// Modification time the store assigned to the new content
    pub modified: Option<f64>,
}

/// Remote file store operations
#[async_trait::async_trait]
pub trait IRemoteStore: Send + Sync {
    /// Lists every file (and directory, where modelled) of the account
    async fn list_remote(&self) -> Result<Vec<RemoteItem>, TransportError>;

    /// Uploads `size` bytes read from `reader` to `path`, replacing any
    /// existing content
    async fn upload(
        &self,
        path: &RelativePath,
        reader: ByteReader,
        size: u64,
    ) -> Result<UploadReceipt, TransportError>;

    /// Opens a streamed download of `path`
    ///
    /// Fails with [`TransportError::NotFound`] when the file is absent.
    async fn download(&self, path: &RelativePath) -> Result<ByteReader, TransportError>;

    /// Deletes `path`; an already-absent path is not an error
    async fn delete(&self, path: &RelativePath, kind: EntryKind) -> Result<(), TransportError>;

    /// Whether the store reports and stores directories explicitly
    fn models_directories(&self) -> bool {
        false
    }

    /// Creates a directory on stores that model them
    async fn create_directory(&self, _path: &RelativePath) -> Result<(), TransportError> {
        Ok(())
    }
}
