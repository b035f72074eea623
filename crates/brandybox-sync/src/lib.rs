//! Brandy Box Sync - Three-way synchronization engine
//!
//! Provides:
//! - Local and remote snapshot collection
//! - Three-way planning against the last verified state
//! - Deepest-first deletion propagation in both directions
//! - Rate-limited concurrent transfers with retry
//! - Incrementally persisted sync state
//!
//! ## Modules
//!
//! - [`engine`] - Sync cycle orchestration and status publishing
//! - [`planner`] - Diff planner producing the ordered [`planner::ActionPlan`]
//! - [`deletion`] - Deletion propagator
//! - [`transfer`] - Transfer scheduler (worker pool, rate limit, retry)
//! - [`state`] - Durable store of verified entries
//! - [`snapshot`] - Local walk and remote listing
//! - [`filesystem`] - Local filesystem adapter (atomic writes, SHA-256)
//! - [`scheduler`] - Periodic background cycles and coalesced sync-now

pub mod clock;
pub mod deletion;
pub mod engine;
pub mod filesystem;
pub mod ignore;
pub mod metrics;
pub mod planner;
pub mod rate_limit;
pub mod retry;
pub mod scheduler;
pub mod snapshot;
pub mod state;
pub mod status;
pub mod transfer;

use std::path::PathBuf;

use brandybox_core::ports::{FsError, TransportError};
use thiserror::Error;

/// Errors that end a sync cycle
///
/// Per-path failures never surface here; they are reported as skips in
/// the cycle report instead.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote listing or another whole-cycle remote call failed
    #[error("Remote unavailable: {0}")]
    Transport(#[from] TransportError),

    /// The sync root is missing or unreadable
    #[error("Sync root unavailable: {path}: {source}")]
    RootUnavailable {
        path: PathBuf,
        #[source]
        source: FsError,
    },

    /// The state file could not be read or written
    #[error("State store error: {0}")]
    State(String),

    /// Another cycle is already running
    #[error("A sync cycle is already in progress")]
    CycleInProgress,

    /// The cycle was cancelled before it completed
    #[error("Sync cancelled")]
    Cancelled,

    /// Any other local I/O failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Whether the failure was reaching the server, as opposed to a local one
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_transient(),
            _ => false,
        }
    }
}

pub use engine::{CycleReport, SyncEngine, SyncOptions};
pub use status::{SyncPhase, SyncStatus};
