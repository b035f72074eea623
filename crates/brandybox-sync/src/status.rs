//! Observable sync status
//!
//! The engine publishes a [`SyncStatus`] on a `tokio::sync::watch` channel
//! whenever the cycle changes phase or makes progress. Consumers (the
//! daemon's status file writer, the CLI) subscribe instead of being called
//! back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Where the engine is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Idle,
    Listing,
    Deleting,
    Transferring,
    Synced,
    Warning,
    Error,
}

impl SyncPhase {
    /// Whether a cycle is running in this phase
    pub fn is_active(self) -> bool {
        matches!(self, Self::Listing | Self::Deleting | Self::Transferring)
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Listing => "listing",
            Self::Deleting => "deleting",
            Self::Transferring => "transferring",
            Self::Synced => "synced",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub label: String,
    pub current: u64,
    pub total: u64,
}

/// Snapshot of the engine's state for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    #[serde(rename = "state")]
    pub phase: SyncPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    pub updated_at: DateTime<Utc>,
}

impl SyncStatus {
    pub fn new(phase: SyncPhase) -> Self {
        Self {
            phase,
            message: None,
            progress: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_progress(mut self, label: impl Into<String>, current: u64, total: u64) -> Self {
        self.progress = Some(Progress {
            label: label.into(),
            current,
            total,
        });
        self
    }
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::new(SyncPhase::Idle)
    }
}

/// Sending half of the status channel, shared by engine components
#[derive(Debug, Clone)]
pub struct StatusPublisher {
    tx: watch::Sender<SyncStatus>,
}

impl StatusPublisher {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SyncStatus::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> SyncStatus {
        self.tx.borrow().clone()
    }

    pub fn publish(&self, status: SyncStatus) {
        // send_replace keeps the value even with no receiver attached
        self.tx.send_replace(status);
    }

    pub fn phase(&self, phase: SyncPhase) {
        self.publish(SyncStatus::new(phase));
    }

    pub fn progress(&self, phase: SyncPhase, label: &str, current: u64, total: u64) {
        self.publish(SyncStatus::new(phase).with_progress(label, current, total));
    }
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}
