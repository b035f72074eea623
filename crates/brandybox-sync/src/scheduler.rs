//! Periodic sync scheduler
//!
//! Runs a cycle after an initial delay and then on a fixed interval. After
//! a cycle that failed to reach the server, the next attempt comes after
//! the shorter retry interval instead.
//!
//! [`SyncTrigger::run_sync_now`] wakes the loop early. Requests arriving
//! while a cycle runs are coalesced into a single follow-up cycle.
//!
//! ```text
//! initial delay ──→ cycle ──→ wait(interval | retry interval) ──→ cycle ...
//!                     ▲                │
//!                     └── run_sync_now ┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use brandybox_core::config::SyncConfig;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::SyncEngine;
use crate::SyncError;

/// Something that can run one sync cycle
#[async_trait::async_trait]
pub trait CycleRunner: Send + Sync {
    async fn run_once(&self, cancel: &CancellationToken) -> Result<(), SyncError>;
}

#[async_trait::async_trait]
impl CycleRunner for SyncEngine {
    async fn run_once(&self, cancel: &CancellationToken) -> Result<(), SyncError> {
        self.run_cycle(cancel).await.map(|_| ())
    }
}

/// Timing of the background loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub initial_delay: Duration,
    pub interval: Duration,
    /// Used instead of `interval` after a connection failure
    pub retry_interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(15),
            interval: Duration::from_secs(60),
            retry_interval: Duration::from_secs(15),
        }
    }
}

impl From<&SyncConfig> for ScheduleConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            initial_delay: Duration::from_secs(config.initial_delay_secs),
            interval: Duration::from_secs(config.interval_secs.max(1)),
            retry_interval: Duration::from_secs(config.retry_interval_secs.max(1)),
        }
    }
}

/// Handle for requesting an immediate cycle
#[derive(Debug, Clone, Default)]
pub struct SyncTrigger {
    notify: Arc<Notify>,
}

impl SyncTrigger {
    /// Asks the scheduler to run a cycle as soon as possible
    ///
    /// While a cycle is running, any number of calls result in exactly one
    /// follow-up cycle.
    pub fn run_sync_now(&self) {
        debug!("Immediate sync requested");
        self.notify.notify_one();
    }
}

pub struct PeriodicScheduler {
    runner: Arc<dyn CycleRunner>,
    config: ScheduleConfig,
    trigger: SyncTrigger,
}

impl PeriodicScheduler {
    pub fn new(runner: Arc<dyn CycleRunner>, config: ScheduleConfig) -> Self {
        info!(
            initial_delay_secs = config.initial_delay.as_secs(),
            interval_secs = config.interval.as_secs(),
            retry_interval_secs = config.retry_interval.as_secs(),
            "Creating sync scheduler"
        );
        Self {
            runner,
            config,
            trigger: SyncTrigger::default(),
        }
    }

    pub fn trigger(&self) -> SyncTrigger {
        self.trigger.clone()
    }

    /// Runs cycles until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        info!("Sync scheduler starting");

        if !self.wait(self.config.initial_delay, &cancel).await {
            info!("Sync scheduler stopped before the first cycle");
            return;
        }

        loop {
            let next = match self.runner.run_once(&cancel).await {
                Ok(()) => self.config.interval,
                Err(e) if e.is_connection_error() => {
                    warn!(
                        error = %e,
                        retry_secs = self.config.retry_interval.as_secs(),
                        "Server unreachable, retrying sooner"
                    );
                    self.config.retry_interval
                }
                Err(SyncError::Cancelled) => break,
                Err(e) => {
                    debug!(error = %e, "Cycle ended with an error");
                    self.config.interval
                }
            };

            if !self.wait(next, &cancel).await {
                break;
            }
        }

        info!("Sync scheduler stopped");
    }

    /// Sleeps for `duration` or until a sync is requested
    ///
    /// Returns false when cancelled.
    async fn wait(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = self.trigger.notify.notified() => {
                debug!("Woken by sync request");
                true
            }
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

// ============================================================================
// Unit tests
// ============================================================================
