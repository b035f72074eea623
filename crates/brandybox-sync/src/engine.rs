//! Sync cycle orchestration
//!
//! The [`SyncEngine`] runs one cycle at a time:
//!
//! 1. **Listing**: walk the sync root and list the remote store
//! 2. **Planning**: three-way diff against the verified state; confirmations
//!    and stale drops are saved immediately
//! 3. **Deleting**: propagate deletions, deepest first
//! 4. **Transferring**: directory creations, then concurrent file transfers
//!
//! and ends in `Synced` (nothing skipped) or `Warning` (skips or
//! conflicts). A cycle that cannot complete ends in `Error`, with the
//! state as the last successful step left it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use brandybox_core::config::Config;
use brandybox_core::domain::{CycleId, RelativePath, SyncedEntry};
use brandybox_core::ports::{ILocalFileSystem, IRemoteStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::clock::Clock;
use crate::deletion::{DeletionPropagator, DeletionReport};
use crate::metrics::SyncMetrics;
use crate::planner::{ActionPlan, Conflict, DiffPlanner, PlanOptions};
use crate::snapshot::SnapshotCollector;
use crate::state::StateStore;
use crate::status::{StatusPublisher, SyncPhase, SyncStatus};
use crate::transfer::{TransferOptions, TransferReport, TransferScheduler};
use crate::SyncError;

/// Engine settings derived from the configuration
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub root: PathBuf,
    pub plan: PlanOptions,
    pub transfers: TransferOptions,
}

impl SyncOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            plan: PlanOptions::default(),
            transfers: TransferOptions::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            root: config.sync.root_path(),
            plan: PlanOptions::from(&config.sync),
            transfers: TransferOptions::from(&config.transfers),
        }
    }
}

/// Summary of a completed cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: CycleId,
    pub outcome: SyncPhase,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Whether the state was discarded because the sync root changed
    pub state_reset: bool,
    pub confirmed: usize,
    pub stale_dropped: usize,
    pub guarded_deletions: usize,
    pub conflicts: Vec<Conflict>,
    pub deletions: DeletionReport,
    pub transfers: TransferReport,
}

impl CycleReport {
    /// Paths the cycle could not bring in sync
    pub fn skipped_count(&self) -> usize {
        self.deletions.failed.len() + self.transfers.skipped.len() + self.conflicts.len()
    }

    /// One-line status message for this cycle
    pub fn summary(&self) -> String {
        let t = &self.transfers;
        let deleted = self.deletions.deleted_local + self.deletions.deleted_remote;

        if self.outcome == SyncPhase::Warning {
            let mut parts = Vec::new();
            if t.skipped_uploads() > 0 {
                parts.push(format!("{} uploads", t.skipped_uploads()));
            }
            if t.skipped_downloads() > 0 {
                parts.push(format!("{} downloads", t.skipped_downloads()));
            }
            let other = t.skipped.len() - t.skipped_uploads() - t.skipped_downloads();
            if other > 0 {
                parts.push(format!("{other} directories"));
            }
            if !self.deletions.failed.is_empty() {
                parts.push(format!("{} deletions", self.deletions.failed.len()));
            }
            if !self.conflicts.is_empty() {
                parts.push(format!("{} conflicts", self.conflicts.len()));
            }
            let mut message = if parts.is_empty() {
                String::new()
            } else {
                format!("{} paths skipped ({})", self.skipped_count(), parts.join(", "))
            };
            if self.guarded_deletions > 0 {
                if !message.is_empty() {
                    message.push_str("; ");
                }
                message.push_str(&format!(
                    "{} remote deletions refused and downloaded instead",
                    self.guarded_deletions
                ));
            }
            return message;
        }

        if t.files_uploaded + t.files_downloaded + deleted == 0 {
            "Up to date".to_string()
        } else {
            format!(
                "Synced: {} uploaded, {} downloaded, {} deleted",
                t.files_uploaded, t.files_downloaded, deleted
            )
        }
    }
}

/// Three-way sync engine
///
/// Owns the [`StateStore`] behind an async mutex; a second cycle requested
/// while one is running fails with [`SyncError::CycleInProgress`].
pub struct SyncEngine {
    options: SyncOptions,
    local: Arc<dyn ILocalFileSystem>,
    state: Mutex<StateStore>,
    status: StatusPublisher,
    metrics: Arc<SyncMetrics>,
    planner: DiffPlanner,
    collector: SnapshotCollector,
    deletions: DeletionPropagator,
    transfers: TransferScheduler,
}

impl SyncEngine {
    pub fn new(
        options: SyncOptions,
        local: Arc<dyn ILocalFileSystem>,
        remote: Arc<dyn IRemoteStore>,
        state: StateStore,
        clock: Arc<dyn Clock>,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        let status = StatusPublisher::new();
        let root = options.root.clone();

        let collector = SnapshotCollector::new(local.clone(), remote.clone());
        let deletions = DeletionPropagator::new(
            root.clone(),
            local.clone(),
            remote.clone(),
            status.clone(),
            metrics.clone(),
        );
        let transfers = TransferScheduler::new(
            root,
            local.clone(),
            remote,
            options.transfers.clone(),
            clock,
            status.clone(),
            metrics.clone(),
        );
        metrics.set_tracked_entries(state.len());

        Self {
            planner: DiffPlanner::new(options.plan.clone()),
            options,
            local,
            state: Mutex::new(state),
            status,
            metrics,
            collector,
            deletions,
            transfers,
        }
    }

    pub fn root(&self) -> &Path {
        &self.options.root
    }

    /// Receives every status change from now on
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> SyncStatus {
        self.status.current()
    }

    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.metrics
    }

    /// Number of verified entries, or `None` while a cycle holds the state
    pub fn tracked_entries(&self) -> Option<usize> {
        self.state.try_lock().ok().map(|s| s.len())
    }

    /// Discards the verified state; the next cycle treats every path as new
    pub async fn reset(&self) -> Result<(), SyncError> {
        let mut state = self.lock_state()?;
        state.clear().await?;
        self.metrics.set_tracked_entries(0);
        info!("Sync state reset");
        Ok(())
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, StateStore>, SyncError> {
        self.state.try_lock().map_err(|_| SyncError::CycleInProgress)
    }

    /// Computes the plan a cycle would execute, without executing it or
    /// changing the state
    pub async fn plan_only(&self) -> Result<ActionPlan, SyncError> {
        let state = self.lock_state()?;
        let known = self.known_entries(&state);
        let local = self
            .collector
            .collect_local(&self.options.root, &known)
            .await?;
        let remote = self.collector.collect_remote().await?;
        Ok(self.planner.plan(&known, &local, &remote))
    }

    /// Runs one full cycle
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport, SyncError> {
        let mut state = self.lock_state()?;
        let cycle_id = CycleId::new();
        let span = info_span!("sync_cycle", cycle_id = %cycle_id);

        async {
            let started = Instant::now();
            info!(root = %self.options.root.display(), "Sync cycle started");

            let result = self.cycle(cycle_id, &mut state, cancel).await;
            let elapsed = started.elapsed();
            self.metrics.set_tracked_entries(state.len());

            match &result {
                Ok(report) => {
                    self.metrics
                        .record_cycle(&report.outcome.to_string(), elapsed.as_secs_f64());
                    self.status
                        .publish(SyncStatus::new(report.outcome).with_message(report.summary()));
                    info!(
                        outcome = %report.outcome,
                        uploaded = report.transfers.files_uploaded,
                        downloaded = report.transfers.files_downloaded,
                        deleted_local = report.deletions.deleted_local,
                        deleted_remote = report.deletions.deleted_remote,
                        skipped = report.skipped_count(),
                        duration_ms = report.duration_ms,
                        "Sync cycle completed"
                    );
                }
                Err(e) => {
                    self.metrics.record_cycle("error", elapsed.as_secs_f64());
                    self.status
                        .publish(SyncStatus::new(SyncPhase::Error).with_message(e.to_string()));
                    error!(error = %e, "Sync cycle failed");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    fn known_entries(&self, state: &StateStore) -> BTreeMap<RelativePath, SyncedEntry> {
        if state.sync_root() == Some(self.options.root.as_path()) {
            state.entries().clone()
        } else {
            Default::default()
        }
    }

    async fn cycle(
        &self,
        cycle_id: CycleId,
        state: &mut StateStore,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, SyncError> {
        let started_at = Utc::now();
        let started = Instant::now();
        let root = &self.options.root;

        self.status.phase(SyncPhase::Listing);
        let known = self.known_entries(state);
        self.ensure_root_exists(&known).await?;

        let local = self.collector.collect_local(root, &known).await?;
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let remote = self.collector.collect_remote().await?;

        let state_reset = state.ensure_root(root).await?;
        let plan = self.planner.plan(&known, &local, &remote);
        if plan.looks_like_wrong_folder() {
            warn!(
                downloads = plan.download_count(),
                uploads = plan.upload_count(),
                root = %root.display(),
                "Far more downloads than uploads, the sync folder may be wrong"
            );
        }

        state
            .apply_batch(plan.confirmations.clone(), &plan.stale)
            .await?;
        self.metrics.record_conflicts(plan.conflicts.len());

        self.status.phase(SyncPhase::Deleting);
        let deletions = self.deletions.execute(&plan.actions, state, cancel).await?;
        if deletions.cancelled {
            return Err(SyncError::Cancelled);
        }

        self.status.phase(SyncPhase::Transferring);
        let transfers = self.transfers.execute(&plan.actions, state, cancel).await?;
        if transfers.cancelled {
            return Err(SyncError::Cancelled);
        }

        let mut report = CycleReport {
            cycle_id,
            outcome: SyncPhase::Synced,
            started_at,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            state_reset,
            confirmed: plan.confirmations.len(),
            stale_dropped: plan.stale.len(),
            guarded_deletions: plan.guarded_deletions,
            conflicts: plan.conflicts,
            deletions,
            transfers,
        };
        if report.skipped_count() > 0 || report.guarded_deletions > 0 {
            report.outcome = SyncPhase::Warning;
        }
        Ok(report)
    }

    /// Creates a missing sync root, but only when nothing was synced into
    /// it before
    ///
    /// A missing root with known entries is more likely an unmounted drive
    /// than a fresh start; walking it then fails the cycle instead of
    /// planning the remote deletion of everything.
    async fn ensure_root_exists(
        &self,
        known: &BTreeMap<RelativePath, SyncedEntry>,
    ) -> Result<(), SyncError> {
        let root = &self.options.root;
        if !known.is_empty() {
            return Ok(());
        }
        let exists = self
            .local
            .get_state(root)
            .await
            .map(|s| s.exists)
            .unwrap_or(false);
        if !exists {
            info!(root = %root.display(), "Creating sync folder");
            self.local
                .create_directory(root)
                .await
                .map_err(|source| SyncError::RootUnavailable {
                    path: root.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}
