//! Deletion propagator
//!
//! Runs the plan's deletions one at a time, deepest path first, on
//! whichever side they target. A deletion is dropped from the sync state
//! only after it succeeded (or the path was already gone), and the state
//! is saved right away.

use std::path::PathBuf;
use std::sync::Arc;

use brandybox_core::domain::EntryKind;
use brandybox_core::ports::{ILocalFileSystem, IRemoteStore};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::metrics::SyncMetrics;
use crate::planner::Action;
use crate::state::StateStore;
use crate::status::{StatusPublisher, SyncPhase};
use crate::transfer::SkippedPath;
use crate::SyncError;

/// What the deletion pass achieved
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeletionReport {
    pub deleted_local: usize,
    pub deleted_remote: usize,
    /// Deletions whose target was already gone
    pub already_absent: usize,
    pub failed: Vec<SkippedPath>,
    pub cancelled: bool,
}

enum Outcome {
    Deleted,
    AlreadyAbsent,
}

pub struct DeletionPropagator {
    root: PathBuf,
    local: Arc<dyn ILocalFileSystem>,
    remote: Arc<dyn IRemoteStore>,
    status: StatusPublisher,
    metrics: Arc<SyncMetrics>,
}

impl DeletionPropagator {
    pub fn new(
        root: PathBuf,
        local: Arc<dyn ILocalFileSystem>,
        remote: Arc<dyn IRemoteStore>,
        status: StatusPublisher,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            root,
            local,
            remote,
            status,
            metrics,
        }
    }

    /// Executes every deletion in `actions`, in the order given
    ///
    /// Non-deletion actions are ignored. Per-path failures are collected in
    /// the report and leave the state entry in place; only a failure to
    /// save the state ends the pass with an error.
    #[instrument(skip_all)]
    pub async fn execute(
        &self,
        actions: &[Action],
        state: &mut StateStore,
        cancel: &CancellationToken,
    ) -> Result<DeletionReport, SyncError> {
        let deletions: Vec<&Action> = actions.iter().filter(|a| a.is_deletion()).collect();
        let total = deletions.len() as u64;
        let mut report = DeletionReport::default();

        for (index, action) in deletions.into_iter().enumerate() {
            if cancel.is_cancelled() {
                info!(remaining = total - index as u64, "Deletions cancelled");
                report.cancelled = true;
                break;
            }
            self.status
                .progress(SyncPhase::Deleting, "deletions", index as u64, total);

            let path = action.path();
            let side = match action {
                Action::DeleteLocal { .. } => "local",
                _ => "remote",
            };

            match self.delete_one(action).await {
                Ok(outcome) => {
                    match outcome {
                        Outcome::Deleted if side == "local" => report.deleted_local += 1,
                        Outcome::Deleted => report.deleted_remote += 1,
                        Outcome::AlreadyAbsent => report.already_absent += 1,
                    }
                    self.metrics.record_deletion(side, "success");
                    state.remove(path).await?;
                    info!(%path, side, "Deleted");
                }
                Err(reason) => {
                    warn!(%path, side, %reason, "Deletion failed, will retry next cycle");
                    self.metrics.record_deletion(side, "failed");
                    report.failed.push(SkippedPath::new(path.clone(), action.label(), reason));
                }
            }
        }

        if total > 0 {
            info!(
                deleted_local = report.deleted_local,
                deleted_remote = report.deleted_remote,
                already_absent = report.already_absent,
                failed = report.failed.len(),
                "Deletions finished"
            );
        }
        Ok(report)
    }

    async fn delete_one(&self, action: &Action) -> Result<Outcome, String> {
        let path = action.path();
        match action {
            Action::DeleteLocal { kind, .. } => {
                let target = path.to_local(&self.root);
                match self.local.delete(&target, *kind).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {
                        debug!(%path, "Already absent locally");
                        return Ok(Outcome::AlreadyAbsent);
                    }
                    Err(e) => return Err(e.to_string()),
                }
                if *kind == EntryKind::File {
                    if let Err(e) = self.local.prune_empty_parents(&self.root, &target).await {
                        debug!(%path, error = %e, "Could not prune empty parents");
                    }
                }
                Ok(Outcome::Deleted)
            }
            Action::DeleteRemote { kind, .. } => match self.remote.delete(path, *kind).await {
                Ok(()) => Ok(Outcome::Deleted),
                Err(e) if e.is_not_found() => {
                    debug!(%path, "Already absent remotely");
                    Ok(Outcome::AlreadyAbsent)
                }
                Err(e) => Err(e.to_string()),
            },
            _ => Err(format!("{} is not a deletion", action.label())),
        }
    }
}
