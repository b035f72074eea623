//! Transfer scheduler
//!
//! Runs the plan's uploads and downloads. Directory creations go first,
//! one at a time and shallowest first; file transfers then run on a
//! bounded set of concurrent tasks. Every request start takes a token from
//! the shared [`TokenBucket`], independent of how many workers are busy.
//!
//! Workers never touch the [`StateStore`]: each reports its outcome back to
//! the scheduling loop, which records verified transfers and saves the
//! state before looking at the next result.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use brandybox_core::config::TransfersConfig;
use brandybox_core::domain::{
    ContentHash, EntryKind, LocalEntry, RelativePath, RemoteEntry, SyncedEntry,
};
use brandybox_core::ports::{FsError, ILocalFileSystem, IRemoteStore, TransportError};
use serde::Serialize;
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::metrics::SyncMetrics;
use crate::planner::Action;
use crate::rate_limit::TokenBucket;
use crate::retry::{RetryPolicy, Retryable};
use crate::state::StateStore;
use crate::status::{StatusPublisher, SyncPhase};
use crate::SyncError;

/// Local mtimes closer than this are the same stat value
const MTIME_EPSILON: f64 = 1e-3;

/// A path left out of this cycle, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedPath {
    pub path: RelativePath,
    pub operation: String,
    pub reason: String,
}

impl SkippedPath {
    pub fn new(path: RelativePath, operation: &str, reason: impl Into<String>) -> Self {
        Self {
            path,
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }
}

/// Worker pool and retry settings
#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub workers: usize,
    pub rate_per_second: f64,
    pub rate_burst: u32,
    pub retry: RetryPolicy,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            workers: 8,
            rate_per_second: 10.0,
            rate_burst: 10,
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&TransfersConfig> for TransferOptions {
    fn from(config: &TransfersConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            rate_per_second: config.rate_per_second,
            rate_burst: config.rate_burst.max(1),
            retry: RetryPolicy::from(config),
        }
    }
}

/// Totals of one transfer pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferReport {
    pub files_uploaded: usize,
    pub files_downloaded: usize,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
    pub directories_created: usize,
    pub skipped: Vec<SkippedPath>,
    pub cancelled: bool,
}

impl TransferReport {
    pub fn skipped_uploads(&self) -> usize {
        self.skipped
            .iter()
            .filter(|s| s.operation == "upload")
            .count()
    }

    pub fn skipped_downloads(&self) -> usize {
        self.skipped
            .iter()
            .filter(|s| s.operation == "download")
            .count()
    }
}

// ============================================================================
// Per-transfer failures
// ============================================================================

#[derive(Debug)]
enum TransferError {
    Transport(TransportError),
    Local(FsError),
    /// The server acknowledged different content than was sent
    Mismatch(String),
    /// The local file disappeared or stopped being a regular file
    Vanished,
    /// The local file was modified after planning or during the upload
    Changed,
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(TransportError::NotFound(_)) => write!(f, "not found on the server"),
            Self::Transport(e) => write!(f, "{e}"),
            Self::Local(e) => write!(f, "{e}"),
            Self::Mismatch(message) => write!(f, "verification failed: {message}"),
            Self::Vanished => write!(f, "file vanished before upload"),
            Self::Changed => write!(f, "file changed during sync"),
        }
    }
}

impl Retryable for TransferError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::Local(e) => e.is_retryable(),
            Self::Mismatch(_) => true,
            Self::Vanished | Self::Changed => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transport(e) => Retryable::retry_after(e),
            _ => None,
        }
    }
}

/// A verified transfer, ready to be recorded
struct Completed {
    entry: SyncedEntry,
    bytes: u64,
}

struct Outcome {
    action: Action,
    result: Result<Completed, TransferError>,
}

// ============================================================================
// Worker context
// ============================================================================

/// Everything a worker task needs, shared behind an `Arc`
struct Worker {
    root: PathBuf,
    local: Arc<dyn ILocalFileSystem>,
    remote: Arc<dyn IRemoteStore>,
    limiter: TokenBucket,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl Worker {
    async fn run(&self, action: Action) -> Outcome {
        let result = match &action {
            Action::Upload {
                path,
                size,
                hash,
                modified,
                ..
            } => {
                self.retry
                    .run(self.clock.as_ref(), "upload", |_| {
                        self.upload_once(path, *size, hash.as_ref(), *modified)
                    })
                    .await
            }
            Action::Download {
                path,
                size,
                hash,
                modified,
                ..
            } => {
                self.retry
                    .run(self.clock.as_ref(), "download", |_| {
                        self.download_once(path, *size, hash.as_ref(), *modified)
                    })
                    .await
            }
            _ => Err(TransferError::Mismatch(format!(
                "{} is not a transfer",
                action.label()
            ))),
        };
        Outcome { action, result }
    }

    async fn upload_once(
        &self,
        path: &RelativePath,
        planned_size: u64,
        planned_hash: Option<&ContentHash>,
        planned_modified: f64,
    ) -> Result<Completed, TransferError> {
        let source = path.to_local(&self.root);
        let before = self
            .local
            .get_state(&source)
            .await
            .map_err(TransferError::Local)?;
        if !before.is_regular_file() {
            return Err(TransferError::Vanished);
        }
        if before.size != planned_size || (before.modified - planned_modified).abs() > MTIME_EPSILON
        {
            return Err(TransferError::Changed);
        }

        let reader = self.local.open_read(&source).await.map_err(|e| {
            if e.is_not_found() {
                TransferError::Vanished
            } else {
                TransferError::Local(e)
            }
        })?;

        self.limiter.acquire().await;
        debug!(%path, bytes = before.size, "Uploading");
        let receipt = self
            .remote
            .upload(path, reader, before.size)
            .await
            .map_err(TransferError::Transport)?;

        if let Some(size) = receipt.size.filter(|&s| s != before.size) {
            return Err(TransferError::Mismatch(format!(
                "server stored {size} bytes, sent {}",
                before.size
            )));
        }
        if let (Some(sent), Some(stored)) = (planned_hash, &receipt.hash) {
            if sent != stored {
                return Err(TransferError::Mismatch(format!(
                    "server hash {stored} differs from {sent}"
                )));
            }
        }

        let after = self
            .local
            .get_state(&source)
            .await
            .map_err(TransferError::Local)?;
        if after.size != before.size || (after.modified - before.modified).abs() > MTIME_EPSILON {
            return Err(TransferError::Changed);
        }

        let local = LocalEntry::file(
            before.size,
            before.modified,
            planned_hash.cloned().or_else(|| receipt.hash.clone()),
        );
        let remote = receipt
            .modified
            .map(|m| RemoteEntry::file(Some(before.size), m, receipt.hash.clone()));
        Ok(Completed {
            entry: SyncedEntry::verified(path.clone(), &local, remote.as_ref()),
            bytes: before.size,
        })
    }

    async fn download_once(
        &self,
        path: &RelativePath,
        size: Option<u64>,
        hash: Option<&ContentHash>,
        modified: f64,
    ) -> Result<Completed, TransferError> {
        let target = path.to_local(&self.root);

        self.limiter.acquire().await;
        debug!(%path, "Downloading");
        let reader = self
            .remote
            .download(path)
            .await
            .map_err(TransferError::Transport)?;
        let written = self
            .local
            .write_atomic(&target, reader, size, hash)
            .await
            .map_err(TransferError::Local)?;

        if let Err(e) = self.local.set_modified(&target, modified).await {
            warn!(%path, error = %e, "Could not apply remote modification time");
        }
        let landed = self
            .local
            .get_state(&target)
            .await
            .map_err(TransferError::Local)?;

        let local = LocalEntry::file(written.size, landed.modified, Some(written.hash));
        let remote = RemoteEntry::file(size.or(Some(written.size)), modified, hash.cloned());
        Ok(Completed {
            entry: SyncedEntry::verified(path.clone(), &local, Some(&remote)),
            bytes: written.size,
        })
    }
}

// ============================================================================
// Scheduler
// ============================================================================

pub struct TransferScheduler {
    worker: Arc<Worker>,
    workers: usize,
    status: StatusPublisher,
    metrics: Arc<SyncMetrics>,
}

impl TransferScheduler {
    pub fn new(
        root: PathBuf,
        local: Arc<dyn ILocalFileSystem>,
        remote: Arc<dyn IRemoteStore>,
        options: TransferOptions,
        clock: Arc<dyn Clock>,
        status: StatusPublisher,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        let limiter = TokenBucket::new(options.rate_burst, options.rate_per_second, clock.clone());
        Self {
            worker: Arc::new(Worker {
                root,
                local,
                remote,
                limiter,
                retry: options.retry,
                clock,
            }),
            workers: options.workers.max(1),
            status,
            metrics,
        }
    }

    /// Executes every upload and download in `actions`
    ///
    /// Deletions in `actions` are ignored. Failed transfers are skipped and
    /// reported; they never end the pass. Once `cancel` fires no new
    /// transfer starts, but those in flight finish and are recorded.
    #[instrument(skip_all)]
    pub async fn execute(
        &self,
        actions: &[Action],
        state: &mut StateStore,
        cancel: &CancellationToken,
    ) -> Result<TransferReport, SyncError> {
        let mut report = TransferReport::default();
        let (directories, files): (Vec<&Action>, Vec<&Action>) = actions
            .iter()
            .filter(|a| !a.is_deletion())
            .partition(|a| a.kind() == EntryKind::Directory);

        let failed_dirs = self
            .create_directories(&directories, state, cancel, &mut report)
            .await?;
        if report.cancelled {
            return Ok(report);
        }

        let total = files.len() as u64;
        let mut done = 0u64;
        let mut pending = files.into_iter();
        let mut running = JoinSet::new();
        let mut in_flight: HashMap<task::Id, Action> = HashMap::new();

        loop {
            while running.len() < self.workers && !cancel.is_cancelled() {
                let Some(action) = pending.next() else {
                    break;
                };
                let path = action.path();
                if let Some(dir) = failed_dirs.iter().find(|d| path.is_descendant_of(d)) {
                    report.skipped.push(SkippedPath::new(
                        path.clone(),
                        action.label(),
                        format!("parent directory {dir} could not be created"),
                    ));
                    self.metrics.record_transfer(action.label(), "skipped");
                    done += 1;
                    self.status
                        .progress(SyncPhase::Transferring, "transfers", done, total);
                    continue;
                }
                let worker = Arc::clone(&self.worker);
                let owned = action.clone();
                let handle = running.spawn(async move { worker.run(owned).await });
                in_flight.insert(handle.id(), action.clone());
            }

            let Some(joined) = running.join_next_with_id().await else {
                break;
            };
            done += 1;
            match joined {
                Ok((id, outcome)) => {
                    in_flight.remove(&id);
                    self.record(outcome, state, &mut report).await?;
                }
                // The path stays out of the state and comes back next cycle
                Err(e) => self.record_task_failure(in_flight.remove(&e.id()), &e, &mut report),
            }
            self.status
                .progress(SyncPhase::Transferring, "transfers", done, total);
        }

        if cancel.is_cancelled() && pending.len() > 0 {
            info!(remaining = pending.len(), "Transfers cancelled");
            report.cancelled = true;
        }

        info!(
            uploaded = report.files_uploaded,
            downloaded = report.files_downloaded,
            bytes_up = report.bytes_uploaded,
            bytes_down = report.bytes_downloaded,
            directories = report.directories_created,
            skipped = report.skipped.len(),
            "Transfers finished"
        );
        Ok(report)
    }

    async fn create_directories(
        &self,
        directories: &[&Action],
        state: &mut StateStore,
        cancel: &CancellationToken,
        report: &mut TransferReport,
    ) -> Result<Vec<RelativePath>, SyncError> {
        let mut failed: Vec<RelativePath> = Vec::new();
        let worker = &self.worker;

        for action in directories {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let path = action.path();
            if failed.iter().any(|d| path.is_descendant_of(d)) {
                failed.push(path.clone());
                continue;
            }

            let result = match action {
                Action::Download { modified, .. } => {
                    let target = path.to_local(&worker.root);
                    let created = match worker.local.create_directory(&target).await {
                        Ok(()) => worker.local.get_state(&target).await,
                        Err(e) => Err(e),
                    };
                    created
                        .map(|st| {
                            SyncedEntry::verified(
                                path.clone(),
                                &LocalEntry::directory(st.modified),
                                Some(&RemoteEntry::directory(*modified)),
                            )
                        })
                        .map_err(|e| e.to_string())
                }
                Action::Upload { modified, .. } => worker
                    .retry
                    .run(worker.clock.as_ref(), "create remote directory", |_| {
                        worker.remote.create_directory(path)
                    })
                    .await
                    .map(|()| {
                        SyncedEntry::verified(path.clone(), &LocalEntry::directory(*modified), None)
                    })
                    .map_err(|e| e.to_string()),
                _ => continue,
            };

            match result {
                Ok(entry) => {
                    debug!(%path, side = action.label(), "Directory created");
                    state.upsert(entry).await?;
                    report.directories_created += 1;
                }
                Err(reason) => {
                    warn!(%path, %reason, "Could not create directory, skipping its contents");
                    report
                        .skipped
                        .push(SkippedPath::new(path.clone(), action.label(), reason));
                    failed.push(path.clone());
                }
            }
        }
        Ok(failed)
    }

    /// Parent directories a verified upload brought into existence remotely
    ///
    /// Stores without explicit directories create them implicitly, so they
    /// are in sync as soon as the first file below them is.
    async fn implied_parents(&self, path: &RelativePath, state: &StateStore) -> Vec<SyncedEntry> {
        if self.worker.remote.models_directories() {
            return Vec::new();
        }
        let mut parents = Vec::new();
        for dir in path.ancestors() {
            if state.contains(&dir) {
                continue;
            }
            match self.worker.local.get_state(&dir.to_local(&self.worker.root)).await {
                Ok(st) if st.exists && st.kind == EntryKind::Directory => {
                    parents.push(SyncedEntry::verified(
                        dir,
                        &LocalEntry::directory(st.modified),
                        None,
                    ));
                }
                _ => {}
            }
        }
        parents
    }

    /// Applies one worker outcome to the report and the state
    fn record_task_failure(
        &self,
        action: Option<Action>,
        err: &task::JoinError,
        report: &mut TransferReport,
    ) {
        let Some(action) = action else {
            error!(error = %err, "Transfer task failed");
            return;
        };
        let direction = action.label();
        let path = action.path();
        error!(%path, direction, error = %err, "Transfer task failed");
        self.metrics.record_transfer(direction, "skipped");
        let reason = if err.is_panic() {
            "transfer task panicked".to_string()
        } else {
            format!("transfer task failed: {err}")
        };
        report
            .skipped
            .push(SkippedPath::new(path.clone(), direction, reason));
    }

    async fn record(
        &self,
        outcome: Outcome,
        state: &mut StateStore,
        report: &mut TransferReport,
    ) -> Result<(), SyncError> {
        let Outcome { action, result } = outcome;
        let direction = action.label();
        let path = action.path();

        match result {
            Ok(completed) => {
                match &action {
                    Action::Upload { .. } => {
                        report.files_uploaded += 1;
                        report.bytes_uploaded += completed.bytes;
                    }
                    _ => {
                        report.files_downloaded += 1;
                        report.bytes_downloaded += completed.bytes;
                    }
                }
                self.metrics.record_transfer(direction, "success");
                self.metrics.record_bytes(direction, completed.bytes);
                info!(%path, direction, bytes = completed.bytes, "Transferred");

                let mut entries = vec![completed.entry];
                if matches!(action, Action::Upload { .. }) {
                    entries.extend(self.implied_parents(path, state).await);
                }
                state.apply_batch(entries, &[]).await?;
            }
            Err(e) => {
                warn!(%path, direction, error = %e, "Transfer skipped");
                self.metrics.record_transfer(direction, "skipped");
                report
                    .skipped
                    .push(SkippedPath::new(path.clone(), direction, e.to_string()));
            }
        }
        Ok(())
    }
}
