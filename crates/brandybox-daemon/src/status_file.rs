//! Mirrors the engine status into `status.json`
//!
//! Tray icons and the CLI read this file instead of talking to the daemon.
//! Every write goes to a temporary file first and is renamed into place,
//! so readers never see a half-written document.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use brandybox_sync::{SyncPhase, SyncStatus};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Writes `status` to `path` atomically
pub async fn write_status(path: &Path, status: &SyncStatus) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(status).context("serializing status")?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("renaming {} into place", tmp.display()))?;
    Ok(())
}

/// Writes every status change until `cancel` fires or the engine goes
/// away, then records the daemon as stopped
pub async fn mirror(
    mut updates: watch::Receiver<SyncStatus>,
    path: PathBuf,
    cancel: CancellationToken,
) {
    info!(path = %path.display(), "Mirroring sync status");

    loop {
        let status = updates.borrow_and_update().clone();
        if let Err(e) = write_status(&path, &status).await {
            warn!(error = %e, "Could not write status file");
        } else {
            debug!(state = %status.phase, "Status file updated");
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    let stopped = SyncStatus::new(SyncPhase::Idle).with_message("Daemon stopped");
    if let Err(e) = write_status(&path, &stopped).await {
        warn!(error = %e, "Could not write final status");
    }
}
