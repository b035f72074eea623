//! Status command - Show synchronization status
//!
//! Reads the status file mirrored by the daemon and the persisted sync
//! state. Nothing here talks to the daemon; with `--remote` the server is
//! asked for the account's storage usage.

use std::path::Path;

use anyhow::{Context, Result};
use brandybox_api::ApiClient;
use brandybox_core::config::Config;
use brandybox_sync::state::StateStore;
use brandybox_sync::SyncStatus;
use chrono::Utc;
use clap::Args;

use super::CliContext;
use crate::output::format_bytes;

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Also query storage usage from the server
    #[arg(long)]
    pub remote: bool,
}

impl StatusCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let formatter = ctx.formatter();
        let config = ctx.load_config();

        let status_path = Config::status_path();
        let status = read_status(&status_path).await?;

        let state = StateStore::open(&Config::state_path())
            .await
            .context("Failed to read sync state")?;
        let root = config.sync.root_path();

        let storage = if self.remote {
            match ApiClient::from_config(&config) {
                Ok(client) => match client.storage().await {
                    Ok(info) => Some(info),
                    Err(e) => {
                        formatter.warn(&format!("Could not query storage: {e}"));
                        None
                    }
                },
                Err(e) => {
                    formatter.warn(&format!("{e:#}"));
                    None
                }
            }
        } else {
            None
        };

        if ctx.is_json() {
            let json = serde_json::json!({
                "status": status,
                "sync_root": root.display().to_string(),
                "state_root": state.sync_root().map(|p| p.display().to_string()),
                "tracked_entries": state.len(),
                "storage": storage.as_ref().map(|s| serde_json::json!({
                    "used_bytes": s.used_bytes,
                    "limit_bytes": s.limit_bytes,
                })),
            });
            formatter.print_json(&json);
            return Ok(());
        }

        match &status {
            Some(status) => {
                let line = match &status.message {
                    Some(message) => format!("{}: {}", status.phase, message),
                    None => status.phase.to_string(),
                };
                formatter.success(&line);
                formatter.info(&format!("Updated:  {}", describe_age(status)));
                if let Some(progress) = &status.progress {
                    formatter.info(&format!(
                        "Progress: {} {}/{}",
                        progress.label, progress.current, progress.total
                    ));
                }
            }
            None => {
                formatter.warn("No status recorded yet. Is brandyboxd running?");
            }
        }

        formatter.info(&format!("Folder:   {}", root.display()));
        formatter.info(&format!("Tracked:  {} entries", state.len()));
        if let Some(state_root) = state.sync_root() {
            if state_root != root {
                formatter.warn(&format!(
                    "State belongs to {}; the next cycle will start fresh",
                    state_root.display()
                ));
            }
        }

        if let Some(info) = storage {
            let used = format_bytes(info.used_bytes);
            match info.limit_bytes {
                Some(limit) => {
                    formatter.info(&format!("Storage:  {} of {}", used, format_bytes(limit)))
                }
                None => formatter.info(&format!("Storage:  {} used", used)),
            }
        }

        Ok(())
    }
}

/// Reads the status file; `None` when the daemon never wrote one
async fn read_status(path: &Path) -> Result<Option<SyncStatus>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };
    let status = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(status))
}

fn describe_age(status: &SyncStatus) -> String {
    let seconds = (Utc::now() - status.updated_at).num_seconds().max(0);
    let ago = match seconds {
        0..=59 => format!("{seconds}s ago"),
        60..=3599 => format!("{}m ago", seconds / 60),
        _ => format!("{}h ago", seconds / 3600),
    };
    format!("{} ({})", status.updated_at.format("%Y-%m-%d %H:%M:%S UTC"), ago)
}
