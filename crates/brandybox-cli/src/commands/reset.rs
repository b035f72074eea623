//! Reset command - Forget the sync state
//!
//! Without a state every path on both sides looks new, so the next cycle
//! only transfers and never deletes. The daemon keeps its own copy of the
//! state in memory; stop it before resetting.

use std::path::Path;

use anyhow::{Context, Result};
use brandybox_core::config::Config;
use brandybox_sync::state::StateStore;
use clap::Args;
use tracing::info;

use super::CliContext;

#[derive(Debug, Args)]
pub struct ResetCommand {
    /// Confirm the reset
    #[arg(long)]
    pub yes: bool,
}

impl ResetCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let formatter = ctx.formatter();
        let state_path = Config::state_path();

        if !self.yes {
            formatter.warn("This forgets which files were synced. Run again with --yes to confirm.");
            return Ok(());
        }

        let removed = reset_state(&state_path).await?;

        if ctx.is_json() {
            formatter.print_json(&serde_json::json!({
                "success": true,
                "state_path": state_path.display().to_string(),
                "entries_removed": removed,
            }));
        } else {
            formatter.success(&format!("Sync state reset ({removed} entries forgotten)"));
            formatter.info("The next sync compares both sides from scratch without deleting anything.");
        }
        Ok(())
    }
}

/// Clears the state at `path`; returns how many entries it held
async fn reset_state(path: &Path) -> Result<usize> {
    let mut state = StateStore::open(path)
        .await
        .context("Failed to open sync state")?;
    let count = state.len();
    state.clear().await.context("Failed to write sync state")?;
    info!(entries = count, path = %path.display(), "Sync state cleared");
    Ok(count)
}
