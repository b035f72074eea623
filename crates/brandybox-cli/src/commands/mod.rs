//! CLI subcommands

pub mod completions;
pub mod config;
pub mod reset;
pub mod status;
pub mod sync;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use brandybox_api::{ApiClient, HttpRemoteStore};
use brandybox_core::config::Config;
use brandybox_sync::clock::TokioClock;
use brandybox_sync::filesystem::LocalFileSystemAdapter;
use brandybox_sync::metrics::SyncMetrics;
use brandybox_sync::state::StateStore;
use brandybox_sync::{SyncEngine, SyncOptions};
use tracing::info;

use crate::output::{get_formatter, OutputFormat, OutputFormatter};

/// Global flags shared by every subcommand
#[derive(Debug, Clone)]
pub struct CliContext {
    pub format: OutputFormat,
    pub quiet: bool,
    pub config_path: PathBuf,
}

impl CliContext {
    pub fn formatter(&self) -> Box<dyn OutputFormatter> {
        get_formatter(self.format, self.quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// The configuration file, or defaults when it is missing or unreadable
    pub fn load_config(&self) -> Config {
        let config = Config::load_or_default(&self.config_path);
        info!(config_path = %self.config_path.display(), "Loaded configuration");
        config
    }
}

/// Wires the HTTP store, the local adapter and the persisted state into an
/// engine, the same way the daemon does
pub async fn build_engine(config: &Config) -> Result<SyncEngine> {
    let client = ApiClient::from_config(config)?;
    let remote = Arc::new(HttpRemoteStore::new(client));
    let local = Arc::new(LocalFileSystemAdapter::new());

    let state_path = Config::state_path();
    let state = StateStore::open(&state_path)
        .await
        .with_context(|| format!("Failed to open sync state {}", state_path.display()))?;
    let metrics = Arc::new(SyncMetrics::new()?);

    Ok(SyncEngine::new(
        SyncOptions::from_config(config),
        local,
        remote,
        state,
        Arc::new(TokioClock),
        metrics,
    ))
}
