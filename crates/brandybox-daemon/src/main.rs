//! Brandy Box Daemon - Background synchronization service
//!
//! This binary runs as a user service and handles:
//! - Periodic sync cycles against the Brandy Box server
//! - Mirroring the engine status into `status.json`
//! - Immediate cycles on SIGUSR1
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! The daemon builds the HTTP remote store, the local filesystem adapter
//! and the sync engine, then hands the engine to the periodic scheduler.
//! Everything is stopped through one `CancellationToken`, triggered on
//! receipt of SIGTERM or SIGINT.

mod status_file;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use brandybox_api::{ApiClient, HttpRemoteStore};
use brandybox_core::config::{Config, LoggingConfig};
use brandybox_sync::clock::TokioClock;
use brandybox_sync::filesystem::LocalFileSystemAdapter;
use brandybox_sync::metrics::SyncMetrics;
use brandybox_sync::scheduler::{PeriodicScheduler, ScheduleConfig, SyncTrigger};
use brandybox_sync::state::StateStore;
use brandybox_sync::{SyncEngine, SyncOptions};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// How often to look for credentials while none are configured
const CREDENTIALS_RECHECK: Duration = Duration::from_secs(30);

// ============================================================================
// DaemonService
// ============================================================================

/// Owns the configuration and the shutdown token for the daemon's lifetime
struct DaemonService {
    config: Config,
    shutdown: CancellationToken,
}

impl DaemonService {
    fn new(config: Config, shutdown: CancellationToken) -> Self {
        Self { config, shutdown }
    }

    /// Runs the daemon until shutdown
    ///
    /// 1. Waits for usable credentials
    /// 2. Creates adapters and the SyncEngine
    /// 3. Starts the status file writer
    /// 4. Runs the periodic scheduler until cancelled
    async fn run(&self) -> Result<()> {
        let Some(client) = self.wait_for_credentials().await else {
            info!("Shutdown requested before credentials were available");
            return Ok(());
        };

        let remote = Arc::new(HttpRemoteStore::new(client));
        let local = Arc::new(LocalFileSystemAdapter::new());

        let state_path = Config::state_path();
        let state = StateStore::open(&state_path)
            .await
            .with_context(|| format!("Failed to open sync state {}", state_path.display()))?;
        let metrics = Arc::new(SyncMetrics::new().context("Failed to create metrics")?);

        let engine = Arc::new(SyncEngine::new(
            SyncOptions::from_config(&self.config),
            local,
            remote,
            state,
            Arc::new(TokioClock),
            metrics,
        ));
        info!(root = %engine.root().display(), "Sync engine ready");

        let status_task = tokio::spawn(status_file::mirror(
            engine.subscribe(),
            Config::status_path(),
            self.shutdown.clone(),
        ));

        let scheduler = PeriodicScheduler::new(engine, ScheduleConfig::from(&self.config.sync));
        tokio::spawn(sync_now_on_signal(scheduler.trigger(), self.shutdown.clone()));

        scheduler.run(self.shutdown.clone()).await;

        if let Err(e) = status_task.await {
            warn!(error = %e, "Status writer ended abnormally");
        }
        Ok(())
    }

    /// Builds the API client, retrying until credentials appear
    ///
    /// Returns `None` when shutdown is requested first.
    async fn wait_for_credentials(&self) -> Option<ApiClient> {
        let mut warned = false;
        loop {
            match ApiClient::from_config(&self.config) {
                Ok(client) => return Some(client),
                Err(e) if !warned => {
                    warn!(
                        error = %format!("{e:#}"),
                        "Waiting for credentials. Set BRANDYBOX_ACCESS_TOKEN or remote.token_file."
                    );
                    warned = true;
                }
                Err(_) => {}
            }

            tokio::select! {
                _ = tokio::time::sleep(CREDENTIALS_RECHECK) => {}
                _ = self.shutdown.cancelled() => return None,
            }
        }
    }
}

// ============================================================================
// Signals
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

/// Requests an immediate cycle on every SIGUSR1
#[cfg(unix)]
async fn sync_now_on_signal(trigger: SyncTrigger, cancel: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut usr1 = match signal(SignalKind::user_defined1()) {
        Ok(signal) => signal,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGUSR1 handler, sync-now disabled");
            return;
        }
    };

    loop {
        tokio::select! {
            received = usr1.recv() => {
                if received.is_none() {
                    break;
                }
                info!("Received SIGUSR1, syncing now");
                trigger.run_sync_now();
            }
            _ = cancel.cancelled() => break,
        }
    }
}

#[cfg(not(unix))]
async fn sync_now_on_signal(_trigger: SyncTrigger, _cancel: CancellationToken) {}

// ============================================================================
// Main entry point
// ============================================================================

/// Sets up tracing from the `logging` section; `RUST_LOG` takes precedence
fn init_tracing(logging: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = Config::default_path();
    let config = Config::load_or_default(&config_path);
    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config_path = %config_path.display(),
        "Brandy Box daemon starting (brandyboxd)"
    );

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!(field = %e.field, "{}", e.message);
        }
        anyhow::bail!(
            "Invalid configuration in {} ({} errors)",
            config_path.display(),
            errors.len()
        );
    }

    let shutdown_token = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown_token.clone()));

    let service = DaemonService::new(config, shutdown_token);
    let result = service.run().await;

    match &result {
        Ok(()) => info!("Brandy Box daemon shut down gracefully"),
        Err(e) => error!(error = %format!("{e:#}"), "Brandy Box daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
