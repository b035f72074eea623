//! Sync command - Run one synchronization cycle
//!
//! Provides the `brandybox sync` CLI command which:
//! 1. Loads configuration and resolves the access token
//! 2. Creates the HTTP store, local adapter and persisted state
//! 3. Runs a single cycle (or only plans it with `--dry-run`)
//! 4. Displays the cycle report
//!
//! Ctrl+C cancels the cycle between actions; everything verified so far
//! stays recorded.

use anyhow::{Context, Result};
use brandybox_sync::planner::ActionPlan;
use brandybox_sync::{CycleReport, SyncPhase};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{build_engine, CliContext};
use crate::output::{format_bytes, format_duration_ms, plural, OutputFormatter};

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Show what would be done without making changes
    #[arg(long)]
    pub dry_run: bool,

    /// Print the cycle metrics in Prometheus text format afterwards
    #[arg(long)]
    pub metrics: bool,
}

impl SyncCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        let formatter = ctx.formatter();
        let config = ctx.load_config();

        let engine = match build_engine(&config).await {
            Ok(engine) => engine,
            Err(e) => {
                formatter.error(&format!("{e:#}"));
                formatter.info("Set BRANDYBOX_ACCESS_TOKEN or remote.token_file and try again.");
                anyhow::bail!("Cannot start sync");
            }
        };

        if self.dry_run {
            let plan = engine.plan_only().await.context("Planning failed")?;
            if ctx.is_json() {
                formatter.print_json(&serde_json::to_value(&plan)?);
            } else {
                print_plan(formatter.as_ref(), &plan);
            }
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let ctrl_c = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupted, stopping after the current action");
                    cancel.cancel();
                }
            }
        });

        formatter.info(&format!("Syncing {}", engine.root().display()));
        let result = engine.run_cycle(&cancel).await;
        ctrl_c.abort();
        let report = result.context("Sync failed")?;

        if ctx.is_json() {
            formatter.print_json(&serde_json::to_value(&report)?);
        } else {
            print_report(formatter.as_ref(), &report);
        }

        if self.metrics {
            print!("{}", engine.metrics().encode()?);
        }

        Ok(())
    }
}

fn print_plan(formatter: &dyn OutputFormatter, plan: &ActionPlan) {
    if plan.actions.is_empty() && plan.conflicts.is_empty() {
        formatter.success("Nothing to do, already up to date");
        return;
    }

    formatter.success(&format!(
        "Dry run: {} planned ({} uploads, {} downloads, {} deletions)",
        plural(plan.actions.len(), "action"),
        plan.upload_count(),
        plan.download_count(),
        plan.deletions().count()
    ));
    for action in &plan.actions {
        formatter.info(&format!("{:<14} {}", action.label(), action.path()));
    }

    for conflict in &plan.conflicts {
        formatter.warn(&format!("{}: {}", conflict.path, conflict.reason));
    }
    if plan.guarded_deletions > 0 {
        formatter.warn(&format!(
            "{} would be refused and downloaded instead",
            plural(plan.guarded_deletions, "remote deletion")
        ));
    }
    if plan.looks_like_wrong_folder() {
        formatter.warn(
            "Far more downloads than uploads planned. Check that sync.root points at the folder you synced before.",
        );
    }
}

fn print_report(formatter: &dyn OutputFormatter, report: &CycleReport) {
    let summary = format!(
        "{} ({})",
        report.summary(),
        format_duration_ms(report.duration_ms)
    );
    match report.outcome {
        SyncPhase::Synced => formatter.success(&summary),
        _ => formatter.warn(&summary),
    }

    if report.state_reset {
        formatter.info("Sync folder changed since the last run; previous state discarded");
    }

    let transfers = &report.transfers;
    if transfers.files_uploaded > 0 {
        formatter.info(&format!(
            "Uploaded:   {} ({})",
            plural(transfers.files_uploaded, "file"),
            format_bytes(transfers.bytes_uploaded)
        ));
    }
    if transfers.files_downloaded > 0 {
        formatter.info(&format!(
            "Downloaded: {} ({})",
            plural(transfers.files_downloaded, "file"),
            format_bytes(transfers.bytes_downloaded)
        ));
    }
    if transfers.directories_created > 0 {
        formatter.info(&format!(
            "Created:    {} directories",
            transfers.directories_created
        ));
    }

    let deletions = &report.deletions;
    if deletions.deleted_local + deletions.deleted_remote > 0 {
        formatter.info(&format!(
            "Deleted:    {} locally, {} remotely",
            deletions.deleted_local, deletions.deleted_remote
        ));
    }

    for conflict in &report.conflicts {
        formatter.warn(&format!("Conflict, left alone: {}: {}", conflict.path, conflict.reason));
    }
    for skipped in transfers.skipped.iter().chain(&deletions.failed) {
        formatter.warn(&format!(
            "Skipped {} of {}: {}",
            skipped.operation, skipped.path, skipped.reason
        ));
    }
}
