//! Brandy Box CLI - Command-line interface for Brandy Box
//!
//! Provides commands for:
//! - Running a sync cycle (or previewing one)
//! - Viewing sync status as written by the daemon
//! - Resetting the sync state
//! - Viewing and editing the configuration

use std::path::PathBuf;

use anyhow::Result;
use brandybox_core::config::Config;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{
    completions::CompletionsCommand, config::ConfigCommand, reset::ResetCommand,
    status::StatusCommand, sync::SyncCommand, CliContext,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "brandybox", version, about = "Brandy Box file synchronization client")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run one synchronization cycle now
    Sync(SyncCommand),
    /// Show synchronization status
    Status(StatusCommand),
    /// Forget the sync state so the next cycle starts fresh
    Reset(ResetCommand),
    /// View and manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Generate shell completions
    Completions(CompletionsCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };
    let ctx = CliContext {
        format,
        quiet: cli.quiet,
        config_path: cli.config.unwrap_or_else(Config::default_path),
    };

    match cli.command {
        Commands::Sync(cmd) => cmd.execute(&ctx).await,
        Commands::Status(cmd) => cmd.execute(&ctx).await,
        Commands::Reset(cmd) => cmd.execute(&ctx).await,
        Commands::Config(cmd) => cmd.execute(&ctx).await,
        Commands::Completions(cmd) => cmd.execute(&ctx).await,
    }
}
