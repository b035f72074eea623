//! Config command - View and manage Brandy Box configuration
//!
//! Provides the `brandybox config` CLI command which:
//! 1. Shows the current configuration (YAML or JSON)
//! 2. Sets individual configuration values via dot-notation keys
//! 3. Validates the configuration file and reports errors

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use brandybox_core::config::{BaseUrlMode, Config};
use clap::Subcommand;
use tracing::info;

use super::CliContext;

/// Keys accepted by `config set`, with a short description
const SUPPORTED_KEYS: &[(&str, &str)] = &[
    ("sync.root", "Sync folder"),
    ("sync.interval_secs", "Seconds between cycles"),
    ("sync.retry_interval_secs", "Seconds before retrying after a connection error"),
    ("sync.initial_delay_secs", "Seconds before the first cycle"),
    ("sync.mtime_tolerance_secs", "Modification time tolerance (0..=60)"),
    ("sync.mass_delete_threshold", "Remote deletions allowed per cycle"),
    ("transfers.workers", "Concurrent transfers (1..=64)"),
    ("transfers.rate_per_second", "Transfer starts per second"),
    ("transfers.rate_burst", "Transfer starts allowed in a burst"),
    ("transfers.max_attempts", "Attempts per transfer"),
    ("transfers.retry_base_delay_ms", "First retry delay (ms)"),
    ("transfers.retry_max_delay_secs", "Longest retry delay (s)"),
    ("remote.base_url_mode", "automatic|manual"),
    ("remote.manual_base_url", "Server URL used in manual mode"),
    ("remote.token_file", "File holding the access token"),
    ("remote.timeout_secs", "Request timeout (s)"),
    ("logging.level", "trace|debug|info|warn|error"),
    ("logging.format", "text|json"),
];

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (e.g., "sync.interval_secs")
        key: String,
        /// New value
        value: String,
    },
    /// Validate configuration file
    Validate,
}

impl ConfigCommand {
    pub async fn execute(&self, ctx: &CliContext) -> Result<()> {
        match self {
            ConfigCommand::Show => self.execute_show(ctx),
            ConfigCommand::Set { key, value } => self.execute_set(ctx, key, value),
            ConfigCommand::Validate => self.execute_validate(ctx),
        }
    }

    fn execute_show(&self, ctx: &CliContext) -> Result<()> {
        let formatter = ctx.formatter();
        let config = ctx.load_config();

        if ctx.is_json() {
            let json = serde_json::to_value(&config)
                .context("Failed to serialize configuration to JSON")?;
            formatter.print_json(&json);
        } else {
            formatter.success(&format!("Configuration ({})", ctx.config_path.display()));
            formatter.info("");

            let yaml = serde_yaml::to_string(&config)
                .context("Failed to serialize configuration to YAML")?;
            for line in yaml.lines() {
                formatter.info(line);
            }
        }

        Ok(())
    }

    fn execute_set(&self, ctx: &CliContext, key: &str, value: &str) -> Result<()> {
        let formatter = ctx.formatter();
        let mut config = ctx.load_config();

        info!(key = %key, value = %value, "Setting configuration value");

        if let Err(e) = apply_config_value(&mut config, key, value) {
            if ctx.is_json() {
                formatter.print_json(&serde_json::json!({
                    "success": false,
                    "key": key,
                    "value": value,
                    "error": format!("{e:#}"),
                }));
            } else {
                formatter.error(&format!("Failed to set '{}': {:#}", key, e));
                formatter.info("");
                formatter.info("Supported keys:");
                for (name, description) in SUPPORTED_KEYS {
                    formatter.info(&format!("  {name:<30} - {description}"));
                }
            }
            return Ok(());
        }

        let errors: Vec<String> = config.validate().iter().map(|e| e.to_string()).collect();
        if !errors.is_empty() {
            if ctx.is_json() {
                formatter.print_json(&serde_json::json!({
                    "success": false,
                    "key": key,
                    "value": value,
                    "errors": errors,
                }));
            } else {
                formatter.error(&format!("Invalid value for '{}': {}", key, errors.join("; ")));
            }
            return Ok(());
        }

        config
            .save(&ctx.config_path)
            .context("Failed to write configuration file")?;

        if ctx.is_json() {
            formatter.print_json(&serde_json::json!({
                "success": true,
                "key": key,
                "value": value,
                "config_path": ctx.config_path.display().to_string(),
            }));
        } else {
            formatter.success(&format!("Set {} = {}", key, value));
            formatter.info(&format!("Saved to {}", ctx.config_path.display()));
        }
        Ok(())
    }

    fn execute_validate(&self, ctx: &CliContext) -> Result<()> {
        let formatter = ctx.formatter();
        let config_path = &ctx.config_path;

        if !config_path.exists() {
            if ctx.is_json() {
                formatter.print_json(&serde_json::json!({
                    "valid": true,
                    "config_path": config_path.display().to_string(),
                    "errors": [],
                    "note": "Configuration file not found. Using defaults.",
                }));
            } else {
                formatter.info(&format!(
                    "Configuration file not found at {}",
                    config_path.display()
                ));
                formatter.info(
                    "Using default configuration. Run 'brandybox config set <key> <value>' to create one.",
                );
            }
            return Ok(());
        }

        let config = match Config::load(config_path) {
            Ok(config) => config,
            Err(e) => {
                if ctx.is_json() {
                    formatter.print_json(&serde_json::json!({
                        "valid": false,
                        "config_path": config_path.display().to_string(),
                        "errors": [format!("Failed to parse configuration: {e:#}")],
                    }));
                } else {
                    formatter.error(&format!("Failed to parse configuration: {e:#}"));
                }
                return Ok(());
            }
        };

        let errors = config.validate();

        if ctx.is_json() {
            let error_strings: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            formatter.print_json(&serde_json::json!({
                "valid": errors.is_empty(),
                "config_path": config_path.display().to_string(),
                "errors": error_strings,
            }));
        } else if errors.is_empty() {
            formatter.success("Configuration is valid");
            formatter.info(&format!("File: {}", config_path.display()));
        } else {
            formatter.error(&format!(
                "Configuration has {} error{}:",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" }
            ));
            formatter.info(&format!("File: {}", config_path.display()));
            formatter.info("");
            for error in &errors {
                formatter.info(&format!("  {} - {}", error.field, error.message));
            }
        }

        Ok(())
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse::<T>()
        .with_context(|| format!("'{value}' is not a valid value for {key}"))
}

/// `none` or an empty string clears an optional value
fn optional(value: &str) -> Option<&str> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value)
    }
}

/// Apply a dot-notation key/value pair to a Config struct
fn apply_config_value(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        // --- sync ---
        "sync.root" => config.sync.root = PathBuf::from(value),
        "sync.interval_secs" => config.sync.interval_secs = parse(key, value)?,
        "sync.retry_interval_secs" => config.sync.retry_interval_secs = parse(key, value)?,
        "sync.initial_delay_secs" => config.sync.initial_delay_secs = parse(key, value)?,
        "sync.mtime_tolerance_secs" => config.sync.mtime_tolerance_secs = parse(key, value)?,
        "sync.mass_delete_threshold" => config.sync.mass_delete_threshold = parse(key, value)?,

        // --- transfers ---
        "transfers.workers" => config.transfers.workers = parse(key, value)?,
        "transfers.rate_per_second" => config.transfers.rate_per_second = parse(key, value)?,
        "transfers.rate_burst" => config.transfers.rate_burst = parse(key, value)?,
        "transfers.max_attempts" => config.transfers.max_attempts = parse(key, value)?,
        "transfers.retry_base_delay_ms" => {
            config.transfers.retry_base_delay_ms = parse(key, value)?
        }
        "transfers.retry_max_delay_secs" => {
            config.transfers.retry_max_delay_secs = parse(key, value)?
        }

        // --- remote ---
        "remote.base_url_mode" => {
            config.remote.base_url_mode = match value {
                "automatic" => BaseUrlMode::Automatic,
                "manual" => BaseUrlMode::Manual,
                other => anyhow::bail!("Unknown base URL mode '{other}' (automatic|manual)"),
            }
        }
        "remote.manual_base_url" => {
            config.remote.manual_base_url = optional(value).map(str::to_string)
        }
        "remote.token_file" => config.remote.token_file = optional(value).map(PathBuf::from),
        "remote.timeout_secs" => config.remote.timeout_secs = parse(key, value)?,

        // --- logging ---
        "logging.level" => config.logging.level = value.to_string(),
        "logging.format" => config.logging.format = value.to_string(),

        _ => anyhow::bail!("Unknown configuration key: '{}'", key),
    }

    Ok(())
}
