//! Configuration module for Brandy Box.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.
//!
//! The configuration directory also holds the sync state file
//! (`sync_state.json`) and the daemon's status file (`status.json`).

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Environment variable overriding the configuration directory.
pub const CONFIG_DIR_ENV: &str = "BRANDYBOX_CONFIG_DIR";

/// Environment variable overriding the remote base URL.
pub const BASE_URL_ENV: &str = "BRANDYBOX_BASE_URL";

/// Environment variable carrying the bearer token.
pub const ACCESS_TOKEN_ENV: &str = "BRANDYBOX_ACCESS_TOKEN";

/// Public endpoint used when nothing else is configured.
pub const DEFAULT_BASE_URL: &str = "https://brandybox.brandstaetter.rocks";

const CONFIG_FILE_NAME: &str = "config.yaml";
const STATE_FILE_NAME: &str = "sync_state.json";
const STATUS_FILE_NAME: &str = "status.json";

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for Brandy Box.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub transfers: TransfersConfig,
    pub remote: RemoteConfig,
    pub logging: LoggingConfig,
}

/// Synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Local folder mirrored to the server.
    pub root: PathBuf,
    /// Seconds between background sync cycles.
    pub interval_secs: u64,
    /// Seconds until the next attempt after the server could not be reached.
    pub retry_interval_secs: u64,
    /// Seconds to wait after daemon start before the first cycle.
    pub initial_delay_secs: u64,
    /// Modification times closer than this are treated as equal.
    pub mtime_tolerance_secs: f64,
    /// Remote deletions above this count are held back when they exceed
    /// the number of local files.
    pub mass_delete_threshold: usize,
}

/// Transfer pool, rate limit and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransfersConfig {
    /// Concurrent upload/download workers.
    pub workers: usize,
    /// New transfers started per second.
    pub rate_per_second: f64,
    /// Transfers that may start back to back before the rate applies.
    pub rate_burst: u32,
    /// Attempts per transfer, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles with each attempt.
    pub retry_base_delay_ms: u64,
    /// Upper bound for any single retry delay.
    pub retry_max_delay_secs: u64,
}

/// How the remote base URL is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseUrlMode {
    /// Use the public endpoint.
    Automatic,
    /// Use `remote.manual_base_url`.
    Manual,
}

/// Remote file API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url_mode: BaseUrlMode,
    pub manual_base_url: Option<String>,
    /// File holding the bearer token, read when the environment has none.
    pub token_file: Option<PathBuf>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `text` or `json`.
    pub format: String,
}

// ---------------------------------------------------------------------------
// Loading and well-known paths
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Write the configuration as YAML, creating the parent directory.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// Directory holding the config, state and status files.
    ///
    /// `$BRANDYBOX_CONFIG_DIR` when set, else `$XDG_CONFIG_HOME/brandybox`.
    pub fn config_dir() -> PathBuf {
        config_dir_from(std::env::var_os(CONFIG_DIR_ENV).map(PathBuf::from))
    }

    /// Platform-appropriate default path for the configuration file.
    pub fn default_path() -> PathBuf {
        Self::config_dir().join(CONFIG_FILE_NAME)
    }

    /// Path of the persisted sync state.
    pub fn state_path() -> PathBuf {
        Self::config_dir().join(STATE_FILE_NAME)
    }

    /// Path of the status file mirrored by the daemon.
    pub fn status_path() -> PathBuf {
        Self::config_dir().join(STATUS_FILE_NAME)
    }
}

fn config_dir_from(env_override: Option<PathBuf>) -> PathBuf {
    match env_override {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("brandybox"),
    }
}

impl RemoteConfig {
    /// Base URL to talk to, honouring `$BRANDYBOX_BASE_URL`.
    pub fn resolve_base_url(&self) -> String {
        self.base_url_with(std::env::var(BASE_URL_ENV).ok())
    }

    fn base_url_with(&self, env_override: Option<String>) -> String {
        let chosen = match env_override.filter(|u| !u.trim().is_empty()) {
            Some(url) => url,
            None => match (self.base_url_mode, &self.manual_base_url) {
                (BaseUrlMode::Manual, Some(url)) if !url.trim().is_empty() => url.clone(),
                _ => DEFAULT_BASE_URL.to_string(),
            },
        };
        chosen.trim().trim_end_matches('/').to_string()
    }

    /// Bearer token from `$BRANDYBOX_ACCESS_TOKEN`, else from `token_file`.
    pub fn resolve_access_token(&self) -> anyhow::Result<String> {
        self.access_token_with(std::env::var(ACCESS_TOKEN_ENV).ok())
    }

    fn access_token_with(&self, env_token: Option<String>) -> anyhow::Result<String> {
        if let Some(token) = env_token.filter(|t| !t.trim().is_empty()) {
            return Ok(token.trim().to_string());
        }
        let path = self.token_file.as_ref().with_context(|| {
            format!("no access token: set {ACCESS_TOKEN_ENV} or remote.token_file")
        })?;
        let token = std::fs::read_to_string(path)
            .with_context(|| format!("reading token file {}", path.display()))?;
        let token = token.trim();
        anyhow::ensure!(!token.is_empty(), "token file {} is empty", path.display());
        Ok(token.to_string())
    }
}

impl SyncConfig {
    /// The sync root with a leading `~` expanded to the home directory.
    pub fn root_path(&self) -> PathBuf {
        expand_home(&self.root, dirs::home_dir())
    }
}

fn expand_home(path: &Path, home: Option<PathBuf>) -> PathBuf {
    match (path.strip_prefix("~"), home) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join("brandyBox"),
            interval_secs: 60,
            retry_interval_secs: 15,
            initial_delay_secs: 15,
            mtime_tolerance_secs: 2.0,
            mass_delete_threshold: 50,
        }
    }
}

impl Default for TransfersConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            rate_per_second: 10.0,
            rate_burst: 10,
            max_attempts: 3,
            retry_base_delay_ms: 2000,
            retry_max_delay_secs: 60,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url_mode: BaseUrlMode::Automatic,
            manual_base_url: None,
            token_file: None,
            timeout_secs: 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.interval_secs"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut positive = |field: &str, ok: bool| {
            if !ok {
                errors.push(ValidationError {
                    field: field.into(),
                    message: "must be greater than 0".into(),
                });
            }
        };

        // --- sync ---
        positive("sync.interval_secs", self.sync.interval_secs > 0);
        positive("sync.retry_interval_secs", self.sync.retry_interval_secs > 0);
        positive("sync.mass_delete_threshold", self.sync.mass_delete_threshold > 0);

        // --- transfers ---
        positive("transfers.workers", self.transfers.workers > 0);
        positive("transfers.rate_per_second", self.transfers.rate_per_second > 0.0);
        positive("transfers.rate_burst", self.transfers.rate_burst > 0);
        positive("transfers.max_attempts", self.transfers.max_attempts > 0);

        // --- remote ---
        positive("remote.timeout_secs", self.remote.timeout_secs > 0);

        if self.sync.root.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "sync.root".into(),
                message: "must not be empty".into(),
            });
        } else if !self.sync.root.is_absolute() && !self.sync.root.starts_with("~") {
            errors.push(ValidationError {
                field: "sync.root".into(),
                message: format!("must be an absolute path: {}", self.sync.root.display()),
            });
        }

        if !(0.0..=60.0).contains(&self.sync.mtime_tolerance_secs) {
            errors.push(ValidationError {
                field: "sync.mtime_tolerance_secs".into(),
                message: "must be in range 0..=60".into(),
            });
        }

        if self.transfers.workers > 64 {
            errors.push(ValidationError {
                field: "transfers.workers".into(),
                message: "must be in range 1..=64".into(),
            });
        }

        if self.remote.base_url_mode == BaseUrlMode::Manual {
            match self.remote.manual_base_url.as_deref().map(url::Url::parse) {
                None => errors.push(ValidationError {
                    field: "remote.manual_base_url".into(),
                    message: "required when base_url_mode is manual".into(),
                }),
                Some(Err(e)) => errors.push(ValidationError {
                    field: "remote.manual_base_url".into(),
                    message: format!("invalid URL: {e}"),
                }),
                Some(Ok(_)) => {}
            }
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError {
                field: "logging.format".into(),
                message: format!(
                    "invalid format '{}'; valid options: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use brandybox_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .sync_root(PathBuf::from("/home/user/brandyBox"))
///     .sync_interval_secs(120)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn sync_root(mut self, root: PathBuf) -> Self {
        self.config.sync.root = root;
        self
    }

    pub fn sync_interval_secs(mut self, seconds: u64) -> Self {
        self.config.sync.interval_secs = seconds;
        self
    }

    pub fn sync_retry_interval_secs(mut self, seconds: u64) -> Self {
        self.config.sync.retry_interval_secs = seconds;
        self
    }

    pub fn sync_mass_delete_threshold(mut self, n: usize) -> Self {
        self.config.sync.mass_delete_threshold = n;
        self
    }

    // --- transfers ---

    pub fn transfers_workers(mut self, n: usize) -> Self {
        self.config.transfers.workers = n;
        self
    }

    pub fn transfers_rate_per_second(mut self, rate: f64) -> Self {
        self.config.transfers.rate_per_second = rate;
        self
    }

    pub fn transfers_max_attempts(mut self, n: u32) -> Self {
        self.config.transfers.max_attempts = n;
        self
    }

    // --- remote ---

    pub fn remote_manual_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote.base_url_mode = BaseUrlMode::Manual;
        self.config.remote.manual_base_url = Some(url.into());
        self
    }

    pub fn remote_token_file(mut self, path: PathBuf) -> Self {
        self.config.remote.token_file = Some(path);
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
