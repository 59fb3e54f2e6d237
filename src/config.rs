//! Configuration management for the Kopia exporter.
//!
//! Supports loading configuration from:
//! - TOML configuration files
//! - Environment variables (with `KOPIA_EXPORTER__` prefix)
//! - The plain `KOPIA_*` variables understood by kopia itself
//! - Command-line arguments

use crate::error::{KopiaError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Flat environment variables mapped onto settings keys.
///
/// These win over both the config file and the prefixed variables.
const FLAT_ENV_OVERRIDES: [(&str, &str); 4] = [
    ("KOPIA_CONFIG_PATH", "kopia.config_dir"),
    ("KOPIA_CACHE_DIRECTORY", "kopia.cache_dir"),
    ("KOPIA_SERVER_URL", "kopia.server_url"),
    ("KOPIA_PASSWORD", "kopia.password"),
];

/// Kopia repository and polling settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct KopiaConfig {
    /// Path or name of the kopia binary
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Repository server URL (e.g., "http://kopia-server:51515")
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Repository server password
    #[serde(default)]
    pub password: String,

    /// Directory holding kopia's repository config
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Kopia cache directory, passed through to the child process
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Log directory created for the wrapped tool
    #[serde(default = "default_log_dir")]
    pub log_dir: Option<PathBuf>,

    /// List snapshots for every source in the repository, not just this host
    #[serde(default)]
    pub all_sources: bool,

    /// Seconds between inventory polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Budget for a single kopia invocation (0 = unbounded)
    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,

    /// Label used for the status series when the inventory fetch fails
    #[serde(default = "default_fallback_source")]
    pub fallback_source: String,
}

impl std::fmt::Debug for KopiaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KopiaConfig")
            .field("binary", &self.binary)
            .field("server_url", &self.server_url)
            .field("password", &"***REDACTED***")
            .field("config_dir", &self.config_dir)
            .field("cache_dir", &self.cache_dir)
            .field("log_dir", &self.log_dir)
            .field("all_sources", &self.all_sources)
            .field("poll_interval_seconds", &self.poll_interval_seconds)
            .field("command_timeout_seconds", &self.command_timeout_seconds)
            .field("fallback_source", &self.fallback_source)
            .finish()
    }
}

impl KopiaConfig {
    /// Path of the repository config file handed to kopia.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("repository.config")
    }

    /// Interval between polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Per-invocation timeout, `None` when disabled.
    pub fn command_timeout(&self) -> Option<Duration> {
        match self.command_timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Create every directory kopia needs.
    ///
    /// Unset optional directories are skipped.
    pub fn ensure_directories(&self) -> Result<()> {
        let dirs = [
            Some(self.config_dir.as_path()),
            self.cache_dir.as_deref(),
            self.log_dir.as_deref(),
        ];

        for dir in dirs.into_iter().flatten() {
            if dir.as_os_str().is_empty() {
                continue;
            }
            std::fs::create_dir_all(dir)?;
        }

        Ok(())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per event
    Json,
}

/// Exporter specific settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExporterConfig {
    /// Address to listen on for metrics endpoint
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Main configuration structure for the Kopia exporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Kopia repository configuration
    pub kopia: KopiaConfig,

    /// Exporter server configuration
    #[serde(default)]
    pub exporter: ExporterConfig,
}

fn default_binary() -> String {
    "kopia".to_string()
}

fn default_server_url() -> String {
    "http://kopia-server:51515".to_string()
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("/app/config")
}

fn default_log_dir() -> Option<PathBuf> {
    Some(PathBuf::from("/app/logs"))
}

fn default_poll_interval() -> u64 {
    60
}

fn default_command_timeout() -> u64 {
    300
}

fn default_fallback_source() -> String {
    "default".to_string()
}

fn default_listen_address() -> String {
    "0.0.0.0:9091".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

impl Settings {
    /// Load configuration from a file and environment variables.
    ///
    /// # Arguments
    ///
    /// * `config_path` - Optional path to configuration file
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use kopia_exporter::config::Settings;
    ///
    /// let settings = Settings::load(Some("config/default.toml")).unwrap();
    /// ```
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let flat = FLAT_ENV_OVERRIDES
            .iter()
            .map(|(var, key)| (*key, std::env::var(var).ok()));
        Self::load_with(config_path, flat)
    }

    /// Load configuration with explicit values for the flat `KOPIA_*` keys.
    fn load_with<'a>(
        config_path: Option<&str>,
        overrides: impl IntoIterator<Item = (&'a str, Option<String>)>,
    ) -> Result<Self> {
        // Ensure the section exists even when nothing else mentions it
        let mut builder = config::Config::builder().set_default("kopia.binary", default_binary())?;

        // Add config file if provided
        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(config::File::with_name(path));
            }
        }

        // Add environment variables with KOPIA_EXPORTER__ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("KOPIA_EXPORTER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        for (key, value) in overrides {
            let value = value.filter(|v| !v.is_empty());
            builder = builder.set_override_option(key, value)?;
        }

        let config = builder.build()?;
        let settings: Settings = config.try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration settings.
    fn validate(&self) -> Result<()> {
        if self.kopia.password.is_empty() {
            return Err(KopiaError::Config(config::ConfigError::Message(
                "KOPIA_PASSWORD environment variable is required".to_string(),
            )));
        }

        if self.kopia.server_url.is_empty() {
            return Err(KopiaError::Config(config::ConfigError::Message(
                "Kopia server URL cannot be empty".to_string(),
            )));
        }

        if self.kopia.poll_interval_seconds == 0 {
            return Err(KopiaError::Config(config::ConfigError::Message(
                "Poll interval must be at least one second".to_string(),
            )));
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            kopia: KopiaConfig {
                binary: default_binary(),
                server_url: default_server_url(),
                password: String::new(),
                config_dir: default_config_dir(),
                cache_dir: None,
                log_dir: default_log_dir(),
                all_sources: false,
                poll_interval_seconds: default_poll_interval(),
                command_timeout_seconds: default_command_timeout(),
                fallback_source: default_fallback_source(),
            },
            exporter: ExporterConfig::default(),
        }
    }
}
