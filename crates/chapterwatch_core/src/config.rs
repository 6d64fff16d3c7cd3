//! Application configuration.
//!
//! # Responsibility
//! - Load and save the JSON config file.
//! - Provide defaults for every field so partial files stay valid.
//! - Convert user-facing seconds into the `Duration`s the engine uses.
//!
//! # Invariants
//! - `validate()` rejects zero intervals, zero timeouts and zero concurrency.

use crate::model::subscription::DEFAULT_LANGUAGE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DATA_DIR_NAME: &str = ".chapterwatch";

/// Config loading / validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config `{path}`: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write config `{path}`: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("error parsing config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Logging section of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of `trace|debug|info|warn|error`.
    pub level: String,
    /// Absolute directory for rolling log files.
    pub dir: PathBuf,
    /// Mirror warnings and errors to stderr.
    pub duplicate_to_stderr: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: crate::logging::default_log_level().to_string(),
            dir: default_data_dir().join("logs"),
            duplicate_to_stderr: false,
        }
    }
}

/// Root configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    /// Seconds between scheduled reconciliation runs.
    pub check_interval_secs: u64,
    pub fetch_timeout_secs: u64,
    pub store_timeout_secs: u64,
    pub delivery_timeout_secs: u64,
    /// Subscriptions checked concurrently inside one run.
    pub max_concurrent_checks: usize,
    /// Languages used when a subscribe request names none.
    pub default_languages: Vec<String>,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: default_data_dir().join("chapterwatch.db"),
            check_interval_secs: 3600,
            fetch_timeout_secs: 10,
            store_timeout_secs: 5,
            delivery_timeout_secs: 30,
            max_concurrent_checks: 4,
            default_languages: vec![DEFAULT_LANGUAGE.to_string()],
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Reads and validates a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when it exists, otherwise returns defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Writes pretty JSON, creating parent directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(write_err)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data).map_err(write_err)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval_secs == 0 {
            return Err(ConfigError::Invalid("check_interval_secs must be > 0"));
        }
        if self.fetch_timeout_secs == 0
            || self.store_timeout_secs == 0
            || self.delivery_timeout_secs == 0
        {
            return Err(ConfigError::Invalid("timeouts must be > 0"));
        }
        if self.max_concurrent_checks == 0 {
            return Err(ConfigError::Invalid("max_concurrent_checks must be > 0"));
        }
        if self.default_languages.iter().all(|code| code.trim().is_empty()) {
            return Err(ConfigError::Invalid("default_languages must not be empty"));
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Default languages in the comma-separated form subscribe requests use.
    pub fn default_languages_csv(&self) -> String {
        self.default_languages.join(",")
    }
}

/// Timeouts and concurrency for one reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSettings {
    pub fetch_timeout: Duration,
    pub store_timeout: Duration,
    pub delivery_timeout: Duration,
    pub max_concurrent_checks: usize,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for ReconcileSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
            store_timeout: Duration::from_secs(config.store_timeout_secs),
            delivery_timeout: Duration::from_secs(config.delivery_timeout_secs),
            max_concurrent_checks: config.max_concurrent_checks.max(1),
        }
    }
}

/// `$HOME/.chapterwatch`, or `./.chapterwatch` when no home is known.
pub fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DATA_DIR_NAME)
}
