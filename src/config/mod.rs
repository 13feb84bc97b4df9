//! Configuration management.
//!
//! Two files are read:
//!
//! - the application config (`config.toml`), parsed into [`FeedsiftConfig`]
//!   and overridable through `FEEDSIFT_*` environment variables
//! - catalog files declaring filters, blocks and feeds, parsed by
//!   [`CatalogFile`]

mod catalog;

pub use catalog::{CatalogFile, CatalogFileBlock};

use crate::blocks::{DEFAULT_PAGE_SIZE, EngineSettings};
use crate::observability::{LogFormat, LoggingConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the database path.
pub const ENV_DATABASE_PATH: &str = "FEEDSIFT_DATABASE_PATH";
/// Environment variable overriding the page size.
pub const ENV_PAGE_SIZE: &str = "FEEDSIFT_PAGE_SIZE";
/// Environment variable overriding the filter timeout in milliseconds.
pub const ENV_FILTER_TIMEOUT_MS: &str = "FEEDSIFT_FILTER_TIMEOUT_MS";
/// Environment variable overriding the log filter.
pub const ENV_LOG_FILTER: &str = "FEEDSIFT_LOG";
/// Environment variable overriding the log format.
pub const ENV_LOG_FORMAT: &str = "FEEDSIFT_LOG_FORMAT";
/// Environment variable overriding the log file.
pub const ENV_LOG_FILE: &str = "FEEDSIFT_LOG_FILE";

/// Main configuration for feedsift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedsiftConfig {
    /// Path to the `SQLite` database.
    pub database_path: PathBuf,
    /// Items per display page; batch size and buffering derive from it.
    pub page_size: usize,
    /// Bound on each filter evaluation.
    pub filter_timeout_ms: u64,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Database path.
    pub database_path: Option<String>,
    /// Page size.
    pub page_size: Option<usize>,
    /// Filter timeout in milliseconds.
    pub filter_timeout_ms: Option<u64>,
    /// Logging section.
    pub logging: Option<ConfigFileLogging>,
}

/// Logging section in config file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileLogging {
    /// Filter directive.
    pub filter: Option<String>,
    /// "pretty" or "json".
    pub format: Option<String>,
    /// Log file path.
    pub file: Option<String>,
}

impl Default for FeedsiftConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            page_size: DEFAULT_PAGE_SIZE,
            filter_timeout_ms: 7000,
            logging: LoggingConfig::default(),
        }
    }
}

fn default_database_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "feedsift").map_or_else(
        || PathBuf::from(".feedsift").join("feedsift.db"),
        |dirs| dirs.data_dir().join("feedsift.db"),
    )
}

impl FeedsiftConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| crate::Error::OperationFailed {
                operation: "read_config_file".to_string(),
                cause: format!("{}: {e}", path.display()),
            })?;
        Self::parse(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid config file.
    pub fn parse(contents: &str) -> crate::Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| crate::Error::OperationFailed {
                operation: "parse_config_file".to_string(),
                cause: e.to_string(),
            })?;
        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the default location.
    ///
    /// Reads `config.toml` from the platform config directory
    /// (`~/.config/feedsift/` on Linux). Returns defaults if no file exists or
    /// it cannot be parsed.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(dirs) = directories::ProjectDirs::from("", "", "feedsift") else {
            return Self::default();
        };
        let path = dirs.config_dir().join("config.toml");
        if path.exists() {
            match Self::load_from_file(&path) {
                Ok(config) => return config,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "ignoring config file"),
            }
        }
        Self::default()
    }

    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(path) = file.database_path {
            config.database_path = PathBuf::from(path);
        }
        if let Some(page_size) = file.page_size {
            config.page_size = page_size;
        }
        if let Some(timeout) = file.filter_timeout_ms {
            config.filter_timeout_ms = timeout;
        }
        if let Some(logging) = file.logging {
            if let Some(filter) = logging.filter {
                config.logging.filter = filter;
            }
            if let Some(format) = logging.format {
                config.logging.format = LogFormat::parse(&format);
            }
            config.logging.file = logging.file.map(PathBuf::from);
        }

        config
    }

    /// Applies `FEEDSIFT_*` overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies `FEEDSIFT_*` overrides from `lookup`.
    ///
    /// Unparsable numbers are ignored.
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(path) = lookup(ENV_DATABASE_PATH) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(page_size) = lookup(ENV_PAGE_SIZE).and_then(|v| v.parse().ok()) {
            self.page_size = page_size;
        }
        if let Some(timeout) = lookup(ENV_FILTER_TIMEOUT_MS).and_then(|v| v.parse().ok()) {
            self.filter_timeout_ms = timeout;
        }
        if let Some(filter) = lookup(ENV_LOG_FILTER) {
            self.logging.filter = filter;
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            self.logging.format = LogFormat::parse(&format);
        }
        if let Some(file) = lookup(ENV_LOG_FILE) {
            self.logging.file = Some(PathBuf::from(file));
        }
        self
    }

    /// Sets the database path.
    #[must_use]
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    /// Engine tuning derived from this configuration.
    #[must_use]
    pub const fn engine_settings(&self) -> EngineSettings {
        EngineSettings::from_page_size(self.page_size)
            .with_filter_timeout(Duration::from_millis(self.filter_timeout_ms))
    }
}
