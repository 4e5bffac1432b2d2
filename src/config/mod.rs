//! Configuration management for fastexport
//!
//! This module handles loading, parsing, and validating the optional TOML
//! configuration file. Every value has a built-in default, so a missing
//! default file is not an error.
//!
//! Configuration precedence (highest to lowest):
//! 1. Command-line arguments
//! 2. Configuration file (`--config FILE` or `~/.fastexport/config.toml`)
//! 3. Default values
//!
//! # Example
//!
//! ```toml
//! [connection]
//! server_selection_timeout = 5
//!
//! [export]
//! concurrency = 8
//! delimiter = ";"
//!
//! [logging]
//! level = "info"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::export::pipeline::default_concurrency;
use crate::export::writers::tabular::{DEFAULT_DATE_FORMAT, DEFAULT_DELIMITER, DateFormat};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Connection configuration
    pub connection: ConnectionConfig,

    /// Export engine configuration
    pub export: ExportConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Connection-related configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    /// Server selection timeout in seconds
    #[serde(default = "default_server_selection_timeout")]
    pub server_selection_timeout: u64,

    /// Application name reported to the server
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

/// Export engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportConfig {
    /// Maximum number of concurrent encodes
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Progress tick in milliseconds
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// CSV field delimiter
    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    /// strftime pattern for dates in CSV mode
    #[serde(default = "default_date_format")]
    pub date_format: String,

    /// Cursor batch size hint
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// Enable timestamps in logs
    #[serde(default = "default_log_timestamps")]
    pub timestamps: bool,
}

/// Log level options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// Default value functions
fn default_server_selection_timeout() -> u64 {
    3
}

fn default_app_name() -> String {
    "fastexport".to_string()
}

fn default_progress_interval_ms() -> u64 {
    1000
}

fn default_delimiter() -> String {
    DEFAULT_DELIMITER.to_string()
}

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

fn default_batch_size() -> u32 {
    1000
}

fn default_log_level() -> LogLevel {
    LogLevel::Warn
}

fn default_log_timestamps() -> bool {
    false
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server_selection_timeout: default_server_selection_timeout(),
            app_name: default_app_name(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            progress_interval_ms: default_progress_interval_ms(),
            delimiter: default_delimiter(),
            date_format: default_date_format(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            timestamps: default_log_timestamps(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    /// * `Result<Config>` - Parsed and validated configuration
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Load configuration
    ///
    /// An explicit path must exist. Without one, the default path is used
    /// when present, otherwise built-in defaults.
    ///
    /// # Arguments
    /// * `explicit` - Path given on the command line, if any
    ///
    /// # Returns
    /// * `Result<Config>` - Loaded configuration
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::from_file(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Get the default configuration file path
    ///
    /// # Returns
    /// * `PathBuf` - Path to default configuration file
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".fastexport")
            .join("config.toml")
    }

    /// Validate the configuration
    ///
    /// # Returns
    /// * `Result<()>` - Ok if valid, error otherwise
    pub fn validate(&self) -> Result<()> {
        if self.connection.server_selection_timeout == 0 {
            return Err(invalid("connection.server_selection_timeout", "0"));
        }
        if self.export.concurrency == 0 {
            return Err(invalid("export.concurrency", "0"));
        }
        if self.export.progress_interval_ms == 0 {
            return Err(invalid("export.progress_interval_ms", "0"));
        }
        if self.export.batch_size == 0 {
            return Err(invalid("export.batch_size", "0"));
        }
        if self.export.delimiter.is_empty() {
            return Err(invalid("export.delimiter", ""));
        }
        DateFormat::new(self.export.date_format.as_str())?;
        Ok(())
    }

    /// Get server selection timeout as Duration
    pub fn server_selection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection.server_selection_timeout)
    }

    /// Get progress tick as Duration
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.export.progress_interval_ms)
    }
}

fn invalid(field: &str, value: &str) -> crate::error::ExportError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}
