//! Configuration loading traits and types.
//!
//! Every weld head configuration file is TOML. Any `serde` deserializable
//! struct gets a [`ConfigLoader::load`] for free.
//!
//! ```rust,no_run
//! use weld_common::config::{ConfigError, ConfigLoader, LogLevel};
//! use serde::Deserialize;
//! use std::path::Path;
//!
//! #[derive(Debug, Deserialize)]
//! struct DaemonConfig {
//!     #[serde(default)]
//!     log_level: LogLevel,
//! }
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = DaemonConfig::load(Path::new("weld_axis.toml"))?;
//!     let _level: tracing::Level = config.log_level.into();
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Error type for configuration loading and validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// File could not be read or TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for the daemon's tracing subscriber.
///
/// Lowercase in TOML (`log_level = "debug"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Loads a TOML file into any deserializable type.
///
/// # Contract
///
/// - `ConfigError::FileNotFound` if the file does not exist
/// - `ConfigError::ParseError` if it cannot be read or is not valid TOML
/// - semantic validation is the caller's job (see `validate()` methods)
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound,
            _ => ConfigError::ParseError(format!("{}: {e}", path.display())),
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from an in-memory TOML string.
    fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[derive(Debug, Deserialize, PartialEq)]
    struct SampleConfig {
        #[serde(default)]
        log_level: LogLevel,
        name: String,
    }

    #[test]
    fn log_level_defaults_to_info() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
        assert_eq!(tracing::Level::from(LogLevel::default()), tracing::Level::INFO);
    }

    #[test]
    fn log_level_is_lowercase_in_toml() {
        let sample: SampleConfig = toml::from_str("log_level = \"warn\"\nname = \"x\"").unwrap();
        assert_eq!(sample.log_level, LogLevel::Warn);
        assert!(toml::from_str::<SampleConfig>("log_level = \"WARN\"\nname = \"x\"").is_err());
    }

    #[test]
    fn load_missing_file_is_file_not_found() {
        let err = SampleConfig::load(Path::new("/nonexistent/weld_axis.toml")).unwrap_err();
        assert_eq!(err, ConfigError::FileNotFound);
    }

    #[test]
    fn load_reads_toml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "name = \"head\"\nlog_level = \"debug\"").unwrap();

        let sample = SampleConfig::load(file.path()).unwrap();
        assert_eq!(sample.name, "head");
        assert_eq!(sample.log_level, LogLevel::Debug);
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "name = ").unwrap();

        assert!(matches!(SampleConfig::load(file.path()), Err(ConfigError::ParseError(_))));
    }
}
