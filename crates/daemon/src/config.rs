//! Configuration management for the Tether daemon.
//!
//! TOML-based configuration loading with defaults. The default configuration
//! path is `~/.config/tether/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("bind address must not be empty")]
    EmptyBindAddress,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the Tether daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Session spawn defaults.
    pub session: SessionConfig,

    /// Metadata store location.
    pub store: StoreConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Address the WebSocket bridge listens on.
    pub bind: String,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Session spawn defaults, used when a handshake carries no overrides and
/// the metadata store has no record for the session id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Command to run in new sessions. Empty means a bare interactive shell.
    pub default_command: String,

    /// Default working directory for new sessions.
    pub default_cwd: Option<PathBuf>,
}

/// Metadata store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the JSON session metadata document.
    pub path: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7070".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_command: String::new(),
            default_cwd: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tether")
        .join("config.toml")
}

/// Returns the default metadata store path.
pub fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tether")
        .join("sessions.json")
}

impl Config {
    /// Loads configuration from the given path.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("failed to read config file: {}", path.as_ref().display())
        })?;
        Self::from_toml(&contents)
    }

    /// Loads configuration from the default path, falling back to defaults
    /// when no config file exists.
    pub fn load_or_default() -> Result<Self> {
        let path = default_config_path();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str).context("failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.bind.trim().is_empty() {
            return Err(ConfigError::EmptyBindAddress);
        }
        if !VALID_LOG_LEVELS.contains(&self.daemon.log_level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.daemon.bind, "127.0.0.1:7070");
        assert_eq!(config.daemon.log_level, "info");
        assert!(config.session.default_command.is_empty());
    }

    #[test]
    fn test_from_toml_partial_sections() {
        let config = Config::from_toml(
            r#"
            [daemon]
            bind = "0.0.0.0:9000"

            [session]
            default_command = "claude"
            "#,
        )
        .unwrap();

        assert_eq!(config.daemon.bind, "0.0.0.0:9000");
        // Unspecified fields keep their defaults.
        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.session.default_command, "claude");
    }

    #[test]
    fn test_from_toml_rejects_bad_log_level() {
        let result = Config::from_toml(
            r#"
            [daemon]
            log_level = "loud"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_empty_bind() {
        let mut config = Config::default();
        config.daemon.bind = "  ".to_string();
        assert_eq!(config.validate(), Err(ConfigError::EmptyBindAddress));
    }

    #[test]
    fn test_default_store_path_under_data_dir() {
        let path = default_store_path();
        assert!(path.ends_with("tether/sessions.json"));
    }
}
