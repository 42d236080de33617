//! Errors raised while locating, parsing, validating or saving configuration.

use crate::error::SessionError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly named file does not exist.
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write configuration file '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The `[serial]` section describes line settings a session would reject.
    #[error("Invalid serial line settings: {0}")]
    LineSettings(#[from] SessionError),

    /// Any other out-of-range value.
    #[error("Invalid configuration value for '{key}': {message}")]
    Invalid { key: &'static str, message: String },

    /// A `SERIAL_SESSION_*` override could not be parsed.
    #[error("Failed to parse environment variable '{var}': {message}")]
    Env { var: String, message: String },

    /// `save()` on a loader that was not loaded from a file.
    #[error("No configuration file path set; use save_to()")]
    NoPath,
}

impl ConfigError {
    pub fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            message: message.into(),
        }
    }

    pub fn env(var: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Env {
            var: var.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::invalid("discovery.interval_ms", "must be greater than zero");
        assert_eq!(
            err.to_string(),
            "Invalid configuration value for 'discovery.interval_ms': must be greater than zero"
        );

        let err = ConfigError::from(SessionError::invalid_setting(
            "baud_rate",
            "must be a positive number",
        ));
        assert_eq!(
            err.to_string(),
            "Invalid serial line settings: Invalid value for 'baud_rate': must be a positive number"
        );

        let err = ConfigError::env("SERIAL_SESSION_SERIAL_BAUD_RATE", "Invalid baud rate");
        assert!(err.to_string().contains("SERIAL_SESSION_SERIAL_BAUD_RATE"));
    }
}
