//! Error taxonomy for configuration handling.

use std::path::PathBuf;

/// Errors raised while loading or validating a [`crate::Configuration`].
///
/// All of these are raised before any stage runs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {option} (expected one of: {expected})")]
    InvalidChoice {
        option: &'static str,
        value: String,
        expected: String,
    },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
