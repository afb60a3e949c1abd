//! Error types for Tollgate.

use thiserror::Error;

/// Main error type for Tollgate setup and configuration.
///
/// Failures of guarded upstream calls are not folded into this type; they
/// keep their own classification (see [`crate::retry::RetryError`] and
/// [`crate::guard::GuardError`]).
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for TollgateError {
    fn from(err: config::ConfigError) -> Self {
        TollgateError::Config(err.to_string())
    }
}

impl From<serde_yaml::Error> for TollgateError {
    fn from(err: serde_yaml::Error) -> Self {
        TollgateError::Config(err.to_string())
    }
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
