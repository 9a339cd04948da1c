//! Error types for the portal limiter service.

use thiserror::Error;

/// Main error type for service-level operations.
///
/// The rate limiter itself never surfaces these: store failures are collapsed
/// into fail-open decisions before they reach a caller.
#[derive(Error, Debug)]
pub enum ThrottleError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for ThrottleError {
    fn from(err: config::ConfigError) -> Self {
        ThrottleError::Config(err.to_string())
    }
}

impl From<serde_yaml::Error> for ThrottleError {
    fn from(err: serde_yaml::Error) -> Self {
        ThrottleError::Config(err.to_string())
    }
}

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, ThrottleError>;
