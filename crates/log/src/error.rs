//! Error types for logger bootstrap

use thiserror::Error;

/// Errors raised while building the global subscriber
#[derive(Debug, Error)]
pub enum LogError {
    /// The level / directive string could not be parsed
    #[error("Invalid filter '{filter}': {reason}")]
    Filter { filter: String, reason: String },

    /// The configured writer could not be opened
    #[error("Writer '{writer}' error: {reason}")]
    Writer { writer: String, reason: String },

    /// A global subscriber was already installed
    #[error("Logger initialization failed: {0}")]
    Init(String),
}

/// Result type for logger operations
pub type LogResult<T> = Result<T, LogError>;
