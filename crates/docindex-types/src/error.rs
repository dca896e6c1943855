//! Error types shared across docindex crates.

use thiserror::Error;

/// Errors raised by configuration and record handling.
#[derive(Debug, Error)]
pub enum DocIndexError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
