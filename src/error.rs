//! Error types for the guard service.

use std::time::Duration;
use thiserror::Error;

/// Main error type for guard operations.
#[derive(Error, Debug)]
pub enum GuardError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store errors
    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by a counter store backend.
///
/// Both variants are infrastructure faults. Callers decide whether to fail
/// open or closed; they are never surfaced to API clients verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached or rejected the operation
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    /// The backend did not answer within the configured deadline
    #[error("counter store timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type alias for guard operations.
pub type Result<T> = std::result::Result<T, GuardError>;
