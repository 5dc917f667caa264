//! Error types for the Contagem service.

use thiserror::Error;

/// Main error type for Contagem operations.
#[derive(Error, Debug)]
pub enum ContagemError {
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

impl From<config::ConfigError> for ContagemError {
    fn from(err: config::ConfigError) -> Self {
        ContagemError::Config(err.to_string())
    }
}

/// Failure of the storage layer behind a counter store.
///
/// The rate limiter resolves these through its failure policy; they never
/// reach the request gate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store could not be reached or did not answer.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for Contagem operations.
pub type Result<T> = std::result::Result<T, ContagemError>;
