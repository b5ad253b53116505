//! Error types for the order fulfillment engine

use rental_types::OrderId;
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur in the engine services
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] rental_types::Error),

    #[error("Chain client error: {0}")]
    Chain(#[from] rental_tron::TronError),

    #[error("Order {0} in invalid state for operation: {1}")]
    InvalidState(OrderId, String),

    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shutdown signal received")]
    Shutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Expected business conflicts (duplicate flash rent, double charge).
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Domain(e) if e.is_conflict())
    }

    /// Transient failures worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Domain(e) => e.is_retryable(),
            EngineError::Chain(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        EngineError::Internal(format!("Task join error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rental_types::Error;

    #[test]
    fn test_conflict_classification() {
        let err = EngineError::Domain(Error::DuplicateFlashRent("Txx".to_string()));
        assert!(err.is_conflict());
        assert!(!err.is_retryable());

        let err = EngineError::Domain(Error::NetworkError("reset".to_string()));
        assert!(!err.is_conflict());
        assert!(err.is_retryable());
    }
}
