//! Common error types for services

use thiserror::Error;

/// Engine error kinds
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed intent JSON, unknown fields, bad snapshot payloads
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Cancel/replace against an unknown order or symbol
    #[error("not found: {0}")]
    NotFound(String),

    /// Order-level policy rejection (AON unfillable, IOC residual, bad replace)
    #[error("policy reject: {0}")]
    PolicyReject(String),

    /// Notifier queue overflow
    #[error("backpressure: {0}")]
    Backpressure(String),

    /// Recoverable sink failure (cache, trade store, blob store)
    #[error("transient: {0}")]
    Transient(String),

    /// Unrecoverable condition; aborts the process
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::InvalidInput(err.to_string())
    }
}

impl From<redis::RedisError> for EngineError {
    fn from(err: redis::RedisError) -> Self {
        EngineError::Transient(err.to_string())
    }
}

/// Convenience alias used across the services
pub type EngineResult<T> = Result<T, EngineError>;
