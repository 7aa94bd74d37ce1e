//! Error types for the fieldsync engine.

use crate::Timestamp;
use thiserror::Error;

/// All possible errors from the fieldsync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Payload validation errors
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("unknown operation type: {0}")]
    UnknownOperationType(String),

    #[error("unknown priority: {0}")]
    UnknownPriority(String),

    // Storage governance
    #[error("storage quota exceeded: {used} of {limit} bytes in use")]
    QuotaExceeded { used: u64, limit: u64 },

    // Queue state errors
    #[error("photo {0} is already synced")]
    PhotoAlreadySynced(String),

    #[error("cache entry expired at {0}")]
    Expired(Timestamp),
}

impl Error {
    /// Payload errors can never succeed on retry.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Error::InvalidPayload(_)
                | Error::MissingRequiredField(_)
                | Error::TypeMismatch { .. }
                | Error::UnknownOperationType(_)
                | Error::UnknownPriority(_)
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
