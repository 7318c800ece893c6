//! Error types for the Vigil system.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VigilError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Entity already exists: {entity} with id {id}")]
    AlreadyExists { entity: String, id: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Invalid state transition: {entity} cannot go from {from} to {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },

    #[error("Authentication required: {reason}")]
    Unauthorized { reason: String },

    #[error("Operation denied by policy: {reason}")]
    Forbidden { reason: String },

    #[error("Cryptography error: {0}")]
    Crypto(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Upstream service unavailable: {0}")]
    Upstream(String),

    #[error("Operation canceled")]
    Canceled,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),
}

impl VigilError {
    /// Whether a bounded local retry can reasonably recover from this error.
    ///
    /// Only storage and upstream failures qualify; everything else is
    /// deterministic and surfaced immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VigilError::Storage(_) | VigilError::Upstream(_))
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        VigilError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        VigilError::Validation {
            message: message.into(),
        }
    }
}

pub type VigilResult<T> = Result<T, VigilError>;
