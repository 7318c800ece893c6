//! Crypto-layer error types and conversions.

use vigil_core::VigilError;

/// Errors raised by crypto engines and X.509 assembly.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("no engine registered with id {0}")]
    EngineNotFound(String),

    #[error("key already exists with different parameters: {0}")]
    KeyAlreadyExists(String),

    #[error("unsupported key parameters: {0}")]
    UnsupportedKey(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("signature verification failed: {0}")]
    VerificationFailed(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("engine backend unavailable: {0}")]
    Backend(String),

    #[error("operation not supported by this engine: {0}")]
    Unsupported(String),
}

impl From<der::Error> for CryptoError {
    fn from(err: der::Error) -> Self {
        CryptoError::Encoding(err.to_string())
    }
}

impl From<CryptoError> for VigilError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::KeyNotFound(id) => VigilError::not_found("key", id),
            CryptoError::EngineNotFound(id) => VigilError::not_found("engine", id),
            CryptoError::KeyAlreadyExists(id) => VigilError::AlreadyExists {
                entity: "key".into(),
                id,
            },
            CryptoError::UnsupportedKey(msg) | CryptoError::InvalidInput(msg) => {
                VigilError::Validation { message: msg }
            }
            CryptoError::Backend(msg) => VigilError::Upstream(msg),
            other => VigilError::Crypto(other.to_string()),
        }
    }
}

pub type CryptoResult<T> = Result<T, CryptoError>;
