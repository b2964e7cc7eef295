//! Error types for API key operations

/// Errors from API key issuance, verification and rotation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No key matches the presented value, or the value is malformed.
    #[error("invalid api key")]
    InvalidApiKey,

    #[error("api key revoked")]
    RevokedApiKey,

    #[error("api key expired")]
    ExpiredApiKey,

    #[error("not found: {0}")]
    NotFound(String),

    /// Rotation of a key that is not active.
    #[error("api key not active: {0}")]
    NotActive(String),

    #[error("invalid rotation policy: {0}")]
    InvalidPolicy(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("store error: {0}")]
    Store(#[from] store::Error),
}

impl Error {
    /// Only store connectivity failures may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Store(e) if e.is_transient())
    }
}

/// Result alias for API key operations.
pub type Result<T> = std::result::Result<T, Error>;
