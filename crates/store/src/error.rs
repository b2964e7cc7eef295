//! Error types for credential store operations

/// Errors from credential store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness constraint or conditional-update precondition failed.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("store parse error: {0}")]
    Parse(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl Error {
    /// Whether the caller may retry the operation with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Unavailable(_))
    }
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;
