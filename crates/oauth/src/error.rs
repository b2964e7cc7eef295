//! Error types for the OAuth flow

/// Errors from authorization, exchange and refresh.
///
/// Each failure is its own variant so the HTTP layer can map it to a status
/// code without reading message text. Variants that would tell an attacker
/// which check failed share an RFC 6749 code through `error_code()`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid client")]
    InvalidClient,

    #[error("redirect uri is not registered for this client")]
    InvalidRedirectUri,

    /// Malformed input, e.g. a PKCE verifier outside the allowed alphabet.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid grant")]
    InvalidGrant,

    #[error("authorization code expired")]
    ExpiredGrant,

    /// A consumed code was presented again. Treated as a compromise signal.
    #[error("authorization code already used")]
    GrantAlreadyUsed,

    #[error("redirect uri does not match the authorization request")]
    RedirectUriMismatch,

    #[error("unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("store error: {0}")]
    Store(#[from] store::Error),
}

impl Error {
    /// RFC 6749 section 5.2 error code for the token endpoint.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::InvalidClient => "invalid_client",
            Error::InvalidRedirectUri | Error::InvalidRequest(_) => "invalid_request",
            Error::InvalidGrant
            | Error::ExpiredGrant
            | Error::GrantAlreadyUsed
            | Error::RedirectUriMismatch => "invalid_grant",
            Error::UnsupportedGrantType(_) => "unsupported_grant_type",
            Error::Store(e) if e.is_transient() => "temporarily_unavailable",
            Error::InvalidConfiguration(_) | Error::Store(_) => "server_error",
        }
    }

    /// Only store connectivity failures may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Store(e) if e.is_transient())
    }
}

/// Result alias for OAuth operations.
pub type Result<T> = std::result::Result<T, Error>;
