//! OAuth flow constants

use std::time::Duration;

/// Random bytes in an authorization code (256 bits).
pub const CODE_BYTES: usize = 32;

/// Random bytes in an access or refresh token (256 bits).
pub const TOKEN_BYTES: usize = 32;

pub const DEFAULT_CODE_TTL: Duration = Duration::from_secs(90);

/// Upper bound on the authorization code lifetime (RFC 6749 section 4.1.2
/// recommends at most 10 minutes).
pub const MAX_CODE_TTL: Duration = Duration::from_secs(600);

pub const DEFAULT_ACCESS_TOKEN_TTL: Duration = Duration::from_secs(900);

pub const DEFAULT_REFRESH_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

pub const TOKEN_TYPE: &str = "Bearer";

/// RFC 7636 section 4.1 verifier length bounds.
pub const MIN_VERIFIER_LEN: usize = 43;
pub const MAX_VERIFIER_LEN: usize = 128;

/// base64url(SHA256(..)) without padding.
pub const S256_CHALLENGE_LEN: usize = 43;

/// Attempts at inserting a freshly generated code before giving up.
pub const ISSUE_ATTEMPTS: usize = 3;
