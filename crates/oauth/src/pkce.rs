//! PKCE (Proof Key for Code Exchange) verification per RFC 7636
//!
//! The client sends `code_challenge` when authorization begins and the
//! matching `code_verifier` at exchange time. Verification is pure and
//! stateless. Both methods compare in constant time.

use common::{constant_time_eq, digest, random_token};
use store::ChallengeMethod;

use crate::constants::{MAX_VERIFIER_LEN, MIN_VERIFIER_LEN, S256_CHALLENGE_LEN};
use crate::error::{Error, Result};

/// Verify `code_verifier` against a stored challenge.
///
/// A verifier outside 43-128 unreserved characters fails with
/// `InvalidRequest` before any comparison. A well-formed verifier that does
/// not match returns `Ok(false)`.
pub fn verify(code_verifier: &str, code_challenge: &str, method: ChallengeMethod) -> Result<bool> {
    validate_verifier(code_verifier)?;
    let matched = match method {
        ChallengeMethod::S256 => constant_time_eq(&compute_challenge(code_verifier), code_challenge),
        ChallengeMethod::Plain => constant_time_eq(code_verifier, code_challenge),
    };
    Ok(matched)
}

/// `BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    digest(verifier)
}

/// Generate a random verifier (64 bytes, 86 base64url characters).
pub fn generate_verifier() -> String {
    random_token(64)
}

/// Check length and alphabet: `[A-Z] / [a-z] / [0-9] / "-" / "." / "_" / "~"`.
pub fn validate_verifier(verifier: &str) -> Result<()> {
    if !(MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&verifier.len()) {
        return Err(Error::InvalidRequest(format!(
            "code_verifier must be {MIN_VERIFIER_LEN}-{MAX_VERIFIER_LEN} characters"
        )));
    }
    if !verifier.bytes().all(is_unreserved) {
        return Err(Error::InvalidRequest(
            "code_verifier contains characters outside the unreserved set".into(),
        ));
    }
    Ok(())
}

/// Validate a challenge at authorization time.
///
/// `S256` challenges are always 43 base64url characters. `plain` challenges
/// are the verifier itself and follow the verifier rules.
pub fn validate_challenge(challenge: &str, method: ChallengeMethod) -> Result<()> {
    match method {
        ChallengeMethod::S256 => {
            let well_formed = challenge.len() == S256_CHALLENGE_LEN
                && challenge
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
            if !well_formed {
                return Err(Error::InvalidRequest(
                    "code_challenge is not a base64url SHA-256 digest".into(),
                ));
            }
            Ok(())
        }
        ChallengeMethod::Plain => validate_verifier(challenge)
            .map_err(|_| Error::InvalidRequest("plain code_challenge is malformed".into())),
    }
}

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}
