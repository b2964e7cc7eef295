//! Subject resolution for the authorization endpoint
//!
//! The gateway does not log users in. A login front-end authenticates the
//! user and forwards the request with the subject id in a header. The
//! front-end proves itself with a shared proxy secret so a client cannot
//! set the subject header directly.

use std::future::Future;
use std::pin::Pin;

use axum::http::{HeaderMap, HeaderName};
use common::Secret;
use tracing::warn;

/// Header carrying the proxy secret from the login front-end.
pub const PROXY_SECRET_HEADER: &str = "x-proxy-secret";

const MAX_SUBJECT_LEN: usize = 256;

/// Maps an incoming authorization request to an authenticated subject id.
pub trait SubjectResolver: Send + Sync {
    /// `None` means the user agent is not authenticated.
    fn resolve<'a>(
        &'a self,
        headers: &'a HeaderMap,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>>;
}

/// Trusts a subject header set by the login front-end.
pub struct TrustedHeaderResolver {
    subject_header: HeaderName,
    proxy_secret: Option<Secret<String>>,
}

impl TrustedHeaderResolver {
    /// With no proxy secret the header is trusted as is; the listener must
    /// then only be reachable through the front-end.
    pub fn new(subject_header: HeaderName, proxy_secret: Option<Secret<String>>) -> Self {
        Self {
            subject_header,
            proxy_secret,
        }
    }

    fn resolve_sync(&self, headers: &HeaderMap) -> Option<String> {
        if let Some(secret) = &self.proxy_secret {
            let presented = headers
                .get(PROXY_SECRET_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            if !secret.matches(presented) {
                if headers.contains_key(&self.subject_header) {
                    warn!("subject header present without a valid proxy secret, ignoring");
                }
                return None;
            }
        }

        let subject = headers.get(&self.subject_header)?.to_str().ok()?.trim();
        if subject.is_empty() || subject.len() > MAX_SUBJECT_LEN {
            return None;
        }
        Some(subject.to_string())
    }
}

impl SubjectResolver for TrustedHeaderResolver {
    fn resolve<'a>(
        &'a self,
        headers: &'a HeaderMap,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(async move { self.resolve_sync(headers) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, value.parse().unwrap());
        }
        map
    }

    fn resolver(secret: Option<&str>) -> TrustedHeaderResolver {
        TrustedHeaderResolver::new(
            HeaderName::from_static("x-authenticated-subject"),
            secret.map(|s| Secret::new(s.to_string())),
        )
    }

    #[tokio::test]
    async fn resolves_subject_with_valid_secret() {
        let r = resolver(Some("s3cret"));
        let h = headers(&[
            ("x-authenticated-subject", "user-1"),
            (PROXY_SECRET_HEADER, "s3cret"),
        ]);
        assert_eq!(r.resolve(&h).await.as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn wrong_or_missing_secret_yields_none() {
        let r = resolver(Some("s3cret"));
        let wrong = headers(&[
            ("x-authenticated-subject", "user-1"),
            (PROXY_SECRET_HEADER, "guess"),
        ]);
        assert_eq!(r.resolve(&wrong).await, None);

        let missing = headers(&[("x-authenticated-subject", "user-1")]);
        assert_eq!(r.resolve(&missing).await, None);
    }

    #[tokio::test]
    async fn no_secret_configured_trusts_header() {
        let r = resolver(None);
        let h = headers(&[("x-authenticated-subject", " user-2 ")]);
        assert_eq!(r.resolve(&h).await.as_deref(), Some("user-2"));
    }

    #[tokio::test]
    async fn missing_or_blank_subject_yields_none() {
        let r = resolver(None);
        assert_eq!(r.resolve(&HeaderMap::new()).await, None);
        let blank = headers(&[("x-authenticated-subject", "   ")]);
        assert_eq!(r.resolve(&blank).await, None);
    }

    #[tokio::test]
    async fn oversized_subject_is_rejected() {
        let r = resolver(None);
        let mut h = HeaderMap::new();
        h.insert(
            "x-authenticated-subject",
            "a".repeat(MAX_SUBJECT_LEN + 1).parse().unwrap(),
        );
        assert_eq!(r.resolve(&h).await, None);
    }
}
