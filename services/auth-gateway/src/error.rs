//! Request error to HTTP response mapping

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

/// Errors a handler can return.
///
/// OAuth failures render as RFC 6749 section 5.2 bodies. Grant failures all
/// collapse to `invalid_grant` so a caller cannot tell a replayed code from
/// an expired one.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    OAuth(#[from] oauth::Error),

    #[error(transparent)]
    ApiKey(#[from] api_keys::Error),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::OAuth(e) if e.is_transient() => {
                (StatusCode::SERVICE_UNAVAILABLE, e.error_code())
            }
            ApiError::OAuth(e @ (oauth::Error::InvalidConfiguration(_) | oauth::Error::Store(_))) => {
                (StatusCode::INTERNAL_SERVER_ERROR, e.error_code())
            }
            ApiError::OAuth(oauth::Error::InvalidClient) => {
                (StatusCode::UNAUTHORIZED, "invalid_client")
            }
            ApiError::OAuth(e) => (StatusCode::BAD_REQUEST, e.error_code()),

            ApiError::ApiKey(
                api_keys::Error::InvalidApiKey
                | api_keys::Error::RevokedApiKey
                | api_keys::Error::ExpiredApiKey,
            ) => (StatusCode::UNAUTHORIZED, "invalid_api_key"),
            ApiError::ApiKey(api_keys::Error::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::ApiKey(api_keys::Error::NotActive(_)) => (StatusCode::CONFLICT, "not_active"),
            ApiError::ApiKey(
                api_keys::Error::InvalidPolicy(_) | api_keys::Error::InvalidRequest(_),
            ) => (StatusCode::BAD_REQUEST, "invalid_request"),
            ApiError::ApiKey(e) if e.is_transient() => {
                (StatusCode::SERVICE_UNAVAILABLE, "temporarily_unavailable")
            }
            ApiError::ApiKey(api_keys::Error::Store(store::Error::Conflict(_))) => {
                (StatusCode::CONFLICT, "conflict")
            }
            ApiError::ApiKey(api_keys::Error::Store(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "server_error")
            }

            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        }
    }

    /// Human-readable detail, only where it reveals nothing about which
    /// credential check failed.
    fn description(&self) -> Option<String> {
        match self {
            ApiError::OAuth(oauth::Error::InvalidRequest(msg))
            | ApiError::BadRequest(msg)
            | ApiError::NotFound(msg) => Some(msg.clone()),
            ApiError::OAuth(e @ oauth::Error::UnsupportedGrantType(_)) => Some(e.to_string()),
            ApiError::OAuth(oauth::Error::InvalidRedirectUri) => {
                Some("redirect_uri is not registered for this client".into())
            }
            ApiError::ApiKey(
                e @ (api_keys::Error::NotFound(_)
                | api_keys::Error::NotActive(_)
                | api_keys::Error::InvalidPolicy(_)
                | api_keys::Error::InvalidRequest(_)),
            ) => Some(e.to_string()),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "request failed");
        } else {
            warn!(error = %self, status = status.as_u16(), "request rejected");
        }

        let mut body = serde_json::json!({ "error": code });
        if let Some(description) = self.description() {
            body["error_description"] = serde_json::Value::String(description);
        }

        (
            status,
            [
                (header::CONTENT_TYPE, "application/json"),
                (header::CACHE_CONTROL, "no-store"),
            ],
            body.to_string(),
        )
            .into_response()
    }
}
