//! Public OAuth endpoints
//!
//! - GET  /oauth/authorize   begin authorization, redirect with a code
//! - POST /oauth/token       authorization_code and refresh_token grants
//! - POST /oauth/revoke      RFC 7009 token revocation
//! - POST /oauth/introspect  RFC 7662 introspection, API key authenticated
//! - GET  /health
//! - GET  /metrics

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Form, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Router, middleware};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use api_keys::ApiKeyManager;
use oauth::{
    AuthorizationCodeIssuer, AuthorizationRequest, ClientRegistry, TokenExchangeEngine, TokenPair,
};
use store::{ChallengeMethod, TokenKind};

use crate::error::ApiError;
use crate::identity::SubjectResolver;

/// Header carrying the caller's API key on introspection requests.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared state for the public listener.
#[derive(Clone)]
pub struct AppState {
    pub clients: Arc<ClientRegistry>,
    pub issuer: Arc<AuthorizationCodeIssuer>,
    pub engine: Arc<TokenExchangeEngine>,
    pub api_keys: Arc<ApiKeyManager>,
    pub resolver: Arc<dyn SubjectResolver>,
    pub prometheus: PrometheusHandle,
    pub store_backend: String,
    pub started_at: Instant,
}

/// Build the public router.
///
/// Applies a concurrency limit of `max_connections` in-flight requests.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/oauth/authorize", get(authorize))
        .route("/oauth/token", post(token))
        .route("/oauth/revoke", post(revoke))
        .route("/oauth/introspect", post(introspect))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route_layer(middleware::from_fn(crate::metrics::track_requests))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct AuthorizeParams {
    response_type: Option<String>,
    client_id: Option<String>,
    redirect_uri: Option<String>,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
    scope: Option<String>,
    state: Option<String>,
}

/// GET /oauth/authorize
///
/// Nothing is redirected until the client is known and the redirect URI is
/// registered for it; before that errors are rendered as JSON.
async fn authorize(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    let (Some(client_id), Some(redirect_uri)) = (
        non_empty(&params.client_id),
        non_empty(&params.redirect_uri),
    ) else {
        return json_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "client_id and redirect_uri are required",
        );
    };

    match state.clients.get(client_id).await {
        Ok(Some(client)) if client.is_active() => {
            if !client.allows_redirect(redirect_uri) {
                return json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_request",
                    "redirect_uri is not registered for this client",
                );
            }
        }
        Ok(_) => {
            return json_error(
                StatusCode::BAD_REQUEST,
                "invalid_client",
                "unknown or inactive client",
            );
        }
        Err(e) => return ApiError::from(e).into_response(),
    }

    let Ok(redirect) = Url::parse(redirect_uri) else {
        return json_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "redirect_uri is not a valid URI",
        );
    };
    let client_state = params.state.as_deref();

    let Some(subject_id) = state.resolver.resolve(&headers).await else {
        return json_error(
            StatusCode::UNAUTHORIZED,
            "login_required",
            "no authenticated subject",
        );
    };

    match params.response_type.as_deref() {
        None | Some("code") => {}
        Some(_) => {
            return redirect_error(
                &redirect,
                "unsupported_response_type",
                "only response_type=code is supported",
                client_state,
            );
        }
    }

    let Some(code_challenge) = non_empty(&params.code_challenge) else {
        return redirect_error(
            &redirect,
            "invalid_request",
            "code_challenge is required",
            client_state,
        );
    };
    // RFC 7636 section 4.3: an absent method means plain
    let method = params.code_challenge_method.as_deref().unwrap_or("plain");
    let Some(code_challenge_method) = ChallengeMethod::parse(method) else {
        return redirect_error(
            &redirect,
            "invalid_request",
            "unsupported code_challenge_method",
            client_state,
        );
    };

    let request = AuthorizationRequest {
        client_id: client_id.to_string(),
        redirect_uri: redirect_uri.to_string(),
        code_challenge: code_challenge.to_string(),
        code_challenge_method,
        subject_id,
        scope: params.scope.clone().unwrap_or_default(),
    };

    match state.issuer.issue(request).await {
        Ok(issued) => redirect_to(
            &redirect,
            &[("code", issued.code.expose().as_str())],
            client_state,
        ),
        Err(oauth::Error::InvalidClient | oauth::Error::InvalidRedirectUri) => json_error(
            StatusCode::BAD_REQUEST,
            "invalid_client",
            "unknown or inactive client",
        ),
        Err(e) => {
            warn!(client_id, error = %e, "authorization request rejected");
            let description = match &e {
                oauth::Error::InvalidRequest(msg) => msg.clone(),
                _ => "authorization failed".to_string(),
            };
            redirect_error(&redirect, e.error_code(), &description, client_state)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenParams {
    grant_type: Option<String>,
    code: Option<String>,
    code_verifier: Option<String>,
    client_id: Option<String>,
    redirect_uri: Option<String>,
    refresh_token: Option<String>,
}

/// POST /oauth/token
async fn token(
    State(state): State<AppState>,
    Form(params): Form<TokenParams>,
) -> Result<Response, ApiError> {
    let pair = match params.grant_type.as_deref() {
        Some("authorization_code") => {
            let code = required(&params.code, "code")?;
            let code_verifier = required(&params.code_verifier, "code_verifier")?;
            let client_id = required(&params.client_id, "client_id")?;
            let redirect_uri = required(&params.redirect_uri, "redirect_uri")?;
            state
                .engine
                .exchange_authorization_code(code, code_verifier, client_id, redirect_uri)
                .await?
        }
        Some("refresh_token") => {
            let refresh_token = required(&params.refresh_token, "refresh_token")?;
            state.engine.refresh(refresh_token).await?
        }
        Some(other) => return Err(oauth::Error::UnsupportedGrantType(other.to_string()).into()),
        None => return Err(oauth::Error::InvalidRequest("missing grant_type".into()).into()),
    };
    Ok(token_response(&pair))
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenOnlyParams {
    token: Option<String>,
}

/// POST /oauth/revoke
///
/// Unknown tokens still get 200 (RFC 7009 section 2.2).
async fn revoke(
    State(state): State<AppState>,
    Form(params): Form<TokenOnlyParams>,
) -> Result<Response, ApiError> {
    let token = required(&params.token, "token")?;
    state.engine.revoke(token).await?;
    Ok((StatusCode::OK, [(header::CACHE_CONTROL, "no-store")]).into_response())
}

/// POST /oauth/introspect
async fn introspect(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(params): Form<TokenOnlyParams>,
) -> Result<Response, ApiError> {
    let presented = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(api_keys::Error::InvalidApiKey)?;
    let caller = state.api_keys.verify(presented).await?;
    let token = required(&params.token, "token")?;

    let record = state.engine.introspect(token).await?;
    debug!(key_id = %caller.key_id, active = record.is_some(), "token introspected");

    let body = match record {
        Some(record) => serde_json::json!({
            "active": true,
            "scope": record.scope,
            "client_id": record.client_id,
            "sub": record.subject_id,
            "token_type": oauth::constants::TOKEN_TYPE,
            "kind": match record.kind {
                TokenKind::Access => "access_token",
                TokenKind::Refresh => "refresh_token",
            },
            "iat": record.issued_at / 1000,
            "exp": record.expires_at / 1000,
        }),
        None => serde_json::json!({ "active": false }),
    };
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        body.to_string(),
    )
        .into_response())
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::json!({
            "status": "healthy",
            "store": state.store_backend,
            "uptime_seconds": state.started_at.elapsed().as_secs(),
        })
        .to_string(),
    )
}

/// Prometheus metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, ApiError> {
    non_empty(value).ok_or_else(|| oauth::Error::InvalidRequest(format!("missing {name}")).into())
}

fn token_response(pair: &TokenPair) -> Response {
    info!(
        client_id = %pair.client_id,
        subject_id = %pair.subject_id,
        "token pair issued"
    );
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, "no-store"),
            (header::PRAGMA, "no-cache"),
        ],
        serde_json::json!({
            "access_token": pair.access_token.expose(),
            "token_type": pair.token_type(),
            "expires_in": pair.expires_in(),
            "refresh_token": pair.refresh_token.expose(),
            "scope": pair.scope,
        })
        .to_string(),
    )
        .into_response()
}

fn json_error(status: StatusCode, code: &str, description: &str) -> Response {
    (
        status,
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        serde_json::json!({ "error": code, "error_description": description }).to_string(),
    )
        .into_response()
}

fn redirect_error(base: &Url, code: &str, description: &str, state: Option<&str>) -> Response {
    redirect_to(
        base,
        &[("error", code), ("error_description", description)],
        state,
    )
}

/// 302 to `base` with `pairs` and the client's `state` appended to the query.
fn redirect_to(base: &Url, pairs: &[(&str, &str)], state: Option<&str>) -> Response {
    let mut location = base.clone();
    {
        let mut query = location.query_pairs_mut();
        for (name, value) in pairs {
            query.append_pair(name, value);
        }
        if let Some(state) = state {
            query.append_pair("state", state);
        }
    }
    (
        StatusCode::FOUND,
        [
            (header::LOCATION, location.to_string()),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, body_json, form_request, get_request};
    use axum::body::Body;
    use std::time::Duration;
    use tower::ServiceExt;

    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";
    const SUBJECT_HEADER: &str = "x-authenticated-subject";

    fn authorize_uri(client_id: &str, extra: &str) -> String {
        format!(
            "/oauth/authorize?response_type=code&client_id={client_id}\
             &redirect_uri=https%3A%2F%2Fapp%2Fcb&code_challenge={CHALLENGE}\
             &code_challenge_method=S256&scope=read&state=xyz{extra}"
        )
    }

    fn location(response: &Response) -> Url {
        let value = response.headers()[header::LOCATION].to_str().unwrap();
        Url::parse(value).unwrap()
    }

    fn query_value(url: &Url, name: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    async fn authorize_code(h: &Harness, client_id: &str) -> String {
        let response = h
            .router()
            .oneshot(get_request(
                &authorize_uri(client_id, ""),
                &[(SUBJECT_HEADER, "user-1")],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        query_value(&location(&response), "code").unwrap()
    }

    fn exchange_form(code: &str, verifier: &str, client_id: &str) -> String {
        format!(
            "grant_type=authorization_code&code={code}&code_verifier={verifier}\
             &client_id={client_id}&redirect_uri=https%3A%2F%2Fapp%2Fcb"
        )
    }

    #[tokio::test]
    async fn authorize_redirects_with_code_and_state() {
        let h = Harness::new(None);
        let client = h.register_client().await;

        let response = h
            .router()
            .oneshot(get_request(
                &authorize_uri(&client.client_id, ""),
                &[(SUBJECT_HEADER, "user-1")],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        let url = location(&response);
        assert_eq!(url.host_str(), Some("app"));
        assert_eq!(url.path(), "/cb");
        assert_eq!(query_value(&url, "state").as_deref(), Some("xyz"));
        assert_eq!(query_value(&url, "code").unwrap().len(), 43);
    }

    #[tokio::test]
    async fn authorize_unknown_client_is_json_not_redirect() {
        let h = Harness::new(None);
        let response = h
            .router()
            .oneshot(get_request(
                &authorize_uri("no-such-client", ""),
                &[(SUBJECT_HEADER, "user-1")],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(header::LOCATION).is_none());
        assert_eq!(body_json(response).await["error"], "invalid_client");
    }

    #[tokio::test]
    async fn authorize_unregistered_redirect_is_json_not_redirect() {
        let h = Harness::new(None);
        let client = h.register_client().await;
        let uri = format!(
            "/oauth/authorize?client_id={}&redirect_uri=https%3A%2F%2Fevil%2Fcb\
             &code_challenge={CHALLENGE}&code_challenge_method=S256",
            client.client_id
        );
        let response = h
            .router()
            .oneshot(get_request(&uri, &[(SUBJECT_HEADER, "user-1")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(header::LOCATION).is_none());
    }

    #[tokio::test]
    async fn authorize_without_subject_is_unauthorized() {
        let h = Harness::new(None);
        let client = h.register_client().await;
        let response = h
            .router()
            .oneshot(get_request(&authorize_uri(&client.client_id, ""), &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn authorize_requires_proxy_secret_when_configured() {
        let h = Harness::new(Some("front-end-secret"));
        let client = h.register_client().await;

        let forged = h
            .router()
            .oneshot(get_request(
                &authorize_uri(&client.client_id, ""),
                &[(SUBJECT_HEADER, "admin")],
            ))
            .await
            .unwrap();
        assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);

        let genuine = h
            .router()
            .oneshot(get_request(
                &authorize_uri(&client.client_id, ""),
                &[
                    (SUBJECT_HEADER, "user-1"),
                    (crate::identity::PROXY_SECRET_HEADER, "front-end-secret"),
                ],
            ))
            .await
            .unwrap();
        assert_eq!(genuine.status(), StatusCode::FOUND);
    }

    #[tokio::test]
    async fn authorize_parameter_errors_redirect() {
        let h = Harness::new(None);
        let client = h.register_client().await;

        let uri = format!(
            "/oauth/authorize?client_id={}&redirect_uri=https%3A%2F%2Fapp%2Fcb&state=s1",
            client.client_id
        );
        let response = h
            .router()
            .oneshot(get_request(&uri, &[(SUBJECT_HEADER, "user-1")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        let url = location(&response);
        assert_eq!(query_value(&url, "error").as_deref(), Some("invalid_request"));
        assert_eq!(query_value(&url, "state").as_deref(), Some("s1"));
        assert!(query_value(&url, "code").is_none());

        let bad_method = authorize_uri(&client.client_id, "").replace("S256", "S512");
        let response = h
            .router()
            .oneshot(get_request(&bad_method, &[(SUBJECT_HEADER, "user-1")]))
            .await
            .unwrap();
        assert_eq!(
            query_value(&location(&response), "error").as_deref(),
            Some("invalid_request")
        );

        let token_flow = authorize_uri(&client.client_id, "")
            .replace("response_type=code", "response_type=token");
        let response = h
            .router()
            .oneshot(get_request(&token_flow, &[(SUBJECT_HEADER, "user-1")]))
            .await
            .unwrap();
        assert_eq!(
            query_value(&location(&response), "error").as_deref(),
            Some("unsupported_response_type")
        );
    }

    #[tokio::test]
    async fn full_code_exchange_and_refresh() {
        let h = Harness::new(None);
        let client = h.register_client().await;
        let code = authorize_code(&h, &client.client_id).await;

        let response = h
            .router()
            .oneshot(form_request(
                "/oauth/token",
                &exchange_form(&code, VERIFIER, &client.client_id),
                &[],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        assert_eq!(response.headers()[header::PRAGMA], "no-cache");
        let body = body_json(response).await;
        assert_eq!(body["token_type"], "Bearer");
        assert_eq!(body["expires_in"], 900);
        assert_eq!(body["scope"], "read");
        let refresh_token = body["refresh_token"].as_str().unwrap().to_string();

        let response = h
            .router()
            .oneshot(form_request(
                "/oauth/token",
                &format!("grant_type=refresh_token&refresh_token={refresh_token}"),
                &[],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let rotated = body_json(response).await;
        assert_ne!(rotated["refresh_token"], body["refresh_token"]);
        assert_ne!(rotated["access_token"], body["access_token"]);
    }

    #[tokio::test]
    async fn code_replay_is_invalid_grant() {
        let h = Harness::new(None);
        let client = h.register_client().await;
        let code = authorize_code(&h, &client.client_id).await;
        let form = exchange_form(&code, VERIFIER, &client.client_id);

        let first = h
            .router()
            .oneshot(form_request("/oauth/token", &form, &[]))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = h
            .router()
            .oneshot(form_request("/oauth/token", &form, &[]))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(second).await,
            serde_json::json!({ "error": "invalid_grant" })
        );
    }

    #[tokio::test]
    async fn wrong_verifier_is_invalid_grant() {
        let h = Harness::new(None);
        let client = h.register_client().await;
        let code = authorize_code(&h, &client.client_id).await;
        let wrong = "a".repeat(43);

        let response = h
            .router()
            .oneshot(form_request(
                "/oauth/token",
                &exchange_form(&code, &wrong, &client.client_id),
                &[],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "invalid_grant");
    }

    #[tokio::test]
    async fn expired_code_is_invalid_grant() {
        let h = Harness::new(None);
        let client = h.register_client().await;
        let code = authorize_code(&h, &client.client_id).await;
        h.clock.advance(Duration::from_secs(91));

        let response = h
            .router()
            .oneshot(form_request(
                "/oauth/token",
                &exchange_form(&code, VERIFIER, &client.client_id),
                &[],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "invalid_grant");
    }

    #[tokio::test]
    async fn token_request_validation() {
        let h = Harness::new(None);

        let response = h
            .router()
            .oneshot(form_request("/oauth/token", "grant_type=password", &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "unsupported_grant_type");

        let response = h
            .router()
            .oneshot(form_request("/oauth/token", "code=abc", &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "invalid_request");

        let response = h
            .router()
            .oneshot(form_request(
                "/oauth/token",
                "grant_type=authorization_code&code=abc",
                &[],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "invalid_request");
        assert_eq!(body["error_description"], "missing code_verifier");
    }

    #[tokio::test]
    async fn suspended_client_cannot_exchange() {
        let h = Harness::new(None);
        let client = h.register_client().await;
        let code = authorize_code(&h, &client.client_id).await;
        h.admin
            .clients
            .set_status(&client.client_id, store::ClientStatus::Suspended)
            .await
            .unwrap();

        let response = h
            .router()
            .oneshot(form_request(
                "/oauth/token",
                &exchange_form(&code, VERIFIER, &client.client_id),
                &[],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "invalid_client");
    }

    #[tokio::test]
    async fn revoke_then_introspect() {
        let h = Harness::new(None);
        let client = h.register_client().await;
        let api_key = h.issue_api_key("resource-server").await;
        let code = authorize_code(&h, &client.client_id).await;

        let response = h
            .router()
            .oneshot(form_request(
                "/oauth/token",
                &exchange_form(&code, VERIFIER, &client.client_id),
                &[],
            ))
            .await
            .unwrap();
        let tokens = body_json(response).await;
        let access = tokens["access_token"].as_str().unwrap().to_string();

        let response = h
            .router()
            .oneshot(form_request(
                "/oauth/introspect",
                &format!("token={access}"),
                &[(API_KEY_HEADER, api_key.as_str())],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["active"], true);
        assert_eq!(body["sub"], "user-1");
        assert_eq!(body["client_id"], client.client_id.as_str());
        assert_eq!(body["kind"], "access_token");

        let response = h
            .router()
            .oneshot(form_request("/oauth/revoke", &format!("token={access}"), &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = h
            .router()
            .oneshot(form_request(
                "/oauth/introspect",
                &format!("token={access}"),
                &[(API_KEY_HEADER, api_key.as_str())],
            ))
            .await
            .unwrap();
        assert_eq!(
            body_json(response).await,
            serde_json::json!({ "active": false })
        );
    }

    #[tokio::test]
    async fn revoke_unknown_token_is_ok() {
        let h = Harness::new(None);
        let response = h
            .router()
            .oneshot(form_request("/oauth/revoke", "token=never-issued", &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = h
            .router()
            .oneshot(form_request("/oauth/revoke", "", &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn introspect_requires_valid_api_key() {
        let h = Harness::new(None);

        let response = h
            .router()
            .oneshot(form_request("/oauth/introspect", "token=x", &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = h
            .router()
            .oneshot(form_request(
                "/oauth/introspect",
                "token=x",
                &[(API_KEY_HEADER, "agk_0000000000_bogus")],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "invalid_api_key");
    }

    #[tokio::test]
    async fn health_endpoint() {
        let h = Harness::new(None);
        let response = h
            .router()
            .oneshot(get_request("/health", &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["store"], "memory");
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_text_format() {
        let h = Harness::new(None);
        let response = h
            .router()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; version=0.0.4; charset=utf-8"
        );
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let h = Harness::new(None);
        let response = h
            .router()
            .oneshot(get_request("/oauth/device", &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
