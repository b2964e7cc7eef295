//! Admin API for clients, API keys and token revocation
//!
//! Runs on a separate listener (`server.admin_addr`) that must not be
//! exposed publicly. Responses never contain stored digests.
//!
//! Endpoints:
//! - POST   /admin/clients               register a client
//! - GET    /admin/clients/{id}          fetch a client
//! - POST   /admin/clients/{id}/status   suspend, reactivate or revoke
//! - POST   /admin/keys                  issue an API key
//! - GET    /admin/keys?owner_id=        list an owner's keys
//! - POST   /admin/keys/{id}/rotate      rotate a key
//! - DELETE /admin/keys/{id}             revoke a key
//! - POST   /admin/tokens/revoke         revoke a subject's tokens for a client

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use serde::Deserialize;
use store::{ApiKey, ClientStatus, KeyRotationPolicy, OAuthClient, PolicyScope};
use tracing::info;

use api_keys::{ApiKeyManager, IssuedKey};
use oauth::{ClientRegistry, TokenExchangeEngine};

use crate::error::ApiError;

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    pub clients: Arc<ClientRegistry>,
    pub api_keys: Arc<ApiKeyManager>,
    pub engine: Arc<TokenExchangeEngine>,
}

/// Build the admin axum router.
pub fn build_admin_router(state: AdminState, max_connections: usize) -> Router {
    Router::new()
        .route("/admin/clients", post(register_client))
        .route("/admin/clients/{id}", get(get_client))
        .route("/admin/clients/{id}/status", post(set_client_status))
        .route("/admin/keys", post(issue_key).get(list_keys))
        .route("/admin/keys/{id}/rotate", post(rotate_key))
        .route("/admin/keys/{id}", axum::routing::delete(revoke_key))
        .route("/admin/tokens/revoke", post(revoke_tokens))
        .route_layer(middleware::from_fn(crate::metrics::track_requests))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[derive(Deserialize)]
struct RegisterClientRequest {
    client_name: String,
    redirect_uris: Vec<String>,
}

/// POST /admin/clients
async fn register_client(
    State(state): State<AdminState>,
    Json(body): Json<RegisterClientRequest>,
) -> Result<Response, ApiError> {
    let client = state
        .clients
        .register(&body.client_name, body.redirect_uris)
        .await
        .map_err(admin_oauth_error)?;
    Ok(json_response(StatusCode::CREATED, client_view(&client)))
}

/// GET /admin/clients/{id}
async fn get_client(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let client = state
        .clients
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("client {id}")))?;
    Ok(json_response(StatusCode::OK, client_view(&client)))
}

#[derive(Deserialize)]
struct ClientStatusRequest {
    status: String,
}

/// POST /admin/clients/{id}/status
async fn set_client_status(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Json(body): Json<ClientStatusRequest>,
) -> Result<Response, ApiError> {
    let status = ClientStatus::parse(&body.status).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "status must be active, suspended or revoked, got {:?}",
            body.status
        ))
    })?;
    let client = match state.clients.set_status(&id, status).await {
        Ok(client) => client,
        Err(oauth::Error::InvalidClient) => {
            return Err(ApiError::NotFound(format!("client {id}")));
        }
        Err(e) => return Err(admin_oauth_error(e)),
    };
    Ok(json_response(StatusCode::OK, client_view(&client)))
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum PolicyScopeKind {
    Owner,
    Client,
}

#[derive(Deserialize)]
struct PolicyRequest {
    #[serde(default = "default_scope_kind")]
    scope: PolicyScopeKind,
    /// Omitted or null: keys never expire
    max_age_secs: Option<u64>,
    grace_period_secs: u64,
}

fn default_scope_kind() -> PolicyScopeKind {
    PolicyScopeKind::Owner
}

#[derive(Deserialize)]
struct IssueKeyRequest {
    owner_id: String,
    #[serde(default)]
    policy: Option<PolicyRequest>,
}

/// POST /admin/keys
///
/// The plaintext key appears in this response only.
async fn issue_key(
    State(state): State<AdminState>,
    Json(body): Json<IssueKeyRequest>,
) -> Result<Response, ApiError> {
    let policy = body.policy.map(|p| {
        let scope = match p.scope {
            PolicyScopeKind::Owner => PolicyScope::Owner(body.owner_id.clone()),
            PolicyScopeKind::Client => PolicyScope::Client(body.owner_id.clone()),
        };
        KeyRotationPolicy::new(
            scope,
            p.max_age_secs.map(Duration::from_secs),
            Duration::from_secs(p.grace_period_secs),
        )
    });
    let issued = state.api_keys.issue(&body.owner_id, policy).await?;
    Ok(json_response(StatusCode::CREATED, issued_view(&issued)))
}

#[derive(Deserialize)]
struct ListKeysQuery {
    owner_id: Option<String>,
}

/// GET /admin/keys?owner_id=
async fn list_keys(
    State(state): State<AdminState>,
    Query(query): Query<ListKeysQuery>,
) -> Result<Response, ApiError> {
    let owner_id = query
        .owner_id
        .filter(|o| !o.is_empty())
        .ok_or_else(|| ApiError::BadRequest("owner_id is required".into()))?;
    let keys = state.api_keys.list(&owner_id).await?;
    let keys: Vec<_> = keys.iter().map(key_view).collect();
    Ok(json_response(
        StatusCode::OK,
        serde_json::json!({ "keys": keys }),
    ))
}

/// POST /admin/keys/{id}/rotate
async fn rotate_key(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let issued = state.api_keys.rotate(&id).await?;
    Ok(json_response(StatusCode::OK, issued_view(&issued)))
}

/// DELETE /admin/keys/{id}
async fn revoke_key(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let key = state.api_keys.revoke(&id).await?;
    Ok(json_response(StatusCode::OK, key_view(&key)))
}

#[derive(Deserialize)]
struct RevokeTokensRequest {
    subject_id: String,
    client_id: String,
}

/// POST /admin/tokens/revoke
async fn revoke_tokens(
    State(state): State<AdminState>,
    Json(body): Json<RevokeTokensRequest>,
) -> Result<Response, ApiError> {
    let revoked = state
        .engine
        .revoke_tokens_for(&body.subject_id, &body.client_id)
        .await?;
    info!(
        subject_id = %body.subject_id,
        client_id = %body.client_id,
        revoked,
        "admin revoked tokens"
    );
    Ok(json_response(
        StatusCode::OK,
        serde_json::json!({ "revoked": revoked }),
    ))
}

/// Client errors on the admin side are request problems, not
/// authentication failures.
fn admin_oauth_error(err: oauth::Error) -> ApiError {
    match err {
        oauth::Error::InvalidRedirectUri => {
            ApiError::BadRequest("redirect uris must be absolute http(s) without fragment".into())
        }
        oauth::Error::InvalidRequest(msg) => ApiError::BadRequest(msg),
        other => ApiError::OAuth(other),
    }
}

fn client_view(client: &OAuthClient) -> serde_json::Value {
    serde_json::json!({
        "client_id": client.client_id,
        "client_name": client.client_name,
        "redirect_uris": client.redirect_uris,
        "status": client.status.label(),
        "created_at": client.created_at,
    })
}

fn key_view(key: &ApiKey) -> serde_json::Value {
    serde_json::json!({
        "key_id": key.key_id,
        "key_prefix": key.key_prefix,
        "owner_id": key.owner_id,
        "status": key.status.label(),
        "created_at": key.created_at,
        "expires_at": key.expires_at,
        "rotated_from": key.rotated_from,
        "rotated_at": key.rotated_at,
        "grace_until": key.grace_until,
        "revoked_at": key.revoked_at,
    })
}

fn issued_view(issued: &IssuedKey) -> serde_json::Value {
    serde_json::json!({
        "key": key_view(&issued.key),
        "api_key": issued.plaintext.expose(),
    })
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
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
