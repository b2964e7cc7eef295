//! Router fixtures shared by the handler tests

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderName, Request, header};
use axum::response::Response;
use common::{ManualClock, Secret};
use metrics_exporter_prometheus::PrometheusBuilder;
use oauth::{
    AuthorizationCodeIssuer, ClientRegistry, ReplayPolicy, TokenExchangeEngine, TokenLifetimes,
};
use store::{MemoryStore, OAuthClient};

use api_keys::{ApiKeyManager, PolicyDefaults};

use crate::admin::{AdminState, build_admin_router};
use crate::endpoints::{AppState, build_router};
use crate::identity::TrustedHeaderResolver;

pub const START_MILLIS: u64 = 1_700_000_000_000;

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub app: AppState,
    pub admin: AdminState,
}

impl Harness {
    pub fn new(proxy_secret: Option<&str>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(START_MILLIS));

        let issuer = Arc::new(
            AuthorizationCodeIssuer::new(
                store.clone(),
                clock.clone(),
                Duration::from_secs(90),
                true,
            )
            .unwrap(),
        );
        let lifetimes =
            TokenLifetimes::new(Duration::from_secs(900), Duration::from_secs(30 * 24 * 3600))
                .unwrap();
        let engine = Arc::new(TokenExchangeEngine::new(
            store.clone(),
            clock.clone(),
            issuer.clone(),
            lifetimes,
            ReplayPolicy::RevokeTokens,
        ));
        let clients = Arc::new(ClientRegistry::new(store.clone(), clock.clone()));
        let api_keys = Arc::new(ApiKeyManager::new(
            store.clone(),
            clock.clone(),
            PolicyDefaults::default(),
        ));
        let resolver = Arc::new(TrustedHeaderResolver::new(
            HeaderName::from_static("x-authenticated-subject"),
            proxy_secret.map(|s| Secret::new(s.to_string())),
        ));

        let app = AppState {
            clients: clients.clone(),
            issuer,
            engine: engine.clone(),
            api_keys: api_keys.clone(),
            resolver,
            prometheus: PrometheusBuilder::new().build_recorder().handle(),
            store_backend: "memory".into(),
            started_at: Instant::now(),
        };
        let admin = AdminState {
            clients,
            api_keys,
            engine,
        };
        Self { clock, app, admin }
    }

    pub fn router(&self) -> Router {
        build_router(self.app.clone(), 16)
    }

    pub fn admin_router(&self) -> Router {
        build_admin_router(self.admin.clone(), 16)
    }

    /// Active client with `https://app/cb` registered.
    pub async fn register_client(&self) -> OAuthClient {
        self.admin
            .clients
            .register("test client", vec!["https://app/cb".into()])
            .await
            .unwrap()
    }

    /// Plaintext of a fresh key for `owner_id`.
    pub async fn issue_api_key(&self, owner_id: &str) -> String {
        let issued = self.admin.api_keys.issue(owner_id, None).await.unwrap();
        issued.plaintext.expose().clone()
    }
}

pub fn get_request(uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn form_request(uri: &str, body: &str, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
