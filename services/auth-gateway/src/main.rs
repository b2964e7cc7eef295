//! OAuth2 authorization server and API key gateway
//!
//! Single binary that:
//! 1. Issues PKCE-bound authorization codes for subjects authenticated by a
//!    login front-end
//! 2. Exchanges codes for access/refresh token pairs and rotates refresh tokens
//! 3. Manages long-lived API keys with rotation grace periods
//! 4. Serves an admin API on a separate listener

mod admin;
mod config;
mod endpoints;
mod error;
mod identity;
mod metrics;
#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::http::HeaderName;
use common::{Clock, SystemClock};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_keys::ApiKeyManager;
use oauth::{AuthorizationCodeIssuer, ClientRegistry, TokenExchangeEngine, TokenLifetimes};
use store::{CredentialStore, FileStore, MemoryStore};

use crate::admin::{AdminState, build_admin_router};
use crate::config::{Config, StoreBackend};
use crate::endpoints::{AppState, build_router};
use crate::identity::TrustedHeaderResolver;

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting auth-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        admin_addr = %config.server.admin_addr,
        backend = ?config.store.backend,
        on_replay = ?config.oauth.on_replay,
        "configuration loaded"
    );

    let store = open_store(&config).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let issuer = Arc::new(
        AuthorizationCodeIssuer::new(
            store.clone(),
            clock.clone(),
            config.oauth.code_ttl(),
            config.oauth.allow_plain_pkce,
        )
        .context("invalid authorization code settings")?,
    );
    let lifetimes = TokenLifetimes::new(
        config.oauth.access_token_ttl(),
        config.oauth.refresh_token_ttl(),
    )
    .context("invalid token lifetimes")?;
    let engine = Arc::new(TokenExchangeEngine::new(
        store.clone(),
        clock.clone(),
        issuer.clone(),
        lifetimes,
        config.oauth.on_replay,
    ));
    let clients = Arc::new(ClientRegistry::new(store.clone(), clock.clone()));
    let key_manager = Arc::new(ApiKeyManager::new(
        store.clone(),
        clock.clone(),
        config.api_keys.policy_defaults(),
    ));

    let subject_header = HeaderName::from_bytes(config.identity.subject_header.as_bytes())
        .context("invalid identity.subject_header")?;
    if config.identity.proxy_secret.is_none() {
        warn!(
            header = %subject_header,
            "no proxy secret configured, subject header is trusted from any caller"
        );
    }
    let resolver = Arc::new(TrustedHeaderResolver::new(
        subject_header,
        config.identity.proxy_secret.clone(),
    ));

    let purge_task = oauth::spawn_purge_task(
        store.clone(),
        clock.clone(),
        config.oauth.purge_interval(),
        config.oauth.purge_retention(),
    );
    let sweep_task =
        api_keys::spawn_sweep_task(key_manager.clone(), config.api_keys.sweep_interval());

    let app_state = AppState {
        clients: clients.clone(),
        issuer,
        engine: engine.clone(),
        api_keys: key_manager.clone(),
        resolver,
        prometheus: prometheus_handle,
        store_backend: store.backend().to_string(),
        started_at: Instant::now(),
    };
    let admin_state = AdminState {
        clients,
        api_keys: key_manager,
        engine,
    };

    let app = build_router(app_state, config.server.max_connections);
    let admin_app = build_admin_router(admin_state, config.server.max_connections);

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;
    let admin_listener = TcpListener::bind(config.server.admin_addr)
        .await
        .with_context(|| format!("failed to bind admin listener to {}", config.server.admin_addr))?;

    info!(
        addr = %config.server.listen_addr,
        admin_addr = %config.server.admin_addr,
        "accepting requests"
    );

    // The drain timeout starts when the shutdown signal fires, not when the
    // servers start.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let (admin_shutdown_tx, admin_shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });
    let admin_handle = tokio::spawn(async move {
        axum::serve(admin_listener, admin_app)
            .with_graceful_shutdown(async {
                let _ = admin_shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;

    let _ = shutdown_tx.send(());
    let _ = admin_shutdown_tx.send(());
    purge_task.abort();
    sweep_task.abort();

    match tokio::time::timeout(DRAIN_TIMEOUT, async {
        (server_handle.await, admin_handle.await)
    })
    .await
    {
        Ok((public, admin)) => {
            for (name, result) in [("public", public), ("admin", admin)] {
                match result {
                    Ok(Ok(())) => info!(listener = name, "all in-flight requests drained"),
                    Ok(Err(e)) => error!(listener = name, error = %e, "server error during shutdown"),
                    Err(e) => error!(listener = name, error = %e, "server task panicked"),
                }
            }
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

async fn open_store(config: &Config) -> Result<Arc<dyn CredentialStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            warn!("memory store selected, credentials do not survive a restart");
            let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::new());
            Ok(store)
        }
        StoreBackend::File => {
            let path = config
                .store
                .path
                .clone()
                .context("store.path is required for the file backend")?;
            let store = FileStore::load(path.clone())
                .await
                .with_context(|| format!("failed to open store at {}", path.display()))?;
            let store: Arc<dyn CredentialStore> = Arc::new(store);
            Ok(store)
        }
    }
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use std::path::PathBuf;

    fn config_from(toml_text: &str) -> Config {
        toml::from_str(toml_text).unwrap()
    }

    #[tokio::test]
    async fn open_store_memory() {
        let config = config_from(
            r#"
[server]
listen_addr = "127.0.0.1:0"
admin_addr = "127.0.0.1:0"

[store]
backend = "memory"
"#,
        );
        let store = open_store(&config).await.unwrap();
        assert_eq!(store.backend(), "memory");
    }

    #[tokio::test]
    async fn open_store_file_creates_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let config = config_from(&format!(
            "[server]\nlisten_addr = \"127.0.0.1:0\"\nadmin_addr = \"127.0.0.1:0\"\n\n\
             [store]\nbackend = \"file\"\npath = \"{}\"\n",
            path.display()
        ));
        let store = open_store(&config).await.unwrap();
        assert_eq!(store.backend(), "file");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn open_store_file_rejects_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let path: PathBuf = dir.path().join("store.json");
        std::fs::write(&path, "{ not json").unwrap();
        let config = config_from(&format!(
            "[server]\nlisten_addr = \"127.0.0.1:0\"\nadmin_addr = \"127.0.0.1:0\"\n\n\
             [store]\nbackend = \"file\"\npath = \"{}\"\n",
            path.display()
        ));
        assert!(open_store(&config).await.is_err());
    }

    /// Drives the whole authorization code flow over a real socket.
    #[tokio::test]
    async fn end_to_end_over_http() {
        let h = Harness::new(None);
        let client = h.register_client().await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = h.router();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();
        let verifier = oauth::pkce::generate_verifier();
        let challenge = oauth::pkce::compute_challenge(&verifier);

        let authorize_url = url::Url::parse_with_params(
            &format!("http://{addr}/oauth/authorize"),
            &[
                ("response_type", "code"),
                ("client_id", client.client_id.as_str()),
                ("redirect_uri", "https://app/cb"),
                ("code_challenge", challenge.as_str()),
                ("code_challenge_method", "S256"),
                ("state", "abc"),
            ],
        )
        .unwrap();
        let response = http
            .get(authorize_url)
            .header("x-authenticated-subject", "user-e2e")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::FOUND);
        let location = response.headers()[reqwest::header::LOCATION]
            .to_str()
            .unwrap()
            .to_string();
        let location = url::Url::parse(&location).unwrap();
        let code = location
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())
            .unwrap();

        let response = http
            .post(format!("http://{addr}/oauth/token"))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("code_verifier", verifier.as_str()),
                ("client_id", client.client_id.as_str()),
                ("redirect_uri", "https://app/cb"),
            ])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let tokens: serde_json::Value = response.json().await.unwrap();
        assert_eq!(tokens["token_type"], "Bearer");
        assert!(tokens["access_token"].as_str().is_some());

        // the same code a second time is a replay
        let response = http
            .post(format!("http://{addr}/oauth/token"))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("code_verifier", verifier.as_str()),
                ("client_id", client.client_id.as_str()),
                ("redirect_uri", "https://app/cb"),
            ])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        // replay escalation revoked the tokens from the first exchange
        let refresh = tokens["refresh_token"].as_str().unwrap();
        let response = http
            .post(format!("http://{addr}/oauth/token"))
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh)])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        server.abort();
    }
}
