//! OAuth client registry
//!
//! Clients are registered by an admin, never deleted, and only their status
//! changes afterwards. `Revoked` is terminal.

use std::sync::Arc;

use common::Clock;
use store::{ClientStatus, CredentialStore, OAuthClient};
use tracing::info;
use url::Url;

use crate::error::{Error, Result};

pub struct ClientRegistry {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
}

impl ClientRegistry {
    pub fn new(store: Arc<dyn CredentialStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Register a client with a generated UUID v4 id.
    pub async fn register(&self, name: &str, redirect_uris: Vec<String>) -> Result<OAuthClient> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidRequest("client_name must not be empty".into()));
        }
        if redirect_uris.is_empty() {
            return Err(Error::InvalidRequest(
                "at least one redirect uri is required".into(),
            ));
        }
        for uri in &redirect_uris {
            validate_redirect_uri(uri)?;
        }

        let client = OAuthClient {
            client_id: uuid::Uuid::new_v4().to_string(),
            client_name: name.to_string(),
            redirect_uris: redirect_uris.into_iter().collect(),
            status: ClientStatus::Active,
            created_at: self.clock.now_millis(),
        };
        self.store.insert_client(client.clone()).await?;
        info!(client_id = %client.client_id, client_name = %client.client_name, "registered oauth client");
        Ok(client)
    }

    pub async fn get(&self, client_id: &str) -> Result<Option<OAuthClient>> {
        Ok(self.store.get_client(client_id).await?)
    }

    /// The client, if it exists and is active. Anything else is
    /// `InvalidClient`.
    pub async fn require_active(&self, client_id: &str) -> Result<OAuthClient> {
        match self.store.get_client(client_id).await? {
            Some(client) if client.is_active() => Ok(client),
            _ => Err(Error::InvalidClient),
        }
    }

    pub async fn set_status(&self, client_id: &str, status: ClientStatus) -> Result<OAuthClient> {
        let current = self
            .store
            .get_client(client_id)
            .await?
            .ok_or(Error::InvalidClient)?;
        if current.status == ClientStatus::Revoked && status != ClientStatus::Revoked {
            return Err(Error::InvalidRequest(
                "a revoked client cannot be reactivated".into(),
            ));
        }
        let updated = self.store.set_client_status(client_id, status).await?;
        info!(client_id, status = status.label(), "client status changed");
        Ok(updated)
    }
}

/// Redirect URIs must be absolute `http(s)` URIs with a host and no fragment
/// (RFC 6749 section 3.1.2).
pub fn validate_redirect_uri(uri: &str) -> Result<()> {
    if uri.chars().any(char::is_whitespace) {
        return Err(Error::InvalidRedirectUri);
    }
    let parsed = Url::parse(uri).map_err(|_| Error::InvalidRedirectUri)?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::InvalidRedirectUri);
    }
    // The parser repairs `https:///cb` into `https://cb/`; the registered
    // string has to be the one the browser is sent to.
    let after_scheme = &uri[parsed.scheme().len()..];
    if !after_scheme.starts_with("://") || after_scheme.starts_with(":///") {
        return Err(Error::InvalidRedirectUri);
    }
    if parsed.host_str().is_none_or(str::is_empty) || parsed.fragment().is_some() {
        return Err(Error::InvalidRedirectUri);
    }
    Ok(())
}
