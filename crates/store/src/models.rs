//! Persisted credential entities
//!
//! All timestamps are unix milliseconds. Secrets never appear in plaintext:
//! codes and tokens are keyed by their digest, API keys carry only the
//! digest of their secret.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a registered OAuth client.
///
/// Clients are never deleted; `Revoked` is the terminal soft-delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Active,
    Suspended,
    Revoked,
}

impl ClientStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ClientStatus::Active => "active",
            ClientStatus::Suspended => "suspended",
            ClientStatus::Revoked => "revoked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(ClientStatus::Active),
            "suspended" => Some(ClientStatus::Suspended),
            "revoked" => Some(ClientStatus::Revoked),
            _ => None,
        }
    }
}

/// A registered OAuth client application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_name: String,
    pub redirect_uris: BTreeSet<String>,
    pub status: ClientStatus,
    pub created_at: u64,
}

impl OAuthClient {
    pub fn is_active(&self) -> bool {
        self.status == ClientStatus::Active
    }

    /// Exact string match against the registered set.
    pub fn allows_redirect(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.contains(redirect_uri)
    }
}

/// PKCE code challenge method (RFC 7636 section 4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeMethod {
    #[serde(rename = "S256")]
    S256,
    #[serde(rename = "plain")]
    Plain,
}

impl ChallengeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeMethod::S256 => "S256",
            ChallengeMethod::Plain => "plain",
        }
    }

    /// Parse the wire value. Method names are case-sensitive.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "S256" => Some(ChallengeMethod::S256),
            "plain" => Some(ChallengeMethod::Plain),
            _ => None,
        }
    }
}

/// A pending (or spent) authorization code, keyed by `code_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationGrant {
    pub code_hash: String,
    pub client_id: String,
    pub code_challenge: String,
    pub code_challenge_method: ChallengeMethod,
    pub redirect_uri: String,
    pub scope: String,
    pub subject_id: String,
    pub created_at: u64,
    pub expires_at: u64,
    pub consumed: bool,
}

/// Result of the atomic read-and-mark-consumed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// This call won: the grant is now consumed and returned as it was.
    Consumed(AuthorizationGrant),
    /// Some earlier call consumed it. Carries the record for escalation.
    AlreadyConsumed(AuthorizationGrant),
    Expired,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Active,
    /// Refresh token already exchanged for a successor.
    Rotated,
    Revoked,
}

/// An issued access or refresh token, keyed by `token_hash`.
///
/// `family_id` ties every token descending from one authorization code
/// together so a whole lineage can be revoked at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token_hash: String,
    pub kind: TokenKind,
    pub family_id: String,
    pub subject_id: String,
    pub client_id: String,
    pub scope: String,
    pub issued_at: u64,
    pub expires_at: u64,
    pub status: TokenStatus,
}

impl TokenRecord {
    pub fn is_live(&self, now: u64) -> bool {
        self.status == TokenStatus::Active && now < self.expires_at
    }
}

/// Successor pair minted by the caller for a refresh rotation. The store
/// copies subject, client, scope and family from the rotated token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTokenPair {
    pub access_hash: String,
    pub refresh_hash: String,
    pub issued_at: u64,
    pub access_expires_at: u64,
    pub refresh_expires_at: u64,
}

/// Result of the conditional refresh-token rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotateOutcome {
    /// The presented token was active and is now `Rotated`; the successor
    /// pair is stored. Carries the rotated record.
    Rotated(TokenRecord),
    /// The presented token was already rotated: replay.
    Reused(TokenRecord),
    Revoked,
    Expired,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyStatus {
    Active,
    /// Superseded by a newer key; still valid until `grace_until`.
    Rotated,
    Revoked,
}

impl ApiKeyStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ApiKeyStatus::Active => "active",
            ApiKeyStatus::Rotated => "rotated",
            ApiKeyStatus::Revoked => "revoked",
        }
    }
}

/// A long-lived API key. Only the digest of the secret is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    pub key_id: String,
    pub key_prefix: String,
    pub key_hash: String,
    pub owner_id: String,
    pub status: ApiKeyStatus,
    pub created_at: u64,
    /// Predecessor key id, for the audit trail only.
    pub rotated_from: Option<String>,
    pub rotated_at: Option<u64>,
    pub grace_until: Option<u64>,
    pub revoked_at: Option<u64>,
    pub expires_at: Option<u64>,
}

/// What a rotation policy applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyScope {
    Owner(String),
    Client(String),
}

impl PolicyScope {
    /// Flat key used to index policies (`owner:<id>` / `client:<id>`).
    pub fn storage_key(&self) -> String {
        match self {
            PolicyScope::Owner(id) => format!("owner:{id}"),
            PolicyScope::Client(id) => format!("client:{id}"),
        }
    }

    pub fn subject(&self) -> &str {
        match self {
            PolicyScope::Owner(id) | PolicyScope::Client(id) => id,
        }
    }
}

/// Rotation policy: how long a key lives and how long a rotated key keeps
/// validating alongside its replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRotationPolicy {
    pub scope: PolicyScope,
    /// `None` means keys never expire on their own.
    pub max_age_ms: Option<u64>,
    pub grace_period_ms: u64,
}

impl KeyRotationPolicy {
    pub fn new(scope: PolicyScope, max_age: Option<Duration>, grace_period: Duration) -> Self {
        Self {
            scope,
            max_age_ms: max_age.map(|d| d.as_millis() as u64),
            grace_period_ms: grace_period.as_millis() as u64,
        }
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_ms.map(Duration::from_millis)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}
