//! Token exchange engine
//!
//! Exchanges an authorization code (or a refresh token) for an opaque
//! access/refresh pair. Tokens are random, stored only as digests, and tied
//! together by a family id so one lineage can be revoked at once.
//!
//! An authorization code exchange walks
//! `Start -> GrantConsumed -> PkceVerified -> TokenIssued`, and any failed
//! check ends in `Failed`. No token material is generated before every
//! check has passed. A caller that abandons the exchange after the grant was
//! consumed loses the code; the user has to authorize again.

use std::sync::Arc;
use std::time::Duration;

use common::{Clock, Secret, digest, random_token};
use serde::Deserialize;
use store::{
    ConsumeOutcome, CredentialStore, NewTokenPair, RotateOutcome, TokenKind, TokenRecord,
    TokenStatus,
};
use tracing::{debug, error, info, warn};

use crate::constants::{TOKEN_BYTES, TOKEN_TYPE};
use crate::error::{Error, Result};
use crate::grant::AuthorizationCodeIssuer;
use crate::pkce;

/// What to do when a consumed code or a rotated refresh token comes back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayPolicy {
    /// Log and count the replay, nothing else.
    LogOnly,
    /// Also revoke every live token of the affected subject/client pair.
    #[default]
    RevokeTokens,
}

/// Access and refresh token lifetimes. Access is always strictly shorter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLifetimes {
    access: Duration,
    refresh: Duration,
}

impl TokenLifetimes {
    pub fn new(access: Duration, refresh: Duration) -> Result<Self> {
        if access.is_zero() || refresh.is_zero() {
            return Err(Error::InvalidConfiguration(
                "token lifetimes must be non-zero".into(),
            ));
        }
        if access >= refresh {
            return Err(Error::InvalidConfiguration(
                "access token lifetime must be shorter than refresh token lifetime".into(),
            ));
        }
        Ok(Self { access, refresh })
    }

    pub fn access(&self) -> Duration {
        self.access
    }

    pub fn refresh(&self) -> Duration {
        self.refresh
    }
}

/// A newly minted token pair. The plaintext tokens exist only here.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
    pub subject_id: String,
    pub client_id: String,
    pub scope: String,
    pub issued_at: u64,
    /// Access token expiry.
    pub expires_at: u64,
    pub refresh_expires_at: u64,
}

impl TokenPair {
    pub fn token_type(&self) -> &'static str {
        TOKEN_TYPE
    }

    /// Access token lifetime in seconds, for the `expires_in` field.
    pub fn expires_in(&self) -> u64 {
        self.expires_at.saturating_sub(self.issued_at) / 1000
    }
}

/// Where an authorization code exchange got to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStage {
    Start,
    GrantConsumed,
    PkceVerified,
    TokenIssued,
    Failed,
}

impl ExchangeStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeStage::Start => "start",
            ExchangeStage::GrantConsumed => "grant_consumed",
            ExchangeStage::PkceVerified => "pkce_verified",
            ExchangeStage::TokenIssued => "token_issued",
            ExchangeStage::Failed => "failed",
        }
    }

    /// Move to `Failed`, returning the last stage reached.
    fn fail(&mut self) -> ExchangeStage {
        std::mem::replace(self, ExchangeStage::Failed)
    }
}

#[derive(Debug, Clone, Copy)]
enum ReplayKind {
    AuthorizationCode,
    RefreshToken,
}

impl ReplayKind {
    fn label(&self) -> &'static str {
        match self {
            ReplayKind::AuthorizationCode => "authorization_code",
            ReplayKind::RefreshToken => "refresh_token",
        }
    }
}

pub struct TokenExchangeEngine {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    issuer: Arc<AuthorizationCodeIssuer>,
    lifetimes: TokenLifetimes,
    replay_policy: ReplayPolicy,
}

impl TokenExchangeEngine {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        issuer: Arc<AuthorizationCodeIssuer>,
        lifetimes: TokenLifetimes,
        replay_policy: ReplayPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            issuer,
            lifetimes,
            replay_policy,
        }
    }

    pub fn lifetimes(&self) -> TokenLifetimes {
        self.lifetimes
    }

    /// Exchange an authorization code for a token pair.
    ///
    /// A malformed verifier is rejected before the code is touched, so a
    /// typo does not burn it. After that the code is consumed, and every
    /// later failure leaves it spent.
    pub async fn exchange_authorization_code(
        &self,
        code: &str,
        code_verifier: &str,
        client_id: &str,
        redirect_uri: &str,
    ) -> Result<TokenPair> {
        let mut stage = ExchangeStage::Start;
        let result = self
            .run_exchange(&mut stage, code, code_verifier, client_id, redirect_uri)
            .await;
        match &result {
            Ok(pair) => {
                metrics::counter!("oauth_tokens_issued_total", "grant_type" => "authorization_code")
                    .increment(1);
                info!(
                    client_id,
                    subject_id = %pair.subject_id,
                    stage = stage.as_str(),
                    "authorization code exchanged"
                );
            }
            Err(e) => {
                let reached = stage.fail();
                info!(
                    client_id,
                    stage = reached.as_str(),
                    error = %e,
                    "authorization code exchange failed"
                );
            }
        }
        result
    }

    async fn run_exchange(
        &self,
        stage: &mut ExchangeStage,
        code: &str,
        code_verifier: &str,
        client_id: &str,
        redirect_uri: &str,
    ) -> Result<TokenPair> {
        pkce::validate_verifier(code_verifier)?;

        let grant = match self.issuer.try_consume(code).await? {
            ConsumeOutcome::Consumed(grant) => grant,
            ConsumeOutcome::AlreadyConsumed(grant) => {
                self.on_replay(ReplayKind::AuthorizationCode, &grant.subject_id, &grant.client_id)
                    .await;
                return Err(Error::GrantAlreadyUsed);
            }
            ConsumeOutcome::Expired => return Err(Error::ExpiredGrant),
            ConsumeOutcome::NotFound => return Err(Error::InvalidGrant),
        };
        *stage = ExchangeStage::GrantConsumed;

        // RFC 6749 section 4.1.3: a code issued to another client is an
        // invalid grant, not an invalid client
        if grant.client_id != client_id {
            return Err(Error::InvalidGrant);
        }
        self.require_active_client(client_id).await?;
        if grant.redirect_uri != redirect_uri {
            return Err(Error::RedirectUriMismatch);
        }
        if !pkce::verify(code_verifier, &grant.code_challenge, grant.code_challenge_method)? {
            return Err(Error::InvalidGrant);
        }
        *stage = ExchangeStage::PkceVerified;

        let now = self.clock.now_millis();
        let family_id = uuid::Uuid::new_v4().to_string();
        let pair = self.mint(grant.subject_id, grant.client_id, grant.scope, now);
        let (access, refresh) = self.records(&pair, family_id);
        self.store.insert_token_pair(access, refresh).await?;
        *stage = ExchangeStage::TokenIssued;
        Ok(pair)
    }

    /// Rotate a refresh token: the presented token is invalidated and a new
    /// pair in the same family is returned.
    ///
    /// Unknown, revoked or expired tokens are `InvalidGrant`. Presenting a
    /// token that was already rotated is a replay and also `InvalidGrant`.
    /// If the owning client is no longer active the token is left untouched
    /// and the call fails with `InvalidClient`.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let hash = digest(refresh_token);
        let now = self.clock.now_millis();

        let record = self
            .store
            .get_token(&hash)
            .await?
            .filter(|r| r.kind == TokenKind::Refresh)
            .ok_or(Error::InvalidGrant)?;
        if record.is_live(now) {
            self.require_active_client(&record.client_id).await?;
        }

        let pair = self.mint(record.subject_id, record.client_id, record.scope, now);
        let next = NewTokenPair {
            access_hash: digest(pair.access_token.expose()),
            refresh_hash: digest(pair.refresh_token.expose()),
            issued_at: now,
            access_expires_at: pair.expires_at,
            refresh_expires_at: pair.refresh_expires_at,
        };

        match self.store.rotate_refresh_token(&hash, next, now).await? {
            RotateOutcome::Rotated(previous) => {
                metrics::counter!("oauth_tokens_issued_total", "grant_type" => "refresh_token")
                    .increment(1);
                info!(
                    client_id = %previous.client_id,
                    subject_id = %previous.subject_id,
                    family_id = %previous.family_id,
                    "refresh token rotated"
                );
                Ok(pair)
            }
            RotateOutcome::Reused(previous) => {
                self.on_replay(
                    ReplayKind::RefreshToken,
                    &previous.subject_id,
                    &previous.client_id,
                )
                .await;
                Err(Error::InvalidGrant)
            }
            RotateOutcome::Revoked | RotateOutcome::Expired | RotateOutcome::NotFound => {
                debug!("refresh token rejected");
                Err(Error::InvalidGrant)
            }
        }
    }

    /// The stored record of a live token: active, unexpired, and owned by a
    /// client that is still active.
    pub async fn introspect(&self, token: &str) -> Result<Option<TokenRecord>> {
        let now = self.clock.now_millis();
        let Some(record) = self.store.get_token(&digest(token)).await? else {
            return Ok(None);
        };
        if !record.is_live(now) {
            return Ok(None);
        }
        match self.store.get_client(&record.client_id).await? {
            Some(client) if client.is_active() => Ok(Some(record)),
            _ => Ok(None),
        }
    }

    /// Revoke a token and its whole family (RFC 7009). Unknown tokens are
    /// not an error; returns whether anything matched.
    pub async fn revoke(&self, token: &str) -> Result<bool> {
        let found = self.store.revoke_token(&digest(token)).await?;
        if found {
            info!("token family revoked");
        }
        Ok(found)
    }

    /// Revoke every live token for a subject/client pair.
    pub async fn revoke_tokens_for(&self, subject_id: &str, client_id: &str) -> Result<usize> {
        let revoked = self.store.revoke_tokens_for(subject_id, client_id).await?;
        info!(subject_id, client_id, revoked, "revoked tokens for subject");
        Ok(revoked)
    }

    async fn require_active_client(&self, client_id: &str) -> Result<()> {
        match self.store.get_client(client_id).await? {
            Some(client) if client.is_active() => Ok(()),
            _ => Err(Error::InvalidClient),
        }
    }

    fn mint(&self, subject_id: String, client_id: String, scope: String, now: u64) -> TokenPair {
        TokenPair {
            access_token: Secret::new(random_token(TOKEN_BYTES)),
            refresh_token: Secret::new(random_token(TOKEN_BYTES)),
            subject_id,
            client_id,
            scope,
            issued_at: now,
            expires_at: now + self.lifetimes.access.as_millis() as u64,
            refresh_expires_at: now + self.lifetimes.refresh.as_millis() as u64,
        }
    }

    fn records(&self, pair: &TokenPair, family_id: String) -> (TokenRecord, TokenRecord) {
        let access = TokenRecord {
            token_hash: digest(pair.access_token.expose()),
            kind: TokenKind::Access,
            family_id,
            subject_id: pair.subject_id.clone(),
            client_id: pair.client_id.clone(),
            scope: pair.scope.clone(),
            issued_at: pair.issued_at,
            expires_at: pair.expires_at,
            status: TokenStatus::Active,
        };
        let refresh = TokenRecord {
            token_hash: digest(pair.refresh_token.expose()),
            kind: TokenKind::Refresh,
            expires_at: pair.refresh_expires_at,
            ..access.clone()
        };
        (access, refresh)
    }

    async fn on_replay(&self, kind: ReplayKind, subject_id: &str, client_id: &str) {
        warn!(
            kind = kind.label(),
            subject_id,
            client_id,
            "credential replay detected"
        );
        metrics::counter!("oauth_replay_detected_total", "kind" => kind.label()).increment(1);

        if self.replay_policy == ReplayPolicy::RevokeTokens {
            match self.store.revoke_tokens_for(subject_id, client_id).await {
                Ok(revoked) => {
                    warn!(subject_id, client_id, revoked, "revoked tokens after replay")
                }
                Err(e) => {
                    error!(subject_id, client_id, error = %e, "failed to revoke tokens after replay")
                }
            }
        }
    }
}
