//! Authorization code issuance and single-use consumption
//!
//! A code is the only thing handed back to the caller. The store keeps the
//! grant under the code's digest, so a leaked store file cannot be replayed.
//! Consumption is one conditional update in the store; two exchanges racing
//! on the same code cannot both win.

use std::sync::Arc;
use std::time::Duration;

use common::{Clock, Secret, digest, random_token};
use store::{AuthorizationGrant, ChallengeMethod, ConsumeOutcome, CredentialStore};
use tracing::{debug, info};

use crate::constants::{CODE_BYTES, ISSUE_ATTEMPTS, MAX_CODE_TTL};
use crate::error::{Error, Result};
use crate::pkce;

/// Parameters of a begin-authorization request, after the subject has been
/// authenticated.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub code_challenge_method: ChallengeMethod,
    pub subject_id: String,
    pub scope: String,
}

/// A freshly issued code. The plaintext never reaches the store.
#[derive(Debug)]
pub struct IssuedCode {
    pub code: Secret<String>,
    pub redirect_uri: String,
    pub expires_at: u64,
}

pub struct AuthorizationCodeIssuer {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    code_ttl: Duration,
    allow_plain_pkce: bool,
}

impl AuthorizationCodeIssuer {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        code_ttl: Duration,
        allow_plain_pkce: bool,
    ) -> Result<Self> {
        if code_ttl.is_zero() || code_ttl > MAX_CODE_TTL {
            return Err(Error::InvalidConfiguration(format!(
                "code ttl must be between 1 and {} seconds",
                MAX_CODE_TTL.as_secs()
            )));
        }
        Ok(Self {
            store,
            clock,
            code_ttl,
            allow_plain_pkce,
        })
    }

    pub fn code_ttl(&self) -> Duration {
        self.code_ttl
    }

    /// Record a pending grant and return its code.
    ///
    /// The client must be active and the redirect URI registered for it.
    /// A freshly generated code that collides with an existing one is
    /// regenerated.
    pub async fn issue(&self, request: AuthorizationRequest) -> Result<IssuedCode> {
        let client = self
            .store
            .get_client(&request.client_id)
            .await?
            .filter(|c| c.is_active())
            .ok_or(Error::InvalidClient)?;
        if !client.allows_redirect(&request.redirect_uri) {
            return Err(Error::InvalidRedirectUri);
        }
        if request.code_challenge_method == ChallengeMethod::Plain && !self.allow_plain_pkce {
            return Err(Error::InvalidRequest(
                "code_challenge_method plain is not allowed".into(),
            ));
        }
        pkce::validate_challenge(&request.code_challenge, request.code_challenge_method)?;
        if request.subject_id.is_empty() {
            return Err(Error::InvalidRequest("missing subject".into()));
        }

        let now = self.clock.now_millis();
        let expires_at = now + self.code_ttl.as_millis() as u64;

        for attempt in 1..=ISSUE_ATTEMPTS {
            let code = Secret::new(random_token(CODE_BYTES));
            let grant = AuthorizationGrant {
                code_hash: digest(code.expose()),
                client_id: request.client_id.clone(),
                code_challenge: request.code_challenge.clone(),
                code_challenge_method: request.code_challenge_method,
                redirect_uri: request.redirect_uri.clone(),
                scope: request.scope.clone(),
                subject_id: request.subject_id.clone(),
                created_at: now,
                expires_at,
                consumed: false,
            };
            match self.store.insert_grant(grant).await {
                Ok(()) => {
                    info!(
                        client_id = %request.client_id,
                        subject_id = %request.subject_id,
                        method = request.code_challenge_method.as_str(),
                        "issued authorization code"
                    );
                    return Ok(IssuedCode {
                        code,
                        redirect_uri: request.redirect_uri,
                        expires_at,
                    });
                }
                Err(store::Error::Conflict(_)) => {
                    debug!(attempt, "authorization code collided, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::Store(store::Error::Conflict(
            "could not allocate a unique authorization code".into(),
        )))
    }

    /// Atomically mark the grant consumed and return it.
    ///
    /// `InvalidGrant` if unknown, `ExpiredGrant` past `expires_at`,
    /// `GrantAlreadyUsed` if an earlier call consumed it.
    pub async fn consume(&self, code: &str) -> Result<AuthorizationGrant> {
        match self.try_consume(code).await? {
            ConsumeOutcome::Consumed(grant) => Ok(grant),
            ConsumeOutcome::AlreadyConsumed(_) => Err(Error::GrantAlreadyUsed),
            ConsumeOutcome::Expired => Err(Error::ExpiredGrant),
            ConsumeOutcome::NotFound => Err(Error::InvalidGrant),
        }
    }

    /// Raw outcome, so the exchange engine can see who a replayed code
    /// belonged to.
    pub(crate) async fn try_consume(&self, code: &str) -> Result<ConsumeOutcome> {
        let now = self.clock.now_millis();
        Ok(self.store.consume_grant(&digest(code), now).await?)
    }
}
