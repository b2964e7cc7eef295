//! API key issuance, verification, rotation and revocation
//!
//! Presented keys are `agk_<prefix>_<secret>`:
//! - `prefix`: 10 characters of `[a-z0-9]`, stored in the clear and indexed
//! - `secret`: 32 random bytes, base64url; stored only as
//!   `SHA256(prefix ":" secret)`
//!
//! Verification is an indexed prefix lookup followed by a constant-time
//! digest comparison against each candidate. It only takes the store's read
//! path, so a rotation in progress never blocks it.

use std::sync::Arc;
use std::time::Duration;

use common::{Clock, Secret, constant_time_eq, digest, random_token};
use rand::RngExt;
use store::{ApiKey, ApiKeyStatus, CredentialStore, KeyRotationPolicy, PolicyScope};
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const KEY_PREFIX: &str = "agk";
pub const PREFIX_LEN: usize = 10;
pub const SECRET_BYTES: usize = 32;

const PREFIX_ALPHABET: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ISSUE_ATTEMPTS: usize = 3;

/// Policy applied when neither the owner nor the request names one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyDefaults {
    pub max_age: Option<Duration>,
    pub grace_period: Duration,
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        Self {
            max_age: Some(Duration::from_secs(90 * 24 * 3600)),
            grace_period: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// A newly created key together with its plaintext. The plaintext is
/// returned exactly once and cannot be recovered later.
#[derive(Debug)]
pub struct IssuedKey {
    pub key: ApiKey,
    pub plaintext: Secret<String>,
}

pub struct ApiKeyManager {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    defaults: PolicyDefaults,
}

impl ApiKeyManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        defaults: PolicyDefaults,
    ) -> Self {
        Self {
            store,
            clock,
            defaults,
        }
    }

    /// Issue a key for `owner_id`.
    ///
    /// A given policy is validated, persisted for the owner and applied. With
    /// no policy the owner's stored policy applies, then the defaults.
    pub async fn issue(
        &self,
        owner_id: &str,
        policy: Option<KeyRotationPolicy>,
    ) -> Result<IssuedKey> {
        if owner_id.is_empty() {
            return Err(Error::InvalidRequest("owner_id must not be empty".into()));
        }
        let policy = match policy {
            Some(policy) => {
                self.set_policy(owner_id, policy.clone()).await?;
                policy
            }
            None => self.policy_for(owner_id).await?,
        };

        let issued = self.create(owner_id, &policy).await?;
        info!(
            key_id = %issued.key.key_id,
            key_prefix = %issued.key.key_prefix,
            owner_id,
            "issued api key"
        );
        Ok(issued)
    }

    /// Resolve a presented key to its record.
    ///
    /// `InvalidApiKey` if nothing matches, `RevokedApiKey` for a revoked key
    /// or a rotated key past its grace period, `ExpiredApiKey` for an active
    /// key past `expires_at`. A rotated key inside its grace period verifies
    /// even if its own `expires_at` has passed.
    pub async fn verify(&self, presented: &str) -> Result<ApiKey> {
        let result = self.lookup(presented).await;
        let outcome = match &result {
            Ok(_) => "valid",
            Err(Error::InvalidApiKey) => "invalid",
            Err(Error::RevokedApiKey) => "revoked",
            Err(Error::ExpiredApiKey) => "expired",
            Err(_) => "error",
        };
        metrics::counter!("api_key_verifications_total", "outcome" => outcome).increment(1);
        result
    }

    async fn lookup(&self, presented: &str) -> Result<ApiKey> {
        let (prefix, secret) = parse_presented_key(presented).ok_or(Error::InvalidApiKey)?;
        let expected = key_hash(prefix, secret);

        let candidates = self.store.find_api_keys_by_prefix(prefix).await?;
        let mut matched = None;
        for candidate in candidates {
            if constant_time_eq(&candidate.key_hash, &expected) {
                matched = Some(candidate);
            }
        }
        let key = matched.ok_or(Error::InvalidApiKey)?;

        let now = self.clock.now_millis();
        match key.status {
            ApiKeyStatus::Revoked => Err(Error::RevokedApiKey),
            ApiKeyStatus::Rotated if key.grace_until.is_none_or(|until| now >= until) => {
                debug!(key_id = %key.key_id, "rotated api key presented after grace period");
                Err(Error::RevokedApiKey)
            }
            ApiKeyStatus::Rotated => Ok(key),
            ApiKeyStatus::Active if key.expires_at.is_some_and(|exp| now >= exp) => {
                Err(Error::ExpiredApiKey)
            }
            ApiKeyStatus::Active => Ok(key),
        }
    }

    /// Replace an active key. The old key turns `Rotated` and keeps
    /// verifying for the owner's grace period; the new key references it
    /// through `rotated_from`.
    pub async fn rotate(&self, key_id: &str) -> Result<IssuedKey> {
        let current = self
            .store
            .get_api_key(key_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("api key {key_id}")))?;
        if current.status != ApiKeyStatus::Active {
            return Err(Error::NotActive(format!(
                "api key {key_id} is {}",
                current.status.label()
            )));
        }

        let policy = self.policy_for(&current.owner_id).await?;
        let now = self.clock.now_millis();
        let grace_until = now + policy.grace_period_ms;

        let mut last_err = None;
        for _ in 0..ISSUE_ATTEMPTS {
            let (replacement, plaintext) =
                self.generate(&current.owner_id, &policy, Some(key_id.to_string()), now);
            match self
                .store
                .rotate_api_key(key_id, now, grace_until, replacement.clone())
                .await
            {
                Ok(_) => {
                    info!(
                        key_id = %replacement.key_id,
                        rotated_from = key_id,
                        owner_id = %replacement.owner_id,
                        grace_until,
                        "rotated api key"
                    );
                    return Ok(IssuedKey {
                        key: replacement,
                        plaintext,
                    });
                }
                Err(store::Error::NotFound(msg)) => return Err(Error::NotFound(msg)),
                Err(store::Error::Conflict(msg)) => {
                    // lost a race with another rotate/revoke, or a collision
                    match self.store.get_api_key(key_id).await? {
                        Some(k) if k.status == ApiKeyStatus::Active => {
                            last_err = Some(store::Error::Conflict(msg));
                        }
                        _ => return Err(Error::NotActive(format!("api key {key_id}"))),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_err
            .map(Error::Store)
            .unwrap_or_else(|| Error::NotActive(format!("api key {key_id}"))))
    }

    /// Revoke immediately. Revoking a revoked key succeeds and changes
    /// nothing.
    pub async fn revoke(&self, key_id: &str) -> Result<ApiKey> {
        let now = self.clock.now_millis();
        let key = self
            .store
            .revoke_api_key(key_id, now)
            .await
            .map_err(|e| match e {
                store::Error::NotFound(msg) => Error::NotFound(msg),
                other => Error::Store(other),
            })?;
        info!(key_id, owner_id = %key.owner_id, "revoked api key");
        Ok(key)
    }

    pub async fn list(&self, owner_id: &str) -> Result<Vec<ApiKey>> {
        Ok(self.store.list_api_keys(owner_id).await?)
    }

    /// Revoke every rotated key whose grace period has ended. Returns the
    /// affected key ids.
    pub async fn sweep(&self) -> Result<Vec<String>> {
        let now = self.clock.now_millis();
        let revoked = self.store.revoke_lapsed_rotations(now).await?;
        if !revoked.is_empty() {
            info!(count = revoked.len(), key_ids = ?revoked, "revoked api keys past grace period");
        }
        Ok(revoked)
    }

    /// Effective policy for an owner: the owner-scoped policy, then a
    /// client-scoped one under the same id, then the defaults.
    pub async fn policy_for(&self, owner_id: &str) -> Result<KeyRotationPolicy> {
        let owner_scope = PolicyScope::Owner(owner_id.to_string());
        if let Some(policy) = self.store.get_policy(&owner_scope).await? {
            return Ok(policy);
        }
        let client_scope = PolicyScope::Client(owner_id.to_string());
        if let Some(policy) = self.store.get_policy(&client_scope).await? {
            return Ok(policy);
        }
        Ok(KeyRotationPolicy::new(
            owner_scope,
            self.defaults.max_age,
            self.defaults.grace_period,
        ))
    }

    /// Validate and persist a policy for `owner_id`.
    pub async fn set_policy(&self, owner_id: &str, policy: KeyRotationPolicy) -> Result<()> {
        if policy.scope.subject() != owner_id {
            return Err(Error::InvalidPolicy(format!(
                "policy scope {} does not name owner {owner_id}",
                policy.scope.storage_key()
            )));
        }
        if policy.max_age_ms == Some(0) {
            return Err(Error::InvalidPolicy("max_age must be positive".into()));
        }
        self.store.put_policy(policy).await?;
        Ok(())
    }

    async fn create(&self, owner_id: &str, policy: &KeyRotationPolicy) -> Result<IssuedKey> {
        let now = self.clock.now_millis();
        for attempt in 1..=ISSUE_ATTEMPTS {
            let (key, plaintext) = self.generate(owner_id, policy, None, now);
            match self.store.insert_api_key(key.clone()).await {
                Ok(()) => return Ok(IssuedKey { key, plaintext }),
                Err(store::Error::Conflict(_)) => {
                    debug!(attempt, "api key collided, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::Store(store::Error::Conflict(
            "could not allocate a unique api key".into(),
        )))
    }

    fn generate(
        &self,
        owner_id: &str,
        policy: &KeyRotationPolicy,
        rotated_from: Option<String>,
        now: u64,
    ) -> (ApiKey, Secret<String>) {
        let prefix = random_prefix();
        let secret = Secret::new(random_token(SECRET_BYTES));
        let key = ApiKey {
            key_id: uuid::Uuid::new_v4().to_string(),
            key_hash: key_hash(&prefix, secret.expose()),
            owner_id: owner_id.to_string(),
            status: ApiKeyStatus::Active,
            created_at: now,
            rotated_from,
            rotated_at: None,
            grace_until: None,
            revoked_at: None,
            expires_at: policy.max_age_ms.map(|max_age| now + max_age),
            key_prefix: prefix,
        };
        let plaintext = Secret::new(format!(
            "{KEY_PREFIX}_{}_{}",
            key.key_prefix,
            secret.expose()
        ));
        (key, plaintext)
    }
}

/// Split `agk_<prefix>_<secret>` into prefix and secret. `None` if the value
/// does not have that shape.
pub fn parse_presented_key(presented: &str) -> Option<(&str, &str)> {
    let rest = presented.strip_prefix(KEY_PREFIX)?.strip_prefix('_')?;
    let (prefix, secret) = rest.split_once('_')?;
    let prefix_ok = prefix.len() == PREFIX_LEN
        && prefix
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
    if !prefix_ok || secret.is_empty() {
        return None;
    }
    Some((prefix, secret))
}

fn key_hash(prefix: &str, secret: &str) -> String {
    digest(&format!("{prefix}:{secret}"))
}

fn random_prefix() -> String {
    let mut bytes = [0u8; PREFIX_LEN];
    rand::rng().fill(&mut bytes);
    bytes
        .iter()
        .map(|b| PREFIX_ALPHABET[(*b as usize) % PREFIX_ALPHABET.len()] as char)
        .collect()
}
