//! In-process table set shared by `MemoryStore` and `FileStore`
//!
//! Every method runs under the owning backend's write (or read) lock, which
//! is what makes the conditional operations atomic. `revision` is bumped on
//! every change so `FileStore` can skip the disk write when nothing moved.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{
    ApiKey, ApiKeyStatus, AuthorizationGrant, ClientStatus, ConsumeOutcome, KeyRotationPolicy,
    NewTokenPair, OAuthClient, PolicyScope, RotateOutcome, TokenKind, TokenRecord, TokenStatus,
};

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Tables {
    #[serde(default)]
    clients: HashMap<String, OAuthClient>,
    #[serde(default)]
    grants: HashMap<String, AuthorizationGrant>,
    #[serde(default)]
    tokens: HashMap<String, TokenRecord>,
    #[serde(default)]
    api_keys: HashMap<String, ApiKey>,
    #[serde(default)]
    policies: HashMap<String, KeyRotationPolicy>,
    /// key_prefix -> key ids. Rebuilt on load.
    #[serde(skip)]
    keys_by_prefix: HashMap<String, Vec<String>>,
    #[serde(skip)]
    revision: u64,
}

impl Tables {
    pub(crate) fn rebuild_indexes(&mut self) {
        self.keys_by_prefix.clear();
        for key in self.api_keys.values() {
            self.keys_by_prefix
                .entry(key.key_prefix.clone())
                .or_default()
                .push(key.key_id.clone());
        }
    }

    pub(crate) fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    // --- clients ---

    pub(crate) fn insert_client(&mut self, client: OAuthClient) -> Result<()> {
        if self.clients.contains_key(&client.client_id) {
            return Err(Error::Conflict(format!(
                "client {} already registered",
                client.client_id
            )));
        }
        self.clients.insert(client.client_id.clone(), client);
        self.touch();
        Ok(())
    }

    pub(crate) fn get_client(&self, client_id: &str) -> Option<OAuthClient> {
        self.clients.get(client_id).cloned()
    }

    pub(crate) fn set_client_status(
        &mut self,
        client_id: &str,
        status: ClientStatus,
    ) -> Result<OAuthClient> {
        let client = self
            .clients
            .get_mut(client_id)
            .ok_or_else(|| Error::NotFound(format!("client {client_id}")))?;
        if client.status != status {
            client.status = status;
            let updated = client.clone();
            self.touch();
            return Ok(updated);
        }
        Ok(client.clone())
    }

    // --- grants ---

    pub(crate) fn insert_grant(&mut self, grant: AuthorizationGrant) -> Result<()> {
        if self.grants.contains_key(&grant.code_hash) {
            return Err(Error::Conflict("authorization code already exists".into()));
        }
        self.grants.insert(grant.code_hash.clone(), grant);
        self.touch();
        Ok(())
    }

    pub(crate) fn consume_grant(&mut self, code_hash: &str, now: u64) -> ConsumeOutcome {
        let Some(grant) = self.grants.get_mut(code_hash) else {
            return ConsumeOutcome::NotFound;
        };
        if grant.consumed {
            return ConsumeOutcome::AlreadyConsumed(grant.clone());
        }
        if now >= grant.expires_at {
            return ConsumeOutcome::Expired;
        }
        let snapshot = grant.clone();
        grant.consumed = true;
        self.touch();
        ConsumeOutcome::Consumed(snapshot)
    }

    pub(crate) fn purge_grants(&mut self, before: u64) -> usize {
        let len = self.grants.len();
        self.grants.retain(|_, g| g.expires_at >= before);
        let removed = len - self.grants.len();
        if removed > 0 {
            self.touch();
        }
        removed
    }

    // --- tokens ---

    pub(crate) fn insert_token_pair(
        &mut self,
        access: TokenRecord,
        refresh: TokenRecord,
    ) -> Result<()> {
        if self.tokens.contains_key(&access.token_hash)
            || self.tokens.contains_key(&refresh.token_hash)
        {
            return Err(Error::Conflict("token already exists".into()));
        }
        self.tokens.insert(access.token_hash.clone(), access);
        self.tokens.insert(refresh.token_hash.clone(), refresh);
        self.touch();
        Ok(())
    }

    pub(crate) fn get_token(&self, token_hash: &str) -> Option<TokenRecord> {
        self.tokens.get(token_hash).cloned()
    }

    pub(crate) fn rotate_refresh_token(
        &mut self,
        refresh_hash: &str,
        next: NewTokenPair,
        now: u64,
    ) -> Result<RotateOutcome> {
        if self.tokens.contains_key(&next.access_hash) || self.tokens.contains_key(&next.refresh_hash)
        {
            return Err(Error::Conflict("token already exists".into()));
        }
        let Some(current) = self.tokens.get_mut(refresh_hash) else {
            return Ok(RotateOutcome::NotFound);
        };
        if current.kind != TokenKind::Refresh {
            return Ok(RotateOutcome::NotFound);
        }
        match current.status {
            TokenStatus::Rotated => return Ok(RotateOutcome::Reused(current.clone())),
            TokenStatus::Revoked => return Ok(RotateOutcome::Revoked),
            TokenStatus::Active if now >= current.expires_at => {
                return Ok(RotateOutcome::Expired);
            }
            TokenStatus::Active => {}
        }

        current.status = TokenStatus::Rotated;
        let rotated = current.clone();

        let access = TokenRecord {
            token_hash: next.access_hash,
            kind: TokenKind::Access,
            family_id: rotated.family_id.clone(),
            subject_id: rotated.subject_id.clone(),
            client_id: rotated.client_id.clone(),
            scope: rotated.scope.clone(),
            issued_at: next.issued_at,
            expires_at: next.access_expires_at,
            status: TokenStatus::Active,
        };
        let refresh = TokenRecord {
            token_hash: next.refresh_hash,
            kind: TokenKind::Refresh,
            expires_at: next.refresh_expires_at,
            ..access.clone()
        };
        self.tokens.insert(access.token_hash.clone(), access);
        self.tokens.insert(refresh.token_hash.clone(), refresh);
        self.touch();
        Ok(RotateOutcome::Rotated(rotated))
    }

    pub(crate) fn revoke_token(&mut self, token_hash: &str) -> bool {
        let Some(family_id) = self.tokens.get(token_hash).map(|t| t.family_id.clone()) else {
            return false;
        };
        let mut changed = false;
        for token in self.tokens.values_mut() {
            if token.family_id == family_id && token.status != TokenStatus::Revoked {
                token.status = TokenStatus::Revoked;
                changed = true;
            }
        }
        if changed {
            self.touch();
        }
        true
    }

    pub(crate) fn revoke_tokens_for(&mut self, subject_id: &str, client_id: &str) -> usize {
        let mut revoked = 0;
        for token in self.tokens.values_mut() {
            if token.subject_id == subject_id
                && token.client_id == client_id
                && token.status != TokenStatus::Revoked
            {
                token.status = TokenStatus::Revoked;
                revoked += 1;
            }
        }
        if revoked > 0 {
            self.touch();
        }
        revoked
    }

    pub(crate) fn purge_tokens(&mut self, before: u64) -> usize {
        let len = self.tokens.len();
        self.tokens.retain(|_, t| t.expires_at >= before);
        let removed = len - self.tokens.len();
        if removed > 0 {
            self.touch();
        }
        removed
    }

    // --- api keys ---

    pub(crate) fn insert_api_key(&mut self, key: ApiKey) -> Result<()> {
        if self.api_keys.contains_key(&key.key_id) {
            return Err(Error::Conflict(format!("api key {} already exists", key.key_id)));
        }
        let collides = self
            .keys_by_prefix
            .get(&key.key_prefix)
            .into_iter()
            .flatten()
            .filter_map(|id| self.api_keys.get(id))
            .any(|existing| existing.key_hash == key.key_hash);
        if collides {
            return Err(Error::Conflict(format!(
                "api key with prefix {} already exists",
                key.key_prefix
            )));
        }
        self.keys_by_prefix
            .entry(key.key_prefix.clone())
            .or_default()
            .push(key.key_id.clone());
        self.api_keys.insert(key.key_id.clone(), key);
        self.touch();
        Ok(())
    }

    pub(crate) fn get_api_key(&self, key_id: &str) -> Option<ApiKey> {
        self.api_keys.get(key_id).cloned()
    }

    pub(crate) fn find_api_keys_by_prefix(&self, prefix: &str) -> Vec<ApiKey> {
        self.keys_by_prefix
            .get(prefix)
            .into_iter()
            .flatten()
            .filter_map(|id| self.api_keys.get(id).cloned())
            .collect()
    }

    pub(crate) fn list_api_keys(&self, owner_id: &str) -> Vec<ApiKey> {
        let mut keys: Vec<ApiKey> = self
            .api_keys
            .values()
            .filter(|k| k.owner_id == owner_id)
            .cloned()
            .collect();
        keys.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.key_id.cmp(&b.key_id))
        });
        keys
    }

    pub(crate) fn rotate_api_key(
        &mut self,
        key_id: &str,
        rotated_at: u64,
        grace_until: u64,
        replacement: ApiKey,
    ) -> Result<ApiKey> {
        let (status, predecessor) = self
            .api_keys
            .get(key_id)
            .map(|k| (k.status, k.rotated_from.clone()))
            .ok_or_else(|| Error::NotFound(format!("api key {key_id}")))?;
        if status != ApiKeyStatus::Active {
            return Err(Error::Conflict(format!(
                "api key {key_id} is {}, only active keys rotate",
                status.label()
            )));
        }

        self.insert_api_key(replacement)?;

        // At most two keys of a lineage verify at once: a predecessor still
        // in grace ends when its successor is rotated in turn.
        if let Some(prev) = predecessor.and_then(|id| self.api_keys.get_mut(&id)) {
            if prev.status == ApiKeyStatus::Rotated {
                prev.status = ApiKeyStatus::Revoked;
                prev.revoked_at = Some(rotated_at);
            }
        }

        let Some(previous) = self.api_keys.get_mut(key_id) else {
            return Err(Error::NotFound(format!("api key {key_id}")));
        };
        previous.status = ApiKeyStatus::Rotated;
        previous.rotated_at = Some(rotated_at);
        previous.grace_until = Some(grace_until);
        let rotated = previous.clone();
        self.touch();
        Ok(rotated)
    }

    pub(crate) fn revoke_api_key(&mut self, key_id: &str, now: u64) -> Result<ApiKey> {
        let key = self
            .api_keys
            .get_mut(key_id)
            .ok_or_else(|| Error::NotFound(format!("api key {key_id}")))?;
        if key.status == ApiKeyStatus::Revoked {
            return Ok(key.clone());
        }
        key.status = ApiKeyStatus::Revoked;
        key.revoked_at = Some(now);
        let revoked = key.clone();
        self.touch();
        Ok(revoked)
    }

    pub(crate) fn revoke_lapsed_rotations(&mut self, now: u64) -> Vec<String> {
        let mut lapsed = Vec::new();
        for key in self.api_keys.values_mut() {
            let grace_over = key.grace_until.is_some_and(|until| until <= now);
            if key.status == ApiKeyStatus::Rotated && grace_over {
                key.status = ApiKeyStatus::Revoked;
                key.revoked_at = Some(now);
                lapsed.push(key.key_id.clone());
            }
        }
        if !lapsed.is_empty() {
            lapsed.sort();
            self.touch();
        }
        lapsed
    }

    // --- policies ---

    pub(crate) fn put_policy(&mut self, policy: KeyRotationPolicy) {
        let key = policy.scope.storage_key();
        if self.policies.get(&key) != Some(&policy) {
            self.policies.insert(key, policy);
            self.touch();
        }
    }

    pub(crate) fn get_policy(&self, scope: &PolicyScope) -> Option<KeyRotationPolicy> {
        self.policies.get(&scope.storage_key()).cloned()
    }
}
