//! Process-local credential store
//!
//! Tables live behind a `tokio::sync::RwLock`. Lookups (client fetch, key
//! prefix lookup, token introspection) share the read lock, so API key
//! verification never waits on anything but an in-flight write. Every
//! conditional update runs entirely under the write lock.

use tokio::sync::RwLock;

use crate::backend::{CredentialStore, StoreFuture};
use crate::models::{
    ApiKey, AuthorizationGrant, ClientStatus, KeyRotationPolicy, NewTokenPair, OAuthClient,
    PolicyScope, TokenRecord,
};
use crate::tables::Tables;

/// In-memory backend. State is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn backend(&self) -> &str {
        "memory"
    }

    fn insert_client(&self, client: OAuthClient) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.tables.write().await.insert_client(client) })
    }

    fn get_client<'a>(&'a self, client_id: &'a str) -> StoreFuture<'a, Option<OAuthClient>> {
        Box::pin(async move { Ok(self.tables.read().await.get_client(client_id)) })
    }

    fn set_client_status<'a>(
        &'a self,
        client_id: &'a str,
        status: ClientStatus,
    ) -> StoreFuture<'a, OAuthClient> {
        Box::pin(async move { self.tables.write().await.set_client_status(client_id, status) })
    }

    fn insert_grant(&self, grant: AuthorizationGrant) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.tables.write().await.insert_grant(grant) })
    }

    fn consume_grant<'a>(
        &'a self,
        code_hash: &'a str,
        now: u64,
    ) -> StoreFuture<'a, crate::ConsumeOutcome> {
        Box::pin(async move { Ok(self.tables.write().await.consume_grant(code_hash, now)) })
    }

    fn purge_grants(&self, before: u64) -> StoreFuture<'_, usize> {
        Box::pin(async move { Ok(self.tables.write().await.purge_grants(before)) })
    }

    fn insert_token_pair(&self, access: TokenRecord, refresh: TokenRecord) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.tables.write().await.insert_token_pair(access, refresh) })
    }

    fn get_token<'a>(&'a self, token_hash: &'a str) -> StoreFuture<'a, Option<TokenRecord>> {
        Box::pin(async move { Ok(self.tables.read().await.get_token(token_hash)) })
    }

    fn rotate_refresh_token<'a>(
        &'a self,
        refresh_hash: &'a str,
        next: NewTokenPair,
        now: u64,
    ) -> StoreFuture<'a, crate::RotateOutcome> {
        Box::pin(async move {
            self.tables
                .write()
                .await
                .rotate_refresh_token(refresh_hash, next, now)
        })
    }

    fn revoke_token<'a>(&'a self, token_hash: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.tables.write().await.revoke_token(token_hash)) })
    }

    fn revoke_tokens_for<'a>(
        &'a self,
        subject_id: &'a str,
        client_id: &'a str,
    ) -> StoreFuture<'a, usize> {
        Box::pin(async move {
            Ok(self
                .tables
                .write()
                .await
                .revoke_tokens_for(subject_id, client_id))
        })
    }

    fn purge_tokens(&self, before: u64) -> StoreFuture<'_, usize> {
        Box::pin(async move { Ok(self.tables.write().await.purge_tokens(before)) })
    }

    fn insert_api_key(&self, key: ApiKey) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.tables.write().await.insert_api_key(key) })
    }

    fn get_api_key<'a>(&'a self, key_id: &'a str) -> StoreFuture<'a, Option<ApiKey>> {
        Box::pin(async move { Ok(self.tables.read().await.get_api_key(key_id)) })
    }

    fn find_api_keys_by_prefix<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<ApiKey>> {
        Box::pin(async move { Ok(self.tables.read().await.find_api_keys_by_prefix(prefix)) })
    }

    fn list_api_keys<'a>(&'a self, owner_id: &'a str) -> StoreFuture<'a, Vec<ApiKey>> {
        Box::pin(async move { Ok(self.tables.read().await.list_api_keys(owner_id)) })
    }

    fn rotate_api_key<'a>(
        &'a self,
        key_id: &'a str,
        rotated_at: u64,
        grace_until: u64,
        replacement: ApiKey,
    ) -> StoreFuture<'a, ApiKey> {
        Box::pin(async move {
            self.tables
                .write()
                .await
                .rotate_api_key(key_id, rotated_at, grace_until, replacement)
        })
    }

    fn revoke_api_key<'a>(&'a self, key_id: &'a str, now: u64) -> StoreFuture<'a, ApiKey> {
        Box::pin(async move { self.tables.write().await.revoke_api_key(key_id, now) })
    }

    fn revoke_lapsed_rotations(&self, now: u64) -> StoreFuture<'_, Vec<String>> {
        Box::pin(async move { Ok(self.tables.write().await.revoke_lapsed_rotations(now)) })
    }

    fn put_policy(&self, policy: KeyRotationPolicy) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.tables.write().await.put_policy(policy);
            Ok(())
        })
    }

    fn get_policy<'a>(
        &'a self,
        scope: &'a PolicyScope,
    ) -> StoreFuture<'a, Option<KeyRotationPolicy>> {
        Box::pin(async move { Ok(self.tables.read().await.get_policy(scope)) })
    }
}
