//! The `CredentialStore` trait
//!
//! One trait covers the five logical tables (`oauth_clients`,
//! `authorization_grants`, `tokens`, `api_keys`, `key_rotation_policies`).
//! Lookups are by primary or unique key only; the prefix lookup for API keys
//! is an indexed lookup, not a scan.
//!
//! Methods that change state under a precondition are single operations so
//! every backend can make them linearizable on its own. A relational backend
//! expresses them as conditional updates, e.g. grant consumption as
//! `UPDATE authorization_grants SET consumed = true WHERE code_hash = $1 AND
//! consumed = false RETURNING *`, falling back to a plain select to tell
//! "already consumed" from "not found".
//!
//! Uses `Pin<Box<dyn Future>>` return types so the store can be shared as
//! `Arc<dyn CredentialStore>`.

use std::future::Future;
use std::pin::Pin;

use crate::error::Result;
use crate::models::{
    ApiKey, AuthorizationGrant, ClientStatus, ConsumeOutcome, KeyRotationPolicy, NewTokenPair,
    OAuthClient, PolicyScope, RotateOutcome, TokenRecord,
};

/// Boxed future returned by every store operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Persistence boundary for all credential entities.
pub trait CredentialStore: Send + Sync {
    /// Backend identifier for logging and health reporting.
    fn backend(&self) -> &str;

    // --- oauth_clients ---

    /// Insert a new client. `Conflict` if the id is taken.
    fn insert_client(&self, client: OAuthClient) -> StoreFuture<'_, ()>;

    fn get_client<'a>(&'a self, client_id: &'a str) -> StoreFuture<'a, Option<OAuthClient>>;

    /// Change a client's status. `NotFound` for unknown ids. Returns the
    /// updated client.
    fn set_client_status<'a>(
        &'a self,
        client_id: &'a str,
        status: ClientStatus,
    ) -> StoreFuture<'a, OAuthClient>;

    // --- authorization_grants ---

    /// Insert a pending grant. `Conflict` if the code hash already exists.
    fn insert_grant(&self, grant: AuthorizationGrant) -> StoreFuture<'_, ()>;

    /// Atomically read the grant and mark it consumed.
    ///
    /// Exactly one concurrent caller observes `Consumed`; everyone after it
    /// observes `AlreadyConsumed`. Expired grants are reported as `Expired`
    /// and left untouched.
    fn consume_grant<'a>(&'a self, code_hash: &'a str, now: u64)
    -> StoreFuture<'a, ConsumeOutcome>;

    /// Delete grants whose `expires_at` is before `before`. Returns the
    /// number removed.
    fn purge_grants(&self, before: u64) -> StoreFuture<'_, usize>;

    // --- tokens ---

    /// Insert a freshly minted access/refresh pair.
    fn insert_token_pair(&self, access: TokenRecord, refresh: TokenRecord) -> StoreFuture<'_, ()>;

    fn get_token<'a>(&'a self, token_hash: &'a str) -> StoreFuture<'a, Option<TokenRecord>>;

    /// Conditionally rotate a refresh token: `Active` -> `Rotated` and the
    /// successor pair inserted, as one step. A token that is not `Active`
    /// is left untouched and reported.
    fn rotate_refresh_token<'a>(
        &'a self,
        refresh_hash: &'a str,
        next: NewTokenPair,
        now: u64,
    ) -> StoreFuture<'a, RotateOutcome>;

    /// Revoke every token in the family of the given token. Returns false
    /// if the token is unknown.
    fn revoke_token<'a>(&'a self, token_hash: &'a str) -> StoreFuture<'a, bool>;

    /// Revoke every non-revoked token for the subject/client pair. Returns
    /// the number of tokens revoked.
    fn revoke_tokens_for<'a>(
        &'a self,
        subject_id: &'a str,
        client_id: &'a str,
    ) -> StoreFuture<'a, usize>;

    /// Delete tokens whose `expires_at` is before `before`.
    fn purge_tokens(&self, before: u64) -> StoreFuture<'_, usize>;

    // --- api_keys ---

    /// Insert a key. `Conflict` if the id is taken or another key with the
    /// same prefix has the same hash.
    fn insert_api_key(&self, key: ApiKey) -> StoreFuture<'_, ()>;

    fn get_api_key<'a>(&'a self, key_id: &'a str) -> StoreFuture<'a, Option<ApiKey>>;

    /// All keys sharing a prefix (normally one).
    fn find_api_keys_by_prefix<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<ApiKey>>;

    fn list_api_keys<'a>(&'a self, owner_id: &'a str) -> StoreFuture<'a, Vec<ApiKey>>;

    /// Conditionally rotate a key: `Active` -> `Rotated` with the given
    /// grace deadline, and insert `replacement`, as one step. `NotFound` for
    /// unknown ids, `Conflict` if the key is not `Active`. Returns the
    /// rotated predecessor.
    fn rotate_api_key<'a>(
        &'a self,
        key_id: &'a str,
        rotated_at: u64,
        grace_until: u64,
        replacement: ApiKey,
    ) -> StoreFuture<'a, ApiKey>;

    /// Revoke a key. Revoking a revoked key is a no-op success. Returns the
    /// key as stored after the call.
    fn revoke_api_key<'a>(&'a self, key_id: &'a str, now: u64) -> StoreFuture<'a, ApiKey>;

    /// Flip every `Rotated` key whose grace period ended at or before `now`
    /// to `Revoked`. Returns the affected key ids.
    fn revoke_lapsed_rotations(&self, now: u64) -> StoreFuture<'_, Vec<String>>;

    // --- key_rotation_policies ---

    /// Insert or replace the policy for its scope.
    fn put_policy(&self, policy: KeyRotationPolicy) -> StoreFuture<'_, ()>;

    fn get_policy<'a>(
        &'a self,
        scope: &'a PolicyScope,
    ) -> StoreFuture<'a, Option<KeyRotationPolicy>>;
}
