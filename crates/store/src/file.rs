//! JSON-file credential store
//!
//! Keeps the same tables as `MemoryStore` and writes the whole document back
//! after every change, using atomic temp-file + rename so a crash mid-write
//! never leaves a torn file. A tokio Mutex serializes all access, which is
//! what makes the conditional operations atomic across tasks.
//!
//! A change is applied in memory before it is written. If the write fails the
//! caller gets `Error::Io` while memory already reflects the change. For grant
//! consumption and key revocation this fails closed: the code stays spent and
//! the key stays revoked for the life of the process.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::backend::{CredentialStore, StoreFuture};
use crate::error::{Error, Result};
use crate::models::{
    ApiKey, AuthorizationGrant, ClientStatus, ConsumeOutcome, KeyRotationPolicy, NewTokenPair,
    OAuthClient, PolicyScope, RotateOutcome, TokenRecord,
};
use crate::tables::Tables;

/// File-backed store. The file is the source of truth across restarts.
pub struct FileStore {
    path: PathBuf,
    tables: Mutex<Tables>,
}

impl FileStore {
    /// Load the store from `path`.
    ///
    /// A missing file is a cold start: the store begins empty and the file is
    /// created immediately so later loads take the normal path.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let tables = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading store file: {e}")))?;
            let mut tables: Tables = serde_json::from_str(&contents)
                .map_err(|e| Error::Parse(format!("parsing store file: {e}")))?;
            tables.rebuild_indexes();
            info!(path = %path.display(), "loaded credential store");
            tables
        } else {
            info!(path = %path.display(), "store file not found, starting with empty store");
            let tables = Tables::default();
            write_atomic(&path, &tables).await?;
            tables
        };

        Ok(Self {
            path,
            tables: Mutex::new(tables),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `f` under the lock and persist if anything changed.
    async fn mutate<T>(&self, f: impl FnOnce(&mut Tables) -> Result<T>) -> Result<T> {
        let mut tables = self.tables.lock().await;
        let before = tables.revision();
        let out = f(&mut tables)?;
        if tables.revision() != before {
            if let Err(e) = write_atomic(&self.path, &tables).await {
                error!(path = %self.path.display(), error = %e, "failed to persist credential store");
                return Err(e);
            }
        }
        Ok(out)
    }

    async fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        let tables = self.tables.lock().await;
        f(&tables)
    }
}

impl CredentialStore for FileStore {
    fn backend(&self) -> &str {
        "file"
    }

    fn insert_client(&self, client: OAuthClient) -> StoreFuture<'_, ()> {
        Box::pin(self.mutate(move |t| t.insert_client(client)))
    }

    fn get_client<'a>(&'a self, client_id: &'a str) -> StoreFuture<'a, Option<OAuthClient>> {
        Box::pin(async move { Ok(self.read(|t| t.get_client(client_id)).await) })
    }

    fn set_client_status<'a>(
        &'a self,
        client_id: &'a str,
        status: ClientStatus,
    ) -> StoreFuture<'a, OAuthClient> {
        Box::pin(self.mutate(move |t| t.set_client_status(client_id, status)))
    }

    fn insert_grant(&self, grant: AuthorizationGrant) -> StoreFuture<'_, ()> {
        Box::pin(self.mutate(move |t| t.insert_grant(grant)))
    }

    fn consume_grant<'a>(
        &'a self,
        code_hash: &'a str,
        now: u64,
    ) -> StoreFuture<'a, ConsumeOutcome> {
        Box::pin(self.mutate(move |t| Ok(t.consume_grant(code_hash, now))))
    }

    fn purge_grants(&self, before: u64) -> StoreFuture<'_, usize> {
        Box::pin(self.mutate(move |t| Ok(t.purge_grants(before))))
    }

    fn insert_token_pair(&self, access: TokenRecord, refresh: TokenRecord) -> StoreFuture<'_, ()> {
        Box::pin(self.mutate(move |t| t.insert_token_pair(access, refresh)))
    }

    fn get_token<'a>(&'a self, token_hash: &'a str) -> StoreFuture<'a, Option<TokenRecord>> {
        Box::pin(async move { Ok(self.read(|t| t.get_token(token_hash)).await) })
    }

    fn rotate_refresh_token<'a>(
        &'a self,
        refresh_hash: &'a str,
        next: NewTokenPair,
        now: u64,
    ) -> StoreFuture<'a, RotateOutcome> {
        Box::pin(self.mutate(move |t| t.rotate_refresh_token(refresh_hash, next, now)))
    }

    fn revoke_token<'a>(&'a self, token_hash: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(self.mutate(move |t| Ok(t.revoke_token(token_hash))))
    }

    fn revoke_tokens_for<'a>(
        &'a self,
        subject_id: &'a str,
        client_id: &'a str,
    ) -> StoreFuture<'a, usize> {
        Box::pin(self.mutate(move |t| Ok(t.revoke_tokens_for(subject_id, client_id))))
    }

    fn purge_tokens(&self, before: u64) -> StoreFuture<'_, usize> {
        Box::pin(self.mutate(move |t| Ok(t.purge_tokens(before))))
    }

    fn insert_api_key(&self, key: ApiKey) -> StoreFuture<'_, ()> {
        Box::pin(self.mutate(move |t| t.insert_api_key(key)))
    }

    fn get_api_key<'a>(&'a self, key_id: &'a str) -> StoreFuture<'a, Option<ApiKey>> {
        Box::pin(async move { Ok(self.read(|t| t.get_api_key(key_id)).await) })
    }

    fn find_api_keys_by_prefix<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, Vec<ApiKey>> {
        Box::pin(async move { Ok(self.read(|t| t.find_api_keys_by_prefix(prefix)).await) })
    }

    fn list_api_keys<'a>(&'a self, owner_id: &'a str) -> StoreFuture<'a, Vec<ApiKey>> {
        Box::pin(async move { Ok(self.read(|t| t.list_api_keys(owner_id)).await) })
    }

    fn rotate_api_key<'a>(
        &'a self,
        key_id: &'a str,
        rotated_at: u64,
        grace_until: u64,
        replacement: ApiKey,
    ) -> StoreFuture<'a, ApiKey> {
        Box::pin(
            self.mutate(move |t| t.rotate_api_key(key_id, rotated_at, grace_until, replacement)),
        )
    }

    fn revoke_api_key<'a>(&'a self, key_id: &'a str, now: u64) -> StoreFuture<'a, ApiKey> {
        Box::pin(self.mutate(move |t| t.revoke_api_key(key_id, now)))
    }

    fn revoke_lapsed_rotations(&self, now: u64) -> StoreFuture<'_, Vec<String>> {
        Box::pin(self.mutate(move |t| Ok(t.revoke_lapsed_rotations(now))))
    }

    fn put_policy(&self, policy: KeyRotationPolicy) -> StoreFuture<'_, ()> {
        Box::pin(self.mutate(move |t| {
            t.put_policy(policy);
            Ok(())
        }))
    }

    fn get_policy<'a>(
        &'a self,
        scope: &'a PolicyScope,
    ) -> StoreFuture<'a, Option<KeyRotationPolicy>> {
        Box::pin(async move { Ok(self.read(|t| t.get_policy(scope)).await) })
    }
}

/// Write the tables to `path` atomically.
///
/// Writes a temp file in the same directory, then renames it over the
/// target. The file holds credential digests, so it is created 0600.
async fn write_atomic(path: &Path, tables: &Tables) -> Result<()> {
    let json = serde_json::to_string_pretty(tables)
        .map_err(|e| Error::Parse(format!("serializing store: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("store path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".store.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp store file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting store file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp store file: {e}")))?;

    debug!(path = %path.display(), "persisted credential store");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApiKeyStatus, ChallengeMethod};
    use std::sync::Arc;

    fn client(id: &str) -> OAuthClient {
        OAuthClient {
            client_id: id.into(),
            client_name: "CLI".into(),
            redirect_uris: ["https://app/cb".to_string()].into_iter().collect(),
            status: ClientStatus::Active,
            created_at: 1,
        }
    }

    fn api_key(id: &str, prefix: &str) -> ApiKey {
        ApiKey {
            key_id: id.into(),
            key_prefix: prefix.into(),
            key_hash: format!("hash_{id}"),
            owner_id: "u1".into(),
            status: ApiKeyStatus::Active,
            created_at: 1,
            rotated_from: None,
            rotated_at: None,
            grace_until: None,
            revoked_at: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn roundtrip_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileStore::load(path.clone()).await.unwrap();
        store.insert_client(client("c1")).await.unwrap();
        store.insert_api_key(api_key("k1", "pfx1")).await.unwrap();

        let reloaded = FileStore::load(path).await.unwrap();
        let c1 = reloaded.get_client("c1").await.unwrap().unwrap();
        assert_eq!(c1.client_name, "CLI");

        // prefix index is rebuilt from the persisted keys
        let found = reloaded.find_api_keys_by_prefix("pfx1").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key_id, "k1");
    }

    #[tokio::test]
    async fn cold_start_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        assert!(!path.exists());
        let store = FileStore::load(path.clone()).await.unwrap();
        assert!(path.exists());
        assert!(store.get_client("c1").await.unwrap().is_none());

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert!(parsed.is_object());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let result = FileStore::load(path).await;
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[tokio::test]
    async fn consumed_flag_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileStore::load(path.clone()).await.unwrap();
        store
            .insert_grant(AuthorizationGrant {
                code_hash: "h1".into(),
                client_id: "c1".into(),
                code_challenge: "ch".into(),
                code_challenge_method: ChallengeMethod::S256,
                redirect_uri: "https://app/cb".into(),
                scope: "read".into(),
                subject_id: "u1".into(),
                created_at: 0,
                expires_at: 1_000,
                consumed: false,
            })
            .await
            .unwrap();
        assert!(matches!(
            store.consume_grant("h1", 10).await.unwrap(),
            ConsumeOutcome::Consumed(_)
        ));
        drop(store);

        let reloaded = FileStore::load(path).await.unwrap();
        assert!(matches!(
            reloaded.consume_grant("h1", 11).await.unwrap(),
            ConsumeOutcome::AlreadyConsumed(_)
        ));
    }

    #[tokio::test]
    async fn revocation_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileStore::load(path.clone()).await.unwrap();
        store.insert_api_key(api_key("k1", "pfx1")).await.unwrap();
        store.revoke_api_key("k1", 50).await.unwrap();
        drop(store);

        let reloaded = FileStore::load(path).await.unwrap();
        let key = reloaded.get_api_key("k1").await.unwrap().unwrap();
        assert_eq!(key.status, ApiKeyStatus::Revoked);
        assert_eq!(key.revoked_at, Some(50));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileStore::load(path.clone()).await.unwrap();
        store.insert_client(client("c1")).await.unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "store file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn failed_mutation_does_not_touch_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileStore::load(path.clone()).await.unwrap();
        store.insert_client(client("c1")).await.unwrap();
        let before = tokio::fs::read_to_string(&path).await.unwrap();

        assert!(store.insert_client(client("c1")).await.is_err());
        let after = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn concurrent_writes_dont_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = Arc::new(FileStore::load(path.clone()).await.unwrap());

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .insert_api_key(api_key(&format!("k{i}"), &format!("pfx{i}")))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(store.list_api_keys("u1").await.unwrap().len(), 10);

        let reloaded = FileStore::load(path).await.unwrap();
        assert_eq!(reloaded.list_api_keys("u1").await.unwrap().len(), 10);
    }
}
