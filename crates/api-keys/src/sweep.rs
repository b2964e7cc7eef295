//! Background revocation of rotated keys past their grace period

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::keys::ApiKeyManager;

/// Spawn a task that calls `ApiKeyManager::sweep` every `interval`.
///
/// Verification already refuses a lapsed rotated key, so the sweep only
/// makes the stored status catch up. Store failures are logged and retried
/// on the next tick.
pub fn spawn_sweep_task(
    manager: Arc<ApiKeyManager>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = manager.sweep().await {
                warn!(error = %e, "api key sweep failed, will retry next cycle");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::PolicyDefaults;
    use common::ManualClock;
    use store::{ApiKeyStatus, CredentialStore, MemoryStore};

    #[tokio::test(start_paused = true)]
    async fn sweep_task_revokes_lapsed_keys() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let manager = Arc::new(ApiKeyManager::new(
            store.clone(),
            clock.clone(),
            PolicyDefaults {
                max_age: None,
                grace_period: Duration::from_secs(10),
            },
        ));

        let old = manager.issue("u1", None).await.unwrap();
        manager.rotate(&old.key.key_id).await.unwrap();
        clock.advance(Duration::from_secs(10));

        let handle = spawn_sweep_task(manager.clone(), Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(31)).await;

        let stored = store.get_api_key(&old.key.key_id).await.unwrap().unwrap();
        assert_eq!(stored.status, ApiKeyStatus::Revoked);
        handle.abort();
    }
}
