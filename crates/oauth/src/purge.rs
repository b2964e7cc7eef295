//! Background purge of dead grants and tokens
//!
//! Records are kept for a retention window past their expiry so a replayed
//! code or refresh token is still recognized as a replay. After that they
//! are deleted.

use std::sync::Arc;
use std::time::Duration;

use common::Clock;
use store::CredentialStore;
use tracing::{debug, info, warn};

/// Spawn a task that runs `purge_cycle` every `interval`.
pub fn spawn_purge_task(
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    retention: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip the immediate first tick, nothing has expired at startup
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = purge_cycle(store.as_ref(), clock.as_ref(), retention).await {
                warn!(error = %e, "purge cycle failed, will retry next cycle");
            }
        }
    })
}

/// Delete grants and tokens that expired more than `retention` ago.
/// Returns `(grants, tokens)` removed.
pub async fn purge_cycle(
    store: &dyn CredentialStore,
    clock: &dyn Clock,
    retention: Duration,
) -> store::Result<(usize, usize)> {
    let cutoff = clock
        .now_millis()
        .saturating_sub(retention.as_millis() as u64);
    let grants = store.purge_grants(cutoff).await?;
    let tokens = store.purge_tokens(cutoff).await?;
    if grants + tokens > 0 {
        info!(grants, tokens, "purged expired credentials");
    } else {
        debug!("nothing to purge");
    }
    Ok((grants, tokens))
}
