//! Expired Entry Sweeper
//!
//! Lookups already drop expired entries lazily. The sweeper reclaims the
//! budget held by entries nobody asks for again, so a quiet key does not
//! force live ones out through eviction.

use std::sync::Arc;
use std::time::Duration;

use secrets_cache::CacheGroup;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Sweep `group`'s store every `every` until `shutdown_rx` flips to true.
///
/// Returns the number of entries purged over the task's lifetime.
pub async fn purge_expired_task(
    group: Arc<CacheGroup>,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> usize {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately; nothing can be expired yet.
    ticker.tick().await;

    tracing::info!(
        group = group.name(),
        interval_ms = every.as_millis() as u64,
        "Purge task started"
    );

    let mut purged_total = 0;
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                match group.store().purge_expired() {
                    Ok(0) => {}
                    Ok(purged) => {
                        purged_total += purged;
                        tracing::debug!(group = group.name(), purged, "Purged expired entries");
                    }
                    Err(e) => tracing::warn!(group = group.name(), error = %e, "Purge failed"),
                }
            }
        }
    }

    tracing::info!(group = group.name(), purged_total, "Purge task stopped");
    purged_total
}

/// Spawn [`purge_expired_task`] on the runtime.
pub fn spawn_purge_task(
    group: Arc<CacheGroup>,
    every: Duration,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<usize> {
    tokio::spawn(purge_expired_task(group, every, shutdown_rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrets_cache::NoPeers;
    use secrets_core::{MembershipSnapshot, MembershipView, DEFAULT_REPLICAS};
    use secrets_test_utils::CountingLoader;

    fn group() -> Arc<CacheGroup> {
        let membership = Arc::new(MembershipView::new(
            MembershipSnapshot::single("http://127.0.0.1:5000"),
            DEFAULT_REPLICAS,
        ));
        Arc::new(
            CacheGroup::new("secrets", 4096, Arc::new(CountingLoader::new("v")), membership)
                .with_peers(Arc::new(NoPeers)),
        )
    }

    #[tokio::test]
    async fn test_purges_until_shutdown() -> Result<(), Box<dyn std::error::Error>> {
        let group = group();
        group.store().set("short", "v", Duration::from_millis(20))?;
        group.store().set("long", "v", Duration::from_secs(600))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_purge_task(Arc::clone(&group), Duration::from_millis(10), shutdown_rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true)?;
        let purged = handle.await?;

        assert_eq!(purged, 1);
        assert_eq!(group.store().keys_oldest_first()?, vec!["long".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_stops_when_sender_dropped() -> Result<(), Box<dyn std::error::Error>> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_purge_task(group(), Duration::from_secs(3600), shutdown_rx);
        drop(shutdown_tx);
        assert_eq!(handle.await?, 0);
        Ok(())
    }
}
