//! Background purge of expired refresh records

use super::repository::RefreshTokenStore;
use crate::audit::{audit_log, AuditEvent};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Spawn a task that deletes expired refresh records every `interval`
///
/// Returns `None` when `interval` is zero. Storage failures are logged and
/// the task keeps running.
pub fn spawn_purge_task(
    store: Arc<dyn RefreshTokenStore>,
    interval: Duration,
) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        tracing::info!("Refresh token purge disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            purge_once(store.as_ref()).await;
        }
    }))
}

async fn purge_once(store: &dyn RefreshTokenStore) -> u64 {
    match store.purge_expired(Utc::now()).await {
        Ok(0) => 0,
        Ok(deleted) => {
            audit_log(&AuditEvent::PurgeCompleted { deleted });
            deleted
        }
        Err(e) => {
            tracing::warn!(error = %e, "Refresh token purge failed");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::RefreshTokenRecord;
    use crate::auth::repository::MemoryRefreshTokenStore;
    use chrono::Duration as ChronoDuration;
    use tokio_test::{assert_err, assert_ok};
    use uuid::Uuid;

    fn record(token_id: &str, expires_in: ChronoDuration) -> RefreshTokenRecord {
        let now = Utc::now();
        RefreshTokenRecord::new(
            Uuid::new_v4(),
            token_id.to_string(),
            now - ChronoDuration::days(1),
            now + expires_in,
            None,
            None,
        )
    }

    #[tokio::test]
    async fn test_purge_once_removes_only_expired() {
        let store = MemoryRefreshTokenStore::new();
        store.create(&record("old", ChronoDuration::hours(-1))).await.unwrap();
        store.create(&record("live", ChronoDuration::hours(1))).await.unwrap();

        assert_eq!(purge_once(&store).await, 1);
        assert_ok!(store.get_by_token_id("live").await);
        assert_err!(store.get_by_token_id("old").await);
    }

    #[tokio::test]
    async fn test_zero_interval_disables() {
        let store: Arc<dyn RefreshTokenStore> = Arc::new(MemoryRefreshTokenStore::new());
        assert!(spawn_purge_task(store, Duration::ZERO).is_none());
    }

    #[tokio::test]
    async fn test_task_runs_on_interval() {
        let store = Arc::new(MemoryRefreshTokenStore::new());
        store.create(&record("old", ChronoDuration::hours(-1))).await.unwrap();

        let handle = spawn_purge_task(store.clone(), Duration::from_secs(60)).unwrap();
        // First tick fires immediately
        for _ in 0..100 {
            if store.is_empty().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(store.is_empty().await);
        handle.abort();
    }
}
