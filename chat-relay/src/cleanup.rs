//! Background cleanup task.
//!
//! Periodically drops offline queues whose TTL has lapsed and evicts idle
//! rate limiter keys.

use crate::config::CleanupConfig;
use crate::limits::RateLimits;
use crate::storage::OfflineQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Run one cleanup pass. Returns the number of entries removed.
pub async fn run_once(queue: &dyn OfflineQueue, limits: &RateLimits) -> u64 {
    limits.shrink();
    match queue.cleanup_expired().await {
        Ok(deleted) => {
            if deleted > 0 {
                tracing::info!("Cleanup: deleted {} expired queue entries", deleted);
            } else {
                tracing::debug!("Cleanup: no expired queues");
            }
            deleted
        }
        Err(e) => {
            tracing::error!("Cleanup error: {}", e);
            0
        }
    }
}

/// Spawn a background cleanup task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_task(
    queue: Arc<dyn OfflineQueue>,
    limits: RateLimits,
    config: CleanupConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Cleanup task disabled");
            return;
        }

        let interval_secs = config.interval_secs.max(1);
        tracing::info!("Cleanup task started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));
        loop {
            timer.tick().await;
            run_once(queue.as_ref(), &limits).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LimitsConfig, TypingConfig};
    use crate::storage::test_support::queued;
    use crate::storage::{MemoryStorage, QueueSettings, SqliteStorage};

    fn limits() -> RateLimits {
        RateLimits::new(&LimitsConfig::default(), &TypingConfig::default())
    }

    fn expired_settings() -> QueueSettings {
        QueueSettings {
            ttl_secs: 0,
            ..QueueSettings::default()
        }
    }

    #[tokio::test]
    async fn run_once_removes_expired_queues() {
        let storage = SqliteStorage::in_memory_with(expired_settings())
            .await
            .unwrap();
        storage.enqueue(&queued("alice", "bob", "m1")).await.unwrap();
        storage.enqueue(&queued("alice", "carol", "m2")).await.unwrap();

        assert_eq!(run_once(&storage, &limits()).await, 2);
        assert_eq!(run_once(&storage, &limits()).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_task_runs_on_interval() {
        let storage = Arc::new(MemoryStorage::with_settings(expired_settings()));
        storage.enqueue(&queued("alice", "bob", "m1")).await.unwrap();

        let handle = spawn_cleanup_task(
            storage.clone(),
            limits(),
            CleanupConfig {
                interval_secs: 60,
                enabled: true,
            },
        );
        tokio::time::advance(Duration::from_secs(61)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        handle.abort();

        // The task already swept the expired list.
        assert_eq!(run_once(storage.as_ref(), &limits()).await, 0);
    }

    #[tokio::test]
    async fn cleanup_task_disabled() {
        let storage: Arc<dyn OfflineQueue> = Arc::new(MemoryStorage::new());
        let config = CleanupConfig {
            interval_secs: 1,
            enabled: false,
        };

        let handle = spawn_cleanup_task(storage, limits(), config);

        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("Task should complete when disabled")
            .expect("Task should not panic");
    }
}
