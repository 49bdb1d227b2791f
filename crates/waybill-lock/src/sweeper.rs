//! Expiry sweeper
//!
//! A single long-lived background task that periodically deletes locks past
//! their expiry, independent of any request path. Expiry is already absence
//! on every read path; the sweeper only reclaims the physical rows left
//! behind by holders that crashed or never released.
//!
//! Deletion is re-checked per row at delete time, so a concurrent extend
//! that lands first simply re-creates validity and the row survives. This
//! design assumes one active sweeper per process.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use waybill_common::error::Result;

use crate::metrics;
use crate::model::now_millis;
use crate::registry::LockStatsCollector;
use crate::store::LockStore;

/// Periodic reclaim of expired lock rows
pub struct ExpirySweeper {
    store: Arc<dyn LockStore>,
    interval: Duration,
    stats: Option<Arc<LockStatsCollector>>,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn LockStore>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            stats: None,
        }
    }

    /// Wire the registry's counters so swept rows show up in its stats
    pub fn with_stats(mut self, stats: Arc<LockStatsCollector>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// One sweep pass: delete every lock expired as of now, publish the
    /// remaining alive count, and return how many rows were removed.
    pub async fn sweep(&self) -> Result<usize> {
        let now = now_millis();
        let removed = self.store.remove_expired(now).await?;
        if removed > 0 {
            if let Some(stats) = &self.stats {
                stats.record_swept(removed);
            }
            metrics::record_swept(removed);
        }
        let alive = self.store.snapshot().await?.len();
        metrics::set_active_locks(alive);
        Ok(removed)
    }

    /// Spawn the sweep loop on the current runtime.
    ///
    /// Per-tick failures are logged and the next tick proceeds; a store
    /// hiccup never kills the background task.
    pub fn start(self) -> SweeperHandle {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.sweep().await {
                            Ok(removed) if removed > 0 => {
                                debug!(removed, "expired locks reclaimed");
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!(error = %e, "lock sweep failed, retrying next tick");
                            }
                        }
                    }
                    _ = stop_rx.recv() => {
                        debug!("expiry sweeper stopped");
                        break;
                    }
                }
            }
        });
        SweeperHandle { stop_tx, handle }
    }
}

/// Handle to a running sweeper task
pub struct SweeperHandle {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the loop to exit after its current tick
    pub fn stop(&self) {
        let _ = self.stop_tx.try_send(());
    }

    /// Stop the loop and wait for the task to drain out
    pub async fn shutdown(self) {
        self.stop();
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Lock, LockKey};
    use crate::registry::LockRegistry;
    use crate::store::{InsertOutcome, MemoryLockStore, RefreshOutcome};
    use async_trait::async_trait;
    use waybill_common::error::LockError;
    use waybill_common::LockKind;

    #[tokio::test]
    async fn test_sweep_reclaims_only_expired() {
        let store = Arc::new(MemoryLockStore::new());
        let registry = LockRegistry::new(store.clone(), Duration::from_secs(300));

        registry
            .acquire_with_timeout("WB-1", LockKind::Edit, "u1", Duration::from_millis(20))
            .await
            .unwrap();
        registry.acquire("WB-2", LockKind::Edit, "u2").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let sweeper = ExpirySweeper::new(store.clone(), Duration::from_secs(60))
            .with_stats(registry.stats_handle());
        let removed = sweeper.sweep().await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(registry.stats().swept, 1);
    }

    #[tokio::test]
    async fn test_sweep_loses_race_against_extend() {
        let store = Arc::new(MemoryLockStore::new());
        let registry = LockRegistry::new(store.clone(), Duration::from_secs(300));

        registry
            .acquire_with_timeout("WB-1", LockKind::Edit, "u1", Duration::from_millis(40))
            .await
            .unwrap();
        // the holder renews just before the sweep's deletion pass
        registry
            .extend("WB-1", LockKind::Edit, "u1", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let sweeper = ExpirySweeper::new(store.clone(), Duration::from_secs(60));
        let removed = sweeper.sweep().await.unwrap();
        assert_eq!(removed, 0);

        let status = registry.inspect("WB-1", LockKind::Edit).await.unwrap().unwrap();
        assert_eq!(status.holder_id, "u1");
    }

    #[tokio::test]
    async fn test_started_sweeper_reclaims_and_stops() {
        let store = Arc::new(MemoryLockStore::new());
        let registry = LockRegistry::new(store.clone(), Duration::from_secs(300));

        registry
            .acquire_with_timeout("WB-1", LockKind::Edit, "u1", Duration::from_millis(10))
            .await
            .unwrap();

        let handle = ExpirySweeper::new(store.clone(), Duration::from_millis(25)).start();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(store.len(), 0);

        handle.shutdown().await;
    }

    /// Store whose sweep path always fails, for the per-tick resilience path
    struct FailingStore;

    #[async_trait]
    impl LockStore for FailingStore {
        async fn try_insert(&self, _candidate: Lock) -> waybill_common::error::Result<InsertOutcome> {
            Err(LockError::Store("down".to_string()))
        }

        async fn refresh(
            &self,
            _key: &LockKey,
            _holder_id: &str,
            _new_expires_at: i64,
        ) -> waybill_common::error::Result<RefreshOutcome> {
            Err(LockError::Store("down".to_string()))
        }

        async fn remove_held(
            &self,
            _key: &LockKey,
            _holder_id: &str,
        ) -> waybill_common::error::Result<bool> {
            Err(LockError::Store("down".to_string()))
        }

        async fn remove(&self, _key: &LockKey) -> waybill_common::error::Result<bool> {
            Err(LockError::Store("down".to_string()))
        }

        async fn get(&self, _key: &LockKey) -> waybill_common::error::Result<Option<Lock>> {
            Err(LockError::Store("down".to_string()))
        }

        async fn remove_expired(&self, _now: i64) -> waybill_common::error::Result<usize> {
            Err(LockError::Store("down".to_string()))
        }

        async fn snapshot(&self) -> waybill_common::error::Result<Vec<Lock>> {
            Err(LockError::Store("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_sweep_surfaces_store_failure() {
        let sweeper = ExpirySweeper::new(Arc::new(FailingStore), Duration::from_secs(60));
        let err = sweeper.sweep().await.unwrap_err();
        assert!(matches!(err, LockError::Store(_)));
    }

    #[tokio::test]
    async fn test_sweeper_task_survives_store_failures() {
        let handle = ExpirySweeper::new(Arc::new(FailingStore), Duration::from_millis(10)).start();
        // several failing ticks elapse without killing the task
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop();
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.shutdown().await;
    }
}
