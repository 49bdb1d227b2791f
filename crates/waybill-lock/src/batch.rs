//! Batch lock coordinator
//!
//! For operations that must lock several resources together, e.g. assigning
//! one driver to N orders. Requested pairs are deduplicated and acquired in
//! their deterministic key order, so two callers contending over overlapping
//! sets always meet in the same order and one wins outright instead of
//! circularly waiting. Acquisition is all-or-nothing: the first conflict
//! rolls back everything already taken in this batch.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use waybill_common::error::{LockError, Result};
use waybill_common::LockKind;

use crate::model::LockKey;
use crate::registry::LockRegistry;

/// Acquires and releases lock sets atomically across resource ids
pub struct BatchCoordinator {
    registry: Arc<LockRegistry>,
}

impl BatchCoordinator {
    pub fn new(registry: Arc<LockRegistry>) -> Self {
        Self { registry }
    }

    /// Lock one kind across a set of resource ids, all-or-nothing.
    pub async fn acquire_all<I, S>(
        &self,
        resource_ids: I,
        kind: LockKind,
        holder_id: &str,
    ) -> Result<BatchGuard>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys = resource_ids
            .into_iter()
            .map(|resource_id| LockKey::new(resource_id, kind))
            .collect();
        self.acquire_keys(keys, holder_id).await
    }

    /// Lock arbitrary `(resource, kind)` pairs, all-or-nothing.
    pub async fn acquire_pairs(
        &self,
        pairs: Vec<(String, LockKind)>,
        holder_id: &str,
    ) -> Result<BatchGuard> {
        let keys = pairs
            .into_iter()
            .map(|(resource_id, kind)| LockKey::new(resource_id, kind))
            .collect();
        self.acquire_keys(keys, holder_id).await
    }

    async fn acquire_keys(&self, keys: BTreeSet<LockKey>, holder_id: &str) -> Result<BatchGuard> {
        let mut acquired: Vec<LockKey> = Vec::with_capacity(keys.len());
        for key in keys {
            match self
                .registry
                .acquire(&key.resource_id, key.kind, holder_id)
                .await
            {
                Ok(_) => acquired.push(key),
                Err(e) => {
                    debug!(
                        key = %key,
                        holder = %holder_id,
                        already_acquired = acquired.len(),
                        "batch acquisition stopped, rolling back"
                    );
                    self.rollback(&acquired, holder_id).await;
                    return Err(e);
                }
            }
        }
        Ok(BatchGuard {
            registry: self.registry.clone(),
            holder_id: holder_id.to_string(),
            keys: acquired,
            released: false,
        })
    }

    async fn rollback(&self, acquired: &[LockKey], holder_id: &str) {
        for key in acquired.iter().rev() {
            if let Err(e) = self
                .registry
                .release(&key.resource_id, key.kind, holder_id)
                .await
            {
                if !e.is_benign() {
                    warn!(key = %key, error = %e, "batch rollback release failed");
                }
            }
        }
    }
}

/// Guard over a fully acquired batch.
///
/// Releases run in reverse acquisition order, though releases never conflict
/// so the order is not load-bearing. Dropping the guard unreleased spawns a
/// best-effort bulk release.
pub struct BatchGuard {
    registry: Arc<LockRegistry>,
    holder_id: String,
    keys: Vec<LockKey>,
    released: bool,
}

impl std::fmt::Debug for BatchGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchGuard")
            .field("holder_id", &self.holder_id)
            .field("keys", &self.keys)
            .field("released", &self.released)
            .finish()
    }
}

impl BatchGuard {
    /// The held keys, in acquisition (ascending) order
    pub fn keys(&self) -> &[LockKey] {
        &self.keys
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Release every lock in the batch. Benign not-owner results (a lock
    /// that lapsed mid-batch) are skipped; the first store failure is
    /// returned after the remaining releases have been attempted.
    pub async fn release_all(mut self) -> Result<()> {
        self.released = true;
        let mut first_failure: Option<LockError> = None;
        for key in self.keys.iter().rev() {
            match self
                .registry
                .release(&key.resource_id, key.kind, &self.holder_id)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_benign() => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "batch release failed");
                    if first_failure.is_none() {
                        first_failure = Some(e);
                    }
                }
            }
        }
        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if self.released || self.keys.is_empty() {
            return;
        }
        let registry = self.registry.clone();
        let holder_id = self.holder_id.clone();
        let keys = std::mem::take(&mut self.keys);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    holder = %holder_id,
                    count = keys.len(),
                    "batch guard dropped without explicit release, releasing in background"
                );
                handle.spawn(async move {
                    for key in keys.iter().rev() {
                        let _ = registry.release(&key.resource_id, key.kind, &holder_id).await;
                    }
                });
            }
            Err(_) => warn!(
                holder = %holder_id,
                count = keys.len(),
                "batch guard dropped outside a runtime, locks will lapse via their timeout"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLockStore;
    use std::time::Duration;

    fn coordinator() -> (Arc<LockRegistry>, BatchCoordinator) {
        let registry = Arc::new(LockRegistry::new(
            Arc::new(MemoryLockStore::new()),
            Duration::from_secs(300),
        ));
        (registry.clone(), BatchCoordinator::new(registry))
    }

    #[tokio::test]
    async fn test_batch_acquires_in_deterministic_order() {
        let (_registry, coordinator) = coordinator();

        let guard = coordinator
            .acquire_all(["WB-3", "WB-1", "WB-2", "WB-1"], LockKind::Assign, "dispatcher-1")
            .await
            .unwrap();

        let keys: Vec<String> = guard.keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["WB-1::assign", "WB-2::assign", "WB-3::assign"]);
        guard.release_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_all_or_nothing_on_conflict() {
        let (registry, coordinator) = coordinator();

        // B is already held by another actor
        registry.acquire("WB-B", LockKind::Assign, "u9").await.unwrap();

        let err = coordinator
            .acquire_all(["WB-A", "WB-B", "WB-C"], LockKind::Assign, "dispatcher-1")
            .await
            .unwrap_err();
        match err {
            LockError::Conflict { locked_by, resource_id, .. } => {
                assert_eq!(locked_by, "u9");
                assert_eq!(resource_id, "WB-B");
            }
            other => panic!("expected Conflict, got {:?}", other),
        }

        // no partial batch left behind: A and C are free again
        registry.acquire("WB-A", LockKind::Assign, "u2").await.unwrap();
        registry.acquire("WB-C", LockKind::Assign, "u3").await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_release_frees_everything() {
        let (registry, coordinator) = coordinator();

        let guard = coordinator
            .acquire_all(["WB-1", "WB-2"], LockKind::Edit, "u1")
            .await
            .unwrap();
        assert_eq!(guard.len(), 2);
        guard.release_all().await.unwrap();

        registry.acquire("WB-1", LockKind::Edit, "u2").await.unwrap();
        registry.acquire("WB-2", LockKind::Edit, "u3").await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_mixed_kind_pairs() {
        let (registry, coordinator) = coordinator();

        let guard = coordinator
            .acquire_pairs(
                vec![
                    ("WB-1".to_string(), LockKind::Status),
                    ("WB-1".to_string(), LockKind::Edit),
                ],
                "u1",
            )
            .await
            .unwrap();
        let keys: Vec<String> = guard.keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["WB-1::edit", "WB-1::status"]);

        // both kinds on the resource are held by the batch
        assert!(registry.acquire("WB-1", LockKind::Edit, "u2").await.is_err());
        assert!(registry.acquire("WB-1", LockKind::Status, "u2").await.is_err());
        guard.release_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        let (_registry, coordinator) = coordinator();

        let guard = coordinator
            .acquire_all(Vec::<String>::new(), LockKind::Edit, "u1")
            .await
            .unwrap();
        assert!(guard.is_empty());
        guard.release_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_drop_releases_in_background() {
        let (registry, coordinator) = coordinator();

        let guard = coordinator
            .acquire_all(["WB-1", "WB-2"], LockKind::Edit, "u1")
            .await
            .unwrap();
        drop(guard);

        tokio::time::sleep(Duration::from_millis(50)).await;
        registry.acquire("WB-1", LockKind::Edit, "u2").await.unwrap();
        registry.acquire("WB-2", LockKind::Edit, "u2").await.unwrap();
    }
}
