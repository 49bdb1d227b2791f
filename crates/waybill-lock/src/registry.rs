//! Lock registry
//!
//! The API over the lock store. Enforces mutual exclusion and ownership:
//! callers never touch lock rows directly, only through these operations,
//! each of which is a single atomic store call.
//!
//! Tie-break policy: first successful writer wins; an expired lock is always
//! available regardless of who held it. There is no wait queue or fairness
//! guarantee, so starvation under continuous contention is an accepted
//! limitation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use waybill_common::error::{LockError, Result};
use waybill_common::LockKind;

use crate::metrics;
use crate::model::{Lock, LockKey, LockStats, LockStatus, now_millis};
use crate::store::{InsertOutcome, LockStore, RefreshOutcome};

/// Atomic operation counters shared between the registry and the sweeper
#[derive(Debug, Default)]
pub struct LockStatsCollector {
    acquisitions: AtomicU64,
    renewals: AtomicU64,
    conflicts: AtomicU64,
    releases: AtomicU64,
    not_owner: AtomicU64,
    forced_releases: AtomicU64,
    swept: AtomicU64,
}

impl LockStatsCollector {
    pub fn record_acquired(&self) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_renewed(&self) {
        self.renewals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_released(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_owner(&self) {
        self.not_owner.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forced(&self) {
        self.forced_releases.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_swept(&self, count: usize) {
        self.swept.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LockStats {
        LockStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            renewals: self.renewals.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            not_owner: self.not_owner.load(Ordering::Relaxed),
            forced_releases: self.forced_releases.load(Ordering::Relaxed),
            swept: self.swept.load(Ordering::Relaxed),
        }
    }
}

/// The lock coordination API.
///
/// Constructed once at process start with its store and injected into
/// callers and the sweeper; operations are short-lived and never block
/// waiting for a lock to free up.
pub struct LockRegistry {
    store: Arc<dyn LockStore>,
    default_timeout: Duration,
    stats: Arc<LockStatsCollector>,
}

impl LockRegistry {
    pub fn new(store: Arc<dyn LockStore>, default_timeout: Duration) -> Self {
        Self {
            store,
            default_timeout,
            stats: Arc::new(LockStatsCollector::default()),
        }
    }

    pub fn store(&self) -> Arc<dyn LockStore> {
        self.store.clone()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Shared counter handle, for wiring the sweeper
    pub fn stats_handle(&self) -> Arc<LockStatsCollector> {
        self.stats.clone()
    }

    /// Grant an exclusive lock on `(resource_id, kind)` to `holder_id`.
    ///
    /// Succeeds when the pair is vacant or its lock has expired. Re-entry by
    /// the current holder succeeds and pushes the expiry forward, equivalent
    /// to [`extend`](Self::extend). A non-expired lock held by another actor
    /// yields [`LockError::Conflict`] carrying the holder's id, with no side
    /// effect.
    pub async fn acquire(
        &self,
        resource_id: &str,
        kind: LockKind,
        holder_id: &str,
    ) -> Result<Lock> {
        self.acquire_with_timeout(resource_id, kind, holder_id, self.default_timeout)
            .await
    }

    /// [`acquire`](Self::acquire) with a caller-chosen timeout.
    pub async fn acquire_with_timeout(
        &self,
        resource_id: &str,
        kind: LockKind,
        holder_id: &str,
        timeout: Duration,
    ) -> Result<Lock> {
        let candidate = Lock::new(resource_id, kind, holder_id, now_millis(), timeout);
        match self.store.try_insert(candidate).await? {
            InsertOutcome::Granted(lock) => {
                self.stats.record_acquired();
                metrics::record_acquired(kind);
                debug!(
                    resource = %lock.resource_id,
                    kind = %kind,
                    holder = %lock.holder_id,
                    expires_at = lock.expires_at,
                    "lock acquired"
                );
                Ok(lock)
            }
            InsertOutcome::Renewed(lock) => {
                self.stats.record_renewed();
                debug!(
                    resource = %lock.resource_id,
                    kind = %kind,
                    holder = %lock.holder_id,
                    expires_at = lock.expires_at,
                    "re-entrant acquire extended lock"
                );
                Ok(lock)
            }
            InsertOutcome::Held(existing) => {
                self.stats.record_conflict();
                metrics::record_conflict(kind);
                debug!(
                    resource = %resource_id,
                    kind = %kind,
                    holder = %holder_id,
                    locked_by = %existing.holder_id,
                    "lock held by another actor"
                );
                Err(LockError::Conflict {
                    resource_id: resource_id.to_string(),
                    kind,
                    locked_by: existing.holder_id,
                })
            }
        }
    }

    /// Release the lock, only if currently held by `holder_id`.
    ///
    /// A release that finds the pair vacant, expired, or held by someone
    /// else signals [`LockError::NotOwner`]; callers treat that as a benign
    /// no-op since it commonly just means the lock already expired.
    pub async fn release(
        &self,
        resource_id: &str,
        kind: LockKind,
        holder_id: &str,
    ) -> Result<()> {
        let key = LockKey::new(resource_id, kind);
        if self.store.remove_held(&key, holder_id).await? {
            self.stats.record_released();
            metrics::record_released(kind);
            debug!(resource = %resource_id, kind = %kind, holder = %holder_id, "lock released");
            Ok(())
        } else {
            self.stats.record_not_owner();
            debug!(
                resource = %resource_id,
                kind = %kind,
                holder = %holder_id,
                "release without ownership, lock absent, expired, or held by another actor"
            );
            Err(LockError::NotOwner {
                resource_id: resource_id.to_string(),
                kind,
                holder_id: holder_id.to_string(),
            })
        }
    }

    /// Push the expiry of a held lock forward.
    ///
    /// `timeout` defaults to the registry's configured timeout. Fails with
    /// [`LockError::Conflict`] when another actor holds the pair, and with
    /// [`LockError::NotOwner`] when the pair is vacant or already expired;
    /// re-granting a lapsed lock is [`acquire`](Self::acquire)'s job.
    pub async fn extend(
        &self,
        resource_id: &str,
        kind: LockKind,
        holder_id: &str,
        timeout: Option<Duration>,
    ) -> Result<Lock> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let key = LockKey::new(resource_id, kind);
        let new_expires_at = now_millis() + timeout.as_millis() as i64;
        match self.store.refresh(&key, holder_id, new_expires_at).await? {
            RefreshOutcome::Refreshed(lock) => {
                self.stats.record_renewed();
                debug!(
                    resource = %resource_id,
                    kind = %kind,
                    holder = %holder_id,
                    expires_at = lock.expires_at,
                    "lock extended"
                );
                Ok(lock)
            }
            RefreshOutcome::HeldByOther(existing) => {
                self.stats.record_conflict();
                metrics::record_conflict(kind);
                debug!(
                    resource = %resource_id,
                    kind = %kind,
                    holder = %holder_id,
                    locked_by = %existing.holder_id,
                    "extend refused, lock held by another actor"
                );
                Err(LockError::Conflict {
                    resource_id: resource_id.to_string(),
                    kind,
                    locked_by: existing.holder_id,
                })
            }
            RefreshOutcome::Vacant => {
                self.stats.record_not_owner();
                debug!(
                    resource = %resource_id,
                    kind = %kind,
                    holder = %holder_id,
                    "extend on a vacant or expired lock"
                );
                Err(LockError::NotOwner {
                    resource_id: resource_id.to_string(),
                    kind,
                    holder_id: holder_id.to_string(),
                })
            }
        }
    }

    /// Read-only status for UI display.
    ///
    /// `None` when the pair is vacant or its lock expired. Never use this
    /// for correctness decisions: it is not atomic with a subsequent
    /// `acquire`.
    pub async fn inspect(
        &self,
        resource_id: &str,
        kind: LockKind,
    ) -> Result<Option<LockStatus>> {
        let key = LockKey::new(resource_id, kind);
        let now = now_millis();
        Ok(self
            .store
            .get(&key)
            .await?
            .filter(|lock| !lock.is_expired_at(now))
            .map(|lock| LockStatus::from_lock(&lock, now)))
    }

    /// Admin override: remove whatever lock the pair holds.
    pub async fn force_release(&self, resource_id: &str, kind: LockKind) -> Result<bool> {
        let key = LockKey::new(resource_id, kind);
        let removed = self.store.remove(&key).await?;
        if removed {
            self.stats.record_forced();
            info!(resource = %resource_id, kind = %kind, "lock force-released");
        }
        Ok(removed)
    }

    /// All currently valid locks, for ops views.
    pub async fn list_active(&self) -> Result<Vec<Lock>> {
        let now = now_millis();
        let mut locks: Vec<Lock> = self
            .store
            .snapshot()
            .await?
            .into_iter()
            .filter(|lock| !lock.is_expired_at(now))
            .collect();
        locks.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(locks)
    }

    /// Operation counters since process start.
    pub fn stats(&self) -> LockStats {
        self.stats.snapshot()
    }
}
