//! Lock record store
//!
//! The store is the only shared mutable state in the subsystem. Every
//! mutation is a single atomic keyed operation; the registry composes its
//! rules out of these primitives and never caches lock state across calls.
//!
//! `MemoryLockStore` is the in-process authoritative store. The trait is
//! fallible so a database-backed implementation can slot in behind the same
//! registry; the memory store itself never fails.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use waybill_common::error::Result;

use crate::model::{Lock, LockKey, now_millis};

/// Outcome of an atomic insert-if-vacant
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    /// The pair was vacant (or its row had expired) and the candidate is now
    /// the active lock
    Granted(Lock),
    /// The candidate's holder already held the pair; expiry was pushed
    /// forward in place
    Renewed(Lock),
    /// Another actor holds a non-expired lock; no side effect occurred
    Held(Lock),
}

/// Outcome of an expiry refresh
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// Expiry pushed forward for the current holder
    Refreshed(Lock),
    /// A different actor holds a non-expired lock
    HeldByOther(Lock),
    /// No row, or the row already expired
    Vacant,
}

/// Atomic keyed storage of active locks.
///
/// Implementations must make each method a single atomic transaction against
/// one row: insert-if-absent, compare-and-delete, and conditional update are
/// the primitives the registry's exclusivity guarantee rests on.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Insert `candidate` if its pair is vacant. An expired row counts as
    /// vacant and is replaced; a row held by the candidate's own holder is
    /// renewed in place. `candidate.acquired_at` is the operation's notion
    /// of "now".
    async fn try_insert(&self, candidate: Lock) -> Result<InsertOutcome>;

    /// Push `expires_at` forward to `new_expires_at`, only while the row is
    /// held, unexpired, by `holder_id`. Never moves expiry backwards.
    async fn refresh(
        &self,
        key: &LockKey,
        holder_id: &str,
        new_expires_at: i64,
    ) -> Result<RefreshOutcome>;

    /// Compare-and-delete: remove the row only while it is held, unexpired,
    /// by `holder_id`. Returns whether a row was removed.
    async fn remove_held(&self, key: &LockKey, holder_id: &str) -> Result<bool>;

    /// Unconditional delete (admin path). Returns whether a row existed.
    async fn remove(&self, key: &LockKey) -> Result<bool>;

    /// Raw read; expiry filtering is the caller's concern.
    async fn get(&self, key: &LockKey) -> Result<Option<Lock>>;

    /// Delete every row expired as of `now`, re-checking each row's
    /// `expires_at` at deletion time so a concurrent refresh wins the race.
    /// Returns the number of rows removed.
    async fn remove_expired(&self, now: i64) -> Result<usize>;

    /// Snapshot of all rows, expired included.
    async fn snapshot(&self) -> Result<Vec<Lock>>;
}

/// In-process lock store backed by a sharded concurrent map.
///
/// Entry-level locking gives each operation the single-row atomicity the
/// trait contract requires.
#[derive(Default)]
pub struct MemoryLockStore {
    locks: DashMap<LockKey, Lock>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Number of physical rows, expired included
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn try_insert(&self, candidate: Lock) -> Result<InsertOutcome> {
        let now = candidate.acquired_at;
        match self.locks.entry(candidate.key()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired_at(now) {
                    // Expired rows are logically absent: replace outright
                    occupied.insert(candidate.clone());
                    Ok(InsertOutcome::Granted(candidate))
                } else if occupied.get().holder_id == candidate.holder_id {
                    let lock = occupied.get_mut();
                    if candidate.expires_at > lock.expires_at {
                        lock.expires_at = candidate.expires_at;
                    }
                    Ok(InsertOutcome::Renewed(lock.clone()))
                } else {
                    Ok(InsertOutcome::Held(occupied.get().clone()))
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(candidate.clone());
                Ok(InsertOutcome::Granted(candidate))
            }
        }
    }

    async fn refresh(
        &self,
        key: &LockKey,
        holder_id: &str,
        new_expires_at: i64,
    ) -> Result<RefreshOutcome> {
        let now = now_millis();
        match self.locks.get_mut(key) {
            Some(entry) if entry.is_expired_at(now) => Ok(RefreshOutcome::Vacant),
            Some(mut entry) if entry.holder_id == holder_id => {
                if new_expires_at > entry.expires_at {
                    entry.expires_at = new_expires_at;
                }
                Ok(RefreshOutcome::Refreshed(entry.clone()))
            }
            Some(entry) => Ok(RefreshOutcome::HeldByOther(entry.clone())),
            None => Ok(RefreshOutcome::Vacant),
        }
    }

    async fn remove_held(&self, key: &LockKey, holder_id: &str) -> Result<bool> {
        let now = now_millis();
        let removed = self
            .locks
            .remove_if(key, |_, lock| {
                !lock.is_expired_at(now) && lock.holder_id == holder_id
            })
            .is_some();
        Ok(removed)
    }

    async fn remove(&self, key: &LockKey) -> Result<bool> {
        Ok(self.locks.remove(key).is_some())
    }

    async fn get(&self, key: &LockKey) -> Result<Option<Lock>> {
        Ok(self.locks.get(key).map(|entry| entry.clone()))
    }

    async fn remove_expired(&self, now: i64) -> Result<usize> {
        let mut removed = 0usize;
        // retain re-reads each row under its shard lock, so a refresh that
        // landed after the sweep began keeps its row
        self.locks.retain(|_, lock| {
            if lock.is_expired_at(now) {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn snapshot(&self) -> Result<Vec<Lock>> {
        Ok(self.locks.iter().map(|entry| entry.value().clone()).collect())
    }
}
