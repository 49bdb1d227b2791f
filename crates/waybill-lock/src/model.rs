//! Lock data model
//!
//! The unit of mutual exclusion is one `(resource, kind)` pair. A `Lock` row
//! whose expiry has passed is logically absent on every read path even while
//! it is still physically present in the store.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use waybill_common::LockKind;

/// Store key: one exclusive pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LockKey {
    /// Identifier of the protected order or annotation record
    pub resource_id: String,
    /// Which aspect of the record is being edited
    pub kind: LockKind,
}

impl LockKey {
    pub fn new(resource_id: impl Into<String>, kind: LockKind) -> Self {
        Self {
            resource_id: resource_id.into(),
            kind,
        }
    }
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.resource_id, self.kind)
    }
}

/// A time-bounded exclusivity grant over one `(resource, kind)` pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lock {
    /// Identifier of the protected record (stable, immutable)
    pub resource_id: String,
    /// Which aspect of the record is being edited
    pub kind: LockKind,
    /// Actor currently holding the lock
    pub holder_id: String,
    /// Grant timestamp (Unix millis)
    pub acquired_at: i64,
    /// Expiry timestamp (Unix millis); strictly increasing on renewal
    pub expires_at: i64,
}

impl Lock {
    /// Build a candidate lock granted at `now` for the configured timeout
    pub fn new(
        resource_id: impl Into<String>,
        kind: LockKind,
        holder_id: impl Into<String>,
        now: i64,
        timeout: Duration,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            kind,
            holder_id: holder_id.into(),
            acquired_at: now,
            expires_at: now + timeout.as_millis() as i64,
        }
    }

    pub fn key(&self) -> LockKey {
        LockKey {
            resource_id: self.resource_id.clone(),
            kind: self.kind,
        }
    }

    /// A row is expired once `now` reaches `expires_at`
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    /// Remaining validity in milliseconds, zero once expired
    pub fn remaining_ms(&self, now: i64) -> i64 {
        (self.expires_at - now).max(0)
    }
}

/// Read-only view of a held lock, for UI display only.
///
/// Never a correctness decision: `inspect` and `acquire` are not atomic
/// together, so a caller must still attempt `acquire` for an authoritative
/// answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockStatus {
    pub resource_id: String,
    pub kind: LockKind,
    pub holder_id: String,
    pub expires_at: i64,
    pub remaining_ms: i64,
}

impl LockStatus {
    pub fn from_lock(lock: &Lock, now: i64) -> Self {
        Self {
            resource_id: lock.resource_id.clone(),
            kind: lock.kind,
            holder_id: lock.holder_id.clone(),
            expires_at: lock.expires_at,
            remaining_ms: lock.remaining_ms(now),
        }
    }
}

/// Success payload handed to the API layer on acquire/extend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockGranted {
    pub resource_id: String,
    pub kind: LockKind,
    pub holder_id: String,
    pub expires_at: i64,
}

impl From<&Lock> for LockGranted {
    fn from(lock: &Lock) -> Self {
        Self {
            resource_id: lock.resource_id.clone(),
            kind: lock.kind,
            holder_id: lock.holder_id.clone(),
            expires_at: lock.expires_at,
        }
    }
}

/// Conflict payload handed to the API layer with a distinguishable
/// "locked" status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConflict {
    pub resource_id: String,
    pub kind: LockKind,
    pub locked_by: String,
}

impl LockConflict {
    /// Extract the conflict payload from a registry error, if it is one
    pub fn from_error(err: &waybill_common::LockError) -> Option<Self> {
        match err {
            waybill_common::LockError::Conflict {
                resource_id,
                kind,
                locked_by,
            } => Some(Self {
                resource_id: resource_id.clone(),
                kind: *kind,
                locked_by: locked_by.clone(),
            }),
            _ => None,
        }
    }
}

/// Operation counters exposed for ops views
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockStats {
    /// Fresh grants
    pub acquisitions: u64,
    /// Same-holder re-entries and explicit extends
    pub renewals: u64,
    /// Acquire/extend attempts rejected because another actor holds the pair
    pub conflicts: u64,
    /// Holder releases that removed a row
    pub releases: u64,
    /// Benign non-holder releases and extends on lapsed locks
    pub not_owner: u64,
    /// Admin force-releases
    pub forced_releases: u64,
    /// Rows reclaimed by the expiry sweeper
    pub swept: u64,
}

/// Current time as Unix epoch milliseconds
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
