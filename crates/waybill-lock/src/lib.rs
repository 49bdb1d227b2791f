//! Waybill Lock - resource lock coordination for concurrently edited orders
//!
//! This crate provides:
//! - The lock record store (atomic keyed storage of active locks)
//! - The lock registry (acquire / release / extend / inspect)
//! - A scoped guard releasing on every exit path
//! - The expiry sweeper reclaiming abandoned locks
//! - A batch coordinator for all-or-nothing multi-resource acquisition
//!
//! Exclusivity is per `(resource, kind)` pair and time-bounded: a lock whose
//! expiry has passed is treated as absent on every read path, so abandoned
//! permissions reclaim themselves even before the sweeper physically removes
//! them. This is not a distributed lock service; it assumes one
//! authoritative store per deployment.

pub mod batch;
pub mod guard;
pub mod metrics;
pub mod model;
pub mod registry;
pub mod settings;
pub mod store;
pub mod sweeper;

// Re-export commonly used types
pub use batch::{BatchCoordinator, BatchGuard};
pub use guard::{HeldLock, acquire_guarded, with_lock};
pub use model::{Lock, LockConflict, LockGranted, LockKey, LockStats, LockStatus, now_millis};
pub use registry::{LockRegistry, LockStatsCollector};
pub use settings::LockSettings;
pub use store::{InsertOutcome, LockStore, MemoryLockStore, RefreshOutcome};
pub use sweeper::{ExpirySweeper, SweeperHandle};
pub use waybill_common::error::{LockError, Result};
pub use waybill_common::LockKind;
