//! Scoped lock guard
//!
//! Wraps acquire/release around a unit of work so release happens on every
//! exit path: normal return, error, or cancellation of the surrounding
//! operation. The per-lock timeout stays the backstop of last resort when
//! even the background release cannot run.

use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use waybill_common::error::{LockError, Result};
use waybill_common::LockKind;

use crate::model::Lock;
use crate::registry::LockRegistry;

/// A held lock that releases itself.
///
/// Prefer the explicit async [`release`](Self::release); a guard dropped
/// without it (including a cancelled caller) spawns a best-effort release
/// task on the current runtime.
pub struct HeldLock {
    registry: Arc<LockRegistry>,
    lock: Lock,
    released: bool,
}

impl HeldLock {
    pub fn lock(&self) -> &Lock {
        &self.lock
    }

    pub fn resource_id(&self) -> &str {
        &self.lock.resource_id
    }

    pub fn kind(&self) -> LockKind {
        self.lock.kind
    }

    pub fn holder_id(&self) -> &str {
        &self.lock.holder_id
    }

    /// Release the lock now. A [`LockError::NotOwner`] return means the
    /// lock already lapsed underneath us, which callers treat as benign.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        self.registry
            .release(&self.lock.resource_id, self.lock.kind, &self.lock.holder_id)
            .await
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let registry = self.registry.clone();
        let resource_id = self.lock.resource_id.clone();
        let kind = self.lock.kind;
        let holder_id = self.lock.holder_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    resource = %resource_id,
                    kind = %kind,
                    "lock guard dropped without explicit release, releasing in background"
                );
                handle.spawn(async move {
                    if let Err(e) = registry.release(&resource_id, kind, &holder_id).await {
                        debug!(error = %e, "background release after guard drop found no lock to remove");
                    }
                });
            }
            Err(_) => warn!(
                resource = %resource_id,
                kind = %kind,
                "lock guard dropped outside a runtime, lock will lapse via its timeout"
            ),
        }
    }
}

/// Acquire a lock wrapped in a self-releasing guard.
pub async fn acquire_guarded(
    registry: &Arc<LockRegistry>,
    resource_id: &str,
    kind: LockKind,
    holder_id: &str,
) -> Result<HeldLock> {
    let lock = registry.acquire(resource_id, kind, holder_id).await?;
    Ok(HeldLock {
        registry: registry.clone(),
        lock,
        released: false,
    })
}

/// Run `work` while holding the `(resource_id, kind)` lock.
///
/// On a conflict the work never runs and the conflict is returned as-is.
/// Otherwise the lock is released after `work` completes, on success and on
/// error alike, and `work`'s own result propagates. Re-entry of the same
/// pair by the same holder inside `work` is permitted; taking a *different*
/// kind set on the same resource belongs to the batch coordinator's ordered
/// acquisition instead.
pub async fn with_lock<T, E, F, Fut>(
    registry: &Arc<LockRegistry>,
    resource_id: &str,
    kind: LockKind,
    holder_id: &str,
    work: F,
) -> std::result::Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: From<LockError>,
{
    let guard = acquire_guarded(registry, resource_id, kind, holder_id)
        .await
        .map_err(E::from)?;
    let outcome = work().await;
    if let Err(e) = guard.release().await {
        if e.is_benign() {
            debug!(error = %e, "scoped release skipped, lock already lapsed");
        } else {
            warn!(error = %e, "scoped release failed, expiry will reclaim the lock");
        }
    }
    outcome
}
