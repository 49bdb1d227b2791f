//! Error types and error codes for the lock subsystem
//!
//! This module defines:
//! - `LockError`: the lock subsystem's error taxonomy
//! - `ErrorCode`: structured error codes for API responses
//!
//! `Conflict` and `NotOwner` are expected control-flow outcomes surfaced to
//! the caller, not failures that abort a whole request; `Store` is a hard
//! failure of the persistence layer and propagates.

use serde::{Deserialize, Serialize};

use crate::LockKind;

/// Result alias used throughout the lock subsystem
pub type Result<T> = std::result::Result<T, LockError>;

/// Lock subsystem error taxonomy
#[derive(thiserror::Error, Debug)]
pub enum LockError {
    /// Another actor holds a non-expired lock on the pair.
    /// Surfaced to the end user as "being edited by X".
    #[error("'{resource_id}' ({kind}) is being edited by '{locked_by}'")]
    Conflict {
        resource_id: String,
        kind: LockKind,
        locked_by: String,
    },

    /// Release or extend attempted by a non-holder, or on a lock that
    /// already expired or never existed. Benign for callers.
    #[error("lock on '{resource_id}' ({kind}) is not held by '{holder_id}'")]
    NotOwner {
        resource_id: String,
        kind: LockKind,
        holder_id: String,
    },

    /// The underlying lock store failed. Always logged, never swallowed.
    #[error("lock store error: {0}")]
    Store(String),
}

impl LockError {
    /// True for the expected "someone else is editing" outcome
    pub fn is_conflict(&self) -> bool {
        matches!(self, LockError::Conflict { .. })
    }

    /// True for outcomes callers treat as a no-op rather than a failure
    pub fn is_benign(&self) -> bool {
        matches!(self, LockError::NotOwner { .. })
    }
}

/// Error code structure for API responses
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ErrorCode<'a> {
    pub code: i32,
    pub message: &'a str,
}

pub const SUCCESS: ErrorCode<'static> = ErrorCode {
    code: 0,
    message: "success",
};

pub const RESOURCE_LOCKED: ErrorCode<'static> = ErrorCode {
    code: 20301,
    message: "resource locked by another operator",
};

pub const LOCK_NOT_HELD: ErrorCode<'static> = ErrorCode {
    code: 20302,
    message: "lock not held by caller",
};

pub const LOCK_STORE_ERROR: ErrorCode<'static> = ErrorCode {
    code: 30001,
    message: "lock store error",
};
