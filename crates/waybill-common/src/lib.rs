//! Waybill Common - Shared types for the order-edit coordination subsystem
//!
//! This crate provides the vocabulary shared between the lock subsystem and
//! its collaborators (the API layer, the order-record layer):
//! - Lock kinds (which aspect of an order an actor is editing)
//! - Error types and error codes

use serde::{Deserialize, Serialize};

pub mod error;

// Re-exports for convenience
pub use error::{ErrorCode, LockError};

/// The aspect of an order record protected by a lock.
///
/// A single order may carry independent locks of different kinds held by
/// different actors at the same time; only the same `(resource, kind)` pair
/// is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    /// General edit of the order record
    Edit,
    /// Status transition (e.g. dispatched, delivered)
    Status,
    /// Driver assignment
    Assign,
    /// Annotation / remark attached to the order
    Remark,
}

impl LockKind {
    /// Every kind, in its canonical order
    pub const ALL: [LockKind; 4] = [
        LockKind::Edit,
        LockKind::Status,
        LockKind::Assign,
        LockKind::Remark,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LockKind::Edit => "edit",
            LockKind::Status => "status",
            LockKind::Assign => "assign",
            LockKind::Remark => "remark",
        }
    }
}

impl std::fmt::Display for LockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LockKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "edit" => Ok(LockKind::Edit),
            "status" => Ok(LockKind::Status),
            "assign" => Ok(LockKind::Assign),
            "remark" => Ok(LockKind::Remark),
            _ => Err(format!("Invalid lock kind: {}", s)),
        }
    }
}
