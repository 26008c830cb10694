//! Published-version state machine.
//!
//! A cursor for one `(processor, aggregate root)` pair is either `Unpublished`
//! (stored version 0, no row) or `Published(v)` with `v >= 1`. The only legal
//! transition is to the immediate successor:
//!
//! ```text
//! Unpublished  --insert(1)-->            Published(1)
//! Published(v) --update(v+1), CAS on v--> Published(v+1)
//! ```
//!
//! No transition decreases `v` or skips a value.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Current state of one cursor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CursorState {
    Unpublished,
    Published(u32),
}

impl CursorState {
    /// Build a state from a stored version where 0 means "no row".
    pub fn from_stored(version: u32) -> Self {
        match version {
            0 => CursorState::Unpublished,
            v => CursorState::Published(v),
        }
    }

    /// Stored version, 0 when unpublished.
    pub fn version(self) -> u32 {
        match self {
            CursorState::Unpublished => 0,
            CursorState::Published(v) => v,
        }
    }

    /// The only version a write may target next; `None` once the range is exhausted.
    pub fn successor(self) -> Option<u32> {
        self.version().checked_add(1)
    }

    pub fn accepts(self, target: u32) -> bool {
        self.successor() == Some(target)
    }

    /// Apply a write targeting `target`, rejecting anything but the successor.
    pub fn advance(self, target: u32) -> DomainResult<CursorState> {
        if self.accepts(target) {
            Ok(CursorState::Published(target))
        } else {
            Err(DomainError::conflict(format!(
                "cannot advance from version {} to {target}",
                self.version()
            )))
        }
    }
}

/// How a write targeting a given version must be performed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WritePlan {
    /// First version: insert a new row with version 1.
    Insert,
    /// Later version: conditional update, the previous version is the CAS token.
    Update { expected_previous: u32 },
}

impl WritePlan {
    /// `None` for target 0, which is never a valid successor.
    pub fn for_target(target: u32) -> Option<WritePlan> {
        match target {
            0 => None,
            1 => Some(WritePlan::Insert),
            v => Some(WritePlan::Update {
                expected_previous: v - 1,
            }),
        }
    }
}

/// Explanation of a rejected write, obtained by re-reading the cursor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictCause {
    /// The target is at or below the stored version (duplicate or stale redelivery).
    AlreadyApplied { stored: u32 },
    /// The target is beyond the successor: earlier versions were never recorded.
    Gap { stored: u32, target: u32 },
    /// The target is now the successor; the cursor moved after the failed write.
    Resolved { stored: u32 },
}

impl ConflictCause {
    pub fn classify(stored: u32, target: u32) -> ConflictCause {
        if target <= stored {
            ConflictCause::AlreadyApplied { stored }
        } else if stored.checked_add(1) == Some(target) {
            ConflictCause::Resolved { stored }
        } else {
            ConflictCause::Gap { stored, target }
        }
    }
}

impl core::fmt::Display for ConflictCause {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConflictCause::AlreadyApplied { stored } => {
                write!(f, "already applied (stored version {stored})")
            }
            ConflictCause::Gap { stored, target } => {
                write!(f, "version gap (stored {stored}, target {target})")
            }
            ConflictCause::Resolved { stored } => {
                write!(f, "cursor moved concurrently (stored version {stored})")
            }
        }
    }
}
