//! `pubver-core`: published-version cursor building blocks.
//!
//! This crate contains **pure** primitives (no IO, no async): identifiers, the
//! domain error model, the cursor state machine and the persisted record shape.

pub mod error;
pub mod id;
pub mod record;
pub mod version;

pub use error::{DomainError, DomainResult};
pub use id::{AggregateRootId, AggregateRootTypeName, ProcessorName};
pub use record::PublishedVersionRecord;
pub use version::{ConflictCause, CursorState, WritePlan};
