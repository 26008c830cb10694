//! Persisted published-version record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainResult;
use crate::id::{AggregateRootId, AggregateRootTypeName, ProcessorName};
use crate::version::CursorState;

/// One row of the published-version table.
///
/// Keyed by `(processor_name, aggregate_root_id)`; `aggregate_root_type_name` is
/// descriptive only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedVersionRecord {
    pub processor_name: ProcessorName,
    pub aggregate_root_type_name: AggregateRootTypeName,
    pub aggregate_root_id: AggregateRootId,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PublishedVersionRecord {
    /// A freshly inserted record, always at version 1.
    pub fn first(
        processor_name: ProcessorName,
        aggregate_root_type_name: AggregateRootTypeName,
        aggregate_root_id: AggregateRootId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            processor_name,
            aggregate_root_type_name,
            aggregate_root_id,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> CursorState {
        CursorState::from_stored(self.version)
    }

    /// Move the record to `target`, which must be the successor of the stored version.
    pub fn advance(&mut self, target: u32, now: DateTime<Utc>) -> DomainResult<()> {
        let next = self.state().advance(target)?;
        self.version = next.version();
        self.updated_at = now;
        Ok(())
    }
}
