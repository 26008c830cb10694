use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::Utc;

use pubver_core::{
    AggregateRootId, AggregateRootTypeName, ProcessorName, PublishedVersionRecord, WritePlan,
};

use super::classify::{
    CursorKey, PersistenceFailure, classify_insert, classify_read, classify_update,
    version_conflict,
};
use super::r#trait::{PublishedVersionError, PublishedVersionStore};
use crate::config::PublishedVersionStoreConfig;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CursorRow {
    processor_name: ProcessorName,
    aggregate_root_id: AggregateRootId,
}

/// In-memory published-version store.
///
/// Intended for tests/dev. Each write or read holds the lock for exactly one
/// emulated statement, which gives the same guarantees the database does:
/// concurrent inserts are serialized by the "uniqueness constraint" (the map
/// key) and concurrent updates by the version check.
#[derive(Debug, Default)]
pub struct InMemoryPublishedVersionStore {
    config: PublishedVersionStoreConfig,
    rows: RwLock<HashMap<CursorRow, PublishedVersionRecord>>,
}

impl InMemoryPublishedVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PublishedVersionStoreConfig) -> Self {
        Self {
            config,
            rows: RwLock::new(HashMap::new()),
        }
    }

    /// Full stored record, if any.
    pub fn record(
        &self,
        processor_name: &ProcessorName,
        aggregate_root_id: &AggregateRootId,
    ) -> Option<PublishedVersionRecord> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        rows.get(&CursorRow {
            processor_name: processor_name.clone(),
            aggregate_root_id: aggregate_root_id.clone(),
        })
        .cloned()
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.rows.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert_first(
        &self,
        processor_name: &ProcessorName,
        aggregate_root_type_name: &AggregateRootTypeName,
        aggregate_root_id: &AggregateRootId,
    ) -> Result<u64, PersistenceFailure> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| PersistenceFailure::Unexpected("lock poisoned".to_string()))?;

        let row = CursorRow {
            processor_name: processor_name.clone(),
            aggregate_root_id: aggregate_root_id.clone(),
        };
        if rows.contains_key(&row) {
            return Err(PersistenceFailure::UniqueViolation {
                constraint: Some(self.config.unique_key_name().to_string()),
                message: format!(
                    "duplicate key ({processor_name}, {aggregate_root_id}) in {}",
                    self.config.table_name()
                ),
            });
        }

        rows.insert(
            row,
            PublishedVersionRecord::first(
                processor_name.clone(),
                aggregate_root_type_name.clone(),
                aggregate_root_id.clone(),
                Utc::now(),
            ),
        );
        Ok(1)
    }

    fn update_if_previous(
        &self,
        processor_name: &ProcessorName,
        aggregate_root_id: &AggregateRootId,
        target_version: u32,
        expected_previous: u32,
    ) -> Result<u64, PersistenceFailure> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| PersistenceFailure::Unexpected("lock poisoned".to_string()))?;

        let row = CursorRow {
            processor_name: processor_name.clone(),
            aggregate_root_id: aggregate_root_id.clone(),
        };
        match rows.get_mut(&row) {
            Some(record) if record.version == expected_previous => {
                record
                    .advance(target_version, Utc::now())
                    .map_err(|e| PersistenceFailure::Unexpected(e.to_string()))?;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    fn select_version(
        &self,
        processor_name: &ProcessorName,
        aggregate_root_id: &AggregateRootId,
    ) -> Result<Option<u32>, PersistenceFailure> {
        let rows = self
            .rows
            .read()
            .map_err(|_| PersistenceFailure::Unexpected("lock poisoned".to_string()))?;

        Ok(rows
            .get(&CursorRow {
                processor_name: processor_name.clone(),
                aggregate_root_id: aggregate_root_id.clone(),
            })
            .map(|record| record.version))
    }
}

#[async_trait::async_trait]
impl PublishedVersionStore for InMemoryPublishedVersionStore {
    async fn update_published_version(
        &self,
        processor_name: &ProcessorName,
        aggregate_root_type_name: &AggregateRootTypeName,
        aggregate_root_id: &AggregateRootId,
        published_version: u32,
    ) -> Result<u64, PublishedVersionError> {
        let key = CursorKey {
            processor_name,
            aggregate_root_id,
        };

        match WritePlan::for_target(published_version) {
            None => Err(version_conflict(key, published_version)),
            Some(WritePlan::Insert) => classify_insert(
                self.insert_first(processor_name, aggregate_root_type_name, aggregate_root_id),
                self.config.unique_key_name(),
                key,
            ),
            Some(WritePlan::Update { expected_previous }) => classify_update(
                self.update_if_previous(
                    processor_name,
                    aggregate_root_id,
                    published_version,
                    expected_previous,
                ),
                key,
                published_version,
            ),
        }
    }

    async fn get_published_version(
        &self,
        processor_name: &ProcessorName,
        _aggregate_root_type_name: &AggregateRootTypeName,
        aggregate_root_id: &AggregateRootId,
    ) -> Result<u32, PublishedVersionError> {
        let key = CursorKey {
            processor_name,
            aggregate_root_id,
        };
        classify_read(self.select_version(processor_name, aggregate_root_id), key)
    }
}
