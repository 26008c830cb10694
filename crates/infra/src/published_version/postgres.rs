//! Postgres-backed published-version store.
//!
//! ## Schema
//!
//! The table is owned by the host application's migrations; its logical shape is:
//!
//! ```sql
//! CREATE TABLE published_version (
//!     processor_name           TEXT        NOT NULL,
//!     aggregate_root_type_name TEXT        NOT NULL,
//!     aggregate_root_id        TEXT        NOT NULL,
//!     version                  INTEGER     NOT NULL,
//!     gmt_create               TIMESTAMPTZ NOT NULL,
//!     CONSTRAINT uk_processor_name_aggregate_root_id
//!         UNIQUE (processor_name, aggregate_root_id)
//! );
//! ```
//!
//! Table and constraint names come from [`PublishedVersionStoreConfig`].
//! `gmt_create` is rewritten on every successful write and holds the time of the
//! last advance.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to [`PersistenceFailure`] and then classified:
//!
//! | SQLx Error | PostgreSQL Error Code | PersistenceFailure | Scenario |
//! |------------|----------------------|--------------------|----------|
//! | Database (unique violation) | `23505` | `UniqueViolation` | Concurrent or redelivered version-1 insert |
//! | Database (other) | Any other | `Driver` | Server-reported failure |
//! | Io / Tls / Protocol / PoolTimedOut / PoolClosed / WorkerCrashed | N/A | `Driver` | Transport failures |
//! | Other (decode, encode, column, configuration) | N/A | `Unexpected` | Programming errors |
//!
//! ## Thread Safety
//!
//! `PostgresPublishedVersionStore` is `Send + Sync`. Every operation is one
//! statement on the shared pool; there is no transaction and no retry.

use std::sync::Arc;

use chrono::Utc;
use sqlx::{PgPool, Row};
use tracing::instrument;

use pubver_core::{AggregateRootId, AggregateRootTypeName, ProcessorName, WritePlan};

use super::classify::{
    CursorKey, PersistenceFailure, UPDATE_OPERATION, classify_failure,
    classify_insert, classify_read, classify_update, version_conflict,
};
use super::r#trait::{PublishedVersionError, PublishedVersionStore};
use crate::config::PublishedVersionStoreConfig;

const UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for PersistenceFailure {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
                    PersistenceFailure::UniqueViolation {
                        constraint: db_err.constraint().map(str::to_string),
                        message: db_err.message().to_string(),
                    }
                } else {
                    PersistenceFailure::Driver(format!("database error: {}", db_err.message()))
                }
            }
            err @ (sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed) => PersistenceFailure::Driver(err.to_string()),
            other => PersistenceFailure::Unexpected(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
struct Statements {
    insert: String,
    update: String,
    select: String,
}

impl Statements {
    fn for_table(table: &str) -> Self {
        Self {
            insert: format!(
                "INSERT INTO {table} (processor_name, aggregate_root_type_name, aggregate_root_id, version, gmt_create) \
                 VALUES ($1, $2, $3, $4, $5)"
            ),
            update: format!(
                "UPDATE {table} SET version = $1, gmt_create = $2 \
                 WHERE processor_name = $3 AND aggregate_root_id = $4 AND version = $5"
            ),
            select: format!(
                "SELECT version FROM {table} WHERE processor_name = $1 AND aggregate_root_id = $2"
            ),
        }
    }
}

/// Postgres-backed published-version store.
///
/// The pool is injected; this type never opens connections on its own.
#[derive(Debug, Clone)]
pub struct PostgresPublishedVersionStore {
    pool: Arc<PgPool>,
    config: PublishedVersionStoreConfig,
    statements: Statements,
}

impl PostgresPublishedVersionStore {
    /// Create a store over `pool` using the (validated) table and constraint names.
    pub fn new(pool: PgPool, config: PublishedVersionStoreConfig) -> Self {
        let statements = Statements::for_table(config.table_name());
        Self {
            pool: Arc::new(pool),
            config,
            statements,
        }
    }

    async fn insert_first(
        &self,
        processor_name: &ProcessorName,
        aggregate_root_type_name: &AggregateRootTypeName,
        aggregate_root_id: &AggregateRootId,
    ) -> Result<u64, PersistenceFailure> {
        let result = sqlx::query(&self.statements.insert)
            .bind(processor_name.as_str())
            .bind(aggregate_root_type_name.as_str())
            .bind(aggregate_root_id.as_str())
            .bind(1_i32)
            .bind(Utc::now())
            .execute(&*self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn update_if_previous(
        &self,
        processor_name: &ProcessorName,
        aggregate_root_id: &AggregateRootId,
        target_version: i32,
        expected_previous: i32,
    ) -> Result<u64, PersistenceFailure> {
        let result = sqlx::query(&self.statements.update)
            .bind(target_version)
            .bind(Utc::now())
            .bind(processor_name.as_str())
            .bind(aggregate_root_id.as_str())
            .bind(expected_previous)
            .execute(&*self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn select_version(
        &self,
        processor_name: &ProcessorName,
        aggregate_root_id: &AggregateRootId,
    ) -> Result<Option<u32>, PersistenceFailure> {
        let row = sqlx::query(&self.statements.select)
            .bind(processor_name.as_str())
            .bind(aggregate_root_id.as_str())
            .fetch_optional(&*self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let version: i32 = row.try_get("version")?;
        u32::try_from(version)
            .map(Some)
            .map_err(|_| {
                PersistenceFailure::Unexpected(format!("stored version {version} is negative"))
            })
    }
}

#[async_trait::async_trait]
impl PublishedVersionStore for PostgresPublishedVersionStore {
    #[instrument(
        skip_all,
        fields(
            processor_name = %processor_name,
            aggregate_root_id = %aggregate_root_id,
            published_version = published_version
        )
    )]
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
            Some(WritePlan::Insert) => {
                let outcome = self
                    .insert_first(processor_name, aggregate_root_type_name, aggregate_root_id)
                    .await;
                classify_insert(outcome, self.config.unique_key_name(), key)
            }
            Some(WritePlan::Update { expected_previous }) => {
                let Ok(target) = i32::try_from(published_version) else {
                    return Err(classify_failure(
                        UPDATE_OPERATION,
                        PersistenceFailure::Unexpected(format!(
                            "version {published_version} does not fit an INTEGER column"
                        )),
                        key,
                    ));
                };
                // target fits, so its predecessor does too
                let outcome = self
                    .update_if_previous(
                        processor_name,
                        aggregate_root_id,
                        target,
                        expected_previous as i32,
                    )
                    .await;
                classify_update(outcome, key, published_version)
            }
        }
    }

    #[instrument(
        skip_all,
        fields(processor_name = %processor_name, aggregate_root_id = %aggregate_root_id)
    )]
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
        let outcome = self.select_version(processor_name, aggregate_root_id).await;
        classify_read(outcome, key)
    }
}
