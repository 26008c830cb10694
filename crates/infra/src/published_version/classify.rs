//! Conflict classifier.
//!
//! Backends translate their native errors into a [`PersistenceFailure`] and
//! hand the raw outcome (affected rows, or a failure) to one of the functions
//! below. This is the single place where outcomes become domain results:
//!
//! | path | raw outcome | result |
//! |---|---|---|
//! | insert | rows affected | `Ok(rows)` |
//! | insert | unique violation on the configured constraint | `Ok(1)` (idempotent) |
//! | insert | unique violation on any other constraint | `Unknown` |
//! | update | 0 rows | `VersionConflict` |
//! | update | n rows | `Ok(n)` |
//! | any | `Driver` | `Io` |
//! | any | `Unexpected` | `Unknown` |

use tracing::{debug, error, warn};

use pubver_core::{AggregateRootId, ProcessorName};

use super::r#trait::PublishedVersionError;

/// Backend-neutral failure of a single statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceFailure {
    /// A uniqueness constraint rejected the write.
    UniqueViolation {
        constraint: Option<String>,
        message: String,
    },
    /// Transport, pool, or driver-reported database failure.
    Driver(String),
    /// Anything else: decoding, encoding, programming errors.
    Unexpected(String),
}

impl PersistenceFailure {
    /// Whether this is a unique violation raised by `constraint_name`.
    ///
    /// A reported constraint must match exactly. The message is searched for the
    /// quoted name only when the driver reports no constraint.
    pub fn is_unique_violation_of(&self, constraint_name: &str) -> bool {
        match self {
            PersistenceFailure::UniqueViolation {
                constraint: Some(constraint),
                ..
            } => constraint == constraint_name,
            PersistenceFailure::UniqueViolation {
                constraint: None,
                message,
            } => message.contains(&format!("\"{constraint_name}\"")),
            _ => false,
        }
    }
}

impl core::fmt::Display for PersistenceFailure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PersistenceFailure::UniqueViolation {
                constraint: Some(c),
                message,
            } => write!(f, "unique violation on {c}: {message}"),
            PersistenceFailure::UniqueViolation {
                constraint: None,
                message,
            } => write!(f, "unique violation: {message}"),
            PersistenceFailure::Driver(msg) => write!(f, "driver error: {msg}"),
            PersistenceFailure::Unexpected(msg) => write!(f, "unexpected error: {msg}"),
        }
    }
}

/// Identity of the cursor a statement was issued for (used for errors and logs).
#[derive(Debug, Copy, Clone)]
pub struct CursorKey<'a> {
    pub processor_name: &'a ProcessorName,
    pub aggregate_root_id: &'a AggregateRootId,
}

pub const INSERT_OPERATION: &str = "insert_published_version";
pub const UPDATE_OPERATION: &str = "update_published_version";
pub const READ_OPERATION: &str = "get_published_version";

pub fn version_conflict(key: CursorKey<'_>, target_version: u32) -> PublishedVersionError {
    PublishedVersionError::VersionConflict {
        processor_name: key.processor_name.clone(),
        aggregate_root_id: key.aggregate_root_id.clone(),
        target_version,
    }
}

/// Classify the outcome of the version-1 insert.
pub fn classify_insert(
    outcome: Result<u64, PersistenceFailure>,
    unique_key_name: &str,
    key: CursorKey<'_>,
) -> Result<u64, PublishedVersionError> {
    match outcome {
        Ok(rows) => Ok(rows),
        Err(failure) if failure.is_unique_violation_of(unique_key_name) => {
            debug!(
                processor_name = %key.processor_name,
                aggregate_root_id = %key.aggregate_root_id,
                "published version 1 already recorded; duplicate insert absorbed"
            );
            Ok(1)
        }
        Err(failure) => Err(classify_failure(INSERT_OPERATION, failure, key)),
    }
}

/// Classify the outcome of the conditional update to `target_version`.
pub fn classify_update(
    outcome: Result<u64, PersistenceFailure>,
    key: CursorKey<'_>,
    target_version: u32,
) -> Result<u64, PublishedVersionError> {
    match outcome {
        Ok(0) => {
            debug!(
                processor_name = %key.processor_name,
                aggregate_root_id = %key.aggregate_root_id,
                target_version,
                "published version update matched no row"
            );
            Err(version_conflict(key, target_version))
        }
        Ok(rows) => Ok(rows),
        Err(failure) => Err(classify_failure(UPDATE_OPERATION, failure, key)),
    }
}

/// Classify the outcome of the read path; a missing row is version 0.
pub fn classify_read(
    outcome: Result<Option<u32>, PersistenceFailure>,
    key: CursorKey<'_>,
) -> Result<u32, PublishedVersionError> {
    match outcome {
        Ok(version) => Ok(version.unwrap_or(0)),
        Err(failure) => Err(classify_failure(READ_OPERATION, failure, key)),
    }
}

/// Map a failure that is not an expected outcome of `operation`.
pub fn classify_failure(
    operation: &'static str,
    failure: PersistenceFailure,
    key: CursorKey<'_>,
) -> PublishedVersionError {
    match failure {
        PersistenceFailure::Driver(message) => {
            warn!(
                operation,
                processor_name = %key.processor_name,
                aggregate_root_id = %key.aggregate_root_id,
                error = %message,
                "published version store I/O failure"
            );
            PublishedVersionError::Io { operation, message }
        }
        other => {
            error!(
                operation,
                processor_name = %key.processor_name,
                aggregate_root_id = %key.aggregate_root_id,
                error = %other,
                "published version store unknown failure"
            );
            PublishedVersionError::Unknown {
                operation,
                message: other.to_string(),
            }
        }
    }
}
