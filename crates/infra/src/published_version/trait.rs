use std::sync::Arc;

use thiserror::Error;

use pubver_core::{AggregateRootId, AggregateRootTypeName, ConflictCause, ProcessorName};

/// Published-version store error.
///
/// These are the only failures a caller sees; backend-specific errors are
/// classified into one of them exactly once, where they are produced.
///
/// ## Error Categories
///
/// - **Io**: transport/driver failure, safe to retry at the caller's discretion
/// - **VersionConflict**: the conditional update matched no row (stored version
///   is not `target - 1`); a benign replay or a genuine gap, see [`diagnose_conflict`]
/// - **Unknown**: anything unclassified; always logged with its cause, not retryable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishedVersionError {
    #[error("I/O failure during {operation}: {message}")]
    Io {
        operation: &'static str,
        message: String,
    },

    #[error(
        "version conflict: processor '{processor_name}' cannot advance aggregate '{aggregate_root_id}' to version {target_version}"
    )]
    VersionConflict {
        processor_name: ProcessorName,
        aggregate_root_id: AggregateRootId,
        target_version: u32,
    },

    #[error("unknown persistence error during {operation}: {message}")]
    Unknown {
        operation: &'static str,
        message: String,
    },
}

/// Tagged kind of a [`PublishedVersionError`], independent of the backend.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PublishedVersionErrorKind {
    IoFailure,
    VersionConflict,
    UnknownPersistenceError,
}

impl PublishedVersionError {
    pub fn kind(&self) -> PublishedVersionErrorKind {
        use PublishedVersionErrorKind as Kind;

        match self {
            PublishedVersionError::Io { .. } => Kind::IoFailure,
            PublishedVersionError::VersionConflict { .. } => Kind::VersionConflict,
            PublishedVersionError::Unknown { .. } => Kind::UnknownPersistenceError,
        }
    }

    /// Only I/O failures are worth retrying as-is.
    pub fn is_retryable(&self) -> bool {
        self.kind() == PublishedVersionErrorKind::IoFailure
    }

    pub fn is_version_conflict(&self) -> bool {
        self.kind() == PublishedVersionErrorKind::VersionConflict
    }
}

/// Durable published-version cursor, keyed by `(processor_name, aggregate_root_id)`.
///
/// `aggregate_root_type_name` is accepted and stored but never part of the key.
///
/// ## Write Semantics
///
/// `update_published_version(.., v)`:
/// - `v == 1`: insert; a duplicate insert (configured constraint) is success
/// - `v >= 2`: update conditioned on the stored version being `v - 1`; no match
///   is `VersionConflict` and leaves the cursor untouched
/// - `v == 0`: `VersionConflict`, no state has 0 as its successor
///
/// Returns the number of affected rows (1 on success).
///
/// ## Read Semantics
///
/// `get_published_version` returns the stored version, or 0 when no row exists.
///
/// ## Implementation Requirements
///
/// Each call must be a single independent write or read. Implementations must not
/// retry internally and must rely on the backend (or an equivalent critical
/// section) for the uniqueness and compare-and-swap guarantees.
#[async_trait::async_trait]
pub trait PublishedVersionStore: Send + Sync {
    async fn update_published_version(
        &self,
        processor_name: &ProcessorName,
        aggregate_root_type_name: &AggregateRootTypeName,
        aggregate_root_id: &AggregateRootId,
        published_version: u32,
    ) -> Result<u64, PublishedVersionError>;

    async fn get_published_version(
        &self,
        processor_name: &ProcessorName,
        aggregate_root_type_name: &AggregateRootTypeName,
        aggregate_root_id: &AggregateRootId,
    ) -> Result<u32, PublishedVersionError>;
}

#[async_trait::async_trait]
impl<S> PublishedVersionStore for Arc<S>
where
    S: PublishedVersionStore + ?Sized,
{
    async fn update_published_version(
        &self,
        processor_name: &ProcessorName,
        aggregate_root_type_name: &AggregateRootTypeName,
        aggregate_root_id: &AggregateRootId,
        published_version: u32,
    ) -> Result<u64, PublishedVersionError> {
        (**self)
            .update_published_version(
                processor_name,
                aggregate_root_type_name,
                aggregate_root_id,
                published_version,
            )
            .await
    }

    async fn get_published_version(
        &self,
        processor_name: &ProcessorName,
        aggregate_root_type_name: &AggregateRootTypeName,
        aggregate_root_id: &AggregateRootId,
    ) -> Result<u32, PublishedVersionError> {
        (**self)
            .get_published_version(processor_name, aggregate_root_type_name, aggregate_root_id)
            .await
    }
}

/// Re-read the cursor after a `VersionConflict` and explain it.
///
/// The write protocol alone cannot tell a stale redelivery from a gap; the
/// current stored version can.
pub async fn diagnose_conflict<S>(
    store: &S,
    processor_name: &ProcessorName,
    aggregate_root_type_name: &AggregateRootTypeName,
    aggregate_root_id: &AggregateRootId,
    target_version: u32,
) -> Result<ConflictCause, PublishedVersionError>
where
    S: PublishedVersionStore + ?Sized,
{
    let stored = store
        .get_published_version(processor_name, aggregate_root_type_name, aggregate_root_id)
        .await?;
    Ok(ConflictCause::classify(stored, target_version))
}
