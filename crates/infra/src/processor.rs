//! Versioned event processing on top of the published-version cursor.
//!
//! Delivery is at-least-once and unordered, so a processor cannot trust the
//! pipeline to hand it each aggregate version exactly once. Instead it:
//!
//! ```text
//! envelope (version v)
//!   ↓
//! 1. read published version p
//!   ↓
//! 2. v <= p      → already applied, skip
//!    v >  p + 1  → out of order, skip (pipeline redelivers later)
//!    v == p + 1  → run handlers
//!   ↓
//! 3. advance cursor to v (insert for v = 1, CAS on p otherwise)
//!   ↓
//! 4. on VersionConflict, re-read and explain the conflict
//! ```
//!
//! Handlers run before the cursor moves. A crash in between means the event is
//! handled again on redelivery, so handlers still have to tolerate replays of
//! the most recent version.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use pubver_core::{AggregateRootId, ConflictCause, ProcessorName};
use pubver_events::{EventEnvelope, HandlerError, HandlerRegistry};

use crate::published_version::{PublishedVersionError, PublishedVersionStore, diagnose_conflict};

/// What happened to one envelope.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Handlers ran and the cursor now points at `version`.
    Applied { version: u32, handlers: usize },
    /// The version was already published; nothing ran.
    AlreadyApplied { published: u32 },
    /// Earlier versions are still missing; nothing ran.
    OutOfOrder { published: u32, received: u32 },
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Store(#[from] PublishedVersionError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// The cursor could not be advanced after handlers ran, and the cause is not a
    /// benign duplicate.
    #[error("cannot publish version {version} of aggregate '{aggregate_root_id}': {cause}")]
    Conflict {
        aggregate_root_id: AggregateRootId,
        version: u32,
        cause: ConflictCause,
    },
}

/// Applies envelopes for one named processor, at most once per aggregate version.
pub struct VersionedEventProcessor<S> {
    name: ProcessorName,
    store: S,
    registry: Arc<HandlerRegistry>,
}

impl<S> core::fmt::Debug for VersionedEventProcessor<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VersionedEventProcessor")
            .field("name", &self.name)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl<S> VersionedEventProcessor<S>
where
    S: PublishedVersionStore,
{
    pub fn new(name: ProcessorName, store: S, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            name,
            store,
            registry,
        }
    }

    pub fn name(&self) -> &ProcessorName {
        &self.name
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    #[instrument(
        skip_all,
        fields(
            processor = %self.name,
            aggregate_root_id = %envelope.aggregate_root_id(),
            version = envelope.version()
        )
    )]
    pub async fn process(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<ProcessOutcome, ProcessError> {
        let aggregate_root_id = envelope.aggregate_root_id();
        let aggregate_root_type_name = envelope.aggregate_root_type_name();
        let version = envelope.version();

        let published = self
            .store
            .get_published_version(&self.name, aggregate_root_type_name, aggregate_root_id)
            .await?;

        if version <= published {
            debug!(published, "version already applied; skipping");
            return Ok(ProcessOutcome::AlreadyApplied { published });
        }
        if version > published.saturating_add(1) {
            debug!(published, "earlier versions missing; waiting for redelivery");
            return Ok(ProcessOutcome::OutOfOrder {
                published,
                received: version,
            });
        }

        let handlers = self.registry.dispatch(envelope).await?;

        match self
            .store
            .update_published_version(
                &self.name,
                aggregate_root_type_name,
                aggregate_root_id,
                version,
            )
            .await
        {
            Ok(_) => Ok(ProcessOutcome::Applied { version, handlers }),
            Err(err) if err.is_version_conflict() => {
                let cause = diagnose_conflict(
                    &self.store,
                    &self.name,
                    aggregate_root_type_name,
                    aggregate_root_id,
                    version,
                )
                .await?;

                match cause {
                    ConflictCause::AlreadyApplied { stored } => {
                        warn!(stored, "version published concurrently by another delivery");
                        Ok(ProcessOutcome::AlreadyApplied { published: stored })
                    }
                    cause => Err(ProcessError::Conflict {
                        aggregate_root_id: aggregate_root_id.clone(),
                        version,
                        cause,
                    }),
                }
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde::{Deserialize, Serialize};

    use pubver_core::AggregateRootTypeName;
    use pubver_events::Event;

    use super::*;
    use crate::published_version::InMemoryPublishedVersionStore;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct LineAdded {
        sku: String,
    }

    impl Event for LineAdded {
        const EVENT_TYPE: &'static str = "order.line_added";
    }

    fn envelope(version: u32, sku: &str) -> EventEnvelope<JsonValue> {
        EventEnvelope::from_event(
            AggregateRootId::new("A1").unwrap(),
            AggregateRootTypeName::new("Order").unwrap(),
            version,
            &LineAdded { sku: sku.to_string() },
        )
        .unwrap()
    }

    fn processor(
        seen: Arc<Mutex<Vec<String>>>,
    ) -> VersionedEventProcessor<Arc<InMemoryPublishedVersionStore>> {
        let registry = HandlerRegistry::builder()
            .on::<LineAdded, _, _>("record-sku", move |_ctx, ev| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(ev.sku);
                    Ok(())
                }
            })
            .build();

        VersionedEventProcessor::new(
            ProcessorName::new("order-lines").unwrap(),
            Arc::new(InMemoryPublishedVersionStore::new()),
            Arc::new(registry),
        )
    }

    #[tokio::test]
    async fn redelivered_versions_run_handlers_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let processor = processor(seen.clone());

        let first = envelope(1, "sku-1");
        assert_eq!(
            processor.process(&first).await.unwrap(),
            ProcessOutcome::Applied { version: 1, handlers: 1 }
        );
        assert_eq!(
            processor.process(&first).await.unwrap(),
            ProcessOutcome::AlreadyApplied { published: 1 }
        );
        assert_eq!(
            processor.process(&envelope(2, "sku-2")).await.unwrap(),
            ProcessOutcome::Applied { version: 2, handlers: 1 }
        );

        assert_eq!(*seen.lock().unwrap(), vec!["sku-1", "sku-2"]);
    }

    #[tokio::test]
    async fn out_of_order_versions_wait_for_their_predecessors() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let processor = processor(seen.clone());

        assert_eq!(
            processor.process(&envelope(3, "sku-3")).await.unwrap(),
            ProcessOutcome::OutOfOrder { published: 0, received: 3 }
        );
        assert!(seen.lock().unwrap().is_empty());

        let a1 = AggregateRootId::new("A1").unwrap();
        assert!(processor.store().record(processor.name(), &a1).is_none());
    }

    #[tokio::test]
    async fn failed_handlers_leave_the_cursor_in_place() {
        let registry = HandlerRegistry::builder()
            .on::<LineAdded, _, _>("flaky", |_ctx, _ev| async {
                Err(anyhow::anyhow!("downstream unavailable"))
            })
            .build();
        let store = Arc::new(InMemoryPublishedVersionStore::new());
        let processor = VersionedEventProcessor::new(
            ProcessorName::new("order-lines").unwrap(),
            store.clone(),
            Arc::new(registry),
        );

        let err = processor.process(&envelope(1, "sku-1")).await.unwrap_err();
        assert!(matches!(err, ProcessError::Handler(_)));
        assert!(store.is_empty());
    }
}
