use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use pubver_core::{AggregateRootId, AggregateRootTypeName};

use crate::event::Event;

/// Envelope for an event, containing aggregate stream metadata.
///
/// This is the unit a processor receives from the delivery pipeline.
///
/// Notes:
/// - `version` is the aggregate version the event produced; it is what the
///   published-version cursor is advanced to once handlers succeed.
/// - Delivery is at-least-once, so the same envelope may arrive many times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E = JsonValue> {
    event_id: Uuid,

    aggregate_root_id: AggregateRootId,
    aggregate_root_type_name: AggregateRootTypeName,

    /// Aggregate version produced by this event (1 for the first event).
    version: u32,

    event_type: String,
    occurred_at: DateTime<Utc>,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        aggregate_root_id: AggregateRootId,
        aggregate_root_type_name: AggregateRootTypeName,
        version: u32,
        event_type: impl Into<String>,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            aggregate_root_id,
            aggregate_root_type_name,
            version,
            event_type: event_type.into(),
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn aggregate_root_id(&self) -> &AggregateRootId {
        &self.aggregate_root_id
    }

    pub fn aggregate_root_type_name(&self) -> &AggregateRootTypeName {
        &self.aggregate_root_type_name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }
}

impl EventEnvelope<JsonValue> {
    /// Wrap a typed event into a JSON envelope with a fresh UUIDv7 id.
    pub fn from_event<E: Event>(
        aggregate_root_id: AggregateRootId,
        aggregate_root_type_name: AggregateRootTypeName,
        version: u32,
        event: &E,
    ) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_value(event)?;
        Ok(Self::new(
            Uuid::now_v7(),
            aggregate_root_id,
            aggregate_root_type_name,
            version,
            E::EVENT_TYPE,
            Utc::now(),
            payload,
        ))
    }
}
