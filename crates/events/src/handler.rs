//! Static event → handler routing.
//!
//! Handlers are registered once, up front, against the event type they consume.
//! The registry is immutable after `build()`; routing is a plain map lookup on
//! the envelope's `event_type`, and every handler completes through the same
//! boxed future type so the caller can simply `.await` it.
//!
//! ```ignore
//! let registry = HandlerRegistry::builder()
//!     .on::<OrderCreated, _, _>("order-summary", |ctx, ev| async move {
//!         summaries.insert(ctx.aggregate_root_id, ev.total);
//!         Ok(())
//!     })
//!     .build();
//!
//! let handled = registry.dispatch(&envelope).await?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use pubver_core::{AggregateRootId, AggregateRootTypeName};

use crate::envelope::EventEnvelope;
use crate::event::Event;

/// Uniform completion type for all handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

type ErasedHandler =
    Box<dyn Fn(EventContext, &JsonValue) -> Result<HandlerFuture, serde_json::Error> + Send + Sync>;

/// Envelope metadata handed to every handler next to the decoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventContext {
    pub event_id: Uuid,
    pub aggregate_root_id: AggregateRootId,
    pub aggregate_root_type_name: AggregateRootTypeName,
    pub version: u32,
    pub occurred_at: DateTime<Utc>,
}

impl EventContext {
    pub fn from_envelope<E>(envelope: &EventEnvelope<E>) -> Self {
        Self {
            event_id: envelope.event_id(),
            aggregate_root_id: envelope.aggregate_root_id().clone(),
            aggregate_root_type_name: envelope.aggregate_root_type_name().clone(),
            version: envelope.version(),
            occurred_at: envelope.occurred_at(),
        }
    }
}

#[derive(Debug, Error)]
pub enum HandlerError {
    /// The payload could not be decoded into the handler's event type.
    #[error("handler '{handler}' could not decode '{event_type}' payload: {source}")]
    Decode {
        handler: &'static str,
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    /// The handler itself failed.
    #[error("handler '{handler}' failed: {source}")]
    Handler {
        handler: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

struct Registration {
    handler_name: &'static str,
    call: ErasedHandler,
}

/// Immutable event type → handlers map.
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Vec<Registration>>,
}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut routes: Vec<(&str, Vec<&str>)> = self
            .handlers
            .iter()
            .map(|(ty, regs)| (*ty, regs.iter().map(|r| r.handler_name).collect()))
            .collect();
        routes.sort();
        f.debug_struct("HandlerRegistry").field("routes", &routes).finish()
    }
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// Number of handlers registered for an event type.
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers.get(event_type).map(Vec::len).unwrap_or(0)
    }

    /// Run every handler registered for the envelope's event type, in registration order.
    ///
    /// Returns how many handlers ran; an unregistered event type runs none and is not
    /// an error. The first failing handler stops the dispatch.
    pub async fn dispatch(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<usize, HandlerError> {
        let Some(registrations) = self.handlers.get(envelope.event_type()) else {
            debug!(event_type = envelope.event_type(), "no handler registered");
            return Ok(0);
        };

        for registration in registrations {
            let context = EventContext::from_envelope(envelope);
            let fut = (registration.call)(context, envelope.payload()).map_err(|source| {
                HandlerError::Decode {
                    handler: registration.handler_name,
                    event_type: envelope.event_type().to_string(),
                    source,
                }
            })?;

            fut.await.map_err(|source| HandlerError::Handler {
                handler: registration.handler_name,
                source,
            })?;
        }

        Ok(registrations.len())
    }
}

/// Builder collecting handler registrations before the registry is frozen.
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<&'static str, Vec<Registration>>,
}

impl HandlerRegistryBuilder {
    /// Register `handler` for events of type `E`.
    pub fn on<E, F, Fut>(mut self, handler_name: &'static str, handler: F) -> Self
    where
        E: Event,
        F: Fn(EventContext, E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let call: ErasedHandler = Box::new(
            move |context: EventContext,
                  payload: &JsonValue|
                  -> Result<HandlerFuture, serde_json::Error> {
                let event: E = serde_json::from_value(payload.clone())?;
                Ok(Box::pin(handler(context, event)))
            },
        );

        self.handlers.entry(E::EVENT_TYPE).or_default().push(Registration {
            handler_name,
            call,
        });
        self
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}
