//! Domain events and their statically wired handlers.

pub mod envelope;
pub mod event;
pub mod handler;

pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::{BoxFuture, EventContext, HandlerError, HandlerRegistry, HandlerRegistryBuilder};
