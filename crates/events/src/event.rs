use serde::Serialize;
use serde::de::DeserializeOwned;

/// A domain event that can be routed to handlers by its type name.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **self-describing** (`EVENT_TYPE` is the routing key carried by envelopes)
/// - **serializable** (payloads travel as JSON)
pub trait Event: Serialize + DeserializeOwned + Send + 'static {
    /// Stable event name/type identifier (e.g. "order.created").
    const EVENT_TYPE: &'static str;
}
