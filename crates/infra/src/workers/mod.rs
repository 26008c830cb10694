//! Background workers driving processors from a delivery channel.

pub mod processor_worker;

pub use processor_worker::{ProcessorWorker, WorkerHandle};
