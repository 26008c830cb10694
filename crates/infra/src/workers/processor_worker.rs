use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use pubver_events::EventEnvelope;

use crate::processor::{ProcessOutcome, VersionedEventProcessor};
use crate::published_version::PublishedVersionStore;

/// Handle to control and join a background worker.
///
/// Dropping the handle without calling `join` also stops the worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.join.await;
    }

    /// Wait for the worker to stop on its own (delivery channel closed).
    pub async fn join(self) {
        let WorkerHandle { shutdown, join } = self;
        let _ = join.await;
        drop(shutdown);
    }
}

/// Processor worker loop.
///
/// - Receives envelopes from a delivery channel
/// - Runs each through a `VersionedEventProcessor`
/// - Logs failures and keeps going (the pipeline owns redelivery)
/// - Stops on shutdown or when every sender is dropped
#[derive(Debug)]
pub struct ProcessorWorker;

impl ProcessorWorker {
    /// Spawn a worker task on the current tokio runtime.
    pub fn spawn<S>(
        name: &'static str,
        processor: Arc<VersionedEventProcessor<S>>,
        deliveries: mpsc::Receiver<EventEnvelope<JsonValue>>,
    ) -> WorkerHandle
    where
        S: PublishedVersionStore + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let join = tokio::spawn(worker_loop(name, processor, deliveries, shutdown_rx));

        WorkerHandle {
            shutdown: Some(shutdown_tx),
            join,
        }
    }
}

async fn worker_loop<S>(
    name: &'static str,
    processor: Arc<VersionedEventProcessor<S>>,
    mut deliveries: mpsc::Receiver<EventEnvelope<JsonValue>>,
    mut shutdown_rx: oneshot::Receiver<()>,
) where
    S: PublishedVersionStore,
{
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            delivery = deliveries.recv() => {
                let Some(envelope) = delivery else { break };

                match processor.process(&envelope).await {
                    Ok(ProcessOutcome::OutOfOrder { published, received }) => {
                        debug!(
                            worker = name,
                            published,
                            received,
                            "envelope arrived ahead of its predecessors"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(
                            worker = name,
                            aggregate_root_id = %envelope.aggregate_root_id(),
                            version = envelope.version(),
                            error = %err,
                            "processor worker failed to process envelope"
                        );
                    }
                }
            }
        }
    }

    debug!(worker = name, "processor worker stopped");
}
