//! Entry point for connection attempts.

use std::future::Future;
use std::sync::Arc;

use futures_util::StreamExt;
use log::debug;
use tokio::sync::oneshot;

use super::lifecycle::Attempt;
use super::{ConnectionComponentFactory, ConnectionLifecycle, ConnectionSetup};
use crate::emitter::QueueReleasingEmitter;
use crate::permission::CapabilityCheck;
use crate::queue::{OperationQueue, QueueOperation};

const LOG_TARGET: &str = "blequeue::connection";

/// Prepares connection lifecycles against one operation queue.
pub struct Connector<F> {
    queue: OperationQueue,
    factory: Arc<F>,
    capability: Arc<dyn CapabilityCheck>,
}

impl<F: ConnectionComponentFactory> Connector<F> {
    pub fn new(
        queue: OperationQueue,
        factory: F,
        capability: impl CapabilityCheck + 'static,
    ) -> Self {
        Self {
            queue,
            factory: Arc::new(factory),
            capability: Arc::new(capability),
        }
    }

    /// Queue the connect operations of this connector go through.
    pub fn queue(&self) -> &OperationQueue {
        &self.queue
    }

    /// Prepare a lazy connection lifecycle for `setup`.
    ///
    /// Nothing runs until the returned stream is first polled. Each poll-start
    /// checks the scan capability, builds a fresh component graph, and queues
    /// the connect operation. The connect timeout starts once that operation
    /// takes the queue slot.
    pub fn prepare_connection(&self, setup: ConnectionSetup) -> ConnectionLifecycle<F::Connection> {
        let queue = self.queue.clone();
        let factory = Arc::clone(&self.factory);
        let capability = Arc::clone(&self.capability);

        ConnectionLifecycle::deferred(move || {
            if !capability.has_scan_capability() {
                debug!(target: LOG_TARGET, "Scan capability missing, not connecting");
                return Err(capability.denied_error());
            }

            let graph = factory.build(&setup);
            debug!(target: LOG_TARGET, "Starting connection attempt with {:?}", setup);
            let (started, started_rx) = oneshot::channel();
            let connect = queue
                .submit(SignalStart {
                    operation: graph.connect_operation,
                    started,
                })
                .map(|result| result.map(|_| ()))
                .boxed();

            Ok(Attempt::new(
                graph.connection,
                connect,
                started_rx,
                graph.disconnects,
                graph.disconnect_action,
                setup.effective_connect_timeout(),
            ))
        })
    }
}

/// Connect operation that reports when it takes the queue slot.
struct SignalStart<O> {
    operation: O,
    started: oneshot::Sender<()>,
}

impl<O: QueueOperation> QueueOperation for SignalStart<O> {
    type Output = O::Output;

    fn name(&self) -> &'static str {
        self.operation.name()
    }

    fn run(
        self,
        emitter: QueueReleasingEmitter<O::Output>,
    ) -> impl Future<Output = ()> + Send + 'static {
        // The attempt may already be gone.
        let _ = self.started.send(());
        self.operation.run(emitter)
    }
}
