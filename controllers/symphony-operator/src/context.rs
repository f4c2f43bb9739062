//! Operator context
//!
//! Process-wide state handed to every task: configuration, the cluster
//! gateway, metrics, the status queue producer, the shutdown signal and
//! readiness. Built once at startup.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::queue::{self, EventQueue, EventReceiver, UpdateEvent};
use cluster_gateway::ClusterGateway;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

/// Shared state of one operator process.
pub struct OperatorContext {
    pub config: Arc<OperatorConfig>,
    pub gateway: Arc<dyn ClusterGateway>,
    pub metrics: Arc<Metrics>,
    queue: EventQueue,
    shutdown: CancellationToken,
    ready: AtomicBool,
}

impl std::fmt::Debug for OperatorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorContext")
            .field("config", &self.config)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl OperatorContext {
    /// Creates the context and the receiving end of its status queue.
    ///
    /// The receiver belongs to the status worker, the queue's only consumer.
    pub fn new(
        config: OperatorConfig,
        gateway: Arc<dyn ClusterGateway>,
        metrics: Arc<Metrics>,
    ) -> (Arc<Self>, EventReceiver) {
        let (queue, receiver) = queue::channel(metrics.clone());
        let context = Arc::new(Self {
            config: Arc::new(config),
            gateway,
            metrics,
            queue,
            shutdown: CancellationToken::new(),
            ready: AtomicBool::new(false),
        });
        (context, receiver)
    }

    /// Hands an event to the status worker.
    pub fn enqueue(&self, event: UpdateEvent) -> Result<(), ControllerError> {
        self.queue.enqueue(event)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Signals every task to stop and drops readiness.
    pub fn begin_shutdown(&self) {
        self.set_ready(false);
        self.shutdown.cancel();
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}
