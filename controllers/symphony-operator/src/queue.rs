//! Status update queue
//!
//! Many producers (every handler) and exactly one consumer (the status
//! worker). Enqueueing never blocks, so handlers stay fast while status
//! writes are paced by the worker.

use crate::error::ControllerError;
use crate::metrics::Metrics;
use crds::{Condition, ReturnedMachine};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Identity of a group resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Latest observed status of one machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineUpdate {
    pub name: String,
    pub status: String,
}

/// One unit of queued status work for a group resource.
#[derive(Debug, Clone)]
pub struct UpdateEvent {
    pub resource: ResourceKey,
    pub condition: Option<Condition>,
    pub machine: Option<MachineUpdate>,
    pub returned_machines: Vec<ReturnedMachine>,
    pub request_id: String,
}

impl UpdateEvent {
    /// Event for `resource` carrying no changes yet
    pub fn new(resource: ResourceKey, request_id: impl Into<String>) -> Self {
        Self {
            resource,
            condition: None,
            machine: None,
            returned_machines: Vec::new(),
            request_id: request_id.into(),
        }
    }

    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    #[must_use]
    pub fn with_machine(mut self, name: impl Into<String>, status: impl Into<String>) -> Self {
        self.machine = Some(MachineUpdate {
            name: name.into(),
            status: status.into(),
        });
        self
    }

    #[must_use]
    pub fn with_returned_machine(mut self, machine: ReturnedMachine) -> Self {
        self.returned_machines.push(machine);
        self
    }

    /// Whether this event carries the terminal `Completed` condition
    pub fn is_completed(&self) -> bool {
        self.condition.as_ref().is_some_and(Condition::is_completed)
    }
}

/// Creates a connected queue producer and consumer.
pub fn channel(metrics: Arc<Metrics>) -> (EventQueue, EventReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        EventQueue {
            sender,
            metrics: metrics.clone(),
        },
        EventReceiver { receiver, metrics },
    )
}

/// Producer side of the status update queue.
#[derive(Debug, Clone)]
pub struct EventQueue {
    sender: mpsc::UnboundedSender<UpdateEvent>,
    metrics: Arc<Metrics>,
}

impl EventQueue {
    /// Enqueues an event; fails only once the consumer is gone.
    pub fn enqueue(&self, event: UpdateEvent) -> Result<(), ControllerError> {
        self.sender.send(event).map_err(|_| ControllerError::QueueClosed)?;
        self.metrics.events_enqueued.inc();
        self.metrics.queue_depth.inc();
        Ok(())
    }
}

/// Consumer side of the status update queue.
#[derive(Debug)]
pub struct EventReceiver {
    receiver: mpsc::UnboundedReceiver<UpdateEvent>,
    metrics: Arc<Metrics>,
}

impl EventReceiver {
    /// Waits up to `timeout` for a first event, then drains without blocking
    /// until `max` events are collected or the queue is empty.
    pub async fn next_batch(&mut self, timeout: Duration, max: usize) -> Vec<UpdateEvent> {
        let first = match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) | Err(_) => return Vec::new(),
        };
        let mut batch = vec![first];
        batch.extend(self.drain(max.saturating_sub(1)));
        self.metrics.queue_depth.sub(i64::try_from(batch.len()).unwrap_or(i64::MAX));
        batch
    }

    /// Takes up to `max` queued events without waiting.
    pub fn try_batch(&mut self, max: usize) -> Vec<UpdateEvent> {
        let batch = self.drain(max);
        self.metrics.queue_depth.sub(i64::try_from(batch.len()).unwrap_or(i64::MAX));
        batch
    }

    fn drain(&mut self, max: usize) -> Vec<UpdateEvent> {
        let mut batch = Vec::new();
        while batch.len() < max {
            match self.receiver.try_recv() {
                Ok(event) => batch.push(event),
                Err(_) => break,
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str) -> UpdateEvent {
        UpdateEvent::new(ResourceKey::new("ns", name), "req-12345678")
    }

    #[tokio::test]
    async fn test_batch_respects_size_and_order() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let (queue, mut receiver) = channel(metrics.clone());
        for name in ["a", "b", "c"] {
            queue.enqueue(event(name)).unwrap();
        }
        assert_eq!(metrics.queue_depth.get(), 3);

        let batch = receiver.next_batch(Duration::from_millis(10), 2).await;
        let names: Vec<_> = batch.iter().map(|e| e.resource.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);

        let rest = receiver.try_batch(10);
        assert_eq!(rest.len(), 1);
        assert_eq!(metrics.queue_depth.get(), 0);
    }

    #[tokio::test]
    async fn test_empty_queue_times_out() {
        let (_queue, mut receiver) = channel(Arc::new(Metrics::new().unwrap()));
        let batch = receiver.next_batch(Duration::from_millis(5), 10).await;
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_after_consumer_dropped_fails() {
        let (queue, receiver) = channel(Arc::new(Metrics::new().unwrap()));
        drop(receiver);
        assert!(matches!(queue.enqueue(event("a")), Err(ControllerError::QueueClosed)));
    }
}
