//! Prometheus metrics
//!
//! One registry per operator instance, owned by the operator context and
//! rendered as text on `/metrics`.

use crate::error::ControllerError;
use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Operator metrics.
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    /// Update events handed to the status worker
    pub events_enqueued: IntCounter,
    /// Update events waiting in the queue
    pub queue_depth: IntGauge,
    /// Status patches by outcome (`success`, `conflict`, `not_found`, `error`)
    pub status_patches: IntCounterVec,
    /// Machines (pods) created by outcome (`created`, `failed`)
    pub machines_created: IntCounterVec,
    /// Machines recorded as returned
    pub machines_returned: IntCounter,
    /// Resources deleted by the cleanup worker, by kind
    pub cleanup_deletions: IntCounterVec,
    /// Return requests created for preempted nodes
    pub preemption_requests: IntCounter,
}

impl Metrics {
    /// Builds and registers all collectors.
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new_custom(Some("symphony_operator".to_string()), None)?;

        let events_enqueued = register(
            &registry,
            IntCounter::new("update_events_enqueued_total", "Status update events enqueued")?,
        )?;
        let queue_depth = register(
            &registry,
            IntGauge::new("update_queue_depth", "Status update events waiting to be processed")?,
        )?;
        let status_patches = register(
            &registry,
            IntCounterVec::new(
                Opts::new("status_patches_total", "Status patches grouped by result"),
                &["result"],
            )?,
        )?;
        let machines_created = register(
            &registry,
            IntCounterVec::new(
                Opts::new("machines_created_total", "Machine pod creations grouped by result"),
                &["result"],
            )?,
        )?;
        let machines_returned = register(
            &registry,
            IntCounter::new("machines_returned_total", "Machines recorded as returned")?,
        )?;
        let cleanup_deletions = register(
            &registry,
            IntCounterVec::new(
                Opts::new("cleanup_deletions_total", "Expired resources deleted grouped by kind"),
                &["kind"],
            )?,
        )?;
        let preemption_requests = register(
            &registry,
            IntCounter::new(
                "preemption_return_requests_total",
                "Return requests created for preempted spot nodes",
            )?,
        )?;

        Ok(Self {
            registry,
            events_enqueued,
            queue_depth,
            status_patches,
            machines_created,
            machines_returned,
            cleanup_deletions,
            preemption_requests,
        })
    }

    /// Renders every registered metric in the Prometheus text format.
    pub fn render(&self) -> Result<String, ControllerError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn register<C>(registry: &Registry, collector: C) -> Result<C, ControllerError>
where
    C: Clone + Collector + Send + Sync + 'static,
{
    registry.register(Box::new(collector.clone()))?;
    Ok(collector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_prefixed_metrics() {
        let metrics = Metrics::new().unwrap();
        metrics.status_patches.with_label_values(&["success"]).inc();
        metrics.events_enqueued.inc();

        let text = metrics.render().unwrap();
        assert!(text.contains("symphony_operator_status_patches_total{result=\"success\"} 1"));
        assert!(text.contains("symphony_operator_update_events_enqueued_total 1"));
    }
}
