//! Reconciliation handlers.
//!
//! One handler per cluster event kind:
//! - `machine_group`: group creation (machine provisioning) and completion
//! - `container_state`: container status changes of managed pods
//! - `pod_delete`: deletion of managed pods
//! - `return_request`: creation and progress of return requests
//! - `preemption`: eviction taints on spot nodes
//!
//! Handlers either mutate the cluster directly (idempotently) or enqueue an
//! `UpdateEvent` for the status worker.

pub mod container_state;
pub mod machine_group;
pub mod pod_delete;
pub mod preemption;
pub mod return_request;

#[cfg(test)]
mod container_state_test;
#[cfg(test)]
mod pod_delete_test;
#[cfg(test)]
mod return_request_test;

use crate::backoff::FibonacciBackoff;
use crate::context::OperatorContext;
use crds::GCPSymphonyResource;
use crds::labels::APP;
use k8s_openapi::api::core::v1::Pod;
use kube::Resource;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(5, 300), // 5 seconds min, 5 minutes max
            error_count: 0,
        }
    }

    fn increment_error(&mut self) {
        self.error_count += 1;
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Runs every reconciliation handler against the shared operator context.
pub struct Reconciler {
    pub(crate) ctx: Arc<OperatorContext>,
    /// Error count tracking per resource (kind/namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").field("ctx", &self.ctx).finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(ctx: Arc<OperatorContext>) -> Self {
        Self {
            ctx,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get the Fibonacci backoff duration for a resource based on its error count
    ///
    /// Returns (backoff_seconds, error_count)
    pub fn get_backoff_for_resource(&self, resource_key: &str) -> (u64, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(BackoffState::new);
                let backoff_seconds = state.backoff.next_backoff_seconds();
                (backoff_seconds, state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (30, 0)
            }
        }
    }

    /// Increment error count for a resource
    pub fn increment_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states
                .entry(resource_key.to_string())
                .or_insert_with(BackoffState::new)
                .increment_error();
        }
    }

    /// Reset error count for a resource (on successful reconciliation)
    pub fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock()
            && let Some(state) = states.get_mut(resource_key)
        {
            state.reset();
        }
    }

    /// Whether `pod` carries this operator's `managed-by` label
    pub(crate) fn is_managed(&self, pod: &Pod) -> bool {
        pod.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(crds::labels::MANAGED_BY))
            .is_some_and(|value| *value == self.ctx.config.operator_name)
    }
}

/// Name of the group resource owning `pod`, from its owner reference.
pub(crate) fn owner_group_name(pod: &Pod) -> Option<String> {
    let kind = GCPSymphonyResource::kind(&());
    pod.metadata
        .owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|owner| owner.kind == kind)
        .map(|owner| owner.name.clone())
}

/// Owner group name, falling back to the `app` label.
pub(crate) fn owner_group_or_app(pod: &Pod) -> Option<String> {
    owner_group_name(pod).or_else(|| {
        pod.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(APP))
            .cloned()
    })
}

/// Key used for per-resource backoff tracking
pub(crate) fn backoff_key(kind: &str, namespace: &str, name: &str) -> String {
    format!("{kind}/{namespace}/{name}")
}
