//! Spot node preemption handler
//!
//! When a spot node receives an eviction-imminent taint, the managed pods
//! running on it are handed to a new MachineReturnRequest so they are
//! returned through the normal return flow.

use super::Reconciler;
use crate::error::ControllerError;
use crate::events::NodeTaintChange;
use crds::labels::{REQUEST_ID, managed_by_selector};
use crds::{MachineReturnRequest, MachineReturnRequestSpec};
use k8s_openapi::api::core::v1::Taint;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::ListParams;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Node labels marking spot capacity
pub const SPOT_NODE_LABELS: &[(&str, &str)] = &[
    ("cloud.google.com/gke-spot", "true"),
    ("cloud.google.com/gke-provisioning", "spot"),
];

/// Taints announcing that a node is about to go away
pub const EVICTION_TAINTS: &[&str] = &[
    "DeletionCandidateOfClusterAutoscaler",
    "node.cloudprovider.kubernetes.io/shutdown",
];

impl Reconciler {
    /// Creates a return request for the running managed pods of a spot node
    /// that just became eviction-imminent.
    ///
    /// Returns the names of the requests created, one per namespace with
    /// affected pods.
    pub async fn handle_node_taint_change(&self, change: &NodeTaintChange) -> Result<Vec<String>, ControllerError> {
        let node = &change.node_name;
        if !is_spot_node(&change.labels) {
            debug!("Node {} is not a spot node, skipping preemption handling", node);
            return Ok(Vec::new());
        }
        if !eviction_started(change.previous.as_deref(), &change.current) {
            return Ok(Vec::new());
        }
        info!("Spot node {} is being preempted, returning its machines", node);

        let params = ListParams::default()
            .labels(&managed_by_selector(&self.ctx.config.operator_name))
            .fields(&format!("spec.nodeName={node}"));

        let mut created = Vec::new();
        for namespace in &self.ctx.config.namespaces {
            let machines: Vec<String> = self
                .ctx
                .gateway
                .list_pods(namespace, &params)
                .await?
                .into_iter()
                .filter(|pod| pod.metadata.deletion_timestamp.is_none())
                .filter(|pod| pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running"))
                .filter_map(|pod| pod.metadata.name)
                .collect();
            if machines.is_empty() {
                continue;
            }

            let request = self.preemption_request(namespace, machines);
            let request = self.ctx.gateway.create_return_request(namespace, &request).await?;
            let name = request.metadata.name.unwrap_or_default();
            self.ctx.metrics.preemption_requests.inc();
            info!(
                "Created MachineReturnRequest {}/{} for {} machines on preempted node {}",
                namespace,
                name,
                request.spec.machine_ids.len(),
                node
            );
            created.push(name);
        }
        Ok(created)
    }

    fn preemption_request(&self, namespace: &str, machines: Vec<String>) -> MachineReturnRequest {
        let id = uuid::Uuid::new_v4().to_string();
        let request_id = format!("{}{}", self.ctx.config.preempted_request_id_prefix, id);
        MachineReturnRequest {
            metadata: ObjectMeta {
                generate_name: Some(format!("{request_id}-")),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([(REQUEST_ID.to_string(), id)])),
                ..Default::default()
            },
            spec: MachineReturnRequestSpec {
                request_id: Some(request_id),
                machine_ids: machines,
            },
            status: None,
        }
    }
}

/// Whether the node labels mark spot capacity
pub fn is_spot_node(labels: &BTreeMap<String, String>) -> bool {
    SPOT_NODE_LABELS
        .iter()
        .any(|(key, value)| labels.get(*key).is_some_and(|v| v == value))
}

fn has_eviction_taint(taints: &[Taint]) -> bool {
    taints.iter().any(|taint| EVICTION_TAINTS.contains(&taint.key.as_str()))
}

/// Edge detection: no eviction taint before, at least one now.
///
/// A node seen for the first time has no previous taints.
pub fn eviction_started(previous: Option<&[Taint]>, current: &[Taint]) -> bool {
    !has_eviction_taint(previous.unwrap_or_default()) && has_eviction_taint(current)
}
