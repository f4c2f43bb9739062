//! Test utilities for unit testing handlers and workers
//!
//! This module provides builders for test objects and a context wired to the
//! in-memory `MockClusterGateway`.

use crate::config::OperatorConfig;
use crate::context::OperatorContext;
use crate::metrics::Metrics;
use crate::queue::EventReceiver;
use cluster_gateway::MockClusterGateway;
use crds::labels::{APP, MANAGED_BY, REQUEST_ID};
use crds::{GCPSymphonyResource, GCPSymphonyResourceSpec, MachineReturnRequest, MachineReturnRequestSpec};
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateRunning, ContainerStateWaiting, ContainerStatus, Node, NodeSpec, Pod,
    PodCondition, PodSpec, PodStatus, Taint,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const NAMESPACE: &str = "gcp-symphony";
pub const OPERATOR: &str = "gcp-symphony-operator";

/// Configuration with fast retries and short queue polls
pub fn test_config() -> OperatorConfig {
    OperatorConfig {
        namespaces: vec![NAMESPACE.to_string()],
        operator_name: OPERATOR.to_string(),
        retry_interval: Duration::from_millis(1),
        queue_poll_timeout: Duration::from_millis(20),
        ..OperatorConfig::default()
    }
}

/// Context backed by `gateway`
pub fn test_context(gateway: &MockClusterGateway) -> (Arc<OperatorContext>, EventReceiver) {
    test_context_with(gateway, test_config())
}

pub fn test_context_with(gateway: &MockClusterGateway, config: OperatorConfig) -> (Arc<OperatorContext>, EventReceiver) {
    let metrics = Arc::new(Metrics::new().unwrap());
    OperatorContext::new(config, Arc::new(gateway.clone()), metrics)
}

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
}

/// Group resource with a single-container pod template
pub fn machine_group(name: &str, request_id: Option<&str>, machine_count: i32) -> GCPSymphonyResource {
    GCPSymphonyResource {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            uid: Some(format!("uid-{name}")),
            labels: request_id.map(|id| labels(&[(REQUEST_ID, id)])),
            ..Default::default()
        },
        spec: GCPSymphonyResourceSpec {
            pod_spec: Some(serde_json::json!({
                "containers": [{"name": "worker", "image": "busybox"}]
            })),
            machine_count: Some(machine_count),
            name_prefix: Some(name.to_string()),
            ..Default::default()
        },
        status: None,
    }
}

/// Pod owned by group `group`, carrying the operator's labels
pub fn managed_pod(name: &str, group: &str, request_id: &str, phase: &str, ready: bool) -> Pod {
    let mut pod = pod_with_conditions(name, Some(phase), &[("Ready", if ready { "True" } else { "False" })]);
    pod.metadata.labels = Some(labels(&[(MANAGED_BY, OPERATOR), (APP, group), (REQUEST_ID, request_id)]));
    pod.metadata.owner_references = Some(vec![OwnerReference {
        api_version: "accenture.com/v1".to_string(),
        kind: "GCPSymphonyResource".to_string(),
        name: group.to_string(),
        uid: format!("uid-{group}"),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }]);
    pod
}

/// Schedules `pod` on `node`
pub fn on_node(mut pod: Pod, node: &str) -> Pod {
    pod.spec.get_or_insert_with(PodSpec::default).node_name = Some(node.to_string());
    pod
}

/// Bare pod with the given phase and conditions
pub fn pod_with_conditions(name: &str, phase: Option<&str>, conditions: &[(&str, &str)]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec::default()),
        status: Some(PodStatus {
            phase: phase.map(str::to_string),
            conditions: (!conditions.is_empty()).then(|| {
                conditions
                    .iter()
                    .map(|(type_, status)| PodCondition {
                        type_: (*type_).to_string(),
                        status: (*status).to_string(),
                        ..Default::default()
                    })
                    .collect()
            }),
            ..Default::default()
        }),
    }
}

/// Pod whose containers are running (ready) or waiting (not ready)
pub fn pod_with_container_states(name: &str, containers: &[(&str, bool)]) -> Pod {
    let mut pod = pod_with_conditions(name, Some("Running"), &[]);
    let statuses = containers
        .iter()
        .map(|(container, ready)| ContainerStatus {
            name: (*container).to_string(),
            ready: *ready,
            state: Some(if *ready {
                ContainerState {
                    running: Some(ContainerStateRunning::default()),
                    ..Default::default()
                }
            } else {
                ContainerState {
                    waiting: Some(ContainerStateWaiting {
                        reason: Some("ContainerCreating".to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }
            }),
            ..Default::default()
        })
        .collect::<Vec<_>>();
    if let Some(status) = pod.status.as_mut() {
        status.container_statuses = (!statuses.is_empty()).then_some(statuses);
    }
    pod
}

/// Node with optional spot label and the given taint keys
pub fn node_with_taints(name: &str, spot: bool, taint_keys: &[&str]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: spot.then(|| labels(&[("cloud.google.com/gke-spot", "true")])),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            taints: (!taint_keys.is_empty()).then(|| {
                taint_keys
                    .iter()
                    .map(|key| Taint {
                        key: (*key).to_string(),
                        effect: "NoSchedule".to_string(),
                        ..Default::default()
                    })
                    .collect()
            }),
            ..Default::default()
        }),
        status: None,
    }
}

/// Return request for the given machines
pub fn return_request(name: &str, request_id: Option<&str>, machine_ids: &[&str]) -> MachineReturnRequest {
    MachineReturnRequest {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: MachineReturnRequestSpec {
            request_id: request_id.map(str::to_string),
            machine_ids: machine_ids.iter().map(|id| (*id).to_string()).collect(),
        },
        status: None,
    }
}
