//! ClusterGateway trait for mocking
//!
//! This trait abstracts the cluster API so handlers and workers can be unit
//! tested against an in-memory implementation. `KubeGateway` implements it
//! on top of a `kube::Client`.

use crate::error::GatewayError;
use crds::{GCPSymphonyResource, MachineReturnRequest};
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use serde_json::Value;

/// Typed cluster API operations used by the operator.
///
/// Patches are JSON merge patches. A patch carrying
/// `metadata.resourceVersion` is applied only if the object is still at that
/// version, otherwise the call fails with [`GatewayError::Conflict`].
#[async_trait::async_trait]
pub trait ClusterGateway: Send + Sync {
    // Pods
    async fn list_pods(&self, namespace: &str, params: &ListParams) -> Result<Vec<Pod>, GatewayError>;
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, GatewayError>;
    async fn patch_pod(&self, namespace: &str, name: &str, patch: &Value) -> Result<Pod, GatewayError>;
    async fn delete_pod(&self, namespace: &str, name: &str, grace_period_seconds: Option<u32>) -> Result<(), GatewayError>;

    // GCPSymphonyResource
    async fn get_machine_group(&self, namespace: &str, name: &str) -> Result<GCPSymphonyResource, GatewayError>;
    async fn list_machine_groups(&self, namespace: &str, params: &ListParams) -> Result<Vec<GCPSymphonyResource>, GatewayError>;
    async fn patch_machine_group(&self, namespace: &str, name: &str, patch: &Value) -> Result<GCPSymphonyResource, GatewayError>;
    async fn patch_machine_group_status(&self, namespace: &str, name: &str, patch: &Value) -> Result<GCPSymphonyResource, GatewayError>;
    async fn delete_machine_group(&self, namespace: &str, name: &str) -> Result<(), GatewayError>;

    // MachineReturnRequest
    async fn get_return_request(&self, namespace: &str, name: &str) -> Result<MachineReturnRequest, GatewayError>;
    async fn list_return_requests(&self, namespace: &str, params: &ListParams) -> Result<Vec<MachineReturnRequest>, GatewayError>;
    async fn create_return_request(&self, namespace: &str, request: &MachineReturnRequest) -> Result<MachineReturnRequest, GatewayError>;
    async fn patch_return_request(&self, namespace: &str, name: &str, patch: &Value) -> Result<MachineReturnRequest, GatewayError>;
    async fn patch_return_request_status(&self, namespace: &str, name: &str, patch: &Value) -> Result<MachineReturnRequest, GatewayError>;
    async fn delete_return_request(&self, namespace: &str, name: &str) -> Result<(), GatewayError>;
}
