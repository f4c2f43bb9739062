//! Kubernetes-backed cluster gateway
//!
//! Every call goes through [`retry_transient`] so transient API failures are
//! retried uniformly; the request timeout is a property of the `kube::Client`
//! passed in.

use crate::error::GatewayError;
use crate::gateway_trait::ClusterGateway;
use crate::retry::{RetryPolicy, retry_transient};
use crds::{GCPSymphonyResource, MachineReturnRequest};
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;
use tracing::debug;

/// Cluster gateway backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    retry: RetryPolicy,
}

impl std::fmt::Debug for KubeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeGateway").field("retry", &self.retry).finish_non_exhaustive()
    }
}

impl KubeGateway {
    /// Creates a gateway using `client` and retrying transient failures per `retry`.
    #[must_use]
    pub fn new(client: Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get<K>(&self, namespace: &str, name: &str) -> Result<K, GatewayError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api = &self.api::<K>(namespace);
        retry_transient(&self.retry, "get", || async move {
            api.get(name).await.map_err(GatewayError::from)
        })
        .await
    }

    async fn list<K>(&self, namespace: &str, params: &ListParams) -> Result<Vec<K>, GatewayError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api = &self.api::<K>(namespace);
        retry_transient(&self.retry, "list", || async move {
            api.list(params).await.map(|list| list.items).map_err(GatewayError::from)
        })
        .await
    }

    async fn create<K>(&self, namespace: &str, object: &K) -> Result<K, GatewayError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + Serialize + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api = &self.api::<K>(namespace);
        let params = &PostParams::default();
        retry_transient(&self.retry, "create", || async move {
            api.create(params, object).await.map_err(GatewayError::from)
        })
        .await
    }

    async fn patch<K>(&self, namespace: &str, name: &str, patch: &Value) -> Result<K, GatewayError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        debug!("Patching {} {}/{}", K::kind(&K::DynamicType::default()), namespace, name);
        let api = &self.api::<K>(namespace);
        let params = &PatchParams::default();
        retry_transient(&self.retry, "patch", || async move {
            api.patch(name, params, &Patch::Merge(patch)).await.map_err(GatewayError::from)
        })
        .await
    }

    async fn patch_status<K>(&self, namespace: &str, name: &str, patch: &Value) -> Result<K, GatewayError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        debug!("Patching status of {} {}/{}", K::kind(&K::DynamicType::default()), namespace, name);
        let api = &self.api::<K>(namespace);
        let params = &PatchParams::default();
        retry_transient(&self.retry, "patch_status", || async move {
            api.patch_status(name, params, &Patch::Merge(patch)).await.map_err(GatewayError::from)
        })
        .await
    }

    async fn delete<K>(&self, namespace: &str, name: &str, grace_period_seconds: Option<u32>) -> Result<(), GatewayError>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api = &self.api::<K>(namespace);
        let params = &DeleteParams {
            grace_period_seconds,
            ..DeleteParams::default()
        };
        retry_transient(&self.retry, "delete", || async move {
            api.delete(name, params).await.map(|_| ()).map_err(GatewayError::from)
        })
        .await
    }
}

#[async_trait::async_trait]
impl ClusterGateway for KubeGateway {
    async fn list_pods(&self, namespace: &str, params: &ListParams) -> Result<Vec<Pod>, GatewayError> {
        self.list(namespace, params).await
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, GatewayError> {
        self.create(namespace, pod).await
    }

    async fn patch_pod(&self, namespace: &str, name: &str, patch: &Value) -> Result<Pod, GatewayError> {
        self.patch(namespace, name, patch).await
    }

    async fn delete_pod(&self, namespace: &str, name: &str, grace_period_seconds: Option<u32>) -> Result<(), GatewayError> {
        self.delete::<Pod>(namespace, name, grace_period_seconds).await
    }

    async fn get_machine_group(&self, namespace: &str, name: &str) -> Result<GCPSymphonyResource, GatewayError> {
        self.get(namespace, name).await
    }

    async fn list_machine_groups(&self, namespace: &str, params: &ListParams) -> Result<Vec<GCPSymphonyResource>, GatewayError> {
        self.list(namespace, params).await
    }

    async fn patch_machine_group(&self, namespace: &str, name: &str, patch: &Value) -> Result<GCPSymphonyResource, GatewayError> {
        self.patch(namespace, name, patch).await
    }

    async fn patch_machine_group_status(&self, namespace: &str, name: &str, patch: &Value) -> Result<GCPSymphonyResource, GatewayError> {
        self.patch_status(namespace, name, patch).await
    }

    async fn delete_machine_group(&self, namespace: &str, name: &str) -> Result<(), GatewayError> {
        self.delete::<GCPSymphonyResource>(namespace, name, None).await
    }

    async fn get_return_request(&self, namespace: &str, name: &str) -> Result<MachineReturnRequest, GatewayError> {
        self.get(namespace, name).await
    }

    async fn list_return_requests(&self, namespace: &str, params: &ListParams) -> Result<Vec<MachineReturnRequest>, GatewayError> {
        self.list(namespace, params).await
    }

    async fn create_return_request(&self, namespace: &str, request: &MachineReturnRequest) -> Result<MachineReturnRequest, GatewayError> {
        self.create(namespace, request).await
    }

    async fn patch_return_request(&self, namespace: &str, name: &str, patch: &Value) -> Result<MachineReturnRequest, GatewayError> {
        self.patch(namespace, name, patch).await
    }

    async fn patch_return_request_status(&self, namespace: &str, name: &str, patch: &Value) -> Result<MachineReturnRequest, GatewayError> {
        self.patch_status(namespace, name, patch).await
    }

    async fn delete_return_request(&self, namespace: &str, name: &str) -> Result<(), GatewayError> {
        self.delete::<MachineReturnRequest>(namespace, name, None).await
    }
}
