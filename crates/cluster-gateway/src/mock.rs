//! Mock ClusterGateway for unit testing
//!
//! This module provides an in-memory implementation of `ClusterGateway` that
//! can be used in unit tests without a running cluster. Objects are stored per
//! (namespace, name), patches follow JSON merge-patch semantics, and a
//! `metadata.resourceVersion` in a patch acts as a precondition.

mod selectors;

use crate::error::GatewayError;
use crate::gateway_trait::ClusterGateway;
use crds::{GCPSymphonyResource, MachineReturnRequest};
use k8s_openapi::api::core::v1::Pod;
use kube::Resource;
use kube::api::ListParams;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use selectors::{matches_fields, matches_labels};

type ObjectKey = (String, String);

/// Gateway operations, used to inject failures and inspect recorded calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListPods,
    CreatePod,
    PatchPod,
    DeletePod,
    GetMachineGroup,
    ListMachineGroups,
    PatchMachineGroup,
    PatchMachineGroupStatus,
    DeleteMachineGroup,
    GetReturnRequest,
    ListReturnRequests,
    CreateReturnRequest,
    PatchReturnRequest,
    PatchReturnRequestStatus,
    DeleteReturnRequest,
}

/// One call made against the mock
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub operation: Operation,
    pub namespace: String,
    pub name: Option<String>,
    /// Patch body or created object
    pub body: Option<Value>,
    pub succeeded: bool,
}

#[derive(Default)]
struct MockState {
    pods: BTreeMap<ObjectKey, Pod>,
    machine_groups: BTreeMap<ObjectKey, GCPSymphonyResource>,
    return_requests: BTreeMap<ObjectKey, MachineReturnRequest>,
    failures: HashMap<Operation, VecDeque<GatewayError>>,
    calls: Vec<RecordedCall>,
    next_version: u64,
}

impl MockState {
    fn next_version(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    fn take_failure(&mut self, operation: Operation) -> Option<GatewayError> {
        self.failures.get_mut(&operation).and_then(VecDeque::pop_front)
    }

    fn record(&mut self, operation: Operation, namespace: &str, name: Option<&str>, body: Option<Value>, succeeded: bool) {
        self.calls.push(RecordedCall {
            operation,
            namespace: namespace.to_string(),
            name: name.map(str::to_string),
            body,
            succeeded,
        });
    }
}

enum PatchScope {
    Object,
    Status,
}

/// Mock ClusterGateway for testing
///
/// Clones share the same in-memory state, so a test can keep a handle while
/// the code under test owns another.
#[derive(Clone, Default)]
pub struct MockClusterGateway {
    state: Arc<Mutex<MockState>>,
}

impl std::fmt::Debug for MockClusterGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockClusterGateway").finish_non_exhaustive()
    }
}

impl MockClusterGateway {
    /// Create an empty mock gateway
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a pod to the mock store (for test setup)
    pub fn insert_pod(&self, pod: Pod) {
        let mut state = self.state();
        let version = state.next_version();
        let (key, pod) = stamp(pod, version);
        state.pods.insert(key, pod);
    }

    /// Add a group resource to the mock store (for test setup)
    pub fn insert_machine_group(&self, group: GCPSymphonyResource) {
        let mut state = self.state();
        let version = state.next_version();
        let (key, group) = stamp(group, version);
        state.machine_groups.insert(key, group);
    }

    /// Add a return request to the mock store (for test setup)
    pub fn insert_return_request(&self, request: MachineReturnRequest) {
        let mut state = self.state();
        let version = state.next_version();
        let (key, request) = stamp(request, version);
        state.return_requests.insert(key, request);
    }

    /// Remove a pod without recording a call (simulates an external deletion)
    pub fn remove_pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.state().pods.remove(&key(namespace, name))
    }

    /// Current copy of a pod
    #[must_use]
    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.state().pods.get(&key(namespace, name)).cloned()
    }

    /// All pods in a namespace
    #[must_use]
    pub fn pods(&self, namespace: &str) -> Vec<Pod> {
        self.state()
            .pods
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, pod)| pod.clone())
            .collect()
    }

    /// Current copy of a group resource
    #[must_use]
    pub fn machine_group(&self, namespace: &str, name: &str) -> Option<GCPSymphonyResource> {
        self.state().machine_groups.get(&key(namespace, name)).cloned()
    }

    /// Current copy of a return request
    #[must_use]
    pub fn return_request(&self, namespace: &str, name: &str) -> Option<MachineReturnRequest> {
        self.state().return_requests.get(&key(namespace, name)).cloned()
    }

    /// All return requests in a namespace
    #[must_use]
    pub fn return_requests(&self, namespace: &str) -> Vec<MachineReturnRequest> {
        self.state()
            .return_requests
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, request)| request.clone())
            .collect()
    }

    /// Make the next call of `operation` fail with `error`.
    ///
    /// Queued failures are consumed in order, one per call.
    pub fn fail_next(&self, operation: Operation, error: GatewayError) {
        self.state().failures.entry(operation).or_default().push_back(error);
    }

    /// Every call made so far, in order
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state().calls.clone()
    }

    /// Calls of one operation, in order
    #[must_use]
    pub fn calls_for(&self, operation: Operation) -> Vec<RecordedCall> {
        self.state()
            .calls
            .iter()
            .filter(|call| call.operation == operation)
            .cloned()
            .collect()
    }

    /// Number of successful calls of one operation
    #[must_use]
    pub fn successful_calls(&self, operation: Operation) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| call.operation == operation && call.succeeded)
            .count()
    }

    fn list_objects<K>(
        &self,
        operation: Operation,
        select: impl Fn(&MockState) -> &BTreeMap<ObjectKey, K>,
        namespace: &str,
        params: &ListParams,
    ) -> Result<Vec<K>, GatewayError>
    where
        K: Resource + Clone + Serialize,
    {
        let mut state = self.state();
        if let Some(error) = state.take_failure(operation) {
            state.record(operation, namespace, None, None, false);
            return Err(error);
        }
        let items = select(&*state)
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, object)| object)
            .filter(|object| matches_labels(params.label_selector.as_deref(), object.meta().labels.as_ref()))
            .filter(|object| {
                serde_json::to_value(object)
                    .is_ok_and(|value| matches_fields(params.field_selector.as_deref(), &value))
            })
            .cloned()
            .collect();
        state.record(operation, namespace, None, None, true);
        Ok(items)
    }

    fn get_object<K>(
        &self,
        operation: Operation,
        select: impl Fn(&MockState) -> &BTreeMap<ObjectKey, K>,
        namespace: &str,
        name: &str,
    ) -> Result<K, GatewayError>
    where
        K: Clone,
    {
        let mut state = self.state();
        let result = match state.take_failure(operation) {
            Some(error) => Err(error),
            None => select(&*state)
                .get(&key(namespace, name))
                .cloned()
                .ok_or_else(|| not_found(namespace, name)),
        };
        state.record(operation, namespace, Some(name), None, result.is_ok());
        result
    }

    fn create_object<K>(
        &self,
        operation: Operation,
        select: impl Fn(&mut MockState) -> &mut BTreeMap<ObjectKey, K>,
        namespace: &str,
        object: &K,
    ) -> Result<K, GatewayError>
    where
        K: Resource + Clone + Serialize,
    {
        let mut state = self.state();
        let body = serde_json::to_value(object).ok();
        if let Some(error) = state.take_failure(operation) {
            state.record(operation, namespace, object.meta().name.as_deref(), body, false);
            return Err(error);
        }

        let mut object = object.clone();
        object.meta_mut().namespace = Some(namespace.to_string());
        if object.meta().name.is_none() {
            let prefix = object.meta().generate_name.clone().unwrap_or_default();
            let suffix = state.next_version();
            object.meta_mut().name = Some(format!("{prefix}{suffix:05}"));
        }
        let name = object.meta().name.clone().unwrap_or_default();

        if select(&mut *state).contains_key(&key(namespace, &name)) {
            state.record(operation, namespace, Some(&name), body, false);
            return Err(GatewayError::Conflict(format!("{namespace}/{name} already exists")));
        }

        let version = state.next_version();
        let (object_key, object) = stamp(object, version);
        select(&mut *state).insert(object_key, object.clone());
        state.record(operation, namespace, Some(&name), body, true);
        Ok(object)
    }

    fn patch_object<K>(
        &self,
        operation: Operation,
        select: impl Fn(&mut MockState) -> &mut BTreeMap<ObjectKey, K>,
        namespace: &str,
        name: &str,
        patch: &Value,
        scope: &PatchScope,
    ) -> Result<K, GatewayError>
    where
        K: Resource + Clone + Serialize + DeserializeOwned,
    {
        let mut state = self.state();
        let result = match state.take_failure(operation) {
            Some(error) => Err(error),
            None => {
                let version = state.next_version();
                let objects = select(&mut *state);
                match objects.get(&key(namespace, name)) {
                    None => Err(not_found(namespace, name)),
                    Some(current) => apply_patch(current, patch, scope).map(|patched| {
                        let (object_key, patched) = stamp(patched, version);
                        objects.insert(object_key, patched.clone());
                        patched
                    }),
                }
            }
        };
        state.record(operation, namespace, Some(name), Some(patch.clone()), result.is_ok());
        result
    }

    fn delete_object<K>(
        &self,
        operation: Operation,
        select: impl Fn(&mut MockState) -> &mut BTreeMap<ObjectKey, K>,
        namespace: &str,
        name: &str,
    ) -> Result<(), GatewayError> {
        let mut state = self.state();
        let result = match state.take_failure(operation) {
            Some(error) => Err(error),
            None => select(&mut *state)
                .remove(&key(namespace, name))
                .map(|_| ())
                .ok_or_else(|| not_found(namespace, name)),
        };
        state.record(operation, namespace, Some(name), None, result.is_ok());
        result
    }
}

fn key(namespace: &str, name: &str) -> ObjectKey {
    (namespace.to_string(), name.to_string())
}

fn not_found(namespace: &str, name: &str) -> GatewayError {
    GatewayError::NotFound(format!("{namespace}/{name} not found"))
}

fn stamp<K: Resource>(mut object: K, version: u64) -> (ObjectKey, K) {
    let meta = object.meta_mut();
    meta.resource_version = Some(version.to_string());
    if meta.uid.is_none() {
        meta.uid = Some(format!("uid-{version}"));
    }
    let object_key = key(
        meta.namespace.as_deref().unwrap_or("default"),
        meta.name.as_deref().unwrap_or_default(),
    );
    (object_key, object)
}

fn apply_patch<K>(current: &K, patch: &Value, scope: &PatchScope) -> Result<K, GatewayError>
where
    K: Resource + Serialize + DeserializeOwned,
{
    if let Some(expected) = patch.pointer("/metadata/resourceVersion").and_then(Value::as_str) {
        let actual = current.meta().resource_version.as_deref().unwrap_or_default();
        if expected != actual {
            return Err(GatewayError::Conflict(format!(
                "resourceVersion {expected} does not match current {actual}"
            )));
        }
    }

    let mut effective = patch.clone();
    if let Some(metadata) = effective.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.remove("resourceVersion");
    }
    let effective = match scope {
        PatchScope::Status => {
            let mut only_status = Map::new();
            if let Some(status) = effective.get("status") {
                only_status.insert("status".to_string(), status.clone());
            }
            Value::Object(only_status)
        }
        PatchScope::Object => {
            if let Some(object) = effective.as_object_mut() {
                object.remove("status");
            }
            effective
        }
    };

    let mut document = serde_json::to_value(current)?;
    merge_patch(&mut document, &effective);
    Ok(serde_json::from_value(document)?)
}

/// JSON merge patch (RFC 7386)
fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (field, value) in patch_map {
            if value.is_null() {
                target_map.remove(field);
            } else {
                merge_patch(target_map.entry(field.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

#[async_trait::async_trait]
impl ClusterGateway for MockClusterGateway {
    async fn list_pods(&self, namespace: &str, params: &ListParams) -> Result<Vec<Pod>, GatewayError> {
        self.list_objects(Operation::ListPods, |s| &s.pods, namespace, params)
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, GatewayError> {
        self.create_object(Operation::CreatePod, |s| &mut s.pods, namespace, pod)
    }

    async fn patch_pod(&self, namespace: &str, name: &str, patch: &Value) -> Result<Pod, GatewayError> {
        self.patch_object(Operation::PatchPod, |s| &mut s.pods, namespace, name, patch, &PatchScope::Object)
    }

    async fn delete_pod(&self, namespace: &str, name: &str, _grace_period_seconds: Option<u32>) -> Result<(), GatewayError> {
        self.delete_object(Operation::DeletePod, |s| &mut s.pods, namespace, name)
    }

    async fn get_machine_group(&self, namespace: &str, name: &str) -> Result<GCPSymphonyResource, GatewayError> {
        self.get_object(Operation::GetMachineGroup, |s| &s.machine_groups, namespace, name)
    }

    async fn list_machine_groups(&self, namespace: &str, params: &ListParams) -> Result<Vec<GCPSymphonyResource>, GatewayError> {
        self.list_objects(Operation::ListMachineGroups, |s| &s.machine_groups, namespace, params)
    }

    async fn patch_machine_group(&self, namespace: &str, name: &str, patch: &Value) -> Result<GCPSymphonyResource, GatewayError> {
        self.patch_object(Operation::PatchMachineGroup, |s| &mut s.machine_groups, namespace, name, patch, &PatchScope::Object)
    }

    async fn patch_machine_group_status(&self, namespace: &str, name: &str, patch: &Value) -> Result<GCPSymphonyResource, GatewayError> {
        self.patch_object(Operation::PatchMachineGroupStatus, |s| &mut s.machine_groups, namespace, name, patch, &PatchScope::Status)
    }

    async fn delete_machine_group(&self, namespace: &str, name: &str) -> Result<(), GatewayError> {
        self.delete_object(Operation::DeleteMachineGroup, |s| &mut s.machine_groups, namespace, name)
    }

    async fn get_return_request(&self, namespace: &str, name: &str) -> Result<MachineReturnRequest, GatewayError> {
        self.get_object(Operation::GetReturnRequest, |s| &s.return_requests, namespace, name)
    }

    async fn list_return_requests(&self, namespace: &str, params: &ListParams) -> Result<Vec<MachineReturnRequest>, GatewayError> {
        self.list_objects(Operation::ListReturnRequests, |s| &s.return_requests, namespace, params)
    }

    async fn create_return_request(&self, namespace: &str, request: &MachineReturnRequest) -> Result<MachineReturnRequest, GatewayError> {
        self.create_object(Operation::CreateReturnRequest, |s| &mut s.return_requests, namespace, request)
    }

    async fn patch_return_request(&self, namespace: &str, name: &str, patch: &Value) -> Result<MachineReturnRequest, GatewayError> {
        self.patch_object(Operation::PatchReturnRequest, |s| &mut s.return_requests, namespace, name, patch, &PatchScope::Object)
    }

    async fn patch_return_request_status(&self, namespace: &str, name: &str, patch: &Value) -> Result<MachineReturnRequest, GatewayError> {
        self.patch_object(Operation::PatchReturnRequestStatus, |s| &mut s.return_requests, namespace, name, patch, &PatchScope::Status)
    }

    async fn delete_return_request(&self, namespace: &str, name: &str) -> Result<(), GatewayError> {
        self.delete_object(Operation::DeleteReturnRequest, |s| &mut s.return_requests, namespace, name)
    }
}
