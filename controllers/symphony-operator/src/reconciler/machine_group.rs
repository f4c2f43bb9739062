//! GCPSymphonyResource reconciler
//!
//! Provisions the machines of a new group and marks drained groups
//! completed so the cleanup worker can collect them.

use super::Reconciler;
use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::queue::{ResourceKey, UpdateEvent};
use crds::labels::{APP, MANAGED_BY, REQUEST_ID, WAITING_CLEANUP, WAITING_CLEANUP_VALUE};
use crds::{Condition, GCPSymphonyResource, GCPSymphonyResourceSpec, GroupPhase, find_condition, types, upsert_condition};
use futures::future::join_all;
use k8s_openapi::api::core::v1::{Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::ListParams;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const REASON_INVALID_SPEC: &str = "InvalidSpec";

/// Delay before a provisioned group is checked for its `PodsCreated` condition
pub const PROVISION_CHECK_REQUEUE: Duration = Duration::from_secs(10);

impl Reconciler {
    /// Reconciles one group resource.
    ///
    /// A group without a `PodsCreated` condition has not been provisioned
    /// yet; provisioning skips pods the group already owns, so a pass that
    /// races the status write is harmless. A group waiting for cleanup without a `Completed` condition is
    /// checked for remaining pods.
    pub async fn reconcile_machine_group(&self, group: &GCPSymphonyResource) -> Result<Action, ControllerError> {
        let name = group
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ControllerError::InvalidResource("GCPSymphonyResource missing name".to_string()))?;
        let namespace = group
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| ControllerError::InvalidResource(format!("GCPSymphonyResource {name} missing namespace")))?;

        if group.metadata.deletion_timestamp.is_some() {
            debug!("GCPSymphonyResource {}/{} is being deleted, skipping", namespace, name);
            return Ok(Action::await_change());
        }

        let status = group.status.clone().unwrap_or_default();
        if find_condition(&status.conditions, types::PODS_CREATED).is_none() {
            self.provision_machines(group, namespace, name).await?;
            return Ok(Action::requeue(PROVISION_CHECK_REQUEUE));
        } else if status.phase == GroupPhase::WaitingCleanup && !status.is_completed() {
            self.complete_if_drained(group, namespace, name).await?;
        }
        Ok(Action::await_change())
    }

    async fn provision_machines(
        &self,
        group: &GCPSymphonyResource,
        namespace: &str,
        name: &str,
    ) -> Result<(), ControllerError> {
        let config = &self.ctx.config;
        let template = match validate_group_spec(&group.spec, config) {
            Ok(template) => template,
            Err(reason) => {
                warn!("GCPSymphonyResource {}/{} has an invalid spec: {}", namespace, name, reason);
                return self.reject_machine_group(group, namespace, name, &reason).await;
            }
        };

        let request_id = self.ensure_request_id(group, namespace, name).await;
        let count = group.spec.desired_machine_count();
        let pods = (0..count)
            .map(|index| build_machine_pod(group, &request_id, &template, index, config))
            .collect::<Result<Vec<_>, _>>()?;

        let existing = self.owned_machine_names(group, namespace, &request_id).await?;
        let (present, missing): (Vec<Pod>, Vec<Pod>) =
            pods.into_iter().partition(|pod| existing.contains(&pod.name_any()));
        if !present.is_empty() {
            info!(
                "GCPSymphonyResource {}/{} already has {} of {} machines",
                namespace, name, present.len(), count
            );
        }
        info!(
            "Creating {} machines for GCPSymphonyResource {}/{} (request {})",
            missing.len(), namespace, name, request_id
        );

        let (created, failed) = self.create_pods(group, namespace, &request_id, missing).await?;
        self.ctx.metrics.machines_created.with_label_values(&["created"]).inc_by(created as u64);
        self.ctx.metrics.machines_created.with_label_values(&["failed"]).inc_by(failed as u64);
        self.record_pods_created(namespace, name, &request_id, present.len() + created, failed)
    }

    /// Returns the group's request id, generating and labelling one if absent.
    async fn ensure_request_id(&self, group: &GCPSymphonyResource, namespace: &str, name: &str) -> String {
        if let Some(id) = group.labels().get(REQUEST_ID).filter(|id| !id.is_empty()) {
            return id.clone();
        }

        let request_id = format!("{}{}", self.ctx.config.request_id_internal_prefix, uuid::Uuid::new_v4());
        info!(
            "GCPSymphonyResource {}/{} has no request id, generated {}",
            namespace, name, request_id
        );
        let patch = json!({ "metadata": { "labels": { REQUEST_ID: request_id } } });
        if let Err(e) = self.ctx.gateway.patch_machine_group(namespace, name, &patch).await {
            error!(
                "Failed to label GCPSymphonyResource {}/{} with request id: {}",
                namespace, name, e
            );
        }
        request_id
    }

    /// Names of live pods carrying `request_id` and owned by `group`.
    async fn owned_machine_names(
        &self,
        group: &GCPSymphonyResource,
        namespace: &str,
        request_id: &str,
    ) -> Result<HashSet<String>, ControllerError> {
        let uid = group.uid().unwrap_or_default();
        let params = ListParams::default().labels(&format!("{REQUEST_ID}={request_id}"));
        let pods = self.ctx.gateway.list_pods(namespace, &params).await?;
        Ok(pods
            .iter()
            .filter(|pod| pod.metadata.deletion_timestamp.is_none())
            .filter(|pod| pod.owner_references().iter().any(|owner| owner.uid == uid))
            .map(ResourceExt::name_any)
            .collect())
    }

    /// Creates pods in bounded batches; a failed pod is counted, not fatal.
    ///
    /// A name collision with a pod this group already owns counts as created.
    /// Returns (created, failed).
    async fn create_pods(
        &self,
        group: &GCPSymphonyResource,
        namespace: &str,
        request_id: &str,
        pods: Vec<Pod>,
    ) -> Result<(usize, usize), ControllerError> {
        let batch_size = self.ctx.config.pod_create_batch_size.max(1);
        let mut created = 0;
        let mut failed = 0;
        let mut collisions = Vec::new();

        for batch in pods.chunks(batch_size) {
            let results = join_all(batch.iter().map(|pod| self.ctx.gateway.create_pod(namespace, pod))).await;
            for (pod, result) in batch.iter().zip(results) {
                match result {
                    Ok(_) => {
                        debug!("Pod {}/{} created", namespace, pod.name_any());
                        created += 1;
                    }
                    Err(e) if e.is_conflict() => {
                        debug!("Pod {}/{} already exists", namespace, pod.name_any());
                        collisions.push(pod.name_any());
                    }
                    Err(e) => {
                        error!("Error creating pod {}/{}: {}", namespace, pod.name_any(), e);
                        failed += 1;
                    }
                }
            }
        }

        if !collisions.is_empty() {
            let owned = self.owned_machine_names(group, namespace, request_id).await?;
            for pod_name in collisions {
                if owned.contains(&pod_name) {
                    created += 1;
                } else {
                    error!(
                        "Pod {}/{} exists but does not belong to this group",
                        namespace, pod_name
                    );
                    failed += 1;
                }
            }
        }
        Ok((created, failed))
    }

    /// Hands the `PodsCreated` condition to the status worker, which derives
    /// phase and available machines from the pods.
    fn record_pods_created(
        &self,
        namespace: &str,
        name: &str,
        request_id: &str,
        created: usize,
        failed: usize,
    ) -> Result<(), ControllerError> {
        let condition = Condition::new(
            types::PODS_CREATED,
            true,
            "PodsCreated",
            format!("Pods created: {created}, failed: {failed}"),
        );
        self.ctx
            .enqueue(UpdateEvent::new(ResourceKey::new(namespace, name), request_id).with_condition(condition))?;
        info!(
            "GCPSymphonyResource {}/{}: pods created: {}, failed: {}",
            namespace, name, created, failed
        );
        Ok(())
    }

    /// Terminal status for a group whose spec cannot be provisioned.
    async fn reject_machine_group(
        &self,
        group: &GCPSymphonyResource,
        namespace: &str,
        name: &str,
        reason: &str,
    ) -> Result<(), ControllerError> {
        let conditions = group.status.clone().map(|s| s.conditions).unwrap_or_default();
        let conditions = upsert_condition(
            conditions,
            Condition::new(types::PODS_CREATED, false, REASON_INVALID_SPEC, reason),
        );
        let conditions = upsert_condition(
            conditions,
            Condition::new(
                types::COMPLETED,
                true,
                REASON_INVALID_SPEC,
                format!("GCPSymphonyResource {name} rejected: {reason}"),
            ),
        );

        let patch = json!({
            "status": {
                "phase": GroupPhase::WaitingCleanup,
                "availableMachines": 0,
                "conditions": conditions,
            }
        });
        self.ctx.gateway.patch_machine_group_status(namespace, name, &patch).await?;
        self.label_group_for_cleanup(namespace, name).await
    }

    async fn label_group_for_cleanup(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        let patch = json!({ "metadata": { "labels": { WAITING_CLEANUP: WAITING_CLEANUP_VALUE } } });
        self.ctx.gateway.patch_machine_group(namespace, name, &patch).await?;
        info!("Marked GCPSymphonyResource {}/{} for cleanup", namespace, name);
        Ok(())
    }

    /// Enqueues the `Completed` condition once no active pod remains.
    async fn complete_if_drained(
        &self,
        group: &GCPSymphonyResource,
        namespace: &str,
        name: &str,
    ) -> Result<(), ControllerError> {
        let request_id = group.labels().get(REQUEST_ID).cloned().unwrap_or_default();
        let active = if request_id.is_empty() {
            0
        } else {
            let params = ListParams::default().labels(&format!("{REQUEST_ID}={request_id}"));
            self.ctx
                .gateway
                .list_pods(namespace, &params)
                .await?
                .iter()
                .filter(|pod| pod.metadata.deletion_timestamp.is_none())
                .count()
        };

        if active > 0 {
            info!(
                "GCPSymphonyResource {}/{} is waiting for cleanup but still has {} active pods",
                namespace, name, active
            );
            return Ok(());
        }

        let event = UpdateEvent::new(ResourceKey::new(namespace, name), request_id).with_condition(Condition::new(
            types::COMPLETED,
            true,
            "NoPods",
            format!("GCPSymphonyResource {name} has no pods."),
        ));
        self.ctx.enqueue(event)?;
        info!("GCPSymphonyResource {}/{} has no pods, marking completed", namespace, name);
        Ok(())
    }
}

/// Checks that a group can be provisioned and decodes its pod template.
pub fn validate_group_spec(spec: &GCPSymphonyResourceSpec, config: &OperatorConfig) -> Result<PodSpec, String> {
    let raw = spec.pod_spec.clone().ok_or_else(|| "podSpec is required".to_string())?;
    let template: PodSpec = serde_json::from_value(raw).map_err(|e| format!("podSpec is invalid: {e}"))?;
    if template.containers.is_empty() {
        return Err("podSpec must define at least one container".to_string());
    }

    let count = spec.desired_machine_count();
    if count < config.min_machine_count {
        return Err(format!(
            "machineCount {count} is below the minimum of {}",
            config.min_machine_count
        ));
    }
    if config.max_machine_count > 0 && count > config.max_machine_count {
        return Err(format!(
            "machineCount {count} exceeds the maximum of {}",
            config.max_machine_count
        ));
    }
    Ok(template)
}

/// Builds the pod for machine `index` of `group`.
pub fn build_machine_pod(
    group: &GCPSymphonyResource,
    request_id: &str,
    template: &PodSpec,
    index: i32,
    config: &OperatorConfig,
) -> Result<Pod, ControllerError> {
    let group_name = group.name_any();
    let owner = group
        .controller_owner_ref(&())
        .ok_or_else(|| ControllerError::InvalidResource(format!("GCPSymphonyResource {group_name} has no uid")))?;

    let name = match group.spec.name_prefix.as_deref().filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{prefix}-{index}"),
        None => format!("{group_name}-pod-{index}"),
    };

    let mut labels = group.spec.labels.clone();
    labels.insert(APP.to_string(), group_name.clone());
    labels.insert(MANAGED_BY.to_string(), config.operator_name.clone());
    labels.insert(REQUEST_ID.to_string(), request_id.to_string());

    let mut spec = template.clone();
    if spec.termination_grace_period_seconds.is_none() {
        spec.termination_grace_period_seconds =
            Some(group.spec.default_grace_period.unwrap_or(config.default_pod_grace_period));
    }

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: group.namespace(),
            labels: Some(labels),
            annotations: (!group.spec.annotations.is_empty()).then(|| group.spec.annotations.clone()),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(spec),
        status: None,
    })
}
