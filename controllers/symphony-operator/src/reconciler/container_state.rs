//! Container state handler

use super::{Reconciler, owner_group_name};
use crate::error::ControllerError;
use crate::events::ContainerStatusChange;
use crate::phase::machine_phase;
use crate::queue::{ResourceKey, UpdateEvent};
use crds::labels::REQUEST_ID;
use crds::{Condition, types};
use k8s_openapi::api::core::v1::ContainerStatus;
use kube::ResourceExt;
use tracing::{debug, error, info};

impl Reconciler {
    /// Builds a `ContainerHealth` condition for a managed pod whose container
    /// states changed and enqueues it for the owning group.
    pub async fn handle_container_status_change(&self, change: &ContainerStatusChange) -> Result<(), ControllerError> {
        let pod = &change.pod;
        let pod_name = pod.name_any();
        let namespace = pod.namespace().unwrap_or_default();

        if !self.is_managed(pod) {
            return Ok(());
        }
        let Some(request_id) = pod.labels().get(REQUEST_ID).cloned() else {
            error!("Pod {}/{} has no requestId label", namespace, pod_name);
            return Ok(());
        };
        if !containers_changed(&change.previous, change.current()) {
            debug!("No container state changes detected for pod {}/{}", namespace, pod_name);
            return Ok(());
        }
        let Some(owner) = owner_group_name(pod) else {
            error!("Pod {}/{} is not owned by a GCPSymphonyResource", namespace, pod_name);
            return Ok(());
        };

        let group = match self.ctx.gateway.get_machine_group(&namespace, &owner).await {
            Ok(group) => group,
            Err(e) if e.is_not_found() => {
                info!(
                    "GCPSymphonyResource {}/{} not found, skipping container status update of pod {}",
                    namespace, owner, pod_name
                );
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if group.metadata.deletion_timestamp.is_some() {
            debug!("GCPSymphonyResource {}/{} is being deleted, skipping", namespace, owner);
            return Ok(());
        }

        let event = UpdateEvent::new(ResourceKey::new(&namespace, &owner), request_id)
            .with_condition(container_health(&pod_name, change.current()))
            .with_machine(&pod_name, machine_phase(pod).as_str());
        self.ctx.enqueue(event)?;

        info!(
            "Enqueued container status update for pod {} in GCPSymphonyResource {}/{}",
            pod_name, namespace, owner
        );
        Ok(())
    }
}

/// Whether any container changed state kind or readiness.
pub fn containers_changed(previous: &[ContainerStatus], current: &[ContainerStatus]) -> bool {
    current.iter().any(|status| {
        match previous.iter().find(|old| old.name == status.name) {
            Some(old) => old.ready != status.ready || state_kind(old) != state_kind(status),
            None => true,
        }
    })
}

fn state_kind(status: &ContainerStatus) -> &'static str {
    match status.state.as_ref() {
        Some(state) if state.running.is_some() => "running",
        Some(state) if state.terminated.is_some() => "terminated",
        Some(state) if state.waiting.is_some() => "waiting",
        _ => "unknown",
    }
}

/// `ContainerHealth` condition for the containers of `pod_name`
pub fn container_health(pod_name: &str, statuses: &[ContainerStatus]) -> Condition {
    let all_ready = !statuses.is_empty() && statuses.iter().all(|status| status.ready);
    if all_ready {
        Condition::new(
            types::CONTAINER_HEALTH,
            true,
            "ContainersReady",
            format!("All containers in pod {pod_name} are ready"),
        )
    } else {
        Condition::new(
            types::CONTAINER_HEALTH,
            false,
            "ContainersNotReady",
            format!("Not all containers in pod {pod_name} are ready"),
        )
    }
}
