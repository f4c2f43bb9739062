//! Pod delete handler

use super::{Reconciler, owner_group_or_app};
use crate::error::ControllerError;
use crate::queue::{ResourceKey, UpdateEvent};
use chrono::Utc;
use crds::labels::{REQUEST_ID, RETURN_REQUEST_ID};
use crds::{Condition, ReturnedMachine, types};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, error, info, warn};

/// Machine status recorded for a deleted pod
pub const RETURNED: &str = "Returned";

impl Reconciler {
    /// Records the return of a deleted managed pod on its owning group.
    ///
    /// The pod is attributed to the return request named in its
    /// `returnRequestId` label, or to the system when it has none.
    pub async fn handle_pod_deleted(&self, pod: &Pod) -> Result<(), ControllerError> {
        let pod_name = pod.name_any();
        let namespace = pod.namespace().unwrap_or_default();

        if !self.is_managed(pod) {
            return Ok(());
        }
        let Some(owner) = owner_group_or_app(pod) else {
            error!("Pod {}/{} has no owner reference", namespace, pod_name);
            return Ok(());
        };
        let request_id = pod
            .labels()
            .get(REQUEST_ID)
            .cloned()
            .ok_or_else(|| ControllerError::InvalidResource(format!("Pod {namespace}/{pod_name} has no request ID label")))?;

        let group = match self.ctx.gateway.get_machine_group(&namespace, &owner).await {
            Ok(group) => group,
            Err(e) if e.is_not_found() => {
                info!(
                    "GCPSymphonyResource {}/{} not found, pod {} was returned with its owner",
                    namespace, owner, pod_name
                );
                return Ok(());
            }
            Err(e) => {
                warn!("Error fetching GCPSymphonyResource {}/{}: {}", namespace, owner, e);
                return Err(e.into());
            }
        };
        if group.metadata.deletion_timestamp.is_some() {
            debug!("GCPSymphonyResource {}/{} is marked for deletion, skipping update", namespace, owner);
            return Ok(());
        }

        let return_request_id = pod
            .labels()
            .get(RETURN_REQUEST_ID)
            .filter(|id| !id.is_empty())
            .cloned()
            .unwrap_or_else(|| self.ctx.config.system_initiated_return_msg.clone());

        let event = UpdateEvent::new(ResourceKey::new(&namespace, &owner), request_id)
            .with_condition(Condition::new(
                types::POD_RETURNED,
                true,
                RETURNED,
                format!("Pod {pod_name} has been returned"),
            ))
            .with_machine(&pod_name, RETURNED)
            .with_returned_machine(ReturnedMachine {
                name: pod_name.clone(),
                return_request_id,
                return_time: Utc::now(),
            });
        self.ctx.enqueue(event)?;

        info!(
            "Enqueued status update for deletion of pod {} in GCPSymphonyResource {}/{}",
            pod_name, namespace, owner
        );
        Ok(())
    }
}
