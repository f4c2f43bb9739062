//! MachineReturnRequest reconciler
//!
//! One entry point handles both a new request and its later passes. A new
//! request is validated and initialised, then advanced in the same call.
//! Requests still in progress are requeued until every machine reaches a
//! final state.

use super::Reconciler;
use crate::error::ControllerError;
use chrono::Utc;
use crds::labels::{RETURN_REQUEST_ID, TRIGGER_UPDATE, WAITING_CLEANUP, WAITING_CLEANUP_VALUE, managed_by_selector};
use crds::{Condition, MachineEvent, MachineReturnRequest, MachineReturnState, ReturnPhase, types};
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube_runtime::controller::Action;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Delay before re-examining a request with machines still terminating
pub const IN_PROGRESS_REQUEUE: Duration = Duration::from_secs(5);

/// Outcome of one pass over a request's machines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnSummary {
    pub phase: ReturnPhase,
    pub total: u32,
    pub returned: u32,
    pub failed: u32,
    pub reason: &'static str,
    pub message: String,
}

impl Reconciler {
    /// Reconciles one return request.
    pub async fn reconcile_return_request(&self, request: &MachineReturnRequest) -> Result<Action, ControllerError> {
        let name = request
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ControllerError::InvalidResource("MachineReturnRequest missing name".to_string()))?;
        let namespace = request
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| ControllerError::InvalidResource(format!("MachineReturnRequest {name} missing namespace")))?;

        if request.metadata.deletion_timestamp.is_some() {
            return Ok(Action::await_change());
        }

        let status = request.status.clone().unwrap_or_default();
        if status.phase.is_terminal() {
            debug!("MachineReturnRequest {}/{} is already {:?}", namespace, name, status.phase);
            return Ok(Action::await_change());
        }

        let events = if status.phase == ReturnPhase::Pending {
            match self.start_return_request(request, namespace, name).await? {
                Some(events) => events,
                None => return Ok(Action::await_change()),
            }
        } else {
            status.machine_events
        };

        let summary = self.advance_return_request(request, namespace, name, events).await?;
        if summary.phase == ReturnPhase::InProgress {
            Ok(Action::requeue(IN_PROGRESS_REQUEUE))
        } else {
            Ok(Action::await_change())
        }
    }

    /// Validates and initialises a new request.
    ///
    /// Returns the initial machine events, or `None` if the request was
    /// rejected.
    async fn start_return_request(
        &self,
        request: &MachineReturnRequest,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, MachineEvent>>, ControllerError> {
        if let Err(reason) = validate_return_request(request) {
            error!("MachineReturnRequest {}/{} is invalid: {}", namespace, name, reason);
            self.reject_return_request(namespace, name, &reason).await?;
            return Ok(None);
        }

        let machine_ids = request.spec.unique_machine_ids();
        let now = Utc::now();
        let events: BTreeMap<String, MachineEvent> = machine_ids
            .iter()
            .map(|id| {
                let event = MachineEvent {
                    status: MachineReturnState::Pending,
                    message: "Return request received".to_string(),
                    return_request_time: Some(now),
                    return_completion_time: None,
                };
                (id.clone(), event)
            })
            .collect();

        let total = machine_ids.len();
        let patch = json!({
            "status": {
                "phase": ReturnPhase::InProgress,
                "totalMachines": total,
                "returnedMachines": 0,
                "failedMachines": 0,
                "conditions": [Condition::new(
                    types::PROCESSING,
                    true,
                    "DeletionStarted",
                    format!("Starting deletion of {total} machines"),
                )],
                "machineEvents": events,
            }
        });
        self.ctx
            .gateway
            .patch_return_request_status(namespace, name, &patch)
            .await?;
        info!(
            "MachineReturnRequest {}/{} accepted for {} machines",
            namespace, name, total
        );
        Ok(Some(events))
    }

    async fn reject_return_request(&self, namespace: &str, name: &str, reason: &str) -> Result<(), ControllerError> {
        let patch = json!({
            "status": {
                "phase": ReturnPhase::Failed,
                "totalMachines": 0,
                "returnedMachines": 0,
                "failedMachines": 0,
                "conditions": [Condition::new(
                    types::FAILED,
                    true,
                    "RequestValidationFailed",
                    format!("The request is invalid: {reason}"),
                )],
                "machineEvents": {},
            }
        });
        self.ctx
            .gateway
            .patch_return_request_status(namespace, name, &patch)
            .await?;
        self.label_return_request_for_cleanup(namespace, name).await
    }

    /// Deletes every machine not yet final and records the new totals.
    async fn advance_return_request(
        &self,
        request: &MachineReturnRequest,
        namespace: &str,
        name: &str,
        mut events: BTreeMap<String, MachineEvent>,
    ) -> Result<ReturnSummary, ControllerError> {
        let params = ListParams::default().labels(&managed_by_selector(&self.ctx.config.operator_name));
        let existing: HashMap<String, Pod> = self
            .ctx
            .gateway
            .list_pods(namespace, &params)
            .await?
            .into_iter()
            .filter_map(|pod| pod.metadata.name.clone().map(|n| (n, pod)))
            .collect();
        let return_request_id = request.spec.request_id.clone().unwrap_or_else(|| name.to_string());

        let machine_ids = request.spec.unique_machine_ids();
        for machine_id in &machine_ids {
            let event = events.entry(machine_id.clone()).or_insert_with(|| MachineEvent {
                status: MachineReturnState::Pending,
                message: "Return request received".to_string(),
                return_request_time: Some(Utc::now()),
                return_completion_time: None,
            });
            if event.status.is_final() {
                continue;
            }

            match existing.get(machine_id) {
                Some(pod) if pod.metadata.deletion_timestamp.is_some() => {
                    event.status = MachineReturnState::InProgress;
                    event.message = "Pod is terminating".to_string();
                }
                Some(_) => {
                    let (status, message) = self.return_pod(namespace, machine_id, &return_request_id).await;
                    event.status = status;
                    event.message = message;
                    if status.is_final() {
                        event.return_completion_time = Some(Utc::now());
                    }
                }
                None => {
                    event.status = MachineReturnState::Completed;
                    event.message = "Pod does not exist, marked as completed".to_string();
                    event.return_completion_time = Some(Utc::now());
                }
            }
        }

        let summary = summarize(&machine_ids, &events);
        debug!(
            "MachineReturnRequest {}/{}: phase={:?} total={} returned={} failed={}",
            namespace, name, summary.phase, summary.total, summary.returned, summary.failed
        );

        let patch = json!({
            "status": {
                "phase": summary.phase,
                "totalMachines": summary.total,
                "returnedMachines": summary.returned,
                "failedMachines": summary.failed,
                "conditions": [Condition::new(summary.reason, true, summary.reason, summary.message.clone())],
                "machineEvents": events,
            }
        });
        self.ctx
            .gateway
            .patch_return_request_status(namespace, name, &patch)
            .await?;

        if summary.phase.is_terminal() {
            info!(
                "MachineReturnRequest {}/{} finished with phase {:?}",
                namespace, name, summary.phase
            );
            self.label_return_request_for_cleanup(namespace, name).await?;
        }
        Ok(summary)
    }

    /// Tags the pod with the return request and deletes it.
    async fn return_pod(&self, namespace: &str, pod_name: &str, return_request_id: &str) -> (MachineReturnState, String) {
        let patch = json!({ "metadata": { "labels": { RETURN_REQUEST_ID: return_request_id } } });
        let result = match self.ctx.gateway.patch_pod(namespace, pod_name, &patch).await {
            Ok(_) => self.ctx.gateway.delete_pod(namespace, pod_name, None).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!("Returning pod {}/{}", namespace, pod_name);
                (MachineReturnState::InProgress, "Processing return request".to_string())
            }
            Err(e) if e.is_not_found() => (MachineReturnState::Completed, "Pod was already returned".to_string()),
            Err(e) => {
                warn!("Error returning pod {}/{}: {}", namespace, pod_name, e);
                (MachineReturnState::Failed, format!("Failed to return pod: {e}"))
            }
        }
    }

    async fn label_return_request_for_cleanup(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        let patch = json!({
            "metadata": { "labels": { WAITING_CLEANUP: WAITING_CLEANUP_VALUE, TRIGGER_UPDATE: null } }
        });
        self.ctx.gateway.patch_return_request(namespace, name, &patch).await?;
        Ok(())
    }
}

/// Checks that a request names a request id and at least one machine.
pub fn validate_return_request(request: &MachineReturnRequest) -> Result<(), String> {
    if request.spec.request_id.as_deref().is_none_or(str::is_empty) {
        return Err("requestId is required".to_string());
    }
    if request.spec.unique_machine_ids().is_empty() {
        return Err("machineIds must name at least one machine".to_string());
    }
    Ok(())
}

/// Totals and phase over `machine_ids`.
///
/// The phase is terminal exactly when every machine is final.
pub fn summarize(machine_ids: &[String], events: &BTreeMap<String, MachineEvent>) -> ReturnSummary {
    let count = |state: MachineReturnState| {
        let n = machine_ids
            .iter()
            .filter(|id| events.get(*id).is_some_and(|e| e.status == state))
            .count();
        u32::try_from(n).unwrap_or(u32::MAX)
    };
    let total = u32::try_from(machine_ids.len()).unwrap_or(u32::MAX);
    let returned = count(MachineReturnState::Completed);
    let failed = count(MachineReturnState::Failed);

    let (phase, reason, message) = if returned + failed < total {
        (
            ReturnPhase::InProgress,
            types::DELETION_IN_PROGRESS,
            format!(
                "Returned {returned} pods, {failed} failed, {} pending",
                total - returned - failed
            ),
        )
    } else if failed == 0 {
        (
            ReturnPhase::Completed,
            types::ALL_PODS_DELETED,
            format!("Successfully returned all {returned} pods"),
        )
    } else if returned == 0 {
        (
            ReturnPhase::Failed,
            types::ALL_PODS_FAILED,
            format!("Failed to return all {failed} pods"),
        )
    } else {
        (
            ReturnPhase::PartiallyCompleted,
            types::SOME_PODS_DELETED,
            format!("Returned {returned} pods, {failed} pods failed"),
        )
    };

    ReturnSummary {
        phase,
        total,
        returned,
        failed,
        reason,
        message,
    }
}
