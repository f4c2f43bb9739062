//! Status update worker
//!
//! Single consumer of the status queue. Each cycle collects a batch, groups
//! it by group resource, consolidates the updates of every group and writes
//! exactly one status patch per group. Status is recomputed from the pods
//! observed in the cluster on every write, so a dropped group heals on the
//! next event touching it.

use crate::context::OperatorContext;
use crate::phase::{compute_phase, machine_phase};
use crate::queue::{EventReceiver, ResourceKey, UpdateEvent};
use cluster_gateway::GatewayError;
use crds::labels::{REQUEST_ID, WAITING_CLEANUP, WAITING_CLEANUP_VALUE};
use crds::{Condition, GroupPhase, ReturnedMachine, upsert_condition};
use futures::future::join_all;
use kube::ResourceExt;
use kube::api::ListParams;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of processing one group of updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Status written with the given phase
    Patched(GroupPhase),
    /// Resource no longer exists
    NotFound,
    /// Every attempt hit a conflict
    ConflictsExhausted,
    /// Non-retryable failure
    Failed,
}

/// Drains the status queue and writes consolidated status patches.
pub struct StatusWorker {
    ctx: Arc<OperatorContext>,
    receiver: EventReceiver,
}

impl StatusWorker {
    pub fn new(ctx: Arc<OperatorContext>, receiver: EventReceiver) -> Self {
        Self { ctx, receiver }
    }

    /// Runs until shutdown, then processes whatever is still queued.
    pub async fn run(mut self) {
        let token = self.ctx.shutdown_token();
        let timeout = self.ctx.config.queue_poll_timeout;
        let batch_size = self.ctx.config.status_batch_size;
        info!("Status update worker started (batch size {})", batch_size);

        loop {
            let batch = tokio::select! {
                biased;
                () = token.cancelled() => break,
                batch = self.receiver.next_batch(timeout, batch_size) => batch,
            };
            if !batch.is_empty() {
                self.process_batch(batch).await;
            }
        }

        loop {
            let batch = self.receiver.try_batch(batch_size);
            if batch.is_empty() {
                break;
            }
            info!("Draining {} queued status updates before shutdown", batch.len());
            self.process_batch(batch).await;
        }
        info!("Status update worker stopped");
    }

    /// Processes one batch: one status patch per group resource.
    pub async fn process_batch(&self, batch: Vec<UpdateEvent>) -> Vec<(ResourceKey, PatchOutcome)> {
        debug!("Processing batch of {} status updates", batch.len());
        let groups = group_by_resource(batch);
        let outcomes = join_all(groups.iter().map(|(key, updates)| self.process_group(key, updates))).await;
        groups.into_iter().map(|(key, _)| key).zip(outcomes).collect()
    }

    async fn process_group(&self, key: &ResourceKey, updates: &[UpdateEvent]) -> PatchOutcome {
        let consolidated = consolidate(updates);
        let max_attempts = self.ctx.config.retry_count.max(1);
        let mut delay = self.ctx.config.retry_interval;

        for attempt in 1..=max_attempts {
            match self.patch_group(key, &consolidated, updates).await {
                Ok(phase) => {
                    self.ctx.metrics.status_patches.with_label_values(&["success"]).inc();
                    debug!("Patched status of {} (phase {})", key, phase);
                    if phase == GroupPhase::WaitingCleanup {
                        self.mark_waiting_cleanup(key).await;
                    }
                    return PatchOutcome::Patched(phase);
                }
                Err(e) if e.is_not_found() => {
                    self.ctx.metrics.status_patches.with_label_values(&["not_found"]).inc();
                    info!("GCPSymphonyResource {} no longer exists, dropping {} updates", key, updates.len());
                    return PatchOutcome::NotFound;
                }
                Err(e) if e.is_conflict() => {
                    self.ctx.metrics.status_patches.with_label_values(&["conflict"]).inc();
                    if attempt < max_attempts {
                        warn!(
                            "Conflict patching status of {} (attempt {}/{}), retrying in {:?}",
                            key, attempt, max_attempts, delay
                        );
                        tokio::time::sleep(delay).await;
                        delay = delay.saturating_mul(2);
                    }
                }
                Err(e) => {
                    self.ctx.metrics.status_patches.with_label_values(&["error"]).inc();
                    error!("Failed to patch status of {}: {}", key, e);
                    return PatchOutcome::Failed;
                }
            }
        }

        error!(
            "Giving up on status of {} after {} conflicting attempts; the next event will correct it",
            key, max_attempts
        );
        PatchOutcome::ConflictsExhausted
    }

    /// Fresh read, phase recomputation and a version-guarded status patch.
    async fn patch_group(
        &self,
        key: &ResourceKey,
        consolidated: &[&UpdateEvent],
        all_updates: &[UpdateEvent],
    ) -> Result<GroupPhase, GatewayError> {
        let gateway = &self.ctx.gateway;
        let resource = gateway.get_machine_group(&key.namespace, &key.name).await?;
        let status = resource.status.clone().unwrap_or_default();

        let request_id = resource
            .labels()
            .get(REQUEST_ID)
            .cloned()
            .or_else(|| all_updates.iter().rev().map(|u| u.request_id.clone()).find(|id| !id.is_empty()))
            .unwrap_or_default();
        let (phase, available) = self.observe_phase(&key.namespace, &request_id).await?;

        let conditions = merge_conditions(status.conditions, consolidated);
        let (returned_machines, newly_returned) = fold_returned_machines(status.returned_machines, all_updates);

        let patch = json!({
            "metadata": { "resourceVersion": resource.resource_version() },
            "status": {
                "phase": phase,
                "availableMachines": available,
                "conditions": conditions,
                "returnedMachines": returned_machines,
            }
        });
        gateway
            .patch_machine_group_status(&key.namespace, &key.name, &patch)
            .await?;

        self.ctx.metrics.machines_returned.inc_by(newly_returned as u64);
        Ok(phase)
    }

    /// Aggregate phase and running count of the pods carrying `request_id`.
    async fn observe_phase(&self, namespace: &str, request_id: &str) -> Result<(GroupPhase, u32), GatewayError> {
        if request_id.len() < self.ctx.config.min_request_id_length {
            warn!("Request id '{}' is too short, reporting phase Unknown", request_id);
            return Ok((GroupPhase::Unknown, 0));
        }
        let params = ListParams::default().labels(&format!("{REQUEST_ID}={request_id}"));
        let pods = self.ctx.gateway.list_pods(namespace, &params).await?;
        let phases: Vec<_> = pods
            .iter()
            .filter(|pod| pod.metadata.deletion_timestamp.is_none())
            .map(machine_phase)
            .collect();
        Ok(compute_phase(&phases))
    }

    async fn mark_waiting_cleanup(&self, key: &ResourceKey) {
        let patch = json!({ "metadata": { "labels": { WAITING_CLEANUP: WAITING_CLEANUP_VALUE } } });
        match self.ctx.gateway.patch_machine_group(&key.namespace, &key.name, &patch).await {
            Ok(_) => info!("Marked GCPSymphonyResource {} for cleanup", key),
            Err(e) if e.is_not_found() || e.is_conflict() => {
                debug!("Skipping cleanup label on {}: {}", key, e);
            }
            Err(e) => warn!("Failed to label GCPSymphonyResource {} for cleanup: {}", key, e),
        }
    }
}

/// Partitions a batch by group resource, keeping first-seen order.
pub fn group_by_resource(batch: Vec<UpdateEvent>) -> Vec<(ResourceKey, Vec<UpdateEvent>)> {
    let mut index: HashMap<ResourceKey, usize> = HashMap::new();
    let mut groups: Vec<(ResourceKey, Vec<UpdateEvent>)> = Vec::new();
    for event in batch {
        match index.get(&event.resource) {
            Some(&i) => groups[i].1.push(event),
            None => {
                index.insert(event.resource.clone(), groups.len());
                groups.push((event.resource.clone(), vec![event]));
            }
        }
    }
    groups
}

/// Keeps every `Completed` update and, for everything else, only the latest
/// update per machine. Arrival order is preserved.
pub fn consolidate(updates: &[UpdateEvent]) -> Vec<&UpdateEvent> {
    let machine_of = |u: &UpdateEvent| u.machine.as_ref().map(|m| m.name.clone());
    let mut latest: HashMap<Option<String>, usize> = HashMap::new();
    for (i, update) in updates.iter().enumerate() {
        if !update.is_completed() {
            latest.insert(machine_of(update), i);
        }
    }
    updates
        .iter()
        .enumerate()
        .filter(|(i, update)| update.is_completed() || latest.get(&machine_of(update)) == Some(i))
        .map(|(_, update)| update)
        .collect()
}

/// Applies update conditions onto `existing`, one entry per type; the last
/// update by arrival order wins regardless of its timestamp.
pub fn merge_conditions(existing: Vec<Condition>, updates: &[&UpdateEvent]) -> Vec<Condition> {
    updates
        .iter()
        .filter_map(|u| u.condition.clone())
        .fold(existing, upsert_condition)
}

/// Appends newly returned machines to the log, skipping names already there.
///
/// Returns the new log and how many entries were added.
pub fn fold_returned_machines(
    existing: Vec<ReturnedMachine>,
    updates: &[UpdateEvent],
) -> (Vec<ReturnedMachine>, usize) {
    let mut seen: HashSet<String> = existing.iter().map(|m| m.name.clone()).collect();
    let mut log = existing;
    let before = log.len();
    for machine in updates.iter().flat_map(|u| u.returned_machines.iter()) {
        if seen.insert(machine.name.clone()) {
            log.push(machine.clone());
        }
    }
    let added = log.len() - before;
    (log, added)
}

#[cfg(test)]
#[path = "status_worker_test.rs"]
mod status_worker_test;
