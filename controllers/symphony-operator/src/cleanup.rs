//! Cleanup worker
//!
//! Periodically deletes resources labelled for cleanup whose terminal
//! condition is older than the retention window.

use crate::context::OperatorContext;
use chrono::{DateTime, TimeDelta, Utc};
use crds::labels::waiting_cleanup_selector;
use crds::{GCPSymphonyResource, MachineReturnRequest, find_condition, types};
use kube::api::ListParams;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Counts of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub groups_deleted: usize,
    pub requests_deleted: usize,
    pub failures: usize,
}

pub struct CleanupWorker {
    ctx: Arc<OperatorContext>,
}

impl CleanupWorker {
    pub fn new(ctx: Arc<OperatorContext>) -> Self {
        Self { ctx }
    }

    /// Sweeps on every interval tick until shutdown.
    pub async fn run(self) {
        let token = self.ctx.shutdown_token();
        let period = self.ctx.config.completed_check_interval;
        info!(
            "Cleanup worker started (interval {:?}, retention {:?})",
            period, self.ctx.config.completed_retain_time
        );

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.sweep_at(Utc::now()).await;
                    info!(
                        "Cleanup cycle completed: {} groups and {} return requests deleted, {} failures",
                        report.groups_deleted, report.requests_deleted, report.failures
                    );
                }
            }
        }
        info!("Cleanup worker stopped");
    }

    /// Deletes every eligible resource that expired before `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> CleanupReport {
        let retain = self.ctx.config.completed_retain_time;
        let params = ListParams::default().labels(&waiting_cleanup_selector());
        let mut report = CleanupReport::default();

        for namespace in &self.ctx.config.namespaces {
            match self.ctx.gateway.list_machine_groups(namespace, &params).await {
                Ok(groups) => {
                    for group in groups {
                        let Some(completed_at) = group_completed_at(&group) else {
                            continue;
                        };
                        if !is_expired(completed_at, now, retain) {
                            continue;
                        }
                        let name = group.metadata.name.unwrap_or_default();
                        match self.ctx.gateway.delete_machine_group(namespace, &name).await {
                            Ok(()) => {
                                info!("Deleted expired GCPSymphonyResource {}/{}", namespace, name);
                                self.ctx.metrics.cleanup_deletions.with_label_values(&["machine_group"]).inc();
                                report.groups_deleted += 1;
                            }
                            Err(e) if e.is_not_found() => {
                                info!("GCPSymphonyResource {}/{} already deleted", namespace, name);
                                report.groups_deleted += 1;
                            }
                            Err(e) => {
                                error!("Failed to delete GCPSymphonyResource {}/{}: {}", namespace, name, e);
                                report.failures += 1;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("Error listing GCPSymphonyResources for cleanup in {}: {}", namespace, e);
                    report.failures += 1;
                }
            }

            match self.ctx.gateway.list_return_requests(namespace, &params).await {
                Ok(requests) => {
                    for request in requests {
                        let Some(completed_at) = request_completed_at(&request) else {
                            continue;
                        };
                        if !is_expired(completed_at, now, retain) {
                            continue;
                        }
                        let name = request.metadata.name.unwrap_or_default();
                        match self.ctx.gateway.delete_return_request(namespace, &name).await {
                            Ok(()) => {
                                info!("Deleted expired MachineReturnRequest {}/{}", namespace, name);
                                self.ctx.metrics.cleanup_deletions.with_label_values(&["return_request"]).inc();
                                report.requests_deleted += 1;
                            }
                            Err(e) if e.is_not_found() => {
                                info!("MachineReturnRequest {}/{} already deleted", namespace, name);
                                report.requests_deleted += 1;
                            }
                            Err(e) => {
                                error!("Failed to delete MachineReturnRequest {}/{}: {}", namespace, name, e);
                                report.failures += 1;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("Error listing MachineReturnRequests for cleanup in {}: {}", namespace, e);
                    report.failures += 1;
                }
            }
        }

        debug!("Cleanup sweep at {}: {:?}", now, report);
        report
    }
}

/// Transition time of the group's `Completed=True` condition
pub fn group_completed_at(group: &GCPSymphonyResource) -> Option<DateTime<Utc>> {
    let status = group.status.as_ref()?;
    find_condition(&status.conditions, types::COMPLETED)
        .filter(|c| c.is_true())
        .and_then(|c| c.last_transition_time)
}

/// Latest `True` condition time of a request in a terminal phase
pub fn request_completed_at(request: &MachineReturnRequest) -> Option<DateTime<Utc>> {
    let status = request.status.as_ref()?;
    if !status.phase.is_terminal() {
        return None;
    }
    status
        .conditions
        .iter()
        .filter(|c| c.is_true())
        .filter_map(|c| c.last_transition_time)
        .max()
}

/// Whether more than `retain` has passed between `completed_at` and `now`
pub fn is_expired(completed_at: DateTime<Utc>, now: DateTime<Utc>, retain: Duration) -> bool {
    let retain = TimeDelta::from_std(retain).unwrap_or(TimeDelta::MAX);
    now.signed_duration_since(completed_at) > retain
}
