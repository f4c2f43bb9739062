//! Aggregate phase algorithm
//!
//! A group's phase is a pure function of the multiset of its machines'
//! phases; the running count is computed independently of the phase.

use crds::GroupPhase;
use k8s_openapi::api::core::v1::Pod;

/// Phase of one machine (pod)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachinePhase {
    Pending,
    Running,
    NotReady,
    Terminating,
    Failed,
    Succeeded,
    Unknown,
}

impl MachinePhase {
    /// Parses a raw pod lifecycle phase
    pub fn from_pod_phase(phase: &str) -> Self {
        match phase {
            "Pending" => MachinePhase::Pending,
            "Running" => MachinePhase::Running,
            "Failed" => MachinePhase::Failed,
            "Succeeded" => MachinePhase::Succeeded,
            _ => MachinePhase::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MachinePhase::Pending => "Pending",
            MachinePhase::Running => "Running",
            MachinePhase::NotReady => "NotReady",
            MachinePhase::Terminating => "Terminating",
            MachinePhase::Failed => "Failed",
            MachinePhase::Succeeded => "Succeeded",
            MachinePhase::Unknown => "Unknown",
        }
    }
}

/// Derives the machine phase of a pod from its conditions.
///
/// `Ready=True` wins, then `DisruptionTarget=True`; a pod with conditions but
/// neither is not ready. Pods without conditions use their raw phase.
pub fn machine_phase(pod: &Pod) -> MachinePhase {
    let status = pod.status.as_ref();
    let conditions = status
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default();

    if conditions.is_empty() {
        return status
            .and_then(|s| s.phase.as_deref())
            .map_or(MachinePhase::Unknown, MachinePhase::from_pod_phase);
    }

    let is_true = |type_: &str| conditions.iter().any(|c| c.type_ == type_ && c.status == "True");
    if is_true("Ready") {
        MachinePhase::Running
    } else if is_true("DisruptionTarget") {
        MachinePhase::Terminating
    } else {
        MachinePhase::NotReady
    }
}

/// Computes the group phase and running count for a set of machine phases.
///
/// Precedence: empty, all running, any terminating or failed, any pending or
/// not ready, otherwise unknown.
pub fn compute_phase(machines: &[MachinePhase]) -> (GroupPhase, u32) {
    let running = u32::try_from(machines.iter().filter(|p| **p == MachinePhase::Running).count())
        .unwrap_or(u32::MAX);

    let phase = if machines.is_empty() {
        GroupPhase::WaitingCleanup
    } else if machines.iter().all(|p| *p == MachinePhase::Running) {
        GroupPhase::Running
    } else if machines
        .iter()
        .any(|p| matches!(p, MachinePhase::Terminating | MachinePhase::Failed))
    {
        GroupPhase::Degraded
    } else if machines
        .iter()
        .any(|p| matches!(p, MachinePhase::Pending | MachinePhase::NotReady))
    {
        GroupPhase::Pending
    } else {
        GroupPhase::Unknown
    };

    (phase, running)
}
