//! MachineReturnRequest CRD
//!
//! One batch return (termination) request naming the machines to give back.

use crate::condition::Condition;
use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "accenture.com",
    version = "v1",
    kind = "MachineReturnRequest",
    plural = "machine-return-requests",
    singular = "machine-return-request",
    shortname = "rrm",
    namespaced,
    status = "MachineReturnRequestStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineReturnRequestSpec {
    /// Request id of the return request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Names of the machines (pods) to return
    #[serde(default)]
    pub machine_ids: Vec<String>,
}

impl MachineReturnRequestSpec {
    /// Target machine ids without duplicates, in request order
    #[must_use]
    pub fn unique_machine_ids(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.machine_ids
            .iter()
            .filter(|id| !id.trim().is_empty() && seen.insert(id.as_str()))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineReturnRequestStatus {
    /// Overall phase of the request
    #[serde(default)]
    pub phase: ReturnPhase,

    /// Number of distinct machines targeted
    #[serde(default)]
    pub total_machines: u32,

    /// Machines confirmed returned
    #[serde(default)]
    pub returned_machines: u32,

    /// Machines that could not be returned
    #[serde(default)]
    pub failed_machines: u32,

    /// Per-machine progress keyed by machine id
    #[serde(default)]
    pub machine_events: BTreeMap<String, MachineEvent>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Phase of a return request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ReturnPhase {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    PartiallyCompleted,
}

impl ReturnPhase {
    /// Terminal phases are never processed again
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ReturnPhase::Completed | ReturnPhase::Failed | ReturnPhase::PartiallyCompleted
        )
    }
}

/// Progress of a single machine within a return request
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MachineEvent {
    pub status: MachineReturnState,

    #[serde(default)]
    pub message: String,

    /// When the return was requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_request_time: Option<DateTime<Utc>>,

    /// When the machine reached a final state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_completion_time: Option<DateTime<Utc>>,
}

/// Per-machine return state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "PascalCase")]
pub enum MachineReturnState {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl MachineReturnState {
    /// Whether the machine has reached a final state
    #[must_use]
    pub fn is_final(self) -> bool {
        matches!(self, MachineReturnState::Completed | MachineReturnState::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_machine_ids_preserves_order() {
        let spec = MachineReturnRequestSpec {
            request_id: Some("req-12345678".to_string()),
            machine_ids: vec!["b".into(), "a".into(), "b".into()],
        };
        assert_eq!(spec.unique_machine_ids(), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_unique_machine_ids_skips_blank_ids() {
        let spec = MachineReturnRequestSpec {
            request_id: Some("req-12345678".to_string()),
            machine_ids: vec!["a".into(), String::new(), "  ".into()],
        };
        assert_eq!(spec.unique_machine_ids(), vec!["a".to_string()]);
    }

    #[test]
    fn test_terminal_phases() {
        assert!(!ReturnPhase::Pending.is_terminal());
        assert!(!ReturnPhase::InProgress.is_terminal());
        assert!(ReturnPhase::Completed.is_terminal());
        assert!(ReturnPhase::Failed.is_terminal());
        assert!(ReturnPhase::PartiallyCompleted.is_terminal());
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::json!({
            "phase": "PartiallyCompleted",
            "totalMachines": 2,
            "returnedMachines": 1,
            "failedMachines": 1,
            "machineEvents": {
                "pod-a": {"status": "Completed", "message": "ok"},
                "pod-b": {"status": "Failed", "message": "boom"}
            }
        });
        let status: MachineReturnRequestStatus = serde_json::from_value(json).unwrap();
        assert_eq!(status.phase, ReturnPhase::PartiallyCompleted);
        assert_eq!(status.machine_events["pod-b"].status, MachineReturnState::Failed);
        assert!(status.conditions.is_empty());
    }
}
