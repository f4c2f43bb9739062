//! GCPSymphonyResource CRD
//!
//! A machine group: one provisioning request for N machines, each backed by a
//! pod created from the embedded pod template.

use crate::condition::{Condition, find_condition, types};
use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "accenture.com",
    version = "v1",
    kind = "GCPSymphonyResource",
    plural = "gcp-symphony-resources",
    singular = "gcp-symphony-resource",
    shortname = "gcpsr",
    namespaced,
    status = "GCPSymphonyResourceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct GCPSymphonyResourceSpec {
    /// Pod template for every machine.
    ///
    /// Kept as raw JSON so a malformed template surfaces as a validation
    /// failure on the resource instead of breaking the watch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_spec: Option<serde_json::Value>,

    /// Number of machines to create (defaults to 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_count: Option<i32>,

    /// Prefix for machine (pod) names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_prefix: Option<String>,

    /// Labels propagated to every machine
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Annotations propagated to every machine
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Termination grace period in seconds for machines without one
    #[serde(
        rename = "default_grace_period",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub default_grace_period: Option<i64>,
}

impl GCPSymphonyResourceSpec {
    /// Desired machine count, defaulting to 1
    #[must_use]
    pub fn desired_machine_count(&self) -> i32 {
        self.machine_count.unwrap_or(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GCPSymphonyResourceStatus {
    /// Aggregate phase of the group's machines
    #[serde(default)]
    pub phase: GroupPhase,

    /// Number of machines in phase Running at the last reconciliation
    #[serde(default)]
    pub available_machines: u32,

    /// At most one condition per type
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Machines returned so far, one entry per machine name
    #[serde(default)]
    pub returned_machines: Vec<ReturnedMachine>,
}

impl GCPSymphonyResourceStatus {
    /// Whether the terminal `Completed` condition is set to `True`
    #[must_use]
    pub fn is_completed(&self) -> bool {
        find_condition(&self.conditions, types::COMPLETED).is_some_and(Condition::is_true)
    }
}

/// Aggregate phase of a machine group
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "PascalCase")]
pub enum GroupPhase {
    /// At least one machine is still coming up
    Pending,

    /// Every machine is running
    Running,

    /// At least one machine is terminating or failed
    Degraded,

    /// No machines remain; the group waits for garbage collection
    WaitingCleanup,

    /// Phase could not be determined
    #[default]
    #[serde(other)]
    Unknown,
}

impl GroupPhase {
    /// Wire string of the phase
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            GroupPhase::Pending => "Pending",
            GroupPhase::Running => "Running",
            GroupPhase::Degraded => "Degraded",
            GroupPhase::Unknown => "Unknown",
            GroupPhase::WaitingCleanup => "WaitingCleanup",
        }
    }
}

impl std::fmt::Display for GroupPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry of the returned-machines log
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReturnedMachine {
    /// Machine (pod) name
    pub name: String,

    /// Return request that caused the return, or the system-initiated sentinel
    pub return_request_id: String,

    /// When the machine was returned
    pub return_time: DateTime<Utc>,
}
