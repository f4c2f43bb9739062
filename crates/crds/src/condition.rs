//! Status conditions
//!
//! Conditions are typed, timestamped status facts. A resource carries at most
//! one condition per type; `Completed` is the terminal condition the cleanup
//! worker keys on.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition types written by the operator
pub mod types {
    /// Terminal condition of a group resource
    pub const COMPLETED: &str = "Completed";
    /// Result of pod creation for a group resource
    pub const PODS_CREATED: &str = "PodsCreated";
    /// Aggregated container readiness of one machine
    pub const CONTAINER_HEALTH: &str = "ContainerHealth";
    /// A machine was returned (its pod deleted)
    pub const POD_RETURNED: &str = "PodReturned";
    /// Return request is being processed
    pub const PROCESSING: &str = "Processing";
    /// Return request rejected at validation
    pub const FAILED: &str = "Failed";
    /// Every machine of a return request was returned
    pub const ALL_PODS_DELETED: &str = "AllPodsDeleted";
    /// Every machine of a return request failed
    pub const ALL_PODS_FAILED: &str = "AllPodsFailed";
    /// Return request finished with a mix of returned and failed machines
    pub const SOME_PODS_DELETED: &str = "SomePodsDeleted";
    /// Return request still has machines in flight
    pub const DELETION_IN_PROGRESS: &str = "DeletionInProgress";
}

/// Condition status string for a true condition
pub const STATUS_TRUE: &str = "True";
/// Condition status string for a false condition
pub const STATUS_FALSE: &str = "False";

/// A typed status fact attached to a resource.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, e.g. `Completed`
    #[serde(rename = "type")]
    pub type_: String,

    /// `True`, `False` or `Unknown`
    pub status: String,

    /// When the condition was last written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,

    /// Machine-readable reason
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,
}

impl Condition {
    /// Builds a condition stamped with the current time.
    pub fn new(
        type_: impl Into<String>,
        status: bool,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status: if status { STATUS_TRUE } else { STATUS_FALSE }.to_string(),
            last_transition_time: Some(Utc::now()),
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Whether the condition status is `True`
    #[must_use]
    pub fn is_true(&self) -> bool {
        self.status == STATUS_TRUE
    }

    /// Whether this is the terminal `Completed` condition
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.type_ == types::COMPLETED
    }
}

/// Finds the condition of the given type.
#[must_use]
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Returns `conditions` with `condition` replacing any entry of the same type.
///
/// Existing entries keep their position; a new type is appended.
#[must_use]
pub fn upsert_condition(mut conditions: Vec<Condition>, condition: Condition) -> Vec<Condition> {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => *existing = condition,
        None => conditions.push(condition),
    }
    conditions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_wire_format() {
        let condition = Condition {
            type_: types::COMPLETED.to_string(),
            status: STATUS_TRUE.to_string(),
            last_transition_time: None,
            reason: "NoPods".to_string(),
            message: "done".to_string(),
        };
        let json = serde_json::to_value(&condition).unwrap();
        assert_eq!(json["type"], "Completed");
        assert_eq!(json["status"], "True");
        assert!(json.get("lastTransitionTime").is_none());
    }

    #[test]
    fn test_condition_parses_offset_timestamps() {
        let json = serde_json::json!({
            "type": "PodReturned",
            "status": "True",
            "lastTransitionTime": "2024-05-01T10:00:00.123456+00:00",
            "reason": "Returned",
            "message": "Pod a has been returned"
        });
        let condition: Condition = serde_json::from_value(json).unwrap();
        assert!(condition.is_true());
        assert!(condition.last_transition_time.is_some());
    }

    #[test]
    fn test_upsert_condition_replaces_in_place() {
        let first = Condition::new("A", true, "r", "first");
        let second = Condition::new("B", true, "r", "second");
        let replacement = Condition::new("A", false, "r", "third");

        let merged = upsert_condition(vec![first, second], replacement);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].type_, "A");
        assert_eq!(merged[0].message, "third");
        assert_eq!(merged[1].type_, "B");
    }
}
