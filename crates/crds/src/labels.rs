//! Label keys and values shared by the operator and the resources it manages
//!
//! Labels are the signaling channel between pods, group resources and return
//! requests: they correlate objects to a request and mark cleanup eligibility.

/// Identifies operator-owned pods; the value is the operator name
pub const MANAGED_BY: &str = "managed-by";

/// Name of the owning group resource, set on every managed pod
pub const APP: &str = "app";

/// Correlates pods and resources to a provisioning or return request
pub const REQUEST_ID: &str = "symphony.requestId";

/// Correlates a deleted pod to the return request that caused it
pub const RETURN_REQUEST_ID: &str = "symphony.returnRequestId";

/// Cleanup eligibility marker
pub const WAITING_CLEANUP: &str = "symphony.waitingCleanup";

/// Value of [`WAITING_CLEANUP`] when a resource may be garbage-collected
pub const WAITING_CLEANUP_VALUE: &str = "True";

/// Legacy trigger label written by earlier operator versions to re-enter the
/// return-request update path. It is only ever removed.
pub const TRIGGER_UPDATE: &str = "triggerUpdate";

/// Label selector matching resources eligible for cleanup
#[must_use]
pub fn waiting_cleanup_selector() -> String {
    format!("{WAITING_CLEANUP}={WAITING_CLEANUP_VALUE}")
}

/// Label selector matching pods managed by `operator_name`
#[must_use]
pub fn managed_by_selector(operator_name: &str) -> String {
    format!("{MANAGED_BY}={operator_name}")
}
