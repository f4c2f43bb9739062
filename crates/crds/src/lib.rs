//! GCP Symphony CRD Definitions
//!
//! Custom resources driven by the GCP Symphony operator:
//! - `GCPSymphonyResource`: a group of machines backed by pods
//! - `MachineReturnRequest`: a batch request to return machines
//!
//! Field names and enum string values are wire contract with external status
//! readers and must not change.

pub mod condition;
pub mod labels;
pub mod machine_group;
pub mod return_request;

pub use condition::*;
pub use machine_group::*;
pub use return_request::*;
