//! Cluster Gateway
//!
//! Typed wrapper around the Kubernetes API calls made by the GCP Symphony
//! operator: pods plus the `GCPSymphonyResource` and `MachineReturnRequest`
//! custom resources, including their status sub-resources.
//!
//! # Features
//!
//! - **Typed errors**: every failure carries an HTTP-like status class
//!   (not found, conflict, forbidden, rejected, transient)
//! - **Retry Logic**: transient failures are retried with exponential backoff;
//!   business outcomes are returned on the first attempt
//! - **Mocking**: `MockClusterGateway` (feature `test-util`) keeps objects in
//!   memory and supports selector filtering, merge patches, resource-version
//!   preconditions and failure injection

pub mod client;
pub mod error;
pub mod retry;
#[path = "trait.rs"]
pub mod gateway_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeGateway;
pub use error::GatewayError;
pub use gateway_trait::ClusterGateway;
pub use retry::{RetryPolicy, retry_transient};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockClusterGateway, Operation, RecordedCall};
