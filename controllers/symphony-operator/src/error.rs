//! Controller-specific error types.
//!
//! This module defines error types specific to the GCP Symphony operator
//! that are not covered by upstream library errors.

use cluster_gateway::GatewayError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the GCP Symphony operator.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Cluster gateway error
    #[error("Cluster API error: {0}")]
    Gateway(#[from] GatewayError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource is missing a field the operator relies on
    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    /// The status update queue is closed
    #[error("Status update queue closed")]
    QueueClosed,

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Health server failed
    #[error("Health server error: {0}")]
    Health(#[from] std::io::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}
