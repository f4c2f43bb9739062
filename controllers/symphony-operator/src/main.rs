//! GCP Symphony Operator
//!
//! Provisions pod-backed machines for GCPSymphonyResource requests and
//! reclaims them for MachineReturnRequest requests:
//! - GCPSymphonyResource: creates the group's pods and tracks their health
//! - MachineReturnRequest: deletes the requested pods and reports progress
//! - spot node preemption: files return requests for evicted machines
//!
//! Status changes from every handler go through one status update worker.

mod backoff;
mod cleanup;
mod config;
mod context;
mod controller;
mod error;
mod events;
mod health;
mod metrics;
mod phase;
mod queue;
mod reconciler;
mod status_worker;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::OperatorConfig;
use crate::context::OperatorContext;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use cluster_gateway::{KubeGateway, RetryPolicy};
use controller::Controller;
use kube::Client;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // Install ring as the rustls crypto provider before any TLS client is built
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = OperatorConfig::from_env()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting GCP Symphony operator");
    info!("Configuration:");
    info!("  Namespaces: {:?}", config.namespaces);
    info!("  Operator name: {}", config.operator_name);
    info!("  Preemption handling: {}", config.enable_preemption_handling);
    info!(
        "  Health check: {}",
        if config.health_check_enabled {
            format!("port {}", config.health_check_port)
        } else {
            "disabled".to_string()
        }
    );

    let mut kube_config = kube::Config::infer()
        .await
        .map_err(|e| ControllerError::InvalidConfig(format!("cannot load cluster configuration: {e}")))?;
    if let Some(timeout) = config.client_timeout {
        kube_config.connect_timeout = Some(timeout);
        kube_config.read_timeout = Some(timeout);
        kube_config.write_timeout = Some(timeout);
    }
    let client = Client::try_from(kube_config)?;

    let gateway = KubeGateway::new(
        client.clone(),
        RetryPolicy::new(config.retry_count, config.retry_interval),
    );
    let metrics = Arc::new(Metrics::new()?);
    let (ctx, receiver) = OperatorContext::new(config, Arc::new(gateway), metrics);

    let controller = Controller::new(client, ctx, receiver).await?;
    controller.run().await?;

    Ok(())
}
