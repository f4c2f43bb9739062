//! Main controller implementation.
//!
//! This module contains the `Controller` struct that starts every long-running
//! task of the operator and supervises them:
//! - GCPSymphonyResource and MachineReturnRequest reconcilers per namespace
//! - managed pod watchers per namespace
//! - the node watcher, when preemption handling is enabled
//! - the status update worker, the cleanup worker and the health server

use crate::cleanup::CleanupWorker;
use crate::context::OperatorContext;
use crate::error::ControllerError;
use crate::health;
use crate::queue::EventReceiver;
use crate::reconciler::Reconciler;
use crate::status_worker::StatusWorker;
use crate::watcher::Watcher;
use cluster_gateway::ClusterGateway;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::ListParams;
use kube::{Api, Client};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How long shutdown waits for the workers to drain
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Main controller for the GCP Symphony operator.
pub struct Controller {
    ctx: Arc<OperatorContext>,
    /// Resource watchers; any of them exiting stops the operator
    watchers: Vec<(String, JoinHandle<Result<(), ControllerError>>)>,
    workers: Vec<(&'static str, JoinHandle<()>)>,
    health_server: Option<JoinHandle<Result<(), ControllerError>>>,
}

impl Controller {
    /// Verifies cluster access and starts every task.
    pub async fn new(
        client: Client,
        ctx: Arc<OperatorContext>,
        receiver: EventReceiver,
    ) -> Result<Self, ControllerError> {
        info!("Initializing GCP Symphony operator");

        preflight(&client, ctx.gateway.as_ref(), &ctx.config.namespaces).await?;
        info!("Startup checks passed for namespaces {:?}", ctx.config.namespaces);

        let health_server = if ctx.config.health_check_enabled {
            let ctx = ctx.clone();
            Some(tokio::spawn(async move { health::serve(ctx).await }))
        } else {
            None
        };

        let workers = vec![
            ("status worker", tokio::spawn(StatusWorker::new(ctx.clone(), receiver).run())),
            ("cleanup worker", tokio::spawn(CleanupWorker::new(ctx.clone()).run())),
        ];

        let reconciler = Arc::new(Reconciler::new(ctx.clone()));
        let watcher_instance = Arc::new(Watcher::new(client, reconciler));
        let mut watchers = Vec::new();

        for namespace in &ctx.config.namespaces {
            let ns = namespace.clone();
            let watcher = watcher_instance.clone();
            watchers.push((
                format!("GCPSymphonyResource/{namespace}"),
                tokio::spawn(async move { watcher.watch_machine_groups(&ns).await }),
            ));

            let ns = namespace.clone();
            let watcher = watcher_instance.clone();
            watchers.push((
                format!("MachineReturnRequest/{namespace}"),
                tokio::spawn(async move { watcher.watch_return_requests(&ns).await }),
            ));

            let ns = namespace.clone();
            let watcher = watcher_instance.clone();
            watchers.push((
                format!("Pod/{namespace}"),
                tokio::spawn(async move { watcher.watch_pods(&ns).await }),
            ));
        }

        if ctx.config.enable_preemption_handling {
            let watcher = watcher_instance;
            watchers.push((
                "Node".to_string(),
                tokio::spawn(async move { watcher.watch_nodes().await }),
            ));
        } else {
            info!("Preemption handling disabled");
        }

        ctx.set_ready(true);
        Ok(Self {
            ctx,
            watchers,
            workers,
            health_server,
        })
    }

    /// Runs the operator until a shutdown signal or a watcher failure.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("GCP Symphony operator running");

        let Self {
            ctx,
            watchers,
            workers,
            health_server,
        } = self;

        let (names, handles): (Vec<String>, Vec<_>) = watchers.into_iter().unzip();
        let outcome = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("Shutdown signal received"),
                    Err(e) => error!("Failed to listen for shutdown signal: {}", e),
                }
                Ok(())
            }
            (result, index, _) = futures::future::select_all(handles) => {
                let name = &names[index];
                match result {
                    Err(e) => Err(ControllerError::Watch(format!("{name} watcher panicked: {e}"))),
                    Ok(Err(e)) => Err(ControllerError::Watch(format!("{name} watcher error: {e}"))),
                    Ok(Ok(())) => Err(ControllerError::Watch(format!("{name} watcher exited"))),
                }
            }
        };

        ctx.begin_shutdown();
        for (name, handle) in workers {
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => info!("{} stopped", name),
                Ok(Err(e)) => error!("{} panicked: {}", name, e),
                Err(_) => warn!("{} did not stop within {:?}", name, SHUTDOWN_GRACE),
            }
        }
        if let Some(handle) = health_server {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Health server failed: {}", e),
                Err(e) => error!("Health server panicked: {}", e),
            }
        }

        info!("GCP Symphony operator stopped");
        outcome
    }
}

/// Checks that every namespace exists and both custom kinds can be listed.
pub async fn preflight(
    client: &Client,
    gateway: &dyn ClusterGateway,
    namespaces: &[String],
) -> Result<(), ControllerError> {
    let namespace_api: Api<Namespace> = Api::all(client.clone());
    for namespace in namespaces {
        namespace_api.get(namespace).await.map_err(|e| {
            error!("Namespace {} is not accessible: {}", namespace, e);
            ControllerError::InvalidConfig(format!("namespace {namespace} is not accessible: {e}"))
        })?;
    }
    check_custom_kinds(gateway, namespaces).await
}

/// Lists one object of each custom kind per namespace.
pub async fn check_custom_kinds(gateway: &dyn ClusterGateway, namespaces: &[String]) -> Result<(), ControllerError> {
    let probe = ListParams::default().limit(1);
    for namespace in namespaces {
        gateway.list_machine_groups(namespace, &probe).await.map_err(|e| {
            error!("Cannot list GCPSymphonyResource in {}: {}", namespace, e);
            ControllerError::Gateway(e)
        })?;
        gateway.list_return_requests(namespace, &probe).await.map_err(|e| {
            error!("Cannot list MachineReturnRequest in {}: {}", namespace, e);
            ControllerError::Gateway(e)
        })?;
    }
    Ok(())
}
