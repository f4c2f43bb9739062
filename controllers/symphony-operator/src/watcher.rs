//! Kubernetes resource watchers.
//!
//! The two custom kinds are driven by `kube_runtime::Controller` through the
//! generic `watch_resource()` helper, which handles reconnection, debounce and
//! per-resource backoff. Pods and nodes are consumed as raw watch streams and
//! turned into typed events by their trackers before reaching a handler.

use crate::error::ControllerError;
use crate::events::{NodeTracker, PodEvent, PodTracker};
use crate::reconciler::{Reconciler, backoff_key};
use crds::labels::managed_by_selector;
use crds::{GCPSymphonyResource, MachineReturnRequest};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::{Controller, WatchStreamExt, watcher};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

/// Generic watcher helper around `kube_runtime::Controller`.
///
/// Failed reconciliations are requeued after the resource's next Fibonacci
/// backoff; a success resets it. Returns once `shutdown` is cancelled.
async fn watch_resource<K, F>(
    api: Api<K>,
    config: watcher::Config,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &'static str,
    shutdown: CancellationToken,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let key = backoff_key(resource_name, &obj.namespace().unwrap_or_default(), &obj.name_any());
        ctx.increment_error(&key);
        let (backoff_seconds, error_count) = ctx.get_backoff_for_resource(&key);
        error!(
            "Reconciliation error for {} (attempt {}), retrying in {}s: {}",
            key, error_count, backoff_seconds, error
        );
        Action::requeue(Duration::from_secs(backoff_seconds))
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let key = backoff_key(resource_name, &obj.namespace().unwrap_or_default(), &obj.name_any());
            debug!("Reconciling {}", key);
            let action = reconcile_fn(ctx.clone(), obj).await?;
            ctx.reset_error(&key);
            Ok(action)
        }
    };

    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(4);

    let run = Controller::new(api, config)
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            if let Err(e) = res {
                debug!("Controller error for {}: {}", resource_name, e);
            }
        });

    tokio::select! {
        _ = run => {
            warn!("{} watcher stream ended", resource_name);
        }
        _ = shutdown.cancelled() => {
            info!("{} watcher stopped", resource_name);
        }
    }
    Ok(())
}

/// Watches the operator's resources and dispatches them to the reconciler.
pub struct Watcher {
    client: Client,
    reconciler: Arc<Reconciler>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(client: Client, reconciler: Arc<Reconciler>) -> Self {
        Self { client, reconciler }
    }

    fn shutdown(&self) -> CancellationToken {
        self.reconciler.ctx.shutdown_token()
    }

    /// Starts watching GCPSymphonyResource resources in `namespace`.
    pub async fn watch_machine_groups(&self, namespace: &str) -> Result<(), ControllerError> {
        let api: Api<GCPSymphonyResource> = Api::namespaced(self.client.clone(), namespace);
        watch_resource(
            api,
            watcher::Config::default(),
            self.reconciler.clone(),
            |reconciler, resource| {
                Box::pin(async move { reconciler.reconcile_machine_group(&resource).await })
            },
            "GCPSymphonyResource",
            self.shutdown(),
        )
        .await
    }

    /// Starts watching MachineReturnRequest resources in `namespace`.
    pub async fn watch_return_requests(&self, namespace: &str) -> Result<(), ControllerError> {
        let api: Api<MachineReturnRequest> = Api::namespaced(self.client.clone(), namespace);
        watch_resource(
            api,
            watcher::Config::default(),
            self.reconciler.clone(),
            |reconciler, resource| {
                Box::pin(async move { reconciler.reconcile_return_request(&resource).await })
            },
            "MachineReturnRequest",
            self.shutdown(),
        )
        .await
    }

    /// Watches managed pods in `namespace` for container status changes and
    /// deletions.
    pub async fn watch_pods(&self, namespace: &str) -> Result<(), ControllerError> {
        info!("Starting Pod watcher in {}", namespace);
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let selector = managed_by_selector(&self.reconciler.ctx.config.operator_name);
        let mut stream = watcher(api, watcher::Config::default().labels(&selector))
            .default_backoff()
            .boxed();
        let mut tracker = PodTracker::default();
        let shutdown = self.shutdown();

        loop {
            let event = tokio::select! {
                event = stream.next() => event,
                _ = shutdown.cancelled() => break,
            };
            match event {
                Some(Ok(event)) => {
                    for pod_event in tracker.observe(event) {
                        self.dispatch_pod_event(pod_event).await;
                    }
                }
                Some(Err(e)) => warn!("Pod watch error in {}: {}", namespace, e),
                None => {
                    return Err(ControllerError::Watch(format!("Pod watch in {namespace} ended")));
                }
            }
        }
        info!("Pod watcher in {} stopped", namespace);
        Ok(())
    }

    async fn dispatch_pod_event(&self, event: PodEvent) {
        match event {
            PodEvent::ContainerStatusChanged(change) => {
                if let Err(e) = self.reconciler.handle_container_status_change(&change).await {
                    error!("Container status handling failed for pod {}: {}", change.pod.name_any(), e);
                }
            }
            PodEvent::Deleted(pod) => {
                if let Err(e) = self.reconciler.handle_pod_deleted(&pod).await {
                    error!("Pod deletion handling failed for pod {}: {}", pod.name_any(), e);
                }
            }
        }
    }

    /// Watches nodes for eviction taints on spot capacity.
    pub async fn watch_nodes(&self) -> Result<(), ControllerError> {
        info!("Starting Node watcher");
        let api: Api<Node> = Api::all(self.client.clone());
        let mut stream = watcher(api, watcher::Config::default()).default_backoff().boxed();
        let mut tracker = NodeTracker::default();
        let shutdown = self.shutdown();

        loop {
            let event = tokio::select! {
                event = stream.next() => event,
                _ = shutdown.cancelled() => break,
            };
            match event {
                Some(Ok(event)) => {
                    let Some(change) = tracker.observe(event) else {
                        continue;
                    };
                    match self.reconciler.handle_node_taint_change(&change).await {
                        Ok(created) if !created.is_empty() => {
                            info!("Node {} preempted, created return requests {:?}", change.node_name, created);
                        }
                        Ok(_) => {}
                        Err(e) => error!("Preemption handling failed for node {}: {}", change.node_name, e),
                    }
                }
                Some(Err(e)) => warn!("Node watch error: {}", e),
                None => return Err(ControllerError::Watch("Node watch ended".to_string())),
            }
        }
        info!("Node watcher stopped");
        Ok(())
    }
}
