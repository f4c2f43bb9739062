//! Health and metrics endpoints
//!
//! - `GET /health` → `OK` while the process is up
//! - `GET /ready` → `Ready` once the watchers are running, `503` otherwise
//! - `GET /metrics` → Prometheus text exposition

use crate::context::OperatorContext;
use crate::error::ControllerError;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Build the health router with the operator context as state
pub fn health_routes(ctx: Arc<OperatorContext>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn ready(State(ctx): State<Arc<OperatorContext>>) -> (StatusCode, &'static str) {
    if ctx.is_ready() {
        (StatusCode::OK, "Ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Not Ready")
    }
}

async fn metrics(State(ctx): State<Arc<OperatorContext>>) -> Result<String, (StatusCode, String)> {
    ctx.metrics.render().map_err(|e| {
        error!("Failed to render metrics: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}

/// Serve the health router on `health_check_port` until shutdown begins.
pub async fn serve(ctx: Arc<OperatorContext>) -> Result<(), ControllerError> {
    let port = ctx.config.health_check_port;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Health server listening on {}", addr);

    let shutdown = ctx.shutdown_token();
    axum::serve(listener, health_routes(ctx))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Health server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_context;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use cluster_gateway::MockClusterGateway;
    use tower::ServiceExt;

    async fn get_path(router: Router, path: &str) -> (StatusCode, String) {
        let request = Request::builder().uri(path).body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health_always_ok() {
        let (ctx, _rx) = test_context(&MockClusterGateway::new());
        let (status, body) = get_path(health_routes(ctx), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn test_ready_follows_context() {
        let (ctx, _rx) = test_context(&MockClusterGateway::new());

        let (status, body) = get_path(health_routes(ctx.clone()), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "Not Ready");

        ctx.set_ready(true);
        let (status, body) = get_path(health_routes(ctx.clone()), "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Ready");

        ctx.begin_shutdown();
        let (status, _) = get_path(health_routes(ctx), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_metrics_rendered() {
        let (ctx, _rx) = test_context(&MockClusterGateway::new());
        ctx.metrics.machines_returned.inc();

        let (status, body) = get_path(health_routes(ctx), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("symphony_operator_machines_returned_total 1"));
    }
}
