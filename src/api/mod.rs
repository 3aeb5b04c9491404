//! HTTP surface using Axum
//!
//! - `GET /metrics` Prometheus text exposition of [`PipelineMetrics`]
//! - `GET /health` liveness and message counters as JSON

pub mod handlers;

pub use handlers::{ApiState, HealthResponse, PROMETHEUS_CONTENT_TYPE};

use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::telemetry::PipelineMetrics;

/// Create the router serving `/metrics` and `/health`.
pub fn create_app(state: ApiState) -> Router {
    Router::new()
        .route("/metrics", get(handlers::get_metrics))
        .route("/health", get(handlers::get_health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve until `cancel_token` fires.
pub async fn serve(
    addr: SocketAddr,
    metrics: std::sync::Arc<PipelineMetrics>,
    backend: &'static str,
    cancel_token: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Metrics endpoint listening");

    axum::serve(listener, create_app(ApiState::new(metrics, backend)))
        .with_graceful_shutdown(async move { cancel_token.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{Stage, Telemetry};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(metrics: Arc<PipelineMetrics>) -> Router {
        create_app(ApiState::new(metrics, "Sled"))
    }

    #[tokio::test]
    async fn test_metrics_route() {
        let metrics = Arc::new(PipelineMetrics::new());
        metrics.consumed();
        metrics.succeeded(Duration::from_millis(5));
        metrics.stage(Stage::Read, Duration::from_micros(40));

        let response = app(metrics)
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            PROMETHEUS_CONTENT_TYPE
        );

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("report_ingest_consumed_messages_total 1"));
    }

    #[tokio::test]
    async fn test_health_route_is_json() {
        let response = app(Arc::new(PipelineMetrics::new()))
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["backend"], "Sled");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let response = app(Arc::new(PipelineMetrics::new()))
            .oneshot(Request::get("/reports").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
