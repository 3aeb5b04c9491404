//! HTTP handlers for the metrics and health endpoints

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::telemetry::PipelineMetrics;

/// Content type of the Prometheus text exposition format
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Shared state of the HTTP surface
#[derive(Clone)]
pub struct ApiState {
    pub metrics: Arc<PipelineMetrics>,
    /// Storage backend label shown by `/health`
    pub backend: &'static str,
}

impl ApiState {
    pub fn new(metrics: Arc<PipelineMetrics>, backend: &'static str) -> Self {
        Self { metrics, backend }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub backend: &'static str,
    pub uptime_seconds: u64,
    pub consumed: u64,
    pub successful: u64,
    pub failed: u64,
}

/// GET /metrics
pub async fn get_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.metrics.render_prometheus(),
    )
}

/// GET /health
pub async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let m = &state.metrics;
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        backend: state.backend,
        uptime_seconds: m.uptime().as_secs(),
        consumed: m.consumed_count(),
        successful: m.successful_count(),
        failed: m.failed_count(),
    })
}
