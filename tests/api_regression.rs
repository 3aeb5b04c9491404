//! API Regression Tests
//!
//! Processes messages through the pipeline and checks that `/metrics` and
//! `/health` reflect what happened.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::Utc;
use std::sync::Arc;
use tower::ServiceExt;

use report_ingest::api::{create_app, ApiState, PROMETHEUS_CONTENT_TYPE};
use report_ingest::pipeline::MessageProcessor;
use report_ingest::storage::InMemoryStore;
use report_ingest::telemetry::PipelineMetrics;
use report_ingest::types::{BrokerMessage, MessageCoordinates};

const VALID: &str = r#"{"OrgID": 1, "ClusterName": "5d5892d4-1f74-4ccf-91af-548dfc9767aa",
    "LastChecked": "2020-01-23T16:15:59.478901889Z", "Version": 2, "RequestId": "abc",
    "Report": {"fingerprints": [], "info": [], "reports": [], "system": {}}}"#;

fn message(offset: i64, payload: &str) -> BrokerMessage {
    BrokerMessage::new(
        MessageCoordinates {
            topic: "ccx.ocp.results".to_string(),
            partition: 0,
            offset,
            timestamp: Utc::now(),
        },
        payload.as_bytes().to_vec(),
    )
}

async fn processed_metrics() -> Arc<PipelineMetrics> {
    let metrics = Arc::new(PipelineMetrics::new());
    let mut processor = MessageProcessor::new(Arc::new(InMemoryStore::new()), metrics.clone());
    processor.handle_message(&message(0, VALID)).await;
    processor.handle_message(&message(1, "garbage")).await;
    metrics
}

async fn get(metrics: Arc<PipelineMetrics>, uri: &str) -> (StatusCode, Option<String>, String) {
    let response = create_app(ApiState::new(metrics, "InMemory"))
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn metrics_reflect_processed_messages() {
    let (status, content_type, body) = get(processed_metrics().await, "/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some(PROMETHEUS_CONTENT_TYPE));
    assert!(body.contains("report_ingest_consumed_messages_total 2"), "{body}");
    assert!(body.contains("# TYPE report_ingest_consumed_messages_total counter"));
    assert!(body.contains("stage=\"db_store_report\""));
}

#[tokio::test]
async fn health_reports_counters() {
    let (status, content_type, body) = get(processed_metrics().await, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert!(content_type.unwrap().starts_with("application/json"));

    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["backend"], "InMemory");
    assert_eq!(json["consumed"], 2);
    assert_eq!(json["successful"], 1);
    assert_eq!(json["failed"], 1);
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn post_is_not_allowed() {
    let response = create_app(ApiState::new(Arc::new(PipelineMetrics::new()), "Noop"))
        .oneshot(Request::post("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
