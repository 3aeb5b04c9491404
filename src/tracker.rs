//! Payload tracker client
//!
//! Reports lifecycle checkpoints of a request (`received`, `processed`,
//! `success`, `error`) to an external tracking service. Tracking is auxiliary:
//! the pipeline logs failures and carries on.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::types::{AccountNumber, OrgId};

/// Checkpoint of a request in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerStatus {
    Received,
    Processed,
    Success,
    Error,
}

impl TrackerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackerStatus::Received => "received",
            TrackerStatus::Processed => "processed",
            TrackerStatus::Success => "success",
            TrackerStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for TrackerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracker notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerEvent {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub org_id: Option<OrgId>,
    pub account: Option<AccountNumber>,
    pub status: TrackerStatus,
}

/// Tracker errors
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("tracker returned status {0}")]
    ServerError(reqwest::StatusCode),
}

/// Lifecycle notification sink.
#[async_trait]
pub trait PayloadTracker: Send + Sync {
    async fn track(&self, event: &TrackerEvent) -> Result<(), TrackerError>;
}

/// Wire body of a tracker notification.
#[derive(Debug, Serialize)]
struct TrackerMessage<'a> {
    service: &'a str,
    request_id: &'a str,
    status: TrackerStatus,
    status_msg: &'static str,
    date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    org_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    account: Option<String>,
}

fn status_message(status: TrackerStatus) -> &'static str {
    match status {
        TrackerStatus::Received => "Message received by the report consumer",
        TrackerStatus::Processed => "Message processed by the report consumer",
        TrackerStatus::Success => "Report stored",
        TrackerStatus::Error => "Report could not be processed",
    }
}

/// [`PayloadTracker`] posting JSON to an HTTP endpoint.
#[derive(Clone)]
pub struct HttpPayloadTracker {
    http: reqwest::Client,
    url: String,
    service: String,
}

impl HttpPayloadTracker {
    pub fn new(url: &str, service: &str, timeout: Duration) -> Result<Self, TrackerError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.to_string(),
            service: service.to_string(),
        })
    }
}

#[async_trait]
impl PayloadTracker for HttpPayloadTracker {
    async fn track(&self, event: &TrackerEvent) -> Result<(), TrackerError> {
        let body = TrackerMessage {
            service: &self.service,
            request_id: &event.request_id,
            status: event.status,
            status_msg: status_message(event.status),
            date: event.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            org_id: event.org_id.map(|id| id.to_string()),
            account: event.account.map(|acc| acc.to_string()),
        };

        let resp = self.http.post(&self.url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(TrackerError::ServerError(resp.status()));
        }

        debug!(
            request_id = %event.request_id,
            status = %event.status,
            "Payload tracker notified"
        );
        Ok(())
    }
}
