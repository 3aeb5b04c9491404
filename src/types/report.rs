//! Rule findings carried inside a report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{ErrorKey, RuleId};

/// A single (hit) rule of a report.
///
/// Only `component` and `key` identify the hit; the rest is opaque payload
/// that is stored as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportItem {
    #[serde(rename = "component", default)]
    pub module: RuleId,
    #[serde(rename = "key", default)]
    pub error_key: ErrorKey,
    #[serde(rename = "details", default)]
    pub template_data: serde_json::Value,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub links: serde_json::Value,
}

impl ReportItem {
    /// Rule module without the trailing `.report` entry point.
    pub fn rule_fqdn(&self) -> &str {
        self.module.strip_suffix(".report").unwrap_or(&self.module)
    }

    /// `rule_fqdn|error_key` selector used for recommendations.
    pub fn rule_selector(&self) -> String {
        format!("{}|{}", self.rule_fqdn(), self.error_key)
    }
}

/// Informational rule hit (never shown as a recommendation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoItem {
    #[serde(default)]
    pub info_id: RuleId,
    #[serde(rename = "key", default)]
    pub info_key: String,
    #[serde(default)]
    pub details: HashMap<String, String>,
}

/// The `Metadata` block of an incoming message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// When the archive the report was computed from was gathered
    #[serde(rename = "gathering_time", default)]
    pub gathered_at: Option<DateTime<Utc>>,
}
