//! Incoming message codec
//!
//! Turns the raw bytes of a consumed record into a typed [`IncomingMessage`].
//! Parsing is a two-step affair: the envelope is deserialized and checked for
//! mandatory attributes, then the `reports` and `info` sections of the report
//! are re-parsed into typed hit and info lists.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::error;

use crate::types::{
    AccountNumber, ClusterName, InfoItem, Metadata, OrgId, ReportItem, RequestId,
    SchemaVersion,
};

/// Keys every report has to contain. The legacy `skips` key is optional.
pub const REQUIRED_REPORT_KEYS: [&str; 4] = ["fingerprints", "info", "reports", "system"];

/// Report as sent by the producer: top-level keys mapped to raw sub-documents.
///
/// A `BTreeMap` keeps keys sorted so re-serialization is canonical.
pub type Report = BTreeMap<String, serde_json::Value>;

/// Codec errors. Every variant is fatal for the message.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed message payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),
    #[error("missing required attribute '{0}'")]
    MissingField(&'static str),
    #[error("cluster name is not a UUID: '{0}'")]
    InvalidClusterName(String),
    #[error("improper report structure, missing key {0}")]
    InvalidReportStructure(&'static str),
    #[error("unable to parse report section '{section}': {source}")]
    MalformedSubsection {
        section: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Envelope exactly as it appears on the wire. Mandatory attributes are
/// optional here so their absence can be reported by name.
#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(rename = "OrgID", default)]
    organization: Option<OrgId>,
    #[serde(rename = "AccountNumber", default)]
    account: Option<AccountNumber>,
    #[serde(rename = "ClusterName", default)]
    cluster_name: Option<ClusterName>,
    #[serde(rename = "Report", default)]
    report: Option<Report>,
    #[serde(rename = "LastChecked", default)]
    last_checked: String,
    #[serde(rename = "Version", default)]
    version: SchemaVersion,
    #[serde(rename = "RequestId", default)]
    request_id: RequestId,
    #[serde(rename = "Metadata", default)]
    metadata: Metadata,
}

/// A validated incoming message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncomingMessage {
    #[serde(rename = "OrgID")]
    pub organization: OrgId,
    #[serde(rename = "AccountNumber")]
    pub account: Option<AccountNumber>,
    #[serde(rename = "ClusterName")]
    pub cluster_name: ClusterName,
    #[serde(rename = "Report")]
    pub report: Report,
    /// Date in the form "2020-01-23T16:15:59.478901889Z"
    #[serde(rename = "LastChecked")]
    pub last_checked: String,
    #[serde(rename = "Version")]
    pub version: SchemaVersion,
    #[serde(rename = "RequestId")]
    pub request_id: RequestId,
    #[serde(rename = "Metadata")]
    pub metadata: Metadata,
    #[serde(skip)]
    pub parsed_hits: Vec<ReportItem>,
    #[serde(skip)]
    pub parsed_info: Vec<InfoItem>,
}

/// The identifying attributes of a message, recovered leniently.
///
/// Used for tracking and logging when full parsing fails.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MessageIdentity {
    #[serde(rename = "RequestId", default)]
    pub request_id: RequestId,
    #[serde(rename = "OrgID", default)]
    pub organization: Option<OrgId>,
    #[serde(rename = "AccountNumber", default)]
    pub account: Option<AccountNumber>,
}

impl MessageIdentity {
    /// Best effort: anything unreadable yields the default identity.
    pub fn from_payload(raw: &[u8]) -> Self {
        serde_json::from_slice(raw).unwrap_or_default()
    }
}

impl From<&IncomingMessage> for MessageIdentity {
    fn from(message: &IncomingMessage) -> Self {
        Self {
            request_id: message.request_id.clone(),
            organization: Some(message.organization),
            account: message.account,
        }
    }
}

/// Parse an incoming message and read all required attributes from it.
pub fn parse_message(raw: &[u8]) -> Result<IncomingMessage, ParseError> {
    let wire: WireMessage = serde_json::from_slice(raw).map_err(ParseError::MalformedPayload)?;

    let organization = wire.organization.ok_or(ParseError::MissingField("OrgID"))?;
    let cluster_name = wire
        .cluster_name
        .ok_or(ParseError::MissingField("ClusterName"))?;
    let report = wire.report.ok_or(ParseError::MissingField("Report"))?;

    if uuid::Uuid::parse_str(&cluster_name).is_err() {
        return Err(ParseError::InvalidClusterName(cluster_name));
    }

    if let Err(e) = check_report_structure(&report) {
        error!(
            error = %e,
            report = ?report,
            "Deserialized report read from message with improper structure"
        );
        return Err(e);
    }

    let parsed_hits = parse_section::<ReportItem>(&report, "reports")?;
    let parsed_info = parse_section::<InfoItem>(&report, "info")?;

    Ok(IncomingMessage {
        organization,
        account: wire.account,
        cluster_name,
        report,
        last_checked: wire.last_checked,
        version: wire.version,
        request_id: wire.request_id,
        metadata: wire.metadata,
        parsed_hits,
        parsed_info,
    })
}

/// Check that the report contains every required key.
///
/// The structure is not strictly defined, so presence is all that is checked.
pub fn check_report_structure(report: &Report) -> Result<(), ParseError> {
    match REQUIRED_REPORT_KEYS
        .into_iter()
        .find(|key| !report.contains_key(*key))
    {
        Some(missing) => Err(ParseError::InvalidReportStructure(missing)),
        None => Ok(()),
    }
}

/// Re-parse one report section into a typed list. `null` means empty.
fn parse_section<T: for<'de> Deserialize<'de>>(
    report: &Report,
    section: &'static str,
) -> Result<Vec<T>, ParseError> {
    let Some(value) = report.get(section) else {
        return Err(ParseError::InvalidReportStructure(section));
    };
    Option::<Vec<T>>::deserialize(value)
        .map(Option::unwrap_or_default)
        .map_err(|source| ParseError::MalformedSubsection { section, source })
}
