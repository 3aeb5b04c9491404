//! Report storage
//!
//! [`ReportStore`] is the persistence interface the pipeline writes through.
//! The store is authoritative on recency: a write carrying data older than what
//! is already stored for the same (organization, cluster) returns
//! [`WriteOutcome::Stale`] instead of overwriting it.
//!
//! Backends:
//! - [`SledStore`]: embedded durable store (one sled tree per record kind)
//! - [`InMemoryStore`]: thread-safe maps, for tests and dry runs
//! - [`NoopStore`]: accepts and discards everything

mod memory;
mod noop;
mod sled_store;

pub use memory::{InMemoryStore, WriteCounts, WriteCountsSnapshot};
pub use noop::NoopStore;
pub use sled_store::SledStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{BrokerMessage, ClusterName, InfoItem, KafkaOffset, OrgId, ReportItem};

/// Result of a write the store may refuse as outdated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Data was written
    Stored,
    /// A newer record already exists for the cluster; nothing was written
    Stale,
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<sled::transaction::TransactionError<StorageError>> for StorageError {
    fn from(err: sled::transaction::TransactionError<StorageError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(e) => e,
            sled::transaction::TransactionError::Storage(e) => e.into(),
        }
    }
}

/// Arguments of a primary report write.
#[derive(Debug, Clone, Copy)]
pub struct ReportWrite<'a> {
    pub org_id: OrgId,
    pub cluster: &'a str,
    /// Canonical JSON of the whole report
    pub report: &'a [u8],
    pub hits: &'a [ReportItem],
    pub last_checked: DateTime<Utc>,
    pub gathered_at: Option<DateTime<Utc>>,
    pub stored_at: DateTime<Utc>,
    pub offset: KafkaOffset,
}

/// Persistence interface used by the pipeline.
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across workers.
pub trait ReportStore: Send + Sync {
    /// Store the primary report for a cluster.
    ///
    /// Returns `Stale` when the stored report was checked at the same time or later.
    fn write_report(&self, write: &ReportWrite<'_>) -> Result<WriteOutcome, StorageError>;

    /// Replace the recommendations of a cluster with the hits found in `report`.
    fn write_recommendations(
        &self,
        org_id: OrgId,
        cluster: &str,
        report: &[u8],
        stored_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Store the info report of a cluster.
    ///
    /// Returns `Stale` when a more recent info report is already stored.
    fn write_info_report(
        &self,
        org_id: OrgId,
        cluster: &str,
        info: &[InfoItem],
        stored_at: DateTime<Utc>,
    ) -> Result<WriteOutcome, StorageError>;

    /// Record a message the pipeline failed to process.
    fn write_consumer_error(
        &self,
        message: &BrokerMessage,
        error: &dyn std::error::Error,
    ) -> Result<(), StorageError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

// ============================================================================
// Stored records
// ============================================================================

/// Primary report as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReport {
    pub org_id: OrgId,
    pub cluster: ClusterName,
    pub report: String,
    pub hits: Vec<ReportItem>,
    pub last_checked_at: DateTime<Utc>,
    pub gathered_at: Option<DateTime<Utc>>,
    pub reported_at: DateTime<Utc>,
    pub kafka_offset: KafkaOffset,
}

impl StoredReport {
    fn from_write(write: &ReportWrite<'_>) -> Self {
        Self {
            org_id: write.org_id,
            cluster: write.cluster.to_string(),
            report: String::from_utf8_lossy(write.report).into_owned(),
            hits: write.hits.to_vec(),
            last_checked_at: write.last_checked,
            gathered_at: write.gathered_at,
            reported_at: write.stored_at,
            kafka_offset: write.offset,
        }
    }

    /// An incoming report is stale unless it was checked strictly later.
    fn supersedes(&self, incoming_last_checked: DateTime<Utc>) -> bool {
        self.last_checked_at >= incoming_last_checked
    }
}

/// One recommendation derived from a rule hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub org_id: OrgId,
    pub cluster: ClusterName,
    pub rule_fqdn: String,
    pub error_key: String,
    /// `rule_fqdn|error_key`
    pub rule_id: String,
    pub created_at: DateTime<Utc>,
}

/// Info report as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredInfoReport {
    pub org_id: OrgId,
    pub cluster: ClusterName,
    pub info: Vec<InfoItem>,
    pub stored_at: DateTime<Utc>,
}

impl StoredInfoReport {
    fn supersedes(&self, incoming_stored_at: DateTime<Utc>) -> bool {
        self.stored_at > incoming_stored_at
    }
}

/// Audit record of a message that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerErrorRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: KafkaOffset,
    pub key: Option<String>,
    pub produced_at: DateTime<Utc>,
    pub consumed_at: DateTime<Utc>,
    pub message: String,
    pub error: String,
}

impl ConsumerErrorRecord {
    pub fn new(message: &BrokerMessage, error: &dyn std::error::Error) -> Self {
        Self {
            topic: message.coordinates.topic.clone(),
            partition: message.coordinates.partition,
            offset: message.coordinates.offset,
            key: message
                .key
                .as_ref()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            produced_at: message.coordinates.timestamp,
            consumed_at: Utc::now(),
            message: String::from_utf8_lossy(&message.payload).into_owned(),
            error: error.to_string(),
        }
    }
}

/// Derive recommendation rows from the canonical report bytes.
///
/// Only the `reports` section is read; a rule module's `.report` suffix is
/// dropped to form its fully qualified name.
pub fn derive_recommendations(
    org_id: OrgId,
    cluster: &str,
    report: &[u8],
    created_at: DateTime<Utc>,
) -> Result<Vec<Recommendation>, StorageError> {
    #[derive(Deserialize)]
    struct HitRules {
        #[serde(default)]
        reports: Option<Vec<ReportItem>>,
    }

    let rules: HitRules = serde_json::from_slice(report)?;
    Ok(rules
        .reports
        .unwrap_or_default()
        .into_iter()
        .map(|hit| {
            let rule_fqdn = hit.rule_fqdn().to_string();
            Recommendation {
                org_id,
                cluster: cluster.to_string(),
                rule_id: hit.rule_selector(),
                rule_fqdn,
                error_key: hit.error_key,
                created_at,
            }
        })
        .collect())
}

/// Key of per-cluster records.
fn cluster_key(org_id: OrgId, cluster: &str) -> String {
    format!("{org_id}/{cluster}")
}
