//! Durable report store on Sled DB
//!
//! One named tree per record kind, keyed by `org/cluster` (or by message
//! coordinates for consumer errors). Values are JSON.
//!
//! The recency check and the write happen inside a single sled transaction so
//! two workers racing on the same cluster cannot regress it.

use chrono::{DateTime, Utc};
use sled::transaction::ConflictableTransactionError;
use sled::Tree;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    cluster_key, derive_recommendations, ConsumerErrorRecord, Recommendation, ReportStore,
    ReportWrite, StorageError, StoredInfoReport, StoredReport, WriteOutcome,
};
use crate::types::{BrokerMessage, InfoItem, OrgId};

const REPORTS_TREE: &str = "reports";
const RECOMMENDATIONS_TREE: &str = "recommendations";
const INFO_REPORTS_TREE: &str = "info_reports";
const CONSUMER_ERRORS_TREE: &str = "consumer_errors";

/// Sled-backed [`ReportStore`]
#[derive(Clone)]
pub struct SledStore {
    db: Arc<sled::Db>,
    reports: Tree,
    recommendations: Tree,
    info_reports: Tree,
    consumer_errors: Tree,
}

impl SledStore {
    /// Open or create the store at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        let db = sled::open(path_ref)?;
        let store = Self {
            reports: db.open_tree(REPORTS_TREE)?,
            recommendations: db.open_tree(RECOMMENDATIONS_TREE)?,
            info_reports: db.open_tree(INFO_REPORTS_TREE)?,
            consumer_errors: db.open_tree(CONSUMER_ERRORS_TREE)?,
            db: Arc::new(db),
        };

        info!(
            path = %path_ref.display(),
            reports = store.reports.len(),
            consumer_errors = store.consumer_errors.len(),
            "Report store opened"
        );

        Ok(store)
    }

    /// Read the stored report of a cluster
    pub fn read_report(
        &self,
        org_id: OrgId,
        cluster: &str,
    ) -> Result<Option<StoredReport>, StorageError> {
        self.read(&self.reports, &cluster_key(org_id, cluster))
    }

    /// Read the current recommendations of a cluster (empty when none stored)
    pub fn read_recommendations(
        &self,
        org_id: OrgId,
        cluster: &str,
    ) -> Result<Vec<Recommendation>, StorageError> {
        Ok(self
            .read(&self.recommendations, &cluster_key(org_id, cluster))?
            .unwrap_or_default())
    }

    /// Read the stored info report of a cluster
    pub fn read_info_report(
        &self,
        org_id: OrgId,
        cluster: &str,
    ) -> Result<Option<StoredInfoReport>, StorageError> {
        self.read(&self.info_reports, &cluster_key(org_id, cluster))
    }

    /// All recorded consumer errors, oldest coordinates first
    pub fn consumer_errors(&self) -> Result<Vec<ConsumerErrorRecord>, StorageError> {
        self.consumer_errors
            .iter()
            .map(|item| {
                let (_key, value) = item?;
                Ok(serde_json::from_slice(&value)?)
            })
            .collect()
    }

    /// Number of clusters with a stored report
    pub fn report_count(&self) -> usize {
        self.reports.len()
    }

    /// Number of recorded consumer errors
    pub fn consumer_error_count(&self) -> usize {
        self.consumer_errors.len()
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    fn read<T: serde::de::DeserializeOwned>(
        &self,
        tree: &Tree,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        match tree.get(key.as_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }
}

/// Decode a stored value inside a transaction, aborting on corruption.
fn decode<T: serde::de::DeserializeOwned>(
    bytes: &[u8],
) -> Result<T, ConflictableTransactionError<StorageError>> {
    serde_json::from_slice(bytes)
        .map_err(|e| ConflictableTransactionError::Abort(StorageError::from(e)))
}

impl ReportStore for SledStore {
    fn write_report(&self, write: &ReportWrite<'_>) -> Result<WriteOutcome, StorageError> {
        let key = cluster_key(write.org_id, write.cluster);
        let value = serde_json::to_vec(&StoredReport::from_write(write))?;

        let outcome = self.reports.transaction(|tree| {
            if let Some(existing) = tree.get(key.as_bytes())? {
                let existing: StoredReport = decode(&existing)?;
                if existing.supersedes(write.last_checked) {
                    return Ok(WriteOutcome::Stale);
                }
            }
            tree.insert(key.as_bytes(), value.as_slice())?;
            Ok(WriteOutcome::Stored)
        })?;

        debug!(key = %key, outcome = ?outcome, "Report write");
        Ok(outcome)
    }

    fn write_recommendations(
        &self,
        org_id: OrgId,
        cluster: &str,
        report: &[u8],
        stored_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let recommendations = derive_recommendations(org_id, cluster, report, stored_at)?;
        let value = serde_json::to_vec(&recommendations)?;
        self.recommendations
            .insert(cluster_key(org_id, cluster).as_bytes(), value)?;

        debug!(
            org_id,
            cluster,
            count = recommendations.len(),
            "Recommendations replaced"
        );
        Ok(())
    }

    fn write_info_report(
        &self,
        org_id: OrgId,
        cluster: &str,
        info: &[InfoItem],
        stored_at: DateTime<Utc>,
    ) -> Result<WriteOutcome, StorageError> {
        let key = cluster_key(org_id, cluster);
        let value = serde_json::to_vec(&StoredInfoReport {
            org_id,
            cluster: cluster.to_string(),
            info: info.to_vec(),
            stored_at,
        })?;

        let outcome = self.info_reports.transaction(|tree| {
            if let Some(existing) = tree.get(key.as_bytes())? {
                let existing: StoredInfoReport = decode(&existing)?;
                if existing.supersedes(stored_at) {
                    return Ok(WriteOutcome::Stale);
                }
            }
            tree.insert(key.as_bytes(), value.as_slice())?;
            Ok(WriteOutcome::Stored)
        })?;

        Ok(outcome)
    }

    fn write_consumer_error(
        &self,
        message: &BrokerMessage,
        error: &dyn std::error::Error,
    ) -> Result<(), StorageError> {
        let record = ConsumerErrorRecord::new(message, error);
        let value = serde_json::to_vec(&record)?;
        self.consumer_errors
            .insert(message.coordinates.key().as_bytes(), value)?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageCoordinates;
    use chrono::Duration;

    const CLUSTER: &str = "5d5892d4-1f74-4ccf-91af-548dfc9767aa";
    const REPORT: &[u8] =
        br#"{"fingerprints":[],"info":[],"reports":[{"component":"rule.report","key":"EK"}],"system":{}}"#;

    fn write_at(store: &SledStore, last_checked: DateTime<Utc>) -> WriteOutcome {
        store
            .write_report(&ReportWrite {
                org_id: 1,
                cluster: CLUSTER,
                report: REPORT,
                hits: &[],
                last_checked,
                gathered_at: None,
                stored_at: Utc::now(),
                offset: 5,
            })
            .unwrap()
    }

    #[test]
    fn test_store_and_read_report() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(temp_dir.path()).unwrap();
        let checked = Utc::now() - Duration::hours(1);

        assert_eq!(write_at(&store, checked), WriteOutcome::Stored);

        let stored = store.read_report(1, CLUSTER).unwrap().unwrap();
        assert_eq!(stored.last_checked_at, checked);
        assert_eq!(stored.kafka_offset, 5);
        assert_eq!(store.report_count(), 1);
    }

    #[test]
    fn test_older_or_equal_report_is_stale() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(temp_dir.path()).unwrap();
        let checked = Utc::now() - Duration::hours(1);

        assert_eq!(write_at(&store, checked), WriteOutcome::Stored);
        assert_eq!(write_at(&store, checked), WriteOutcome::Stale);
        assert_eq!(
            write_at(&store, checked - Duration::minutes(5)),
            WriteOutcome::Stale
        );
        assert_eq!(
            write_at(&store, checked + Duration::minutes(5)),
            WriteOutcome::Stored
        );

        let stored = store.read_report(1, CLUSTER).unwrap().unwrap();
        assert_eq!(stored.last_checked_at, checked + Duration::minutes(5));
    }

    #[test]
    fn test_recommendations_replace_previous_set() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(temp_dir.path()).unwrap();

        store
            .write_recommendations(1, CLUSTER, REPORT, Utc::now())
            .unwrap();
        let recs = store.read_recommendations(1, CLUSTER).unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].rule_id, "rule|EK");

        let empty = br#"{"fingerprints":[],"info":[],"reports":[],"system":{}}"#;
        store
            .write_recommendations(1, CLUSTER, empty, Utc::now())
            .unwrap();
        assert!(store.read_recommendations(1, CLUSTER).unwrap().is_empty());
    }

    #[test]
    fn test_info_report_freshness() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(temp_dir.path()).unwrap();
        let now = Utc::now();

        assert_eq!(
            store.write_info_report(1, CLUSTER, &[], now).unwrap(),
            WriteOutcome::Stored
        );
        assert_eq!(
            store
                .write_info_report(1, CLUSTER, &[], now - Duration::seconds(1))
                .unwrap(),
            WriteOutcome::Stale
        );
        assert_eq!(
            store
                .write_info_report(1, CLUSTER, &[], now + Duration::seconds(1))
                .unwrap(),
            WriteOutcome::Stored
        );
    }

    #[test]
    fn test_consumer_errors_survive_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let message = BrokerMessage::new(
            MessageCoordinates {
                topic: "reports".to_string(),
                partition: 0,
                offset: 42,
                timestamp: Utc::now(),
            },
            b"garbage".to_vec(),
        );

        {
            let store = SledStore::open(temp_dir.path()).unwrap();
            let err = std::io::Error::new(std::io::ErrorKind::InvalidData, "bad payload");
            store.write_consumer_error(&message, &err).unwrap();
            store.flush().unwrap();
        }

        let store = SledStore::open(temp_dir.path()).unwrap();
        let errors = store.consumer_errors().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].offset, 42);
        assert_eq!(errors[0].error, "bad payload");
    }
}
