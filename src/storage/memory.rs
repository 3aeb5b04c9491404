//! In-memory report store
//!
//! Thread-safe maps with the same recency rules as the durable backend. Used in
//! tests and when running the consumer without persistence.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use super::{
    cluster_key, derive_recommendations, ConsumerErrorRecord, Recommendation, ReportStore,
    ReportWrite, StorageError, StoredInfoReport, StoredReport, WriteOutcome,
};
use crate::types::{BrokerMessage, InfoItem, OrgId};

/// Number of write calls received per operation, stale ones included.
#[derive(Debug, Default)]
pub struct WriteCounts {
    pub reports: AtomicU64,
    pub recommendations: AtomicU64,
    pub info_reports: AtomicU64,
    pub consumer_errors: AtomicU64,
}

/// Plain snapshot of [`WriteCounts`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCountsSnapshot {
    pub reports: u64,
    pub recommendations: u64,
    pub info_reports: u64,
    pub consumer_errors: u64,
}

impl WriteCounts {
    pub fn snapshot(&self) -> WriteCountsSnapshot {
        WriteCountsSnapshot {
            reports: self.reports.load(Ordering::Relaxed),
            recommendations: self.recommendations.load(Ordering::Relaxed),
            info_reports: self.info_reports.load(Ordering::Relaxed),
            consumer_errors: self.consumer_errors.load(Ordering::Relaxed),
        }
    }
}

/// In-memory [`ReportStore`]
#[derive(Debug, Default)]
pub struct InMemoryStore {
    reports: RwLock<HashMap<String, StoredReport>>,
    recommendations: RwLock<HashMap<String, Vec<Recommendation>>>,
    info_reports: RwLock<HashMap<String, StoredInfoReport>>,
    consumer_errors: RwLock<Vec<ConsumerErrorRecord>>,
    counts: WriteCounts,
}

fn poisoned<T>(err: std::sync::PoisonError<T>) -> StorageError {
    StorageError::Database(err.to_string())
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_counts(&self) -> WriteCountsSnapshot {
        self.counts.snapshot()
    }

    pub fn read_report(
        &self,
        org_id: OrgId,
        cluster: &str,
    ) -> Result<Option<StoredReport>, StorageError> {
        let reports = self.reports.read().map_err(poisoned)?;
        Ok(reports.get(&cluster_key(org_id, cluster)).cloned())
    }

    pub fn read_recommendations(
        &self,
        org_id: OrgId,
        cluster: &str,
    ) -> Result<Vec<Recommendation>, StorageError> {
        let recommendations = self.recommendations.read().map_err(poisoned)?;
        Ok(recommendations
            .get(&cluster_key(org_id, cluster))
            .cloned()
            .unwrap_or_default())
    }

    pub fn read_info_report(
        &self,
        org_id: OrgId,
        cluster: &str,
    ) -> Result<Option<StoredInfoReport>, StorageError> {
        let info = self.info_reports.read().map_err(poisoned)?;
        Ok(info.get(&cluster_key(org_id, cluster)).cloned())
    }

    pub fn consumer_errors(&self) -> Result<Vec<ConsumerErrorRecord>, StorageError> {
        Ok(self.consumer_errors.read().map_err(poisoned)?.clone())
    }
}

impl ReportStore for InMemoryStore {
    fn write_report(&self, write: &ReportWrite<'_>) -> Result<WriteOutcome, StorageError> {
        self.counts.reports.fetch_add(1, Ordering::Relaxed);

        let mut reports = self.reports.write().map_err(poisoned)?;
        let key = cluster_key(write.org_id, write.cluster);
        if reports
            .get(&key)
            .is_some_and(|existing| existing.supersedes(write.last_checked))
        {
            return Ok(WriteOutcome::Stale);
        }

        reports.insert(key, StoredReport::from_write(write));
        Ok(WriteOutcome::Stored)
    }

    fn write_recommendations(
        &self,
        org_id: OrgId,
        cluster: &str,
        report: &[u8],
        stored_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.counts.recommendations.fetch_add(1, Ordering::Relaxed);

        let derived = derive_recommendations(org_id, cluster, report, stored_at)?;
        self.recommendations
            .write()
            .map_err(poisoned)?
            .insert(cluster_key(org_id, cluster), derived);
        Ok(())
    }

    fn write_info_report(
        &self,
        org_id: OrgId,
        cluster: &str,
        info: &[InfoItem],
        stored_at: DateTime<Utc>,
    ) -> Result<WriteOutcome, StorageError> {
        self.counts.info_reports.fetch_add(1, Ordering::Relaxed);

        let mut info_reports = self.info_reports.write().map_err(poisoned)?;
        let key = cluster_key(org_id, cluster);
        if info_reports
            .get(&key)
            .is_some_and(|existing| existing.supersedes(stored_at))
        {
            return Ok(WriteOutcome::Stale);
        }

        info_reports.insert(
            key,
            StoredInfoReport {
                org_id,
                cluster: cluster.to_string(),
                info: info.to_vec(),
                stored_at,
            },
        );
        Ok(WriteOutcome::Stored)
    }

    fn write_consumer_error(
        &self,
        message: &BrokerMessage,
        error: &dyn std::error::Error,
    ) -> Result<(), StorageError> {
        self.counts.consumer_errors.fetch_add(1, Ordering::Relaxed);

        self.consumer_errors
            .write()
            .map_err(poisoned)?
            .push(ConsumerErrorRecord::new(message, error));
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}
