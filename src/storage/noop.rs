//! Store that accepts and discards every write

use chrono::{DateTime, Utc};

use super::{ReportStore, ReportWrite, StorageError, WriteOutcome};
use crate::types::{BrokerMessage, InfoItem, OrgId};

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStore;

impl ReportStore for NoopStore {
    fn write_report(&self, _write: &ReportWrite<'_>) -> Result<WriteOutcome, StorageError> {
        Ok(WriteOutcome::Stored)
    }

    fn write_recommendations(
        &self,
        _org_id: OrgId,
        _cluster: &str,
        _report: &[u8],
        _stored_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        Ok(())
    }

    fn write_info_report(
        &self,
        _org_id: OrgId,
        _cluster: &str,
        _info: &[InfoItem],
        _stored_at: DateTime<Utc>,
    ) -> Result<WriteOutcome, StorageError> {
        Ok(WriteOutcome::Stored)
    }

    fn write_consumer_error(
        &self,
        _message: &BrokerMessage,
        _error: &dyn std::error::Error,
    ) -> Result<(), StorageError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_never_reports_stale() {
        let store = NoopStore;
        let now = Utc::now();
        let write = ReportWrite {
            org_id: 1,
            cluster: "c",
            report: b"{}",
            hits: &[],
            last_checked: now,
            gathered_at: None,
            stored_at: now,
            offset: 0,
        };
        assert_eq!(store.write_report(&write).unwrap(), WriteOutcome::Stored);
        assert_eq!(store.write_report(&write).unwrap(), WriteOutcome::Stored);
        assert_eq!(
            store.write_info_report(1, "c", &[], now).unwrap(),
            WriteOutcome::Stored
        );
    }
}
