//! Ordered persistence of a validated message
//!
//! Steps run in a fixed order and each depends on the previous one:
//!
//! 1. marshal the report to canonical bytes
//! 2. parse `LastChecked` and record the lag
//! 3. write the report (a stale report ends processing here)
//! 4. replace the recommendations
//! 5. write the info report (a stale one is skipped)
//!
//! Earlier writes are not rolled back when a later one fails.

use chrono::{DateTime, SubsecRound, Utc};
use tracing::{info, warn};

use crate::codec::IncomingMessage;
use crate::error::ProcessingError;
use crate::storage::{ReportStore, ReportWrite, WriteOutcome};
use crate::telemetry::{Stage, StageObserver};
use crate::types::BrokerMessage;

/// How far persistence went for a successfully handled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// All three writes done
    Stored,
    /// Report and recommendations stored; a newer info report was kept
    InfoReportSuperseded,
    /// A newer report already exists; nothing was written
    ReportSuperseded,
}

/// Parse a `LastChecked` value (RFC 3339, fractional seconds allowed).
pub fn parse_last_checked(value: &str) -> Result<DateTime<Utc>, ProcessingError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|source| ProcessingError::InvalidTimestamp {
            value: value.to_string(),
            source,
        })
}

/// Minutes elapsed since `last_checked`; negative when it lies in the future.
#[allow(clippy::cast_precision_loss)]
pub fn lag_minutes(last_checked: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - last_checked).num_milliseconds() as f64 / 60_000.0
}

/// Run the write sequence for one message.
pub fn persist(
    store: &dyn ReportStore,
    message: &IncomingMessage,
    broker_message: &BrokerMessage,
    observer: &mut StageObserver,
) -> Result<PersistOutcome, ProcessingError> {
    let org_id = message.organization;
    let cluster = message.cluster_name.as_str();
    let offset = broker_message.offset();

    let report_bytes = observer
        .observe(Stage::Marshalling, || serde_json::to_vec(&message.report))
        .map_err(ProcessingError::Serialization)?;

    let last_checked = observer.observe(Stage::TimeCheck, || {
        let last_checked = parse_last_checked(&message.last_checked)?;
        let lag = lag_minutes(last_checked, Utc::now());
        if lag < 0.0 {
            warn!(
                offset,
                org = org_id,
                cluster,
                last_checked = %message.last_checked,
                "Got a message from the future"
            );
        }
        Ok::<_, ProcessingError>((last_checked, lag))
    });
    let (last_checked, lag) = last_checked?;
    observer.telemetry().last_checked_lag(lag);

    let stored_at = Utc::now();
    let outcome = observer
        .observe(Stage::DbStoreReport, || {
            store.write_report(&ReportWrite {
                org_id,
                cluster,
                report: &report_bytes,
                hits: &message.parsed_hits,
                last_checked,
                gathered_at: message.metadata.gathered_at,
                stored_at,
                offset,
            })
        })
        .map_err(|e| ProcessingError::store("report", e))?;

    if outcome == WriteOutcome::Stale {
        info!(
            offset,
            org = org_id,
            cluster,
            "Skipping because a more recent report already exists for this cluster"
        );
        return Ok(PersistOutcome::ReportSuperseded);
    }
    info!(offset, org = org_id, cluster, "Stored report");

    observer
        .observe(Stage::DbStoreRecommendations, || {
            store.write_recommendations(
                org_id,
                cluster,
                &report_bytes,
                Utc::now().trunc_subsecs(0),
            )
        })
        .map_err(|e| ProcessingError::store("recommendations", e))?;
    info!(offset, org = org_id, cluster, "Stored recommendations");
    log_cluster_info(message);

    let info_outcome = observer
        .observe(Stage::DbStoreInfoReport, || {
            store.write_info_report(org_id, cluster, &message.parsed_info, Utc::now())
        })
        .map_err(|e| ProcessingError::store("info report", e))?;

    if info_outcome == WriteOutcome::Stale {
        info!(
            offset,
            org = org_id,
            cluster,
            "Skipping because a more recent info report already exists for this cluster"
        );
        return Ok(PersistOutcome::InfoReportSuperseded);
    }
    info!(offset, org = org_id, cluster, "Stored info report");

    Ok(PersistOutcome::Stored)
}

fn log_cluster_info(message: &IncomingMessage) {
    info!(
        org = message.organization,
        cluster = %message.cluster_name,
        hits = message.parsed_hits.len(),
        info_rules = message.parsed_info.len(),
        "Cluster report processed"
    );
}
