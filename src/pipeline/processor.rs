//! Message processor: drives one consumed record through the pipeline
//!
//! Parse, check version, check organization, persist. Every outcome is
//! accounted for exactly once: the consumed counter at entry, then either the
//! success or the failure counter with the end-to-end latency. Failures are
//! routed to the audit store and the dead-letter sink before returning.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::persist::{persist, PersistOutcome};
use super::state::{PipelineRun, PipelineState};
use crate::codec::{parse_message, IncomingMessage, MessageIdentity};
use crate::deadletter::{DeadLetterSink, ErrorRouter};
use crate::error::ProcessingError;
use crate::policy::{check_message_version, OrgAllowList, CURRENT_SCHEMA_VERSION};
use crate::storage::ReportStore;
use crate::telemetry::{Stage, StageObserver, Telemetry};
use crate::tracker::{PayloadTracker, TrackerEvent, TrackerStatus};
use crate::types::{BrokerMessage, RequestId, SchemaVersion};

/// Per-processor message counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub consumed: u64,
    pub successful: u64,
    pub failed: u64,
    /// Successful messages whose report was superseded by a newer one
    pub superseded: u64,
}

/// Everything known about one handled message.
#[derive(Debug)]
pub struct ProcessingResult {
    pub request_id: RequestId,
    /// The parsed message, absent when parsing failed
    pub message: Option<IncomingMessage>,
    pub outcome: Result<PersistOutcome, ProcessingError>,
    pub final_state: PipelineState,
    pub history: Vec<PipelineState>,
    pub elapsed: Duration,
}

impl ProcessingResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Per-message pipeline driver.
///
/// Collaborators are shared; the processor itself handles one message at a
/// time and owns its counters.
pub struct MessageProcessor {
    store: Arc<dyn ReportStore>,
    router: ErrorRouter,
    telemetry: Arc<dyn Telemetry>,
    tracker: Option<Arc<dyn PayloadTracker>>,
    allow_list: OrgAllowList,
    schema_version: SchemaVersion,
    stats: ConsumerStats,
}

impl MessageProcessor {
    /// Processor with no dead-letter sink, no tracker and filtering disabled
    pub fn new(store: Arc<dyn ReportStore>, telemetry: Arc<dyn Telemetry>) -> Self {
        Self {
            router: ErrorRouter::new(store.clone(), None),
            store,
            telemetry,
            tracker: None,
            allow_list: OrgAllowList::disabled(),
            schema_version: CURRENT_SCHEMA_VERSION,
            stats: ConsumerStats::default(),
        }
    }

    pub fn with_dead_letter(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.router = ErrorRouter::new(self.store.clone(), Some(sink));
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn PayloadTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_allow_list(mut self, allow_list: OrgAllowList) -> Self {
        self.allow_list = allow_list;
        self
    }

    pub fn with_schema_version(mut self, version: SchemaVersion) -> Self {
        self.schema_version = version;
        self
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    /// Handle one consumed message to a terminal state.
    pub async fn handle_message(&mut self, msg: &BrokerMessage) -> ProcessingResult {
        info!(
            offset = msg.offset(),
            partition = msg.partition(),
            topic = %msg.topic(),
            message_timestamp = %msg.coordinates.timestamp,
            "started processing message"
        );

        self.telemetry.consumed();
        self.stats.consumed += 1;

        let start_time = Utc::now();
        let mut run = PipelineRun::new();
        let (message, outcome) = self.process(msg, &mut run);
        let elapsed = run.elapsed();
        let processed_time = Utc::now();

        let identity = message
            .as_ref()
            .map(MessageIdentity::from)
            .unwrap_or_else(|| MessageIdentity::from_payload(&msg.payload));

        self.track(&identity, start_time, TrackerStatus::Received).await;
        self.track(&identity, processed_time, TrackerStatus::Processed)
            .await;

        info!(
            offset = msg.offset(),
            partition = msg.partition(),
            topic = %msg.topic(),
            "processing of message took '{}' seconds",
            elapsed.as_secs_f64()
        );

        match &outcome {
            Ok(persisted) => {
                advance(&mut run, PipelineState::Completed);
                self.telemetry.succeeded(elapsed);
                self.stats.successful += 1;
                if *persisted == PersistOutcome::ReportSuperseded {
                    self.stats.superseded += 1;
                }
                self.track(&identity, Utc::now(), TrackerStatus::Success)
                    .await;
            }
            Err(err) => {
                run.fail();
                self.telemetry.failed(elapsed);
                self.stats.failed += 1;
                error!(
                    offset = msg.offset(),
                    partition = msg.partition(),
                    topic = %msg.topic(),
                    request_id = %identity.request_id,
                    error = %err,
                    kind = %err.kind(),
                    "Error processing message consumed from broker"
                );
                self.router.route(msg, err);
                self.track(&identity, Utc::now(), TrackerStatus::Error)
                    .await;
            }
        }

        let total = run.elapsed();
        info!(
            duration = total.as_millis() as u64,
            offset = msg.offset(),
            "Message consumed"
        );

        ProcessingResult {
            request_id: identity.request_id,
            message,
            outcome,
            final_state: run.state(),
            history: run.history().to_vec(),
            elapsed: total,
        }
    }

    /// Run the fallible part of the pipeline, advancing `run` on each success.
    fn process(
        &self,
        msg: &BrokerMessage,
        run: &mut PipelineRun,
    ) -> (
        Option<IncomingMessage>,
        Result<PersistOutcome, ProcessingError>,
    ) {
        let mut observer = StageObserver::new(self.telemetry.clone(), msg.offset());

        let message = match parse_message(&msg.payload) {
            Ok(message) => message,
            Err(e) => {
                let identity = MessageIdentity::from_payload(&msg.payload);
                error!(
                    offset = msg.offset(),
                    partition = msg.partition(),
                    topic = %msg.topic(),
                    request_id = %identity.request_id,
                    error = %e,
                    "Error parsing message from broker"
                );
                return (None, Err(e.into()));
            }
        };
        debug!(
            offset = msg.offset(),
            org = message.organization,
            cluster = %message.cluster_name,
            request_id = %message.request_id,
            "Read"
        );
        observer.record(Stage::Read);
        advance(run, PipelineState::Parsed);

        check_message_version(&message, msg, self.schema_version);
        advance(run, PipelineState::Validated);

        if self.allow_list.is_enabled() {
            debug!(org = message.organization, "Checking organization ID against allow list");
        }
        if let Err(e) = self.allow_list.check(message.organization) {
            return (Some(message), Err(e));
        }
        observer.record(Stage::OrgFiltering);
        advance(run, PipelineState::Allowed);

        let outcome = persist(self.store.as_ref(), &message, msg, &mut observer);
        if outcome.is_ok() {
            advance(run, PipelineState::Persisted);
        }
        (Some(message), outcome)
    }

    async fn track(&self, identity: &MessageIdentity, timestamp: DateTime<Utc>, status: TrackerStatus) {
        let Some(tracker) = &self.tracker else {
            return;
        };
        let event = TrackerEvent {
            request_id: identity.request_id.clone(),
            timestamp,
            org_id: identity.organization,
            account: identity.account,
            status,
        };
        if let Err(e) = tracker.track(&event).await {
            warn!(
                request_id = %identity.request_id,
                status = %status,
                error = %e,
                "Unable to send \"{}\" update to payload tracker service",
                status
            );
        }
    }
}

fn advance(run: &mut PipelineRun, to: PipelineState) {
    if let Err(e) = run.advance(to) {
        error!(error = %e, "Pipeline state machine violated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use crate::telemetry::PipelineMetrics;
    use crate::types::MessageCoordinates;

    const CLUSTER: &str = "5d5892d4-1f74-4ccf-91af-548dfc9767aa";

    fn broker_message(offset: i64, payload: &str) -> BrokerMessage {
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

    fn valid_payload(org: u32, last_checked: &str) -> String {
        format!(
            r#"{{"OrgID": {org}, "AccountNumber": 3, "ClusterName": "{CLUSTER}",
                "LastChecked": "{last_checked}", "Version": 2, "RequestId": "r-{org}",
                "Report": {{"fingerprints": [], "info": [], "reports": [], "system": {{}}}}}}"#
        )
    }

    fn processor() -> (MessageProcessor, Arc<InMemoryStore>, Arc<PipelineMetrics>) {
        let store = Arc::new(InMemoryStore::new());
        let metrics = Arc::new(PipelineMetrics::new());
        let processor = MessageProcessor::new(store.clone(), metrics.clone());
        (processor, store, metrics)
    }

    #[tokio::test]
    async fn test_valid_message_completes() {
        let (mut processor, store, metrics) = processor();
        let result = processor
            .handle_message(&broker_message(1, &valid_payload(1, "2021-01-01T00:00:00Z")))
            .await;

        assert!(result.is_success());
        assert_eq!(result.final_state, PipelineState::Completed);
        assert_eq!(result.request_id, "r-1");
        assert_eq!(result.history.len(), 6);
        assert_eq!(store.write_counts().reports, 1);
        assert_eq!(metrics.successful_count(), 1);
        assert_eq!(metrics.stage_histogram(Stage::Read).count(), 1);
        assert_eq!(metrics.stage_histogram(Stage::OrgFiltering).count(), 1);
        assert_eq!(processor.stats().successful, 1);
    }

    #[tokio::test]
    async fn test_parse_failure_keeps_request_id() {
        let (mut processor, store, metrics) = processor();
        let payload = valid_payload(1, "2021-01-01T00:00:00Z").replace(CLUSTER, "not-a-uuid");
        let result = processor.handle_message(&broker_message(2, &payload)).await;

        assert_eq!(result.final_state, PipelineState::Failed);
        assert_eq!(result.request_id, "r-1");
        assert!(result.message.is_none());
        assert_eq!(
            result.history,
            vec![PipelineState::Received, PipelineState::Failed]
        );
        assert_eq!(store.write_counts().consumer_errors, 1);
        assert_eq!(metrics.failed_count(), 1);
        assert_eq!(metrics.consumed_count(), 1);
    }

    #[tokio::test]
    async fn test_org_not_allowed() {
        let (processor, store, _) = processor();
        let mut processor =
            processor.with_allow_list(OrgAllowList::enabled(Some([5].into_iter().collect())));

        let result = processor
            .handle_message(&broker_message(3, &valid_payload(1, "2021-01-01T00:00:00Z")))
            .await;

        assert!(matches!(
            result.outcome,
            Err(ProcessingError::OrganizationNotAllowed(1))
        ));
        assert_eq!(
            result.history.last().copied(),
            Some(PipelineState::Failed)
        );
        assert_eq!(
            result.history[result.history.len() - 2],
            PipelineState::Validated
        );
        assert_eq!(store.write_counts().reports, 0);
    }

    #[tokio::test]
    async fn test_version_mismatch_is_not_fatal() {
        let (processor, _, _) = processor();
        let mut processor = processor.with_schema_version(1);

        let result = processor
            .handle_message(&broker_message(4, &valid_payload(1, "2021-01-01T00:00:00Z")))
            .await;
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn test_superseded_report_is_success() {
        let (mut processor, store, _) = processor();
        let payload = valid_payload(1, "2021-01-01T00:00:00Z");

        processor.handle_message(&broker_message(5, &payload)).await;
        let replay = processor.handle_message(&broker_message(5, &payload)).await;

        assert!(matches!(replay.outcome, Ok(PersistOutcome::ReportSuperseded)));
        assert_eq!(replay.final_state, PipelineState::Completed);
        assert_eq!(store.write_counts().recommendations, 1);
        assert_eq!(processor.stats().superseded, 1);
    }
}
