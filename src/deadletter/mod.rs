//! Error and dead-letter routing
//!
//! When a message fails, [`ErrorRouter::route`] records it in the store's audit
//! table and, when a sink is configured, forwards the untouched message to the
//! dead-letter channel. Both actions are attempted independently; their
//! failures are logged and absorbed so the original error stays the outcome.

mod queue;

pub use queue::{DeadLetterEntry, DeadLetterQueue, DEFAULT_MAX_QUEUE_SIZE};

use std::sync::Arc;
use tracing::{debug, error};

use crate::error::ProcessingError;
use crate::storage::ReportStore;
use crate::types::BrokerMessage;

/// Dead-letter errors
#[derive(Debug, thiserror::Error)]
pub enum DeadLetterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Destination of messages that could not be processed.
pub trait DeadLetterSink: Send + Sync {
    /// Forward the message unchanged
    fn send(&self, message: &BrokerMessage) -> Result<(), DeadLetterError>;

    /// Sink name for logging
    fn name(&self) -> &'static str;
}

/// Best-effort failure router.
#[derive(Clone)]
pub struct ErrorRouter {
    store: Arc<dyn ReportStore>,
    dead_letter: Option<Arc<dyn DeadLetterSink>>,
}

impl ErrorRouter {
    pub fn new(store: Arc<dyn ReportStore>, dead_letter: Option<Arc<dyn DeadLetterSink>>) -> Self {
        Self { store, dead_letter }
    }

    /// Audit the failure and dead-letter the message. Never fails.
    pub fn route(&self, message: &BrokerMessage, err: &ProcessingError) {
        if let Err(e) = self.store.write_consumer_error(message, err) {
            error!(
                offset = message.offset(),
                partition = message.partition(),
                topic = %message.topic(),
                error = %e,
                "Unable to write consumer error to storage"
            );
        }

        let Some(sink) = &self.dead_letter else {
            return;
        };
        match sink.send(message) {
            Ok(()) => debug!(
                offset = message.offset(),
                sink = sink.name(),
                "Message sent to dead-letter channel"
            ),
            Err(e) => error!(
                offset = message.offset(),
                partition = message.partition(),
                topic = %message.topic(),
                sink = sink.name(),
                error = %e,
                "Unable to send message to dead-letter channel"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ParseError;
    use crate::storage::{InMemoryStore, ReportWrite, StorageError, WriteOutcome};
    use crate::types::{InfoItem, MessageCoordinates, OrgId};
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSink {
        sent: AtomicUsize,
        fail: bool,
    }

    impl DeadLetterSink for CountingSink {
        fn send(&self, _message: &BrokerMessage) -> Result<(), DeadLetterError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(std::io::Error::other("broker unavailable").into());
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    struct BrokenStore;

    impl ReportStore for BrokenStore {
        fn write_report(&self, _: &ReportWrite<'_>) -> Result<WriteOutcome, StorageError> {
            Err(StorageError::Database("down".into()))
        }
        fn write_recommendations(
            &self,
            _: OrgId,
            _: &str,
            _: &[u8],
            _: DateTime<Utc>,
        ) -> Result<(), StorageError> {
            Err(StorageError::Database("down".into()))
        }
        fn write_info_report(
            &self,
            _: OrgId,
            _: &str,
            _: &[InfoItem],
            _: DateTime<Utc>,
        ) -> Result<WriteOutcome, StorageError> {
            Err(StorageError::Database("down".into()))
        }
        fn write_consumer_error(
            &self,
            _: &BrokerMessage,
            _: &dyn std::error::Error,
        ) -> Result<(), StorageError> {
            Err(StorageError::Database("down".into()))
        }
        fn backend_name(&self) -> &'static str {
            "broken"
        }
    }

    fn message() -> BrokerMessage {
        BrokerMessage::new(
            MessageCoordinates {
                topic: "reports".to_string(),
                partition: 0,
                offset: 3,
                timestamp: Utc::now(),
            },
            b"{}".to_vec(),
        )
    }

    fn failure() -> ProcessingError {
        ParseError::MissingField("OrgID").into()
    }

    #[test]
    fn test_routes_to_store_and_sink() {
        let store = Arc::new(InMemoryStore::new());
        let sink = Arc::new(CountingSink::default());
        let router = ErrorRouter::new(store.clone(), Some(sink.clone()));

        router.route(&message(), &failure());

        assert_eq!(store.write_counts().consumer_errors, 1);
        assert_eq!(sink.sent.load(Ordering::SeqCst), 1);
        let errors = store.consumer_errors().unwrap();
        assert_eq!(errors[0].error, "missing required attribute 'OrgID'");
    }

    #[test]
    fn test_without_sink_only_audits() {
        let store = Arc::new(InMemoryStore::new());
        let router = ErrorRouter::new(store.clone(), None);

        router.route(&message(), &failure());
        assert_eq!(store.write_counts().consumer_errors, 1);
    }

    #[test]
    fn test_failures_are_absorbed_independently() {
        let sink = Arc::new(CountingSink {
            sent: AtomicUsize::new(0),
            fail: true,
        });
        let router = ErrorRouter::new(Arc::new(BrokenStore), Some(sink.clone()));

        router.route(&message(), &failure());

        // The sink is still attempted after the store failed
        assert_eq!(sink.sent.load(Ordering::SeqCst), 1);
    }
}
