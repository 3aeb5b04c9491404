//! report-ingest: cluster analysis report ingestion
//!
//! Consumes broker records carrying rule-engine reports, validates them and
//! persists report, recommendations and informational report per
//! (organization, cluster). Poison messages are audited and dead-lettered.
//!
//! ## Architecture
//!
//! - **Codec**: strict decoding of the message envelope and report body
//! - **Policy**: schema version and organization allow-list checks
//! - **Pipeline**: per-message state machine driving parse, checks and writes
//! - **Storage**: `ReportStore` backends (sled, in-memory, no-op)
//! - **Dead letter**: failure audit plus an on-disk dead-letter queue
//! - **Telemetry**: Prometheus metrics, stage timings and the payload tracker

pub mod api;
pub mod codec;
pub mod config;
pub mod deadletter;
pub mod error;
pub mod pipeline;
pub mod policy;
pub mod storage;
pub mod telemetry;
pub mod tracker;
pub mod types;

pub use codec::{parse_message, IncomingMessage, MessageIdentity, ParseError};
pub use config::ConsumerConfig;
pub use error::{ErrorKind, ProcessingError};
pub use pipeline::{
    ConsumerStats, MessageProcessor, PersistOutcome, PipelineState, ProcessingLoop,
    ProcessingResult,
};
pub use storage::{ReportStore, StorageError, WriteOutcome};
pub use types::{BrokerMessage, MessageCoordinates};
