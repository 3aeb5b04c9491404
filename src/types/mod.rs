//! Shared data structures for the report ingestion pipeline
//!
//! - Identifiers exchanged with the broker and the store (`OrgId`, `ClusterName`, ...)
//! - `BrokerMessage`: one consumed record plus its coordinates
//! - `ReportItem` / `InfoItem`: rule findings carried inside a report

mod message;
mod report;

pub use message::*;
pub use report::*;

/// Organization (tenant) identifier.
pub type OrgId = u32;

/// Account number attached to a report, if any.
pub type AccountNumber = u32;

/// Cluster identifier in UUID form, e.g. `c8590f31-e97e-4b85-b506-c45ce1911a12`.
pub type ClusterName = String;

/// Request identifier supplied by the producer. Empty means "no request id".
pub type RequestId = String;

/// Version of the incoming message schema.
pub type SchemaVersion = u8;

/// Broker offset of a consumed record.
pub type KafkaOffset = i64;

/// Rule identifier (rule module path).
pub type RuleId = String;

/// Error key of a rule hit.
pub type ErrorKey = String;
