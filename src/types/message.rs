//! Broker record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::KafkaOffset;

/// Position of a record in the broker: topic, partition, offset and the
/// broker-assigned timestamp.
///
/// Only used for logging, telemetry keys, audit records and dead-letter naming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCoordinates {
    pub topic: String,
    pub partition: i32,
    pub offset: KafkaOffset,
    pub timestamp: DateTime<Utc>,
}

impl MessageCoordinates {
    /// Stable textual key, `topic/partition/offset` (zero padded so keys sort).
    pub fn key(&self) -> String {
        format!("{}/{:05}/{:020}", self.topic, self.partition, self.offset)
    }
}

impl std::fmt::Display for MessageCoordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "topic={} partition={} offset={}",
            self.topic, self.partition, self.offset
        )
    }
}

/// One consumed record: opaque payload plus coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerMessage {
    pub coordinates: MessageCoordinates,
    /// Record key, if the producer set one
    #[serde(default)]
    pub key: Option<Vec<u8>>,
    /// Raw payload bytes, never modified by the pipeline
    pub payload: Vec<u8>,
}

impl BrokerMessage {
    pub fn new(coordinates: MessageCoordinates, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            coordinates,
            key: None,
            payload: payload.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.coordinates.topic
    }

    pub fn partition(&self) -> i32 {
        self.coordinates.partition
    }

    pub fn offset(&self) -> KafkaOffset {
        self.coordinates.offset
    }
}
