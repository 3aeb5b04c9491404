//! Message source abstraction.
//!
//! The broker client lives outside this crate; the processing loop only needs
//! something that yields [`BrokerMessage`]s. Two sources ship here: a
//! line-oriented reader (stdin or a file, one JSON payload per line) and an
//! in-memory replay.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::types::{BrokerMessage, KafkaOffset, MessageCoordinates};

/// Events produced by a message source.
#[derive(Debug)]
pub enum SourceEvent {
    /// A record was consumed.
    Message(BrokerMessage),
    /// No more data will arrive.
    Eof,
}

/// Trait abstracting where consumed records come from.
///
/// The processing loop calls [`next_message`](MessageSource::next_message)
/// in a `select!` with cancellation.
#[async_trait]
pub trait MessageSource: Send {
    /// Read the next record.
    ///
    /// Returns `Err` on unrecoverable errors.
    async fn next_message(&mut self) -> Result<SourceEvent>;

    /// Human-readable name for logging.
    fn source_name(&self) -> &str;
}

// ============================================================================
// Line Source (stdin / file)
// ============================================================================

/// Reads newline-delimited payloads from an async reader.
///
/// Every non-blank line becomes one record on partition 0 of the configured
/// topic, with sequential offsets starting at `first_offset`. Payloads are
/// passed through as raw bytes, so malformed lines (invalid UTF-8 included)
/// reach the pipeline and fail there.
pub struct LineSource<R> {
    reader: R,
    topic: String,
    next_offset: KafkaOffset,
    line_buffer: Vec<u8>,
    name: String,
}

impl<R: AsyncBufRead + Unpin + Send> LineSource<R> {
    pub fn new(reader: R, topic: &str, name: &str) -> Self {
        Self {
            reader,
            topic: topic.to_string(),
            next_offset: 0,
            line_buffer: Vec::with_capacity(4096),
            name: name.to_string(),
        }
    }

    pub fn with_first_offset(mut self, offset: KafkaOffset) -> Self {
        self.next_offset = offset;
        self
    }
}

impl LineSource<tokio::io::BufReader<tokio::io::Stdin>> {
    pub fn stdin(topic: &str) -> Self {
        Self::new(tokio::io::BufReader::new(tokio::io::stdin()), topic, "stdin")
    }
}

impl LineSource<tokio::io::BufReader<tokio::fs::File>> {
    pub async fn open(path: &std::path::Path, topic: &str) -> Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Self::new(
            tokio::io::BufReader::new(file),
            topic,
            &path.display().to_string(),
        ))
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> MessageSource for LineSource<R> {
    async fn next_message(&mut self) -> Result<SourceEvent> {
        loop {
            self.line_buffer.clear();
            let bytes = self
                .reader
                .read_until(b'\n', &mut self.line_buffer)
                .await?;
            if bytes == 0 {
                return Ok(SourceEvent::Eof);
            }
            let line = self.line_buffer.trim_ascii();
            if line.is_empty() {
                continue;
            }

            let coordinates = MessageCoordinates {
                topic: self.topic.clone(),
                partition: 0,
                offset: self.next_offset,
                timestamp: Utc::now(),
            };
            self.next_offset += 1;
            return Ok(SourceEvent::Message(BrokerMessage::new(
                coordinates,
                line.to_vec(),
            )));
        }
    }

    fn source_name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Replay Source
// ============================================================================

/// Replays pre-built records, e.g. drained from the dead-letter queue.
pub struct ReplaySource {
    messages: std::vec::IntoIter<BrokerMessage>,
}

impl ReplaySource {
    pub fn new(messages: Vec<BrokerMessage>) -> Self {
        Self {
            messages: messages.into_iter(),
        }
    }
}

#[async_trait]
impl MessageSource for ReplaySource {
    async fn next_message(&mut self) -> Result<SourceEvent> {
        Ok(match self.messages.next() {
            Some(message) => SourceEvent::Message(message),
            None => SourceEvent::Eof,
        })
    }

    fn source_name(&self) -> &str {
        "replay"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_line_source_assigns_offsets_and_skips_blank_lines() {
        let input: &[u8] = b"{\"a\":1}\n\n   \nnot json\n{\"b\":2}";
        let mut source = LineSource::new(input, "reports", "test").with_first_offset(10);

        let mut offsets = Vec::new();
        let mut payloads = Vec::new();
        while let SourceEvent::Message(msg) = source.next_message().await.unwrap() {
            offsets.push(msg.offset());
            payloads.push(String::from_utf8(msg.payload).unwrap());
            assert_eq!(msg.coordinates.topic, "reports");
        }

        assert_eq!(offsets, vec![10, 11, 12]);
        assert_eq!(payloads, vec!["{\"a\":1}", "not json", "{\"b\":2}"]);
        // Exhausted sources keep returning Eof
        assert!(matches!(source.next_message().await.unwrap(), SourceEvent::Eof));
    }

    #[tokio::test]
    async fn test_line_source_passes_invalid_utf8_through() {
        let input: &[u8] = b"{\"a\":1}\n\xff\xfe garbage \r\n{\"b\":2}\n";
        let mut source = LineSource::new(input, "t", "test");

        let mut payloads = Vec::new();
        while let SourceEvent::Message(msg) = source.next_message().await.unwrap() {
            payloads.push(msg.payload);
        }

        assert_eq!(
            payloads,
            vec![
                b"{\"a\":1}".to_vec(),
                b"\xff\xfe garbage".to_vec(),
                b"{\"b\":2}".to_vec(),
            ]
        );
    }

    #[tokio::test]
    async fn test_line_source_read_error_is_returned() {
        let reader = tokio_test::io::Builder::new()
            .read(b"{}\n")
            .read_error(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut source = LineSource::new(tokio::io::BufReader::new(reader), "t", "mock");

        assert!(matches!(
            source.next_message().await.unwrap(),
            SourceEvent::Message(_)
        ));
        assert!(source.next_message().await.is_err());
    }

    #[tokio::test]
    async fn test_line_source_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.jsonl");
        tokio::fs::write(&path, "{}\n{}\n").await.unwrap();

        let mut source = LineSource::open(&path, "t").await.unwrap();
        let mut count = 0;
        while let SourceEvent::Message(_) = source.next_message().await.unwrap() {
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_replay_source() {
        let message = BrokerMessage::new(
            MessageCoordinates {
                topic: "t".to_string(),
                partition: 2,
                offset: 5,
                timestamp: Utc::now(),
            },
            b"x".to_vec(),
        );
        let mut source = ReplaySource::new(vec![message.clone()]);
        match source.next_message().await.unwrap() {
            SourceEvent::Message(m) => assert_eq!(m, message),
            SourceEvent::Eof => panic!("expected a message"),
        }
        assert!(matches!(source.next_message().await.unwrap(), SourceEvent::Eof));
    }
}
