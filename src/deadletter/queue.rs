//! Dead-letter queue: disk-backed store of unprocessable messages
//!
//! Each message is written as a JSON file named after its broker coordinates,
//! so re-delivering the same message does not duplicate it. The directory is
//! scanned on open to report entries left from a previous run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

use super::{DeadLetterError, DeadLetterSink};
use crate::types::{BrokerMessage, KafkaOffset, MessageCoordinates};

/// Default maximum number of dead-lettered messages kept
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

/// A dead-lettered message as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub topic: String,
    pub partition: i32,
    pub offset: KafkaOffset,
    pub produced_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

impl DeadLetterEntry {
    fn new(message: &BrokerMessage) -> Self {
        Self {
            topic: message.coordinates.topic.clone(),
            partition: message.coordinates.partition,
            offset: message.coordinates.offset,
            produced_at: message.coordinates.timestamp,
            dead_lettered_at: Utc::now(),
            key: message.key.clone(),
            payload: message.payload.clone(),
        }
    }

    /// Rebuild the original message for manual replay.
    pub fn into_message(self) -> BrokerMessage {
        BrokerMessage {
            coordinates: MessageCoordinates {
                topic: self.topic,
                partition: self.partition,
                offset: self.offset,
                timestamp: self.produced_at,
            },
            key: self.key,
            payload: self.payload,
        }
    }

    /// Queue file stem of this entry
    pub fn id(&self) -> String {
        entry_id(&self.topic, self.partition, self.offset)
    }
}

fn entry_id(topic: &str, partition: i32, offset: KafkaOffset) -> String {
    let safe_topic: String = topic
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{safe_topic}-{partition:05}-{offset:020}")
}

/// Directory-backed [`DeadLetterSink`]
pub struct DeadLetterQueue {
    queue_dir: PathBuf,
    max_size: usize,
}

impl DeadLetterQueue {
    /// Create or open a queue at the given directory
    pub fn open<P: AsRef<Path>>(queue_dir: P, max_size: usize) -> Result<Self, DeadLetterError> {
        let queue_dir = queue_dir.as_ref().to_path_buf();
        fs::create_dir_all(&queue_dir)?;

        let queue = Self {
            queue_dir,
            max_size: max_size.max(1),
        };

        let pending = queue.pending_count()?;
        if pending > 0 {
            info!(
                pending,
                dir = %queue.queue_dir.display(),
                "Dead-letter queue opened with pending messages"
            );
        } else {
            debug!(dir = %queue.queue_dir.display(), "Dead-letter queue opened (empty)");
        }

        Ok(queue)
    }

    /// All queued entries, oldest first. Entries stay on disk until removed.
    pub fn drain(&self) -> Result<Vec<DeadLetterEntry>, DeadLetterError> {
        let mut entries = Vec::new();

        for path in self.entry_paths()? {
            match fs::read(&path) {
                Ok(data) => match serde_json::from_slice::<DeadLetterEntry>(&data) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        error!(path = %path.display(), error = %e, "Corrupted dead-letter entry, removing");
                        let _ = fs::remove_file(&path);
                    }
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Could not read dead-letter entry");
                }
            }
        }

        entries.sort_by(|a, b| {
            a.dead_lettered_at
                .cmp(&b.dead_lettered_at)
                .then_with(|| a.id().cmp(&b.id()))
        });
        Ok(entries)
    }

    /// Remove an entry after it has been replayed
    pub fn remove(&self, entry: &DeadLetterEntry) -> Result<(), DeadLetterError> {
        let path = self.entry_path(&entry.id());
        if path.exists() {
            fs::remove_file(&path)?;
            debug!(id = %entry.id(), "Dead-letter entry removed");
        }
        Ok(())
    }

    /// Number of queued messages
    pub fn pending_count(&self) -> Result<usize, DeadLetterError> {
        Ok(self.entry_paths()?.len())
    }

    fn entry_paths(&self) -> Result<Vec<PathBuf>, DeadLetterError> {
        Ok(fs::read_dir(&self.queue_dir)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|ext| ext.to_str()) == Some("json"))
            .collect())
    }

    /// Oldest by file mtime, then name; entries are not read.
    fn drop_oldest(&self) -> Result<(), DeadLetterError> {
        let oldest = self.entry_paths()?.into_iter().min_by_key(|path| {
            let modified = fs::metadata(path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, path.clone())
        });

        if let Some(path) = oldest {
            fs::remove_file(&path)?;
            warn!(path = %path.display(), "Dead-letter queue full, dropped oldest entry");
        }
        Ok(())
    }

    fn entry_path(&self, id: &str) -> PathBuf {
        self.queue_dir.join(format!("{id}.json"))
    }
}

impl DeadLetterSink for DeadLetterQueue {
    fn send(&self, message: &BrokerMessage) -> Result<(), DeadLetterError> {
        let entry = DeadLetterEntry::new(message);
        let path = self.entry_path(&entry.id());

        if path.exists() {
            debug!(id = %entry.id(), "Message already dead-lettered, skipping");
            return Ok(());
        }

        if self.pending_count()? >= self.max_size {
            self.drop_oldest()?;
        }

        let json = serde_json::to_vec(&entry)?;
        fs::write(&path, &json)?;

        debug!(id = %entry.id(), size_bytes = json.len(), "Message dead-lettered");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "directory"
    }
}
