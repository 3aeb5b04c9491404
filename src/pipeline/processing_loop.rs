//! Processing loop: pulls records from a [`MessageSource`] and hands them to
//! a [`MessageProcessor`] one at a time until the source is exhausted, fails,
//! or the loop is cancelled.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::processor::{ConsumerStats, MessageProcessor};
use super::source::{MessageSource, SourceEvent};

/// Progress is logged every this many messages
const PROGRESS_INTERVAL: u64 = 100;

pub struct ProcessingLoop {
    processor: MessageProcessor,
    cancel_token: CancellationToken,
}

impl ProcessingLoop {
    pub fn new(processor: MessageProcessor, cancel_token: CancellationToken) -> Self {
        Self {
            processor,
            cancel_token,
        }
    }

    /// Run until EOF, source error or cancellation. Returns final counters.
    pub async fn run<S: MessageSource + ?Sized>(mut self, source: &mut S) -> ConsumerStats {
        let source_name = source.source_name().to_string();
        info!(source = %source_name, "Consuming messages");

        loop {
            let event = tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }
                result = source.next_message() => {
                    match result {
                        Ok(ev) => ev,
                        Err(e) => {
                            warn!(error = %e, source = %source_name, "Source error");
                            break;
                        }
                    }
                }
            };

            let message = match event {
                SourceEvent::Message(m) => m,
                SourceEvent::Eof => {
                    info!(
                        consumed = self.processor.stats().consumed,
                        "Source reached end"
                    );
                    break;
                }
            };

            self.processor.handle_message(&message).await;

            let stats = self.processor.stats();
            if stats.consumed % PROGRESS_INTERVAL == 0 {
                info!(
                    consumed = stats.consumed,
                    successful = stats.successful,
                    failed = stats.failed,
                    "Progress"
                );
            }
        }

        let stats = self.processor.stats();
        info!(
            consumed = stats.consumed,
            successful = stats.successful,
            failed = stats.failed,
            superseded = stats.superseded,
            "Consumer finished"
        );
        stats
    }
}
