//! report-ingest - cluster analysis report consumer
//!
//! Reads newline-delimited broker payloads, validates them and persists
//! report, recommendations and informational report per cluster.
//!
//! # Usage
//!
//! ```bash
//! # Consume from stdin with the default config search
//! producer | ./report-ingest
//!
//! # Replay a captured file with an explicit config
//! ./report-ingest --config report_ingest.toml --input messages.jsonl
//!
//! # JSON logs
//! RUST_LOG=debug ./report-ingest --log-json
//! ```
//!
//! # Environment Variables
//!
//! - `REPORT_INGEST_CONFIG`: Path to the TOML config file
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use report_ingest::config::{ConsumerConfig, StorageBackend, StorageConfig};
use report_ingest::deadletter::{DeadLetterQueue, DeadLetterSink};
use report_ingest::pipeline::source::{LineSource, MessageSource};
use report_ingest::pipeline::{MessageProcessor, ProcessingLoop};
use report_ingest::storage::{InMemoryStore, NoopStore, ReportStore, SledStore};
use report_ingest::telemetry::{PipelineMetrics, Telemetry};
use report_ingest::tracker::{HttpPayloadTracker, PayloadTracker};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "report-ingest")]
#[command(about = "Cluster analysis report ingestion consumer")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML config file (overrides $REPORT_INGEST_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Read newline-delimited payloads from this file instead of stdin
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn open_store(config: &StorageConfig) -> Result<Arc<dyn ReportStore>> {
    let store: Arc<dyn ReportStore> = match config.backend {
        StorageBackend::Sled => {
            if let Some(parent) = config.db_path.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
            Arc::new(SledStore::open(&config.db_path).with_context(|| {
                format!("Failed to open database at {}", config.db_path.display())
            })?)
        }
        StorageBackend::Memory => Arc::new(InMemoryStore::new()),
        StorageBackend::Noop => Arc::new(NoopStore),
    };
    info!(backend = store.backend_name(), "Storage ready");
    Ok(store)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.log_json);

    let config = match &args.config {
        Some(path) => ConsumerConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ConsumerConfig::load(),
    };

    info!(
        topic = %config.broker.topic,
        group = %config.broker.group,
        schema_version = config.processing.schema_version,
        "report-ingest starting"
    );

    let store = open_store(&config.storage)?;
    let metrics = Arc::new(PipelineMetrics::new());
    let telemetry: Arc<dyn Telemetry> = metrics.clone();

    let allow_list = config.org_allow_list()?;
    if allow_list.is_enabled() {
        info!("Organization allow-list enabled");
    }

    let mut processor = MessageProcessor::new(store.clone(), telemetry)
        .with_allow_list(allow_list)
        .with_schema_version(config.processing.schema_version);

    if config.dead_letter.enabled {
        let queue = DeadLetterQueue::open(&config.dead_letter.queue_dir, config.dead_letter.max_size)
            .context("Failed to open dead-letter queue")?;
        info!(
            dir = %config.dead_letter.queue_dir.display(),
            pending = queue.pending_count().unwrap_or(0),
            "Dead-letter queue enabled"
        );
        let sink: Arc<dyn DeadLetterSink> = Arc::new(queue);
        processor = processor.with_dead_letter(sink);
    }

    if config.payload_tracker.enabled {
        let tracker = HttpPayloadTracker::new(
            &config.payload_tracker.url,
            &config.payload_tracker.service_name,
            config.payload_tracker.timeout(),
        )
        .context("Failed to build payload tracker client")?;
        info!(url = %config.payload_tracker.url, "Payload tracker enabled");
        let tracker: Arc<dyn PayloadTracker> = Arc::new(tracker);
        processor = processor.with_tracker(tracker);
    }

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let server = if config.metrics.enabled {
        let addr: SocketAddr = config
            .metrics
            .addr
            .parse()
            .with_context(|| format!("Invalid metrics address {}", config.metrics.addr))?;
        let token = cancel_token.child_token();
        let metrics = metrics.clone();
        let backend = store.backend_name();
        Some(tokio::spawn(async move {
            if let Err(e) = report_ingest::api::serve(addr, metrics, backend, token).await {
                warn!(error = %e, "Metrics server stopped");
            }
        }))
    } else {
        None
    };

    let mut source: Box<dyn MessageSource> = match &args.input {
        Some(path) => Box::new(
            LineSource::open(path, &config.broker.topic)
                .await
                .with_context(|| format!("Failed to open input {}", path.display()))?,
        ),
        None => Box::new(LineSource::stdin(&config.broker.topic)),
    };

    let stats = ProcessingLoop::new(processor, cancel_token.clone())
        .run(source.as_mut())
        .await;

    cancel_token.cancel();
    if let Some(handle) = server {
        handle.await.ok();
    }

    info!(
        consumed = stats.consumed,
        successful = stats.successful,
        failed = stats.failed,
        "report-ingest shutdown complete"
    );
    Ok(())
}
