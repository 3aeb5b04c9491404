//! Pipeline telemetry
//!
//! The pipeline reports through the [`Telemetry`] trait. [`PipelineMetrics`] is
//! the in-process implementation: atomic counters plus fixed-bucket histograms,
//! rendered in Prometheus text format (version 0.0.4) by the `/metrics` route.
//!
//! [`StageObserver`] is the single place that times a pipeline step, logs the
//! duration and records the sample.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::types::KafkaOffset;

/// Timed pipeline steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Read,
    OrgFiltering,
    Marshalling,
    TimeCheck,
    DbStoreReport,
    DbStoreRecommendations,
    DbStoreInfoReport,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Read,
        Stage::OrgFiltering,
        Stage::Marshalling,
        Stage::TimeCheck,
        Stage::DbStoreReport,
        Stage::DbStoreRecommendations,
        Stage::DbStoreInfoReport,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Read => "read",
            Stage::OrgFiltering => "org_filtering",
            Stage::Marshalling => "marshalling",
            Stage::TimeCheck => "time_check",
            Stage::DbStoreReport => "db_store_report",
            Stage::DbStoreRecommendations => "db_store_recommendations",
            Stage::DbStoreInfoReport => "db_store_info_report",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Telemetry backend of the pipeline. Recording never fails.
pub trait Telemetry: Send + Sync {
    /// A message entered the pipeline
    fn consumed(&self);
    /// A message completed; `elapsed` is end-to-end
    fn succeeded(&self, elapsed: Duration);
    /// A message failed; `elapsed` is end-to-end
    fn failed(&self, elapsed: Duration);
    /// Duration of one pipeline step
    fn stage(&self, stage: Stage, elapsed: Duration);
    /// Minutes between `LastChecked` and processing, negative for future dates
    fn last_checked_lag(&self, minutes: f64);
}

// ============================================================================
// Histogram
// ============================================================================

/// Upper bounds (seconds) of processing-time histograms
const DURATION_BUCKETS: [f64; 11] = [
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 10.0,
];

/// Upper bounds (minutes) of the last-checked lag histogram
const LAG_BUCKETS: [f64; 9] = [0.0, 1.0, 5.0, 15.0, 30.0, 60.0, 180.0, 720.0, 1440.0];

/// Cumulative histogram with fixed bucket bounds.
///
/// The sum is kept in micro-units so it fits an atomic integer.
#[derive(Debug)]
pub struct Histogram {
    bounds: &'static [f64],
    buckets: Vec<AtomicU64>,
    count: AtomicU64,
    sum_micros: std::sync::atomic::AtomicI64,
}

impl Histogram {
    pub fn new(bounds: &'static [f64]) -> Self {
        Self {
            bounds,
            buckets: bounds.iter().map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
            sum_micros: std::sync::atomic::AtomicI64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        for (bound, bucket) in self.bounds.iter().zip(&self.buckets) {
            if value <= *bound {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        #[allow(clippy::cast_possible_truncation)]
        self.sum_micros
            .fetch_add((value * 1_000_000.0) as i64, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    fn render(&self, out: &mut String, name: &str, labels: &str) {
        let sep = if labels.is_empty() { "" } else { "," };
        for (bound, bucket) in self.bounds.iter().zip(&self.buckets) {
            let _ = writeln!(
                out,
                "{name}_bucket{{{labels}{sep}le=\"{bound}\"}} {}",
                bucket.load(Ordering::Relaxed)
            );
        }
        let _ = writeln!(
            out,
            "{name}_bucket{{{labels}{sep}le=\"+Inf\"}} {}",
            self.count()
        );
        let braces = if labels.is_empty() {
            String::new()
        } else {
            format!("{{{labels}}}")
        };
        let _ = writeln!(out, "{name}_sum{braces} {}", self.sum());
        let _ = writeln!(out, "{name}_count{braces} {}", self.count());
    }
}

// ============================================================================
// PipelineMetrics
// ============================================================================

/// In-process metrics registry.
#[derive(Debug)]
pub struct PipelineMetrics {
    consumed: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    successful_duration: Histogram,
    failed_duration: Histogram,
    stage_duration: Vec<Histogram>,
    last_checked_lag: Histogram,
    started: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            consumed: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            successful_duration: Histogram::new(&DURATION_BUCKETS),
            failed_duration: Histogram::new(&DURATION_BUCKETS),
            stage_duration: Stage::ALL
                .iter()
                .map(|_| Histogram::new(&DURATION_BUCKETS))
                .collect(),
            last_checked_lag: Histogram::new(&LAG_BUCKETS),
            started: Instant::now(),
        }
    }

    pub fn consumed_count(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }

    pub fn successful_count(&self) -> u64 {
        self.successful.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn stage_histogram(&self, stage: Stage) -> &Histogram {
        &self.stage_duration[stage.index()]
    }

    pub fn lag_histogram(&self) -> &Histogram {
        &self.last_checked_lag
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Prometheus text exposition of every metric
    pub fn render_prometheus(&self) -> String {
        let mut body = String::with_capacity(4096);

        counter(
            &mut body,
            "report_ingest_consumed_messages_total",
            "Messages consumed",
            self.consumed_count(),
        );
        counter(
            &mut body,
            "report_ingest_successful_messages_total",
            "Messages processed successfully",
            self.successful_count(),
        );
        counter(
            &mut body,
            "report_ingest_failed_messages_total",
            "Messages whose processing failed",
            self.failed_count(),
        );

        header(
            &mut body,
            "report_ingest_successful_processing_seconds",
            "End-to-end time of successfully processed messages",
            "histogram",
        );
        self.successful_duration
            .render(&mut body, "report_ingest_successful_processing_seconds", "");

        header(
            &mut body,
            "report_ingest_failed_processing_seconds",
            "End-to-end time of failed messages",
            "histogram",
        );
        self.failed_duration
            .render(&mut body, "report_ingest_failed_processing_seconds", "");

        header(
            &mut body,
            "report_ingest_stage_duration_seconds",
            "Duration of individual pipeline stages",
            "histogram",
        );
        for stage in Stage::ALL {
            self.stage_histogram(stage).render(
                &mut body,
                "report_ingest_stage_duration_seconds",
                &format!("stage=\"{stage}\""),
            );
        }

        header(
            &mut body,
            "report_ingest_last_checked_lag_minutes",
            "Minutes between LastChecked and processing",
            "histogram",
        );
        self.last_checked_lag
            .render(&mut body, "report_ingest_last_checked_lag_minutes", "");

        header(
            &mut body,
            "report_ingest_uptime_seconds",
            "Process uptime in seconds",
            "gauge",
        );
        let _ = writeln!(
            body,
            "report_ingest_uptime_seconds {}",
            self.uptime().as_secs()
        );

        body
    }
}

fn header(body: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(body, "# HELP {name} {help}");
    let _ = writeln!(body, "# TYPE {name} {kind}");
}

fn counter(body: &mut String, name: &str, help: &str, value: u64) {
    header(body, name, help, "counter");
    let _ = writeln!(body, "{name} {value}");
}

impl Telemetry for PipelineMetrics {
    fn consumed(&self) {
        self.consumed.fetch_add(1, Ordering::Relaxed);
    }

    fn succeeded(&self, elapsed: Duration) {
        self.successful.fetch_add(1, Ordering::Relaxed);
        self.successful_duration.observe(elapsed.as_secs_f64());
    }

    fn failed(&self, elapsed: Duration) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.failed_duration.observe(elapsed.as_secs_f64());
    }

    fn stage(&self, stage: Stage, elapsed: Duration) {
        self.stage_duration[stage.index()].observe(elapsed.as_secs_f64());
    }

    fn last_checked_lag(&self, minutes: f64) {
        self.last_checked_lag.observe(minutes);
    }
}

// ============================================================================
// StageObserver
// ============================================================================

/// Times the steps of one message.
pub struct StageObserver {
    telemetry: Arc<dyn Telemetry>,
    offset: KafkaOffset,
    mark: Instant,
}

impl StageObserver {
    pub fn new(telemetry: Arc<dyn Telemetry>, offset: KafkaOffset) -> Self {
        Self {
            telemetry,
            offset,
            mark: Instant::now(),
        }
    }

    /// Run `step`, then log and record its duration under `stage`.
    pub fn observe<T>(&mut self, stage: Stage, step: impl FnOnce() -> T) -> T {
        self.mark = Instant::now();
        let value = step();
        self.record(stage);
        value
    }

    /// Record the time since the previous mark under `stage`.
    pub fn record(&mut self, stage: Stage) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.mark);
        self.mark = now;
        debug!(
            offset = self.offset,
            stage = %stage,
            duration_ms = elapsed.as_millis() as u64,
            "Pipeline stage finished"
        );
        self.telemetry.stage(stage, elapsed);
    }

    pub fn telemetry(&self) -> &dyn Telemetry {
        self.telemetry.as_ref()
    }
}
