//! System-wide default constants.
//!
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Broker
// ============================================================================

/// Topic assigned to records read from stdin or a file.
pub const DEFAULT_TOPIC: &str = "ccx.ocp.results";

/// Consumer group name, used for logging only.
pub const DEFAULT_GROUP: &str = "aggregator";

// ============================================================================
// Storage
// ============================================================================

/// Sled database directory.
pub const DEFAULT_DB_PATH: &str = "./data/reports.db";

// ============================================================================
// Dead Letter
// ============================================================================

/// Dead-letter queue directory.
pub const DEFAULT_DEAD_LETTER_DIR: &str = "./data/dead_letter";

// ============================================================================
// Payload Tracker
// ============================================================================

/// Service name reported to the payload tracker.
pub const DEFAULT_TRACKER_SERVICE: &str = "insights-results-aggregator";

/// Request timeout of payload tracker notifications (seconds).
pub const DEFAULT_TRACKER_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Metrics
// ============================================================================

/// Bind address of the `/metrics` and `/health` routes.
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9000";
