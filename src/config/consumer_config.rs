//! Consumer Configuration - broker, processing, storage and side channels
//!
//! Every section has defaults, so an absent or partial file yields a working
//! consumer that stores into the embedded database.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults::{
    DEFAULT_DB_PATH, DEFAULT_DEAD_LETTER_DIR, DEFAULT_GROUP, DEFAULT_METRICS_ADDR,
    DEFAULT_TOPIC, DEFAULT_TRACKER_SERVICE, DEFAULT_TRACKER_TIMEOUT_SECS,
};
use crate::deadletter::DEFAULT_MAX_QUEUE_SIZE;
use crate::policy::{AllowListError, OrgAllowList, CURRENT_SCHEMA_VERSION};
use crate::types::{OrgId, SchemaVersion};

/// Environment variable holding the config file path
pub const CONFIG_ENV_VAR: &str = "REPORT_INGEST_CONFIG";

/// Config file looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "report_ingest.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration of the consumer.
///
/// Load with `ConsumerConfig::load()` which searches:
/// 1. `$REPORT_INGEST_CONFIG` env var
/// 2. `./report_ingest.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Schema version and organization filtering
    #[serde(default)]
    pub processing: ProcessingConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub dead_letter: DeadLetterConfig,

    #[serde(default)]
    pub payload_tracker: PayloadTrackerConfig,

    /// Prometheus and health endpoints
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl ConsumerConfig {
    /// Load configuration using the standard search order:
    /// 1. `$REPORT_INGEST_CONFIG` environment variable
    /// 2. `./report_ingest.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded consumer config from {CONFIG_ENV_VAR}");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {CONFIG_ENV_VAR}, falling back");
                    }
                }
            } else {
                warn!(path = %path, "{CONFIG_ENV_VAR} points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded consumer config from ./{LOCAL_CONFIG_FILE}");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{LOCAL_CONFIG_FILE}, using defaults");
                }
            }
        }

        info!("No {LOCAL_CONFIG_FILE} found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, err) => ConfigError::Parse(path.to_path_buf(), err),
            other => other,
        })
    }

    /// Parse and validate a TOML document. Unknown keys are logged as warnings.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check every section, collecting all problems.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.broker.topic.trim().is_empty() {
            errors.push("broker.topic must not be empty".to_string());
        }

        if self.processing.schema_version == 0 {
            errors.push("processing.schema_version must be >= 1".to_string());
        }

        if self.storage.backend == StorageBackend::Sled
            && self.storage.db_path.as_os_str().is_empty()
        {
            errors.push("storage.db_path is required for the sled backend".to_string());
        }

        if self.dead_letter.enabled {
            if self.dead_letter.queue_dir.as_os_str().is_empty() {
                errors.push("dead_letter.queue_dir is required when enabled".to_string());
            }
            if self.dead_letter.max_size == 0 {
                errors.push("dead_letter.max_size must be > 0".to_string());
            }
        }

        if self.payload_tracker.enabled {
            let url = self.payload_tracker.url.trim();
            if url.is_empty() {
                errors.push("payload_tracker.url is required when enabled".to_string());
            } else if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push(format!(
                    "payload_tracker.url must be an http(s) URL (got '{url}')"
                ));
            }
            if self.payload_tracker.timeout_secs == 0 {
                errors.push("payload_tracker.timeout_secs must be > 0".to_string());
            }
        }

        if self.metrics.enabled && self.metrics.addr.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "metrics.addr '{}' is not a valid socket address",
                self.metrics.addr
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Build the organization allow-list from inline IDs and the optional file.
    pub fn org_allow_list(&self) -> Result<OrgAllowList, ConfigError> {
        let p = &self.processing;
        if !p.org_allowlist_enabled {
            return Ok(OrgAllowList::disabled());
        }
        OrgAllowList::load(&p.org_allowlist, p.org_allowlist_file.as_deref())
            .map_err(ConfigError::AllowList)
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Config parse error ({}): {1}", .0.display())]
    Parse(PathBuf, #[source] toml::de::Error),
    #[error("Config serialization error: {0}")]
    Serialize(#[source] toml::ser::Error),
    #[error("Config validation failed:\n{}", format_errors(.0))]
    Validation(Vec<String>),
    #[error(transparent)]
    AllowList(AllowListError),
}

fn format_errors(errors: &[String]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// Sections
// ============================================================================

/// Broker identity. The consumer itself is external; these values label the
/// records read from local sources and the log output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_group")]
    pub group: String,
}

fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}
fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            group: default_group(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Expected `Version` of incoming messages
    #[serde(default = "default_schema_version")]
    pub schema_version: SchemaVersion,
    /// When enabled, only listed organizations are processed
    #[serde(default)]
    pub org_allowlist_enabled: bool,
    #[serde(default)]
    pub org_allowlist: Vec<OrgId>,
    /// File with an `OrgID` header and one ID per line
    #[serde(default)]
    pub org_allowlist_file: Option<PathBuf>,
}

fn default_schema_version() -> SchemaVersion {
    CURRENT_SCHEMA_VERSION
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            org_allowlist_enabled: false,
            org_allowlist: Vec::new(),
            org_allowlist_file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sled,
    Memory,
    Noop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(DEFAULT_DB_PATH)
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_dead_letter_dir")]
    pub queue_dir: PathBuf,
    /// Oldest entries are dropped beyond this many
    #[serde(default = "default_dead_letter_max_size")]
    pub max_size: usize,
}

fn default_dead_letter_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DEAD_LETTER_DIR)
}
fn default_dead_letter_max_size() -> usize {
    DEFAULT_MAX_QUEUE_SIZE
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            queue_dir: default_dead_letter_dir(),
            max_size: default_dead_letter_max_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadTrackerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_tracker_service")]
    pub service_name: String,
    #[serde(default = "default_tracker_timeout")]
    pub timeout_secs: u64,
}

fn default_tracker_service() -> String {
    DEFAULT_TRACKER_SERVICE.to_string()
}
fn default_tracker_timeout() -> u64 {
    DEFAULT_TRACKER_TIMEOUT_SECS
}

impl PayloadTrackerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for PayloadTrackerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            service_name: default_tracker_service(),
            timeout_secs: default_tracker_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_addr")]
    pub addr: String,
}

fn default_metrics_enabled() -> bool {
    true
}
fn default_metrics_addr() -> String {
    DEFAULT_METRICS_ADDR.to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            addr: default_metrics_addr(),
        }
    }
}
