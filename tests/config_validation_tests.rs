//! Config Validation Tests
//!
//! Exercises typo detection, range validation and allow-list loading of the
//! consumer configuration independently from the rest of the pipeline.

use std::io::Write;

use report_ingest::config::validation::{
    known_config_keys, suggest_correction, validate_unknown_keys,
};
use report_ingest::config::{ConfigError, ConsumerConfig, StorageBackend};
use report_ingest::policy::OrgAllowList;

// ============================================================================
// Typo Detection
// ============================================================================

#[test]
fn typo_in_storage_backend_warns_with_suggestion() {
    let toml_str = r#"
[storage]
backnd = "memory"
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1, "Expected exactly 1 warning");
    assert!(warnings[0].field.contains("backnd"));
    assert_eq!(warnings[0].suggestion.as_deref(), Some("storage.backend"));
}

#[test]
fn typo_in_section_name_warns_for_section_and_children() {
    let toml_str = r#"
[dead_leter]
enabled = true
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 2);
    assert_eq!(warnings[0].suggestion.as_deref(), Some("dead_letter"));
}

#[test]
fn typo_does_not_break_loading() {
    let config = ConsumerConfig::from_toml_str(
        r#"
[payload_tracker]
enabled = true
url = "http://tracker:8080/v1/payloads"
timout_secs = 3
"#,
    )
    .unwrap();
    assert!(config.payload_tracker.enabled);
    assert_eq!(config.payload_tracker.timeout_secs, 10);
}

#[test]
fn every_known_key_is_accepted() {
    let known = known_config_keys();
    assert!(known.contains("processing.org_allowlist_file"));
    assert!(known.contains("metrics.addr"));
    assert_eq!(
        suggest_correction("metrics.adr", &known).as_deref(),
        Some("metrics.addr")
    );
    assert!(suggest_correction("nothing_like_it", &known).is_none());
}

#[test]
fn full_config_produces_no_warnings() {
    let toml_str = r#"
[broker]
topic = "ccx.ocp.results"
group = "aggregator"

[processing]
schema_version = 2
org_allowlist_enabled = false
org_allowlist = []

[storage]
backend = "sled"
db_path = "/var/lib/report-ingest/reports.db"

[dead_letter]
enabled = true
queue_dir = "/var/lib/report-ingest/dead_letter"
max_size = 500

[payload_tracker]
enabled = false
url = ""
service_name = "insights-results-aggregator"
timeout_secs = 5

[metrics]
enabled = true
addr = "127.0.0.1:9000"
"#;
    assert!(validate_unknown_keys(toml_str).is_empty());
    let config = ConsumerConfig::from_toml_str(toml_str).unwrap();
    assert_eq!(config.storage.backend, StorageBackend::Sled);
    assert_eq!(config.dead_letter.max_size, 500);
}

// ============================================================================
// Range Validation
// ============================================================================

#[test]
fn zero_schema_version_is_rejected() {
    let err = ConsumerConfig::from_toml_str("[processing]\nschema_version = 0\n").unwrap_err();
    let ConfigError::Validation(errors) = err else {
        panic!("expected validation error");
    };
    assert!(errors[0].contains("schema_version"));
}

#[test]
fn enabled_tracker_requires_url() {
    let err = ConsumerConfig::from_toml_str("[payload_tracker]\nenabled = true\n").unwrap_err();
    assert!(err.to_string().contains("payload_tracker.url"));
}

#[test]
fn disabled_sections_are_not_validated() {
    let config = ConsumerConfig::from_toml_str(
        r#"
[dead_letter]
enabled = false
max_size = 0

[metrics]
enabled = false
addr = "not an address"
"#,
    )
    .unwrap();
    assert!(!config.metrics.enabled);
}

#[test]
fn dead_letter_needs_capacity() {
    let err =
        ConsumerConfig::from_toml_str("[dead_letter]\nenabled = true\nmax_size = 0\n").unwrap_err();
    assert!(matches!(err, ConfigError::Validation(ref e) if e.len() == 1));
}

// ============================================================================
// Allow-list
// ============================================================================

#[test]
fn allow_list_merges_inline_ids_and_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "OrgID\n11\n\n12").unwrap();

    let config = ConsumerConfig::from_toml_str(&format!(
        "[processing]\norg_allowlist_enabled = true\norg_allowlist = [10]\norg_allowlist_file = {:?}\n",
        file.path().display().to_string()
    ))
    .unwrap();

    let allow = config.org_allow_list().unwrap();
    for org in [10, 11, 12] {
        assert!(allow.check(org).is_ok(), "org {org} should be allowed");
    }
    assert!(allow.check(13).is_err());
}

#[test]
fn allow_list_file_without_header_is_an_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "11\n12").unwrap();

    let mut config = ConsumerConfig::default();
    config.processing.org_allowlist_enabled = true;
    config.processing.org_allowlist_file = Some(file.path().to_path_buf());

    assert!(matches!(
        config.org_allow_list(),
        Err(ConfigError::AllowList(_))
    ));
}

#[test]
fn disabled_allow_list_ignores_entries() {
    let mut config = ConsumerConfig::default();
    config.processing.org_allowlist = vec![1];
    assert_eq!(config.org_allow_list().unwrap(), OrgAllowList::Disabled);
}

#[test]
fn missing_file_is_io_error() {
    let err = ConsumerConfig::load_from_file(std::path::Path::new("/nonexistent/report_ingest.toml"))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Io(..)));
}
