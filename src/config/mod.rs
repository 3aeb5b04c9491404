//! Consumer Configuration Module
//!
//! Configuration loaded from TOML files with built-in defaults for every key.
//!
//! ## Loading Order
//!
//! 1. `REPORT_INGEST_CONFIG` environment variable (path to TOML file)
//! 2. `report_ingest.toml` in the current working directory
//! 3. Built-in defaults
//!
//! The loaded [`ConsumerConfig`] is passed explicitly to the components that
//! need it; there is no global instance.

mod consumer_config;
pub mod defaults;
pub mod validation;

pub use consumer_config::*;
