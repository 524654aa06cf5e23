//! Engine configuration types.
//!
//! `EngineConfig` represents the `[engine]` table of `shipyard.toml`.
//! All fields have sensible defaults.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level contents of `shipyard.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShipyardConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub tracing: TracingConfig,

    /// Cloud provider and other settings, keyed by setting id.
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Timeout applied to states that do not declare their own.
    #[serde(default = "default_state_timeout_secs")]
    pub default_state_timeout_secs: u64,

    /// Superseded container revisions kept after a successful resize.
    #[serde(default = "default_revisions_to_retain")]
    pub revisions_to_retain: usize,

    /// Capacity of the execution event broadcast channel.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Remote task poll backoff.
    #[serde(default = "default_poll_initial_backoff_ms")]
    pub poll_initial_backoff_ms: u64,

    #[serde(default = "default_poll_max_backoff_ms")]
    pub poll_max_backoff_ms: u64,

    /// Polls before a task is reported as failed.
    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,

    /// SQLite URL for the instance store. Defaults to `<data_dir>/shipyard.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

fn default_state_timeout_secs() -> u64 {
    600
}

fn default_revisions_to_retain() -> usize {
    3
}

fn default_event_bus_capacity() -> usize {
    1024
}

fn default_poll_initial_backoff_ms() -> u64 {
    500
}

fn default_poll_max_backoff_ms() -> u64 {
    30_000
}

fn default_poll_max_attempts() -> u32 {
    120
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_state_timeout_secs: default_state_timeout_secs(),
            revisions_to_retain: default_revisions_to_retain(),
            event_bus_capacity: default_event_bus_capacity(),
            poll_initial_backoff_ms: default_poll_initial_backoff_ms(),
            poll_max_backoff_ms: default_poll_max_backoff_ms(),
            poll_max_attempts: default_poll_max_attempts(),
            database_url: None,
        }
    }
}

/// Log output settings consumed by `shipyard-observe`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[serde(default)]
    pub otel: bool,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
            otel: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.default_state_timeout_secs, 600);
        assert_eq!(config.revisions_to_retain, 3);
        assert_eq!(config.event_bus_capacity, 1024);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_config_deserialize_with_defaults() {
        let config: ShipyardConfig = toml::from_str("").unwrap();
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.tracing.filter, "info");
    }

    #[test]
    fn test_config_deserialize_with_values() {
        let toml_str = r#"
[engine]
default_state_timeout_secs = 30
revisions_to_retain = 5
database_url = "sqlite://ship.db"

[tracing]
json = true
"#;
        let config: ShipyardConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.default_state_timeout_secs, 30);
        assert_eq!(config.engine.revisions_to_retain, 5);
        assert_eq!(config.engine.poll_max_attempts, 120);
        assert_eq!(config.engine.database_url.as_deref(), Some("sqlite://ship.db"));
        assert!(config.tracing.json);
        assert!(!config.tracing.otel);
    }
}
