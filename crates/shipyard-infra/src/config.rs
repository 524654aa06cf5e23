//! Configuration loader for Shipyard.
//!
//! Reads `shipyard.toml` from the data directory (`~/.shipyard/` unless
//! `SHIPYARD_DATA_DIR` says otherwise) and deserializes it into
//! [`ShipyardConfig`]. A missing or malformed file is never fatal: the loader
//! logs and falls back to defaults.

use std::path::{Path, PathBuf};

use shipyard_types::config::{EngineConfig, ShipyardConfig};

/// File name looked up inside the data directory.
pub const CONFIG_FILE: &str = "shipyard.toml";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "SHIPYARD_DATA_DIR";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Directory holding the config file and the default database.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".shipyard")
}

/// Parse a config document. Omitted sections take their defaults.
pub fn parse_config(content: &str) -> Result<ShipyardConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Strict variant of [`load_config`]: a missing file is still the default,
/// but read and parse failures are returned.
pub async fn try_load_config(dir: &Path) -> Result<ShipyardConfig, ConfigError> {
    let path = dir.join(CONFIG_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => parse_config(&content),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(ShipyardConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// Load configuration from `{dir}/shipyard.toml`.
///
/// - Missing file: [`ShipyardConfig::default()`].
/// - Unreadable or malformed file: logs a warning and returns the default.
pub async fn load_config(dir: &Path) -> ShipyardConfig {
    let path = dir.join(CONFIG_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => match parse_config(&content) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
                ShipyardConfig::default()
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE} found at {}, using defaults", path.display());
            ShipyardConfig::default()
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            ShipyardConfig::default()
        }
    }
}

/// The `[engine]` section of `{dir}/shipyard.toml`, defaults on any failure.
pub async fn load_engine_config(dir: &Path) -> EngineConfig {
    load_config(dir).await.engine
}
