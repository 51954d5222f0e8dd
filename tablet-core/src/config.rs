//! Configuration types

use crate::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory JSON tables are written to when none is configured.
pub const DEFAULT_JSON_DIR: &str = "./devDb/";

/// How often dirty JSON tables are flushed to disk when none is configured.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1000;

/// Master configuration for a registry and the tables it creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabletConfig {
    /// Directory holding `<name>.tablet.json` files.
    pub json_dir: PathBuf,
    /// Debounce window for JSON table writes, in milliseconds.
    pub flush_interval_ms: u64,
    /// Id generation for entities constructed without an id.
    pub id_strategy: IdStrategy,
}

impl Default for TabletConfig {
    fn default() -> Self {
        Self {
            json_dir: PathBuf::from(DEFAULT_JSON_DIR),
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            id_strategy: IdStrategy::UuidV4,
        }
    }
}

impl TabletConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the JSON table directory.
    pub fn with_json_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.json_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the JSON flush interval.
    ///
    /// Sub-millisecond intervals round up to 1ms; only `Duration::ZERO`
    /// stays zero and is rejected by [`validate`](Self::validate).
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval_ms =
            u64::try_from(interval.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX);
        self
    }

    /// Set the id generation strategy.
    pub fn with_id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = strategy;
        self
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `TABLET_JSON_DIR`: JSON table directory (default: `./devDb/`)
    /// - `TABLET_FLUSH_INTERVAL_MS`: JSON flush interval (default: 1000)
    /// - `TABLET_ID_STRATEGY`: `uuid_v4` or `uuid_v7` (default: `uuid_v4`)
    ///
    /// Unlike a missing variable, an unparseable one is an error.
    pub fn from_env() -> TabletResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`TabletConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> TabletResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("TABLET_JSON_DIR") {
            config.json_dir = PathBuf::from(dir);
        }

        if let Some(raw) = lookup("TABLET_FLUSH_INTERVAL_MS") {
            config.flush_interval_ms = raw.trim().parse().map_err(|_| {
                TabletError::Config(ConfigError::InvalidValue {
                    field: "TABLET_FLUSH_INTERVAL_MS".to_string(),
                    value: raw.clone(),
                    reason: "must be an integer number of milliseconds".to_string(),
                })
            })?;
        }

        if let Some(raw) = lookup("TABLET_ID_STRATEGY") {
            config.id_strategy = raw.parse().map_err(|_| {
                TabletError::Config(ConfigError::InvalidValue {
                    field: "TABLET_ID_STRATEGY".to_string(),
                    value: raw.clone(),
                    reason: "expected uuid_v4 or uuid_v7".to_string(),
                })
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(raw: &str) -> TabletResult<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| {
            TabletError::Config(ConfigError::Parse {
                reason: e.to_string(),
            })
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - flush_interval_ms > 0
    /// - json_dir is not empty
    pub fn validate(&self) -> TabletResult<()> {
        if self.flush_interval_ms == 0 {
            return Err(TabletError::Config(ConfigError::InvalidValue {
                field: "flush_interval_ms".to_string(),
                value: self.flush_interval_ms.to_string(),
                reason: "flush_interval_ms must be greater than 0".to_string(),
            }));
        }

        if self.json_dir.as_os_str().is_empty() {
            return Err(TabletError::Config(ConfigError::InvalidValue {
                field: "json_dir".to_string(),
                value: String::new(),
                reason: "json_dir must not be empty".to_string(),
            }));
        }

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
