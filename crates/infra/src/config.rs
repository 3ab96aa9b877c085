//! Configuration loading and representation.
//!
//! ```text
//! FLEETSTREAM_RELAY_PARALLEL   true|false|1|0    (default false)
//! FLEETSTREAM_LOG_FORMAT       json|pretty|text  (default json)
//! FLEETSTREAM_LOG_FILTER       EnvFilter directive (default "info")
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fleetstream_events::RelayConfig;
use fleetstream_observability::{LogConfig, LogFormat};

pub const ENV_RELAY_PARALLEL: &str = "FLEETSTREAM_RELAY_PARALLEL";
pub const ENV_LOG_FORMAT: &str = "FLEETSTREAM_LOG_FORMAT";
pub const ENV_LOG_FILTER: &str = "FLEETSTREAM_LOG_FILTER";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: invalid value '{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("log filter must not be empty")]
    EmptyLogFilter,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetstreamConfig {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl FleetstreamConfig {
    /// Load from the process environment; unset keys keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup (tests, alternate sources).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_RELAY_PARALLEL) {
            config.relay.parallel_partitions = parse_bool(ENV_RELAY_PARALLEL, &raw)?;
        }
        if let Some(raw) = lookup(ENV_LOG_FORMAT) {
            config.log.format = raw
                .parse::<LogFormat>()
                .map_err(|reason| ConfigError::InvalidValue {
                    key: ENV_LOG_FORMAT,
                    value: raw.clone(),
                    reason,
                })?;
        }
        if let Some(raw) = lookup(ENV_LOG_FILTER) {
            config.log.filter = raw.trim().to_string();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log.filter.trim().is_empty() {
            return Err(ConfigError::EmptyLogFilter);
        }
        Ok(())
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
