//! Event-loop configuration.
//!
//! Defaults are right for almost everyone; overrides come from a JSON
//! document or from `ADEFER_*` environment variables, environment winning
//! over file in [`LoopConfig::load`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable for the poller event-buffer capacity.
const ENV_EVENTS_CAPACITY: &str = "ADEFER_EVENTS_CAPACITY";
/// Environment variable for the poll-timeout cap, in milliseconds.
const ENV_POLL_TIMEOUT_MS: &str = "ADEFER_POLL_TIMEOUT_MS";

/// Errors from loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The JSON document did not parse or did not match the schema.
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
    /// An environment variable held an unparseable value.
    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv {
        /// The offending variable name.
        var: &'static str,
        /// The value found in the environment.
        value: String,
    },
}

/// Tunables for one barrier's event loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoopConfig {
    /// Capacity of the OS poller's event buffer.
    pub events_capacity: usize,
    /// Upper bound on one blocking wait. `None` lets the loop sleep until
    /// the next timer deadline or wakeup.
    pub poll_timeout_cap: Option<Duration>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            events_capacity: 64,
            poll_timeout_cap: None,
        }
    }
}

impl LoopConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the poller event-buffer capacity.
    #[must_use]
    pub fn with_events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = capacity;
        self
    }

    /// Caps the duration of one blocking wait.
    #[must_use]
    pub fn with_poll_timeout_cap(mut self, cap: Duration) -> Self {
        self.poll_timeout_cap = Some(cap);
        self
    }

    /// Parses a configuration from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Applies `ADEFER_*` environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(raw) = std::env::var(ENV_EVENTS_CAPACITY) {
            self.events_capacity = raw.parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_EVENTS_CAPACITY,
                value: raw,
            })?;
        }
        if let Ok(raw) = std::env::var(ENV_POLL_TIMEOUT_MS) {
            let millis: u64 = raw.parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_POLL_TIMEOUT_MS,
                value: raw,
            })?;
            self.poll_timeout_cap = Some(Duration::from_millis(millis));
        }
        Ok(self)
    }

    /// Loads configuration: JSON document first, environment on top.
    pub fn load(json: Option<&str>) -> Result<Self, ConfigError> {
        let base = match json {
            Some(doc) => Self::from_json(doc)?,
            None => Self::default(),
        };
        base.with_env_overrides()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = LoopConfig::default();
        assert!(config.events_capacity > 0);
        assert!(config.poll_timeout_cap.is_none());
    }

    #[test]
    fn json_round_trip() {
        let config = LoopConfig::new()
            .with_events_capacity(16)
            .with_poll_timeout_cap(Duration::from_millis(250));
        let json = serde_json::to_string(&config).expect("serialize");
        let parsed = LoopConfig::from_json(&json).expect("parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn json_rejects_unknown_fields() {
        let result = LoopConfig::from_json(r#"{"events_capacity": 8, "bogus": 1}"#);
        assert!(matches!(result, Err(ConfigError::Json(_))));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let parsed = LoopConfig::from_json(r#"{"events_capacity": 8}"#).expect("parse");
        assert_eq!(parsed.events_capacity, 8);
        assert_eq!(parsed.poll_timeout_cap, LoopConfig::default().poll_timeout_cap);
    }
}
