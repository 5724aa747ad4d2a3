//! Engine configuration.
//!
//! Values come from code, JSON documents or `PHASEFLOW_*` environment
//! variables. Every field has a default, so partial documents are valid.

use crate::errors::{ConfigurationError, PhaseflowError};
use crate::lifecycle::default_pool_max;
use crate::observability::LogFormat;
use crate::pipeline::DEFAULT_MAX_JUMPS_PER_RUN;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "PHASEFLOW_";

/// Settings shared by pipelines, pools and the ingest engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Abort the main phase on the first action failure.
    #[serde(default = "default_short_circuit")]
    pub short_circuit_on_exception: bool,
    /// Let pre and post failures stop the rest of their own phase.
    #[serde(default)]
    pub pre_post_abort: bool,
    /// Jump budget per run.
    #[serde(default = "default_max_jumps")]
    pub max_jumps_per_run: usize,
    /// Default size of action and pipeline pools.
    #[serde(default = "default_pool_max")]
    pub pool_max: usize,
    /// Capacity of the ingest queue.
    #[serde(default = "default_ingest_buffer")]
    pub ingest_buffer: usize,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_short_circuit() -> bool {
    true
}

fn default_max_jumps() -> usize {
    DEFAULT_MAX_JUMPS_PER_RUN
}

fn default_ingest_buffer() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            short_circuit_on_exception: default_short_circuit(),
            pre_post_abort: false,
            max_jumps_per_run: default_max_jumps(),
            pool_max: default_pool_max(),
            ingest_buffer: default_ingest_buffer(),
            log_format: LogFormat::default(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the error policy.
    #[must_use]
    pub const fn with_short_circuit(mut self, enabled: bool) -> Self {
        self.short_circuit_on_exception = enabled;
        self
    }

    /// Sets the jump budget.
    #[must_use]
    pub const fn with_max_jumps_per_run(mut self, max: usize) -> Self {
        self.max_jumps_per_run = max;
        self
    }

    /// Sets the default pool size.
    #[must_use]
    pub const fn with_pool_max(mut self, max: usize) -> Self {
        self.pool_max = max;
        self
    }

    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns a serialization error for malformed JSON and a configuration
    /// error for out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self, PhaseflowError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read, otherwise as
    /// [`from_json_str`](EngineConfig::from_json_str).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PhaseflowError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Reads `PHASEFLOW_*` variables over the defaults.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unparsable or out-of-range values.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads variables through `lookup` over the defaults.
    ///
    /// # Errors
    ///
    /// See [`from_env`](EngineConfig::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigurationError> {
        let mut config = Self::default();
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(value) = var("SHORT_CIRCUIT") {
            config.short_circuit_on_exception = parse_field("SHORT_CIRCUIT", &value)?;
        }
        if let Some(value) = var("PRE_POST_ABORT") {
            config.pre_post_abort = parse_field("PRE_POST_ABORT", &value)?;
        }
        if let Some(value) = var("MAX_JUMPS_PER_RUN") {
            config.max_jumps_per_run = parse_field("MAX_JUMPS_PER_RUN", &value)?;
        }
        if let Some(value) = var("POOL_MAX") {
            config.pool_max = parse_field("POOL_MAX", &value)?;
        }
        if let Some(value) = var("INGEST_BUFFER") {
            config.ingest_buffer = parse_field("INGEST_BUFFER", &value)?;
        }
        if let Some(value) = var("LOG_FORMAT") {
            config.log_format = parse_field("LOG_FORMAT", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns a `CONFIG-007-INVALID_VALUE` error for zero-sized limits.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_jumps_per_run == 0 {
            return Err(ConfigurationError::invalid_value("max_jumps_per_run", "must be at least 1"));
        }
        if self.pool_max == 0 {
            return Err(ConfigurationError::invalid_value("pool_max", "must be at least 1"));
        }
        if self.ingest_buffer == 0 {
            return Err(ConfigurationError::invalid_value("ingest_buffer", "must be at least 1"));
        }
        Ok(())
    }
}

fn parse_field<T>(field: &str, value: &str) -> Result<T, ConfigurationError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|err: T::Err| ConfigurationError::invalid_value(field, err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.short_circuit_on_exception);
        assert!(!config.pre_post_abort);
        assert_eq!(config.max_jumps_per_run, 128);
        assert!((1..=256).contains(&config.pool_max));
        assert_eq!(config.ingest_buffer, 1024);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json_str(r#"{"max_jumps_per_run": 5, "log_format": "json"}"#).unwrap();
        assert_eq!(config.max_jumps_per_run, 5);
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.short_circuit_on_exception);
    }

    #[test]
    fn test_zero_budget_is_rejected() {
        let err = EngineConfig::from_json_str(r#"{"max_jumps_per_run": 0}"#).unwrap_err();
        assert!(matches!(err, PhaseflowError::Configuration(ref e) if e.code() == Some("CONFIG-007-INVALID_VALUE")));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"short_circuit_on_exception": false, "pool_max": 3}}"#).unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert!(!config.short_circuit_on_exception);
        assert_eq!(config.pool_max, 3);
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PHASEFLOW_SHORT_CIRCUIT", "false"),
            ("PHASEFLOW_MAX_JUMPS_PER_RUN", " 7 "),
            ("PHASEFLOW_LOG_FORMAT", "json"),
        ]);
        let config = EngineConfig::from_lookup(|key| vars.get(key).map(ToString::to_string)).unwrap();

        assert!(!config.short_circuit_on_exception);
        assert_eq!(config.max_jumps_per_run, 7);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = EngineConfig::from_lookup(|key| (key == "PHASEFLOW_POOL_MAX").then(|| "lots".to_string())).unwrap_err();
        assert_eq!(err.code(), Some("CONFIG-007-INVALID_VALUE"));
    }
}
