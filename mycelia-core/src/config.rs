//! Layered configuration for the kernel's tunables (spec.md §6
//! "Configuration (enumerated options)").
//!
//! Resolution order, lowest to highest priority — a scaled-down version of
//! the teacher's `R2eConfig` resolution order (base file, profile file,
//! `.env`, environment):
//! 1. Defaults
//! 2. A YAML document (`MyceliaConfig::from_yaml_str` / `load_file`)
//! 3. Environment variables prefixed `MYCELIA_` (`MYCELIA_POOL_SIZE`, ...)

use std::fmt;

use serde::{Deserialize, Serialize};

/// Overflow policy a subsystem's queue applies once full (spec.md §4.2/§5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    Reject,
    DropOldest,
    DropNewest,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::Reject
    }
}

/// Router tie-break policy (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    Longest,
    FirstRegistered,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        MatchPolicy::Longest
    }
}

/// Process-level configuration: `{poolSize, warmupOnBoot, debug, timeSliceMs,
/// defaultQueueCapacity}` per spec.md §6 "MessageSystem".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSystemConfig {
    pub pool_size: usize,
    pub warmup_on_boot: bool,
    pub debug: bool,
    pub time_slice_ms: u64,
    pub default_queue_capacity: usize,
    pub response_default_timeout_ms: u64,
    pub response_max_pending: usize,
    pub match_policy: MatchPolicy,
}

impl Default for MessageSystemConfig {
    fn default() -> Self {
        MessageSystemConfig {
            pool_size: 1_000,
            warmup_on_boot: false,
            debug: false,
            time_slice_ms: 20,
            default_queue_capacity: 1_024,
            response_default_timeout_ms: 5_000,
            response_max_pending: 10_000,
            match_policy: MatchPolicy::Longest,
        }
    }
}

/// Per-subsystem configuration (spec.md §6 "Subsystem").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubsystemConfig {
    pub queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub time_slice_ms: Option<u64>,
}

impl Default for SubsystemConfig {
    fn default() -> Self {
        SubsystemConfig {
            queue_capacity: 1_024,
            overflow_policy: OverflowPolicy::Reject,
            time_slice_ms: None,
        }
    }
}

/// Error loading or parsing configuration. Manual `Display`/`Error`, matching
/// the teacher's `ConfigError` (no `thiserror`).
#[derive(Debug)]
pub enum ConfigError {
    Parse(String),
    Io(String),
    InvalidEnvValue { key: String, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(msg) => write!(f, "config parse error: {msg}"),
            ConfigError::Io(msg) => write!(f, "config io error: {msg}"),
            ConfigError::InvalidEnvValue { key, value } => {
                write!(f, "invalid value for {key}: {value:?}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

impl MessageSystemConfig {
    /// Parse a YAML document into a config, defaults filling anything absent.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let partial: PartialConfig = serde_yaml::from_str(yaml)?;
        Ok(partial.into_config(Self::default()))
    }

    /// Load from a YAML file on disk.
    pub fn load_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_yaml_str(&text)
    }

    /// Overlay `MYCELIA_*` environment variables on top of `self`.
    pub fn overlay_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(v) = std::env::var("MYCELIA_POOL_SIZE") {
            self.pool_size = parse_env("MYCELIA_POOL_SIZE", &v)?;
        }
        if let Ok(v) = std::env::var("MYCELIA_WARMUP_ON_BOOT") {
            self.warmup_on_boot = parse_env("MYCELIA_WARMUP_ON_BOOT", &v)?;
        }
        if let Ok(v) = std::env::var("MYCELIA_DEBUG") {
            self.debug = parse_env("MYCELIA_DEBUG", &v)?;
        }
        if let Ok(v) = std::env::var("MYCELIA_TIME_SLICE_MS") {
            self.time_slice_ms = parse_env("MYCELIA_TIME_SLICE_MS", &v)?;
        }
        if let Ok(v) = std::env::var("MYCELIA_DEFAULT_QUEUE_CAPACITY") {
            self.default_queue_capacity = parse_env("MYCELIA_DEFAULT_QUEUE_CAPACITY", &v)?;
        }
        Ok(self)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidEnvValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Mirrors `MessageSystemConfig` with every field optional, so a YAML
/// document only needs to specify the overrides it cares about.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartialConfig {
    pool_size: Option<usize>,
    warmup_on_boot: Option<bool>,
    debug: Option<bool>,
    time_slice_ms: Option<u64>,
    default_queue_capacity: Option<usize>,
    response_default_timeout_ms: Option<u64>,
    response_max_pending: Option<usize>,
    match_policy: Option<MatchPolicy>,
}

impl PartialConfig {
    fn into_config(self, base: MessageSystemConfig) -> MessageSystemConfig {
        MessageSystemConfig {
            pool_size: self.pool_size.unwrap_or(base.pool_size),
            warmup_on_boot: self.warmup_on_boot.unwrap_or(base.warmup_on_boot),
            debug: self.debug.unwrap_or(base.debug),
            time_slice_ms: self.time_slice_ms.unwrap_or(base.time_slice_ms),
            default_queue_capacity: self.default_queue_capacity.unwrap_or(base.default_queue_capacity),
            response_default_timeout_ms: self
                .response_default_timeout_ms
                .unwrap_or(base.response_default_timeout_ms),
            response_max_pending: self.response_max_pending.unwrap_or(base.response_max_pending),
            match_policy: self.match_policy.unwrap_or(base.match_policy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_enumeration() {
        let cfg = MessageSystemConfig::default();
        assert_eq!(cfg.time_slice_ms, 20);
        assert_eq!(cfg.default_queue_capacity, 1_024);
        assert_eq!(cfg.pool_size, 1_000);
    }

    #[test]
    fn yaml_overrides_only_specified_fields() {
        let cfg = MessageSystemConfig::from_yaml_str("poolSize: 50\ndebug: true\n").unwrap();
        assert_eq!(cfg.pool_size, 50);
        assert!(cfg.debug);
        assert_eq!(cfg.time_slice_ms, 20, "unspecified fields keep their default");
    }
}
