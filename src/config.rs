//! Engine configuration
//!
//! Loaded from a YAML file; every field has a default so a partial file (or
//! none at all) is valid.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Retry Configuration
// =============================================================================

/// Bounds for device calls made during assembly, disassembly and resets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// Attempts per device call, the first one included
    pub max_attempts: u32,
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub multiplier: f64,
    /// Jitter applied to each interval, 0.0 for none
    pub randomization_factor: f64,
    /// Timeout of a single attempt
    pub call_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval_ms: 200,
            max_interval_ms: 5_000,
            multiplier: 2.0,
            randomization_factor: 0.2,
            call_timeout_ms: 10_000,
        }
    }
}

impl RetryConfig {
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Configuration("retry.maxAttempts must be at least 1".into()));
        }
        if self.multiplier < 1.0 {
            return Err(Error::Configuration(format!(
                "retry.multiplier must be at least 1.0, got {}",
                self.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.randomization_factor) {
            return Err(Error::Configuration(format!(
                "retry.randomizationFactor must be within 0.0..=1.0, got {}",
                self.randomization_factor
            )));
        }
        if self.call_timeout_ms == 0 {
            return Err(Error::Configuration("retry.callTimeoutMs must be positive".into()));
        }
        if self.max_interval_ms < self.initial_interval_ms {
            return Err(Error::Configuration(
                "retry.maxIntervalMs must not be below retry.initialIntervalMs".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Configuration for the composition engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub retry: RetryConfig,
    /// Capacity of the graph event channel
    pub event_channel_capacity: usize,
    /// Prefix for IQNs of targets created during allocation
    pub iqn_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            event_channel_capacity: 1024,
            iqn_prefix: "iqn.2016-01.io.pod-composer".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        if self.event_channel_capacity == 0 {
            return Err(Error::Configuration("eventChannelCapacity must be positive".into()));
        }
        if self.iqn_prefix.trim().is_empty() {
            return Err(Error::Configuration("iqnPrefix must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.call_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = EngineConfig::from_yaml_str("retry:\n  maxAttempts: 5\n").unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_interval_ms, 200);
        assert_eq!(config.event_channel_capacity, 1024);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert_matches!(
            EngineConfig::from_yaml_str("retry:\n  maxAttempts: 0\n"),
            Err(Error::Configuration(_))
        );
        assert_matches!(
            EngineConfig::from_yaml_str("retry:\n  multiplier: 0.5\n"),
            Err(Error::Configuration(_))
        );
        assert_matches!(
            EngineConfig::from_yaml_str("eventChannelCapacity: 0\n"),
            Err(Error::Configuration(_))
        );
        assert_matches!(
            EngineConfig::from_yaml_str("retry: [1, 2]\n"),
            Err(Error::Yaml(_))
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "iqnPrefix: iqn.2024-05.test\nretry:\n  callTimeoutMs: 250").unwrap();

        let config = EngineConfig::from_path(file.path()).unwrap();
        assert_eq!(config.iqn_prefix, "iqn.2024-05.test");
        assert_eq!(config.retry.call_timeout(), Duration::from_millis(250));
    }
}
