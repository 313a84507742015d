//! Configuration management for kiln
//!
//! This module provides the externally supplied knobs of the pipeline:
//! circuit breaker thresholds, retry budgets, the resolution confidence
//! policy, and stream fallback behaviour.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{KilnError, Result};

/// Pipeline configuration
///
/// Loaded from `.kiln/config.toml` in the project root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KilnConfig {
    /// Per-artifact circuit breaker
    #[serde(default)]
    pub circuit: CircuitConfig,

    /// Retry wrapper around the render collaborator
    #[serde(default)]
    pub retry: RetryConfig,

    /// Dependency resolution policy
    #[serde(default)]
    pub resolution: ResolutionConfig,

    /// Stream parser behaviour
    #[serde(default)]
    pub stream: StreamConfig,
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive failures in CLOSED before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Time OPEN must last before a half-open trial is allowed
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    /// Time a granted half-open trial may stay unreported before another is granted
    #[serde(default = "default_half_open_timeout_ms")]
    pub half_open_timeout_ms: u64,
}

/// Retry budget for render attempts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wall-clock budget of one attempt
    #[serde(default = "default_per_attempt_timeout_ms")]
    pub per_attempt_timeout_ms: u64,

    /// Growth factor applied to the delay between attempts
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Delay before the second attempt
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

/// Dependency resolution policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Minimum confidence a successful strategy needs to stop the chain.
    /// `None` keeps first-success-wins.
    #[serde(default)]
    pub min_confidence: Option<f32>,
}

/// Stream parser settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Scan fenced code blocks when a message holds no artifact element
    #[serde(default = "default_fallback_enabled")]
    pub fallback_enabled: bool,

    /// Confidence assigned to fallback blocks
    #[serde(default = "default_fallback_confidence")]
    pub fallback_confidence: f32,
}

// Default value providers
fn default_failure_threshold() -> u32 {
    3
}

fn default_reset_timeout_ms() -> u64 {
    60_000
}

fn default_half_open_timeout_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_per_attempt_timeout_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_initial_backoff_ms() -> u64 {
    250
}

fn default_fallback_enabled() -> bool {
    true
}

fn default_fallback_confidence() -> f32 {
    0.5
}

impl KilnConfig {
    /// Load configuration from `.kiln/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join(".kiln/config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml_str(&content)
        } else {
            tracing::debug!("No config at {}, using defaults", config_path.display());
            Ok(Self::default())
        }
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write default configuration to `.kiln/config.toml`
    pub fn write_default(root: &Path) -> Result<()> {
        let config_dir = root.join(".kiln");
        std::fs::create_dir_all(&config_dir)?;

        let content = toml::to_string_pretty(&Self::default())?;
        std::fs::write(config_dir.join("config.toml"), content)?;
        Ok(())
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.circuit.failure_threshold == 0 {
            return Err(KilnError::Config(
                "circuit.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(KilnError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !(self.retry.backoff_multiplier >= 1.0) {
            return Err(KilnError::Config(format!(
                "retry.backoff_multiplier must be >= 1.0, got {}",
                self.retry.backoff_multiplier
            )));
        }
        if let Some(floor) = self.resolution.min_confidence {
            if !(0.0..=1.0).contains(&floor) {
                return Err(KilnError::Config(format!(
                    "resolution.min_confidence must be within 0..=1, got {}",
                    floor
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.stream.fallback_confidence) {
            return Err(KilnError::Config(format!(
                "stream.fallback_confidence must be within 0..=1, got {}",
                self.stream.fallback_confidence
            )));
        }
        Ok(())
    }
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            half_open_timeout_ms: default_half_open_timeout_ms(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            per_attempt_timeout_ms: default_per_attempt_timeout_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            fallback_enabled: default_fallback_enabled(),
            fallback_confidence: default_fallback_confidence(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = KilnConfig::default();
        assert_eq!(config.circuit.failure_threshold, 3);
        assert_eq!(config.circuit.reset_timeout_ms, 60_000);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.backoff_multiplier, 2.0);
        assert!(config.resolution.min_confidence.is_none());
        assert!(config.stream.fallback_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = KilnConfig::from_toml_str(
            r#"
[circuit]
failure_threshold = 5

[resolution]
min_confidence = 0.7
"#,
        )
        .unwrap();
        assert_eq!(config.circuit.failure_threshold, 5);
        assert_eq!(config.circuit.reset_timeout_ms, 60_000);
        assert_eq!(config.resolution.min_confidence, Some(0.7));
        assert_eq!(config.retry, RetryConfig::default());
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(KilnConfig::from_toml_str("[circuit]\nfailure_threshold = 0\n").is_err());
        assert!(KilnConfig::from_toml_str("[retry]\nmax_attempts = 0\n").is_err());
        assert!(KilnConfig::from_toml_str("[retry]\nbackoff_multiplier = 0.5\n").is_err());
        assert!(KilnConfig::from_toml_str("[resolution]\nmin_confidence = 1.5\n").is_err());
        assert!(KilnConfig::from_toml_str("not = [valid").is_err());
    }

    #[test]
    fn test_write_then_load_default() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(
            KilnConfig::load_or_default(temp_dir.path()).unwrap(),
            KilnConfig::default()
        );

        KilnConfig::write_default(temp_dir.path()).unwrap();
        assert!(temp_dir.path().join(".kiln/config.toml").exists());

        let loaded = KilnConfig::load_or_default(temp_dir.path()).unwrap();
        assert_eq!(loaded, KilnConfig::default());
    }
}
