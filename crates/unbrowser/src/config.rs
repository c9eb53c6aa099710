//! Engine configuration.
//!
//! Defaults come from [`EngineConfig::default`]; [`EngineConfig::from_env`]
//! overlays `UNBROWSER_*` variables on a named profile, and
//! [`EngineConfig::load`] reads a JSON document with the same shape.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::retry::RetryPolicy;
use crate::types::Tier;
use crate::validation::ValidationPolicy;

/// Errors raised while loading configuration from disk.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Knowledge-base learning and decay parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// A learned pattern at or above this confidence may reorder tiers.
    pub high_confidence_threshold: f64,
    /// Days without verification before a pattern is stale.
    pub stale_days: u32,
    /// Consecutive failures that trigger a decay event.
    pub failure_streak_threshold: u32,
    /// Multiplier applied when the failure streak threshold is crossed.
    pub repeated_failure_decay_factor: f64,
    /// Multiplier applied once per staleness period on read.
    pub time_decay_factor: f64,
    /// Patterns below this confidence are archived.
    pub archive_threshold: f64,
    /// Step used by `boost` on learn.
    pub boost_amount: f64,
    /// Starting confidence for observations that carry none.
    pub initial_confidence: f64,
    pub max_recent_failures: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            high_confidence_threshold: 0.8,
            stale_days: 14,
            failure_streak_threshold: 3,
            repeated_failure_decay_factor: 0.5,
            time_decay_factor: 0.85,
            archive_threshold: 0.1,
            boost_amount: 0.1,
            initial_confidence: 0.75,
            max_recent_failures: 20,
        }
    }
}

/// Expected wall-clock per tier, used for preview estimates when a domain
/// has no recorded statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierDurations {
    pub intelligence_ms: u64,
    pub lightweight_ms: u64,
    pub playwright_ms: u64,
}

impl Default for TierDurations {
    fn default() -> Self {
        Self {
            intelligence_ms: 300,
            lightweight_ms: 1500,
            playwright_ms: 5000,
        }
    }
}

impl TierDurations {
    pub fn get(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Intelligence => self.intelligence_ms,
            Tier::Lightweight => self.lightweight_ms,
            Tier::Playwright => self.playwright_ms,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub knowledge: KnowledgeConfig,
    pub retry: RetryPolicy,
    pub validation: ValidationPolicy,
    /// Overall latency budget when the caller gives none.
    pub default_max_latency_ms: u64,
    /// Smallest budget handed to a single tier.
    pub min_tier_budget_ms: u64,
    pub batch_concurrency: usize,
    /// Debounce interval for file-backed stores.
    pub flush_interval_ms: u64,
    pub expected_tier_ms: TierDurations,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Profile::Desktop.defaults()
    }
}

/// Named default sets, selected with `UNBROWSER_PROFILE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Desktop,
    Server,
    Aggressive,
}

impl Profile {
    fn from_env(name: &str) -> Self {
        let raw = read_env_string(name).unwrap_or_else(|| "desktop".to_string());
        match raw.trim().to_ascii_lowercase().as_str() {
            "server" => Self::Server,
            "aggressive" => Self::Aggressive,
            _ => Self::Desktop,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Server => "server",
            Self::Aggressive => "aggressive",
        }
    }

    /// Server runs more calls in parallel and flushes less often. Aggressive
    /// trades politeness for latency: shorter retries, tighter budgets.
    pub fn defaults(self) -> EngineConfig {
        let base = EngineConfig {
            knowledge: KnowledgeConfig::default(),
            retry: RetryPolicy::default(),
            validation: ValidationPolicy::default(),
            default_max_latency_ms: 30_000,
            min_tier_budget_ms: 250,
            batch_concurrency: 4,
            flush_interval_ms: 1000,
            expected_tier_ms: TierDurations::default(),
        };
        match self {
            Self::Desktop => base,
            Self::Server => EngineConfig {
                batch_concurrency: 16,
                flush_interval_ms: 5000,
                ..base
            },
            Self::Aggressive => EngineConfig {
                retry: RetryPolicy {
                    max_attempts: 2,
                    initial_delay_ms: 250,
                    max_delay_ms: 2000,
                    backoff_multiplier: 2.0,
                },
                default_max_latency_ms: 10_000,
                batch_concurrency: 8,
                ..base
            },
        }
    }
}

impl EngineConfig {
    /// Profile defaults with `UNBROWSER_*` overrides applied. Unparseable
    /// values fall back to the profile default.
    pub fn from_env() -> Self {
        let profile = Profile::from_env("UNBROWSER_PROFILE");
        let d = profile.defaults();
        let config = Self {
            knowledge: KnowledgeConfig {
                high_confidence_threshold: read_env_f64(
                    "UNBROWSER_HIGH_CONFIDENCE",
                    d.knowledge.high_confidence_threshold,
                )
                .clamp(0.0, 1.0),
                stale_days: read_env_u32("UNBROWSER_STALE_DAYS", d.knowledge.stale_days),
                failure_streak_threshold: read_env_u32(
                    "UNBROWSER_FAILURE_STREAK",
                    d.knowledge.failure_streak_threshold,
                )
                .max(1),
                ..d.knowledge.clone()
            },
            retry: RetryPolicy {
                max_attempts: read_env_u32("UNBROWSER_RETRY_MAX_ATTEMPTS", d.retry.max_attempts)
                    .max(1),
                initial_delay_ms: read_env_u64(
                    "UNBROWSER_RETRY_INITIAL_DELAY_MS",
                    d.retry.initial_delay_ms,
                ),
                ..d.retry
            },
            validation: ValidationPolicy {
                min_content_length: read_env_usize(
                    "UNBROWSER_MIN_CONTENT_CHARS",
                    d.validation.min_content_length,
                ),
                ..d.validation.clone()
            },
            default_max_latency_ms: read_env_u64(
                "UNBROWSER_MAX_LATENCY_MS",
                d.default_max_latency_ms,
            )
            .max(1),
            min_tier_budget_ms: d.min_tier_budget_ms,
            batch_concurrency: read_env_usize("UNBROWSER_BATCH_CONCURRENCY", d.batch_concurrency)
                .max(1),
            flush_interval_ms: read_env_u64("UNBROWSER_FLUSH_INTERVAL_MS", d.flush_interval_ms),
            expected_tier_ms: d.expected_tier_ms,
        };
        tracing::debug!(profile = profile.as_str(), "engine config loaded from env");
        config
    }

    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let k = &self.knowledge;
        for (name, value) in [
            ("high_confidence_threshold", k.high_confidence_threshold),
            ("repeated_failure_decay_factor", k.repeated_failure_decay_factor),
            ("time_decay_factor", k.time_decay_factor),
            ("archive_threshold", k.archive_threshold),
            ("initial_confidence", k.initial_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "knowledge.{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if k.failure_streak_threshold == 0 {
            return Err(ConfigError::Invalid(
                "knowledge.failure_streak_threshold must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.batch_concurrency == 0 {
            return Err(ConfigError::Invalid("batch_concurrency must be at least 1".into()));
        }
        Ok(())
    }
}

fn read_env_u64(name: &str, default_value: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default_value)
}

fn read_env_u32(name: &str, default_value: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default_value)
}

fn read_env_usize(name: &str, default_value: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default_value)
}

fn read_env_f64(name: &str, default_value: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default_value)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.knowledge.high_confidence_threshold, 0.8);
        assert_eq!(config.knowledge.stale_days, 14);
        assert_eq!(config.knowledge.failure_streak_threshold, 3);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.validation.min_content_length, 200);
        assert_eq!(config.default_max_latency_ms, 30_000);
        assert_eq!(config.expected_tier_ms.get(Tier::Playwright), 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_profiles_differ() {
        let server = Profile::Server.defaults();
        assert_eq!(server.batch_concurrency, 16);
        let aggressive = Profile::Aggressive.defaults();
        assert_eq!(aggressive.retry.max_attempts, 2);
        assert!(aggressive.default_max_latency_ms < EngineConfig::default().default_max_latency_ms);
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("unbrowser.json");
        std::fs::write(
            &path,
            r#"{"knowledge": {"failure_streak_threshold": 5}, "batch_concurrency": 2}"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.knowledge.failure_streak_threshold, 5);
        assert_eq!(config.knowledge.stale_days, 14);
        assert_eq!(config.batch_concurrency, 2);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_load_rejects_out_of_range() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"knowledge": {"archive_threshold": 1.5}}"#).unwrap();
        let err = EngineConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("archive_threshold"));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = EngineConfig::load(Path::new("/nonexistent/unbrowser.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
