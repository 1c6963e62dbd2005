//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved when the source registry is built.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::scorer::RuleSet;
use crate::types::{EngineError, SourceId};

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "PADDOCK_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    /// Source identifiers, most trusted first.
    #[serde(default)]
    pub source_priority: Vec<SourceId>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    /// Required. A config without a rule set cannot run a cycle.
    pub qualification: Option<RuleSet>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,
    /// Where the latest cycle report is written. `None` disables the snapshot.
    #[serde(default)]
    pub snapshot_path: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_cycle_interval(),
            snapshot_path: None,
        }
    }
}

/// Circuit breaker, cache and retry parameters shared by every source.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ResilienceConfig {
    pub failure_threshold: u32,
    pub cooldown_secs: f64,
    pub cache_ttl_secs: f64,
    pub timeout_secs: f64,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_secs: 300.0,
            cache_ttl_secs: 60.0,
            timeout_secs: 20.0,
            max_attempts: 3,
            base_backoff_ms: 500,
        }
    }
}

impl ResilienceConfig {
    pub fn cooldown(&self) -> Duration {
        secs(self.cooldown_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        secs(self.cache_ttl_secs)
    }

    pub fn timeout(&self) -> Duration {
        secs(self.timeout_secs)
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn validate(&self) -> std::result::Result<(), EngineError> {
        if self.failure_threshold == 0 {
            return Err(EngineError::Config("failure_threshold must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(EngineError::Config("max_attempts must be at least 1".into()));
        }
        if !(self.timeout_secs > 0.0) {
            return Err(EngineError::Config("timeout_secs must be positive".into()));
        }
        for (name, value) in [
            ("timeout_secs", self.timeout_secs),
            ("cooldown_secs", self.cooldown_secs),
            ("cache_ttl_secs", self.cache_ttl_secs),
        ] {
            if !(value >= 0.0) || Duration::try_from_secs_f64(value).is_err() {
                return Err(EngineError::Config(format!(
                    "{name} must be a finite, non-negative duration (got {value})"
                )));
            }
        }
        Ok(())
    }
}

/// Seconds to `Duration`. Negative and NaN clamp to zero, anything too
/// large for a `Duration` saturates.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

/// One configured source. Kind-specific keys are optional at this layer
/// and checked by the collector factory.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub id: SourceId,
    pub kind: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub api_key_header: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

fn default_cycle_interval() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Load from `$PADDOCK_CONFIG`, falling back to `config.toml`.
    pub fn load_default() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(&path)
    }

    /// Parse and validate configuration text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse config")?;
        config.resilience.validate()?;
        config.rules()?.validate()?;

        let mut seen = std::collections::HashSet::new();
        for source in &config.sources {
            if !seen.insert(&source.id) {
                return Err(EngineError::Config(format!("duplicate source id: {}", source.id)).into());
            }
        }
        Ok(config)
    }

    /// The qualification rule set. Its absence is fatal.
    pub fn rules(&self) -> std::result::Result<&RuleSet, EngineError> {
        self.qualification
            .as_ref()
            .ok_or_else(|| EngineError::RuleSet("missing [qualification] section".into()))
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const MINIMAL: &str = r#"
        source_priority = ["alpha", "beta"]

        [[sources]]
        id = "alpha"
        kind = "fixture"
        path = "fixtures/sample_races.json"

        [[sources]]
        id = "beta"
        kind = "json_feed"
        enabled = false
        url = "https://feed.example.com/races"

        [qualification]
        threshold = 20

        [qualification.field_size]
        bands = [{ min = 2, max = 8, points = 10 }]

        [qualification.favorite]
        min = 1.5
        points = 10

        [qualification.second_favorite]
        min = 3.0
        points = 10
    "#;

    #[test]
    fn test_parse_minimal_config() {
        let cfg = AppConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(cfg.source_priority, vec![SourceId::from("alpha"), SourceId::from("beta")]);
        assert_eq!(cfg.sources.len(), 2);
        assert!(cfg.sources[0].enabled);
        assert!(!cfg.sources[1].enabled);
        assert_eq!(cfg.engine.cycle_interval_secs, 300);
        assert_eq!(cfg.resilience, ResilienceConfig::default());
        assert_eq!(cfg.rules().unwrap().threshold, dec!(20));
    }

    #[test]
    fn test_resilience_defaults() {
        let r = ResilienceConfig::default();
        assert_eq!(r.failure_threshold, 3);
        assert_eq!(r.max_attempts, 3);
        assert_eq!(r.cooldown(), Duration::from_secs(300));
        assert!(r.validate().is_ok());
    }

    #[test]
    fn test_missing_rule_set_is_fatal() {
        let text = r#"
            [[sources]]
            id = "alpha"
            kind = "fixture"
        "#;
        let err = AppConfig::from_toml(text).unwrap_err();
        assert!(format!("{err:#}").contains("qualification"));
    }

    #[test]
    fn test_invalid_resilience_rejected() {
        let text = format!("{MINIMAL}\n[resilience]\nfailure_threshold = 0\n");
        assert!(AppConfig::from_toml(&text).is_err());
    }

    #[test]
    fn test_duplicate_source_ids_rejected() {
        let text = r#"
            [[sources]]
            id = "alpha"
            kind = "fixture"

            [[sources]]
            id = "alpha"
            kind = "json_feed"

            [qualification]
            threshold = 10
            field_size = { bands = [{ min = 1, max = 10, points = 10 }] }
            favorite = { points = 0 }
            second_favorite = { points = 0 }
        "#;
        let err = AppConfig::from_toml(text).unwrap_err();
        assert!(format!("{err:#}").contains("duplicate source id"));
    }

    #[test]
    fn test_load_config() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml");
        let cfg = AppConfig::load(path).unwrap();
        assert!(!cfg.sources.is_empty());
        assert!(cfg.rules().is_ok());
        assert!(cfg.resilience.failure_threshold >= 1);
    }

    #[test]
    fn test_unbounded_durations_rejected() {
        let infinite_timeout = ResilienceConfig {
            timeout_secs: f64::INFINITY,
            ..ResilienceConfig::default()
        };
        assert!(infinite_timeout.validate().is_err());

        let huge_cooldown = ResilienceConfig {
            cooldown_secs: 1e30,
            ..ResilienceConfig::default()
        };
        let err = huge_cooldown.validate().unwrap_err();
        assert!(err.to_string().contains("cooldown_secs"));

        let negative_ttl = ResilienceConfig {
            cache_ttl_secs: -1.0,
            ..ResilienceConfig::default()
        };
        assert!(negative_ttl.validate().is_err());
    }

    #[test]
    fn test_duration_accessors_saturate() {
        let r = ResilienceConfig {
            timeout_secs: f64::INFINITY,
            cooldown_secs: 1e30,
            cache_ttl_secs: f64::NAN,
            ..ResilienceConfig::default()
        };
        assert_eq!(r.timeout(), Duration::MAX);
        assert_eq!(r.cooldown(), Duration::MAX);
        assert_eq!(r.cache_ttl(), Duration::ZERO);
    }

    #[test]
    fn test_from_toml_rejects_huge_cooldown() {
        let text = format!("{MINIMAL}\n[resilience]\ncooldown_secs = 1e30\n");
        let err = AppConfig::from_toml(&text).unwrap_err();
        assert!(format!("{err:#}").contains("cooldown_secs"));
    }
}
