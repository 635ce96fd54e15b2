//! Coordination configuration.
//!
//! A single TOML-backed struct covering platform context ceilings, the
//! fallback chain order, breaker thresholds, timeout bases, compression
//! tunables, and the operational mode. Every field has a default so a
//! partial file (or none at all) still yields a working configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::breaker::BreakerConfig;
use crate::errors::{CoordinationError, CoordinationResult};
use crate::memory::PreservationConfig;
use crate::platform::PlatformId;
use crate::timeout::{OperationalMode, TimeoutConfig};

fn default_ceilings() -> HashMap<PlatformId, u64> {
    PlatformId::all()
        .iter()
        .map(|p| (*p, p.default_context_ceiling()))
        .collect()
}

fn default_chain() -> Vec<PlatformId> {
    PlatformId::all().to_vec()
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

/// Top-level configuration for the coordination core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Context ceilings in tokens per platform.
    pub context_ceilings: HashMap<PlatformId, u64>,
    /// Ordered fallback chain; handoffs move strictly forward through it.
    pub fallback_chain: Vec<PlatformId>,
    /// Detector poll interval in milliseconds.
    pub monitor_poll_interval_ms: u64,
    /// Operational mode scaling all timeouts.
    pub mode: OperationalMode,
    /// Default circuit breaker thresholds.
    pub breaker: BreakerConfig,
    /// Timeout bases and learning tunables.
    pub timeouts: TimeoutConfig,
    /// Compression budget scales and protection rules.
    pub preservation: PreservationConfig,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            context_ceilings: default_ceilings(),
            fallback_chain: default_chain(),
            monitor_poll_interval_ms: default_poll_interval_ms(),
            mode: OperationalMode::Normal,
            breaker: BreakerConfig::default(),
            timeouts: TimeoutConfig::default(),
            preservation: PreservationConfig::default(),
        }
    }
}

impl CoordinationConfig {
    /// Parse a TOML document, falling back to defaults for absent fields.
    pub fn from_toml_str(raw: &str) -> CoordinationResult<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| CoordinationError::InvalidConfig {
                detail: format!("toml parse error: {}", e),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> CoordinationResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| CoordinationError::InvalidConfig {
            detail: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&raw)
    }

    /// Reject configurations the core cannot operate under.
    pub fn validate(&self) -> CoordinationResult<()> {
        if self.fallback_chain.is_empty() {
            return Err(CoordinationError::InvalidConfig {
                detail: "fallback_chain must not be empty".into(),
            });
        }
        for platform in &self.fallback_chain {
            if !self.context_ceilings.contains_key(platform) {
                return Err(CoordinationError::InvalidConfig {
                    detail: format!("no context ceiling configured for {}", platform),
                });
            }
        }
        if let Some((platform, _)) = self.context_ceilings.iter().find(|(_, c)| **c == 0) {
            return Err(CoordinationError::InvalidConfig {
                detail: format!("zero context ceiling for {}", platform),
            });
        }
        if self.monitor_poll_interval_ms == 0 {
            return Err(CoordinationError::InvalidConfig {
                detail: "monitor_poll_interval_ms must be positive".into(),
            });
        }
        if self.breaker.failure_threshold == 0 || self.breaker.success_threshold == 0 {
            return Err(CoordinationError::InvalidConfig {
                detail: "breaker thresholds must be positive".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.timeouts.warning_fraction) {
            return Err(CoordinationError::InvalidConfig {
                detail: "warning_fraction must be within [0, 1]".into(),
            });
        }
        let scales = [
            self.preservation.standard_scale,
            self.preservation.proactive_scale,
            self.preservation.aggressive_scale,
        ];
        if scales.iter().any(|s| !(0.0..=1.0).contains(s) || *s == 0.0) {
            return Err(CoordinationError::InvalidConfig {
                detail: "compression scales must be within (0, 1]".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = CoordinationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fallback_chain.len(), 4);
        assert_eq!(
            config.context_ceilings.get(&PlatformId::ClaudeCode),
            Some(&200_000)
        );
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = CoordinationConfig::from_toml_str(
            r#"
            monitor_poll_interval_ms = 2000
            mode = "conservative"

            [breaker]
            failure_threshold = 3
            cooldown_secs = 30
            success_threshold = 2
            half_open_max_probes = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.monitor_poll_interval_ms, 2_000);
        assert_eq!(config.mode, OperationalMode::Conservative);
        assert_eq!(config.breaker.failure_threshold, 3);
        // Untouched sections keep their defaults.
        assert_eq!(config.timeouts.min_timeout_ms, 1_000);
        assert_eq!(config.preservation.protected_top_k, 10);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let err = CoordinationConfig::from_toml_str("not = [valid").unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidConfig { .. }));
    }

    #[test]
    fn test_empty_chain_rejected() {
        let err = CoordinationConfig::from_toml_str("fallback_chain = []").unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidConfig { .. }));
    }

    #[test]
    fn test_chain_platform_without_ceiling_rejected() {
        let mut config = CoordinationConfig::default();
        config.context_ceilings.remove(&PlatformId::Iflow);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_ceiling_rejected() {
        let mut config = CoordinationConfig::default();
        config
            .context_ceilings
            .insert(PlatformId::QwenCode, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "monitor_poll_interval_ms = 750").unwrap();
        let config = CoordinationConfig::load(file.path()).unwrap();
        assert_eq!(config.monitor_poll_interval_ms, 750);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = CoordinationConfig::load(Path::new("/nonexistent/coordination.toml"));
        assert!(matches!(
            err,
            Err(CoordinationError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_round_trip() {
        let config = CoordinationConfig::default();
        let raw = toml::to_string(&config).unwrap();
        let parsed = CoordinationConfig::from_toml_str(&raw).unwrap();
        assert_eq!(parsed.fallback_chain, config.fallback_chain);
        assert_eq!(parsed.breaker.failure_threshold, config.breaker.failure_threshold);
    }
}
