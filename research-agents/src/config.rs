//! Consensus configuration

use common::ProviderWeight;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

/// Tolerance for the enabled-weights-sum-to-one check
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("no enabled provider has a non-zero weight")]
    NoActiveProviders,
    #[error("provider '{0}' is configured more than once")]
    DuplicateProvider(String),
    #[error("provider '{provider_id}' weight {weight} outside [0, 1]")]
    WeightOutOfRange { provider_id: String, weight: f64 },
    #[error("enabled provider weights sum to {0}, expected 1.0")]
    WeightsDoNotSumToOne(f64),
    #[error("provider '{0}' is configured but not registered")]
    UnknownProvider(String),
    #[error("{field} must be {expected}, got {value}")]
    InvalidValue {
        field: &'static str,
        expected: &'static str,
        value: f64,
    },
}

/// Configuration for the consensus orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Voting weights, in the order contributing providers are reported
    pub providers: Vec<ProviderWeight>,

    /// Abort the request if any active provider fails
    #[serde(default)]
    pub require_all_providers: bool,

    /// Per-provider timeout unless the provider overrides it (milliseconds)
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,

    /// Overall deadline for one fan-out round (milliseconds)
    #[serde(default = "default_request_deadline_ms")]
    pub request_deadline_ms: u64,

    /// How long a consensus stays cached (seconds)
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Bars of history providers are asked to consider
    #[serde(default = "default_lookback_bars")]
    pub default_lookback_bars: u32,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            require_all_providers: false,
            provider_timeout_ms: default_provider_timeout_ms(),
            request_deadline_ms: default_request_deadline_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            default_lookback_bars: default_lookback_bars(),
        }
    }
}

fn default_provider_timeout_ms() -> u64 {
    10_000
}

fn default_request_deadline_ms() -> u64 {
    15_000
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_lookback_bars() -> u32 {
    100
}

impl ConsensusConfig {
    pub fn with_providers(providers: Vec<ProviderWeight>) -> Self {
        Self {
            providers,
            ..Default::default()
        }
    }

    /// Providers that take part in a round: enabled and non-zero weight
    pub fn active_providers(&self) -> impl Iterator<Item = &ProviderWeight> {
        self.providers.iter().filter(|p| p.is_active())
    }

    pub fn timeout_for(&self, provider: &ProviderWeight) -> Duration {
        Duration::from_millis(provider.timeout_ms.unwrap_or(self.provider_timeout_ms))
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.provider_id.as_str()) {
                return Err(ConfigError::DuplicateProvider(provider.provider_id.clone()));
            }
            if !provider.weight.is_finite() || !(0.0..=1.0).contains(&provider.weight) {
                return Err(ConfigError::WeightOutOfRange {
                    provider_id: provider.provider_id.clone(),
                    weight: provider.weight,
                });
            }
        }

        if self.active_providers().next().is_none() {
            return Err(ConfigError::NoActiveProviders);
        }

        let enabled_sum: f64 = self
            .providers
            .iter()
            .filter(|p| p.enabled)
            .map(|p| p.weight)
            .sum();
        if (enabled_sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightsDoNotSumToOne(enabled_sum));
        }

        if self.provider_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "provider_timeout_ms",
                expected: "positive",
                value: 0.0,
            });
        }
        if self.request_deadline_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_deadline_ms",
                expected: "positive",
                value: 0.0,
            });
        }

        Ok(())
    }
}
