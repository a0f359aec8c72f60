//! Fusion and hybrid pipeline configuration
//!
//! All thresholds and blend weights are empirically calibrated parameters;
//! the defaults reproduce the reference design.

use research_agents::{ConfigError, ConsensusConfig};
use serde::{Deserialize, Serialize};

/// Hard ceiling on the position size multiplier
pub const MAX_POSITION_MULTIPLIER: f64 = 1.5;

const SUM_TOLERANCE: f64 = 1e-6;

/// Split of the agreement score between its three components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgreementWeights {
    /// Directions match on the shared axis
    #[serde(default = "default_direction_weight")]
    pub direction: f64,
    /// 1 - |ml.confidence - consensus.confidence|
    #[serde(default = "default_confidence_weight")]
    pub confidence: f64,
    /// Mean of model agreement and provider agreement
    #[serde(default = "default_conviction_weight")]
    pub conviction: f64,
}

impl Default for AgreementWeights {
    fn default() -> Self {
        Self {
            direction: default_direction_weight(),
            confidence: default_confidence_weight(),
            conviction: default_conviction_weight(),
        }
    }
}

fn default_direction_weight() -> f64 {
    0.5
}

fn default_confidence_weight() -> f64 {
    0.3
}

fn default_conviction_weight() -> f64 {
    0.2
}

/// Minimums for one actionable tier; bounds are inclusive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierThreshold {
    pub min_ml_confidence: f64,
    pub min_consensus_confidence: f64,
    #[serde(default)]
    pub min_agreement: f64,
}

impl TierThreshold {
    pub fn new(min_ml_confidence: f64, min_consensus_confidence: f64, min_agreement: f64) -> Self {
        Self {
            min_ml_confidence,
            min_consensus_confidence,
            min_agreement,
        }
    }

    pub fn admits(
        &self,
        ml_confidence: f64,
        consensus_confidence: f64,
        agreement_score: f64,
    ) -> bool {
        ml_confidence >= self.min_ml_confidence
            && consensus_confidence >= self.min_consensus_confidence
            && agreement_score >= self.min_agreement
    }
}

/// Classification thresholds, evaluated in priority order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrengthThresholds {
    #[serde(default = "default_very_strong")]
    pub very_strong: TierThreshold,
    #[serde(default = "default_strong")]
    pub strong: TierThreshold,
    #[serde(default = "default_moderate")]
    pub moderate: TierThreshold,
    /// Both sides at or above this while disagreeing is a conflict
    #[serde(default = "default_conflict_floor")]
    pub conflict_floor: f64,
    /// Either side below this is weak
    #[serde(default = "default_weak_below")]
    pub weak_below: f64,
}

impl Default for StrengthThresholds {
    fn default() -> Self {
        Self {
            very_strong: default_very_strong(),
            strong: default_strong(),
            moderate: default_moderate(),
            conflict_floor: default_conflict_floor(),
            weak_below: default_weak_below(),
        }
    }
}

fn default_very_strong() -> TierThreshold {
    TierThreshold::new(0.75, 0.75, 0.85)
}

fn default_strong() -> TierThreshold {
    TierThreshold::new(0.65, 0.65, 0.70)
}

fn default_moderate() -> TierThreshold {
    TierThreshold::new(0.70, 0.50, 0.0)
}

fn default_conflict_floor() -> f64 {
    0.50
}

fn default_weak_below() -> f64 {
    0.60
}

/// How the two confidences blend into the combined confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBlend {
    #[serde(default = "default_ml_weight")]
    pub ml_weight: f64,
    #[serde(default = "default_consensus_weight")]
    pub consensus_weight: f64,
    /// Agreement above this earns a bonus
    #[serde(default = "default_agreement_pivot")]
    pub agreement_pivot: f64,
    #[serde(default = "default_agreement_bonus_scale")]
    pub agreement_bonus_scale: f64,
}

impl Default for ConfidenceBlend {
    fn default() -> Self {
        Self {
            ml_weight: default_ml_weight(),
            consensus_weight: default_consensus_weight(),
            agreement_pivot: default_agreement_pivot(),
            agreement_bonus_scale: default_agreement_bonus_scale(),
        }
    }
}

fn default_ml_weight() -> f64 {
    0.6
}

fn default_consensus_weight() -> f64 {
    0.4
}

fn default_agreement_pivot() -> f64 {
    0.5
}

fn default_agreement_bonus_scale() -> f64 {
    0.4
}

/// Position size multiplier per actionable tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingConfig {
    #[serde(default = "default_very_strong_base")]
    pub very_strong_base: f64,
    #[serde(default = "default_very_strong_scale")]
    pub very_strong_scale: f64,
    #[serde(default = "default_strong_multiplier")]
    pub strong: f64,
    #[serde(default = "default_moderate_base")]
    pub moderate_base: f64,
    #[serde(default = "default_moderate_scale")]
    pub moderate_scale: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            very_strong_base: default_very_strong_base(),
            very_strong_scale: default_very_strong_scale(),
            strong: default_strong_multiplier(),
            moderate_base: default_moderate_base(),
            moderate_scale: default_moderate_scale(),
        }
    }
}

fn default_very_strong_base() -> f64 {
    1.0
}

fn default_very_strong_scale() -> f64 {
    0.5
}

fn default_strong_multiplier() -> f64 {
    1.0
}

fn default_moderate_base() -> f64 {
    0.5
}

fn default_moderate_scale() -> f64 {
    0.2
}

/// Fusion engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    #[serde(default)]
    pub agreement: AgreementWeights,
    #[serde(default)]
    pub thresholds: StrengthThresholds,
    #[serde(default)]
    pub blend: ConfidenceBlend,
    #[serde(default)]
    pub sizing: SizingConfig,
}

fn unit(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field,
            expected: "within [0, 1]",
            value,
        })
    }
}

fn sums_to_one(field: &'static str, sum: f64) -> Result<(), ConfigError> {
    if (sum - 1.0).abs() <= SUM_TOLERANCE {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field,
            expected: "weights summing to 1.0",
            value: sum,
        })
    }
}

fn multiplier(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=MAX_POSITION_MULTIPLIER).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field,
            expected: "within [0, 1.5]",
            value,
        })
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let a = &self.agreement;
        unit("agreement.direction", a.direction)?;
        unit("agreement.confidence", a.confidence)?;
        unit("agreement.conviction", a.conviction)?;
        sums_to_one("agreement", a.direction + a.confidence + a.conviction)?;

        let t = &self.thresholds;
        for (name, tier) in [
            ("thresholds.very_strong", &t.very_strong),
            ("thresholds.strong", &t.strong),
            ("thresholds.moderate", &t.moderate),
        ] {
            unit(name, tier.min_ml_confidence)?;
            unit(name, tier.min_consensus_confidence)?;
            unit(name, tier.min_agreement)?;
        }
        unit("thresholds.conflict_floor", t.conflict_floor)?;
        unit("thresholds.weak_below", t.weak_below)?;

        let b = &self.blend;
        unit("blend.ml_weight", b.ml_weight)?;
        unit("blend.consensus_weight", b.consensus_weight)?;
        sums_to_one("blend", b.ml_weight + b.consensus_weight)?;
        unit("blend.agreement_pivot", b.agreement_pivot)?;
        unit("blend.agreement_bonus_scale", b.agreement_bonus_scale)?;

        // Combined confidence tops out at 1.0, so check the tier maxima
        let s = &self.sizing;
        multiplier("sizing.very_strong", s.very_strong_base)?;
        multiplier("sizing.very_strong", s.very_strong_base + s.very_strong_scale)?;
        multiplier("sizing.strong", s.strong)?;
        multiplier("sizing.moderate", s.moderate_base)?;
        multiplier("sizing.moderate", s.moderate_base + s.moderate_scale)?;
        if s.very_strong_scale < 0.0 || s.moderate_scale < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "sizing",
                expected: "non-negative scales",
                value: s.very_strong_scale.min(s.moderate_scale),
            });
        }

        Ok(())
    }
}

/// Everything the hybrid pipeline needs, as stored on disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HybridConfig {
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
}

impl HybridConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.consensus.validate()?;
        self.fusion.validate()
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> anyhow::Result<HybridConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: HybridConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to TOML file
pub fn save_config(config: &HybridConfig, path: &str) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Create a default configuration file template
pub fn create_config_template(path: &str) -> anyhow::Result<()> {
    std::fs::write(path, CONFIG_TEMPLATE)?;
    Ok(())
}

pub const CONFIG_TEMPLATE: &str = "# Hybrid Signal Configuration
# Provider consensus and ML/consensus fusion settings

[consensus]
# Abort the cycle if any provider fails
require_all_providers = false

# Per-provider timeout (ms), overridable per provider
provider_timeout_ms = 10000

# Overall deadline for one provider round (ms)
request_deadline_ms = 15000

# Consensus cache lifetime (seconds)
cache_ttl_secs = 300

# Bars of history providers are asked to consider
default_lookback_bars = 100

# Enabled provider weights must sum to 1.0
[[consensus.providers]]
provider_id = \"claude\"
weight = 0.40

[[consensus.providers]]
provider_id = \"gpt\"
weight = 0.35

[[consensus.providers]]
provider_id = \"gemini\"
weight = 0.25
timeout_ms = 8000

[fusion.agreement]
# Must sum to 1.0
direction = 0.5
confidence = 0.3
conviction = 0.2

[fusion.thresholds]
conflict_floor = 0.50
weak_below = 0.60

[fusion.thresholds.very_strong]
min_ml_confidence = 0.75
min_consensus_confidence = 0.75
min_agreement = 0.85

[fusion.thresholds.strong]
min_ml_confidence = 0.65
min_consensus_confidence = 0.65
min_agreement = 0.70

[fusion.thresholds.moderate]
min_ml_confidence = 0.70
min_consensus_confidence = 0.50
min_agreement = 0.0

[fusion.blend]
ml_weight = 0.6
consensus_weight = 0.4
agreement_pivot = 0.5
agreement_bonus_scale = 0.4

[fusion.sizing]
very_strong_base = 1.0
very_strong_scale = 0.5
strong = 1.0
moderate_base = 0.5
moderate_scale = 0.2
";
