//! Signal value types shared by the consensus and fusion layers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Direction on the shared long/short axis both signal families map onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalDirection {
    Long,
    Short,
    Neutral,
}

/// Directional opinion of a reasoning provider (and of the consensus)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketBias {
    Bullish,
    Bearish,
    Neutral,
}

impl MarketBias {
    pub const ALL: [MarketBias; 3] =
        [MarketBias::Bullish, MarketBias::Bearish, MarketBias::Neutral];

    pub fn to_direction(self) -> SignalDirection {
        match self {
            MarketBias::Bullish => SignalDirection::Long,
            MarketBias::Bearish => SignalDirection::Short,
            MarketBias::Neutral => SignalDirection::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketBias::Bullish => "bullish",
            MarketBias::Bearish => "bearish",
            MarketBias::Neutral => "neutral",
        }
    }
}

impl fmt::Display for MarketBias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction forecast by the ML ensemble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictedMove {
    Up,
    Down,
    Neutral,
}

impl PredictedMove {
    pub fn to_direction(self) -> SignalDirection {
        match self {
            PredictedMove::Up => SignalDirection::Long,
            PredictedMove::Down => SignalDirection::Short,
            PredictedMove::Neutral => SignalDirection::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PredictedMove::Up => "up",
            PredictedMove::Down => "down",
            PredictedMove::Neutral => "neutral",
        }
    }
}

impl fmt::Display for PredictedMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configured voting weight of a single provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderWeight {
    pub provider_id: String,
    /// 0.0 to 1.0; enabled weights sum to 1.0
    pub weight: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Overrides the orchestrator-wide provider timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

impl ProviderWeight {
    pub fn new(provider_id: impl Into<String>, weight: f64) -> Self {
        Self {
            provider_id: provider_id.into(),
            weight,
            enabled: true,
            timeout_ms: None,
        }
    }

    /// Whether this provider takes part in a consensus round at all
    pub fn is_active(&self) -> bool {
        self.enabled && self.weight > 0.0
    }
}

/// One provider's opinion for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSignal {
    pub provider_id: String,
    pub direction: MarketBias,
    pub confidence: f64, // 0.0 to 1.0
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
}

/// A successful provider vote with its renormalized weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedVote {
    pub provider_id: String,
    pub direction: MarketBias,
    pub confidence: f64,
    pub weight: f64,
}

/// Weighted aggregate opinion of all providers that answered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusSignal {
    pub id: Uuid,
    pub instrument: String,
    pub timeframe: String,
    pub direction: MarketBias,
    pub confidence: f64,
    pub provider_agreement: f64,
    /// In configuration order
    pub contributing_providers: Vec<String>,
    pub votes: Vec<WeightedVote>,
    pub excluded_providers: Vec<String>,
    pub reasoning: String,
    pub generated_at: DateTime<Utc>,
}

impl ConsensusSignal {
    /// Bare consensus without per-provider detail
    pub fn new(
        instrument: impl Into<String>,
        timeframe: impl Into<String>,
        direction: MarketBias,
        confidence: f64,
        provider_agreement: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            instrument: instrument.into(),
            timeframe: timeframe.into(),
            direction,
            confidence,
            provider_agreement,
            contributing_providers: Vec::new(),
            votes: Vec::new(),
            excluded_providers: Vec::new(),
            reasoning: String::new(),
            generated_at: Utc::now(),
        }
    }
}

/// Forecast from the ML ensemble, supplied fresh per request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MlPrediction {
    pub direction: PredictedMove,
    pub confidence: f64,
    pub predicted_return: f64,
    /// Agreement between the ensemble's internal models, 0.0 to 1.0
    pub model_agreement: f64,
}

impl MlPrediction {
    pub fn new(
        direction: PredictedMove,
        confidence: f64,
        predicted_return: f64,
        model_agreement: f64,
    ) -> Self {
        Self {
            direction,
            confidence,
            predicted_return,
            model_agreement,
        }
    }
}

/// How actionable a fused signal is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStrength {
    VeryStrong,
    Strong,
    Moderate,
    Weak,
    Conflict,
    NoSignal,
}

impl SignalStrength {
    /// Only these tiers may open a position
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            SignalStrength::VeryStrong | SignalStrength::Strong | SignalStrength::Moderate
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStrength::VeryStrong => "VERY_STRONG",
            SignalStrength::Strong => "STRONG",
            SignalStrength::Moderate => "MODERATE",
            SignalStrength::Weak => "WEAK",
            SignalStrength::Conflict => "CONFLICT",
            SignalStrength::NoSignal => "NO_SIGNAL",
        }
    }
}

impl fmt::Display for SignalStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    EnterLong,
    EnterShort,
    Wait,
}

impl TradeAction {
    pub fn is_entry(&self) -> bool {
        !matches!(self, TradeAction::Wait)
    }
}

/// Fused, classified decision consumed by the execution layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridSignal {
    pub instrument: String,
    pub timeframe: String,
    pub consensus_id: Uuid,
    pub action: TradeAction,
    pub strength: SignalStrength,
    pub combined_confidence: f64,
    pub agreement_score: f64,
    /// 0.0 to 1.5; zero unless the strength is actionable
    pub position_size_multiplier: f64,
    pub directional_match: bool,
    pub reasoning: String,
}
