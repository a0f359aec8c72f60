// Fusion Engine
// Combines the provider consensus with the ML forecast into one classified,
// sized decision. Pure and synchronous: identical inputs give identical output.

use crate::config::{FusionConfig, MAX_POSITION_MULTIPLIER};
use crate::validators::{validate_consensus, validate_prediction, ValidationError};
use common::{
    ConsensusSignal, HybridSignal, MlPrediction, SignalDirection, SignalStrength, TradeAction,
};
use research_agents::ConfigError;
use std::fmt::Write;
use tracing::debug;

/// Strength plus a description of the rule that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub strength: SignalStrength,
    pub rule: String,
}

/// Direction both sides agree on, if they agree on a non-neutral one
pub fn matched_direction(
    ml: SignalDirection,
    consensus: SignalDirection,
) -> Option<SignalDirection> {
    match (ml, consensus) {
        (SignalDirection::Long, SignalDirection::Long) => Some(SignalDirection::Long),
        (SignalDirection::Short, SignalDirection::Short) => Some(SignalDirection::Short),
        _ => None,
    }
}

#[derive(Debug, Clone, Default)]
pub struct FusionEngine {
    config: FusionConfig,
}

impl FusionEngine {
    pub fn new(config: FusionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Fuse one consensus with one ML prediction.
    ///
    /// Fails only on out-of-range inputs. Insufficient conviction is a normal
    /// `wait` result, not an error.
    pub fn fuse(
        &self,
        consensus: &ConsensusSignal,
        ml: &MlPrediction,
    ) -> Result<HybridSignal, ValidationError> {
        validate_consensus(consensus)?;
        validate_prediction(ml)?;

        let matched =
            matched_direction(ml.direction.to_direction(), consensus.direction.to_direction());
        let directional_match = matched.is_some();

        let agreement_score = self.agreement_score(directional_match, consensus, ml);
        let classification = self.classify(
            directional_match,
            ml.confidence,
            consensus.confidence,
            agreement_score,
        );
        let strength = classification.strength;

        // Entries need both an actionable tier and a matched direction
        let action = match (strength.is_actionable(), matched) {
            (true, Some(SignalDirection::Long)) => TradeAction::EnterLong,
            (true, Some(SignalDirection::Short)) => TradeAction::EnterShort,
            _ => TradeAction::Wait,
        };

        let combined_confidence =
            self.combined_confidence(ml.confidence, consensus.confidence, agreement_score);
        let position_size_multiplier = if action.is_entry() {
            self.position_size_multiplier(strength, combined_confidence)
        } else {
            0.0
        };

        let reasoning = trace(
            consensus,
            ml,
            &classification,
            action,
            directional_match,
            agreement_score,
            combined_confidence,
            position_size_multiplier,
        );

        debug!(
            "Fused {} {}: {} -> {:?} (agreement {:.3}, confidence {:.3})",
            consensus.instrument,
            consensus.timeframe,
            strength,
            action,
            agreement_score,
            combined_confidence
        );

        Ok(HybridSignal {
            instrument: consensus.instrument.clone(),
            timeframe: consensus.timeframe.clone(),
            consensus_id: consensus.id,
            action,
            strength,
            combined_confidence,
            agreement_score,
            position_size_multiplier,
            directional_match,
            reasoning,
        })
    }

    /// Weighted measure of direction, confidence and conviction alignment
    pub fn agreement_score(
        &self,
        directional_match: bool,
        consensus: &ConsensusSignal,
        ml: &MlPrediction,
    ) -> f64 {
        let w = &self.config.agreement;
        let direction = if directional_match { 1.0 } else { 0.0 };
        let confidence_gap = 1.0 - (ml.confidence - consensus.confidence).abs();
        let conviction = (ml.model_agreement + consensus.provider_agreement) / 2.0;

        (w.direction * direction + w.confidence * confidence_gap + w.conviction * conviction)
            .clamp(0.0, 1.0)
    }

    /// Apply the strength rules in priority order
    pub fn classify(
        &self,
        directional_match: bool,
        ml_confidence: f64,
        consensus_confidence: f64,
        agreement_score: f64,
    ) -> Classification {
        let t = &self.config.thresholds;

        let tiers = [
            (SignalStrength::VeryStrong, &t.very_strong),
            (SignalStrength::Strong, &t.strong),
            (SignalStrength::Moderate, &t.moderate),
        ];
        if directional_match {
            for (strength, tier) in tiers {
                if tier.admits(ml_confidence, consensus_confidence, agreement_score) {
                    return Classification {
                        strength,
                        rule: format!(
                            "{}: directions match, ml {:.3} >= {:.2}, consensus {:.3} >= {:.2}, \
                             agreement {:.3} >= {:.2}",
                            strength,
                            ml_confidence,
                            tier.min_ml_confidence,
                            consensus_confidence,
                            tier.min_consensus_confidence,
                            agreement_score,
                            tier.min_agreement
                        ),
                    };
                }
            }
        }

        if !directional_match
            && ml_confidence >= t.conflict_floor
            && consensus_confidence >= t.conflict_floor
        {
            return Classification {
                strength: SignalStrength::Conflict,
                rule: format!(
                    "CONFLICT: directions differ while ml {:.3} and consensus {:.3} \
                     are both >= {:.2}",
                    ml_confidence, consensus_confidence, t.conflict_floor
                ),
            };
        }

        if ml_confidence < t.weak_below || consensus_confidence < t.weak_below {
            return Classification {
                strength: SignalStrength::Weak,
                rule: format!(
                    "WEAK: ml {:.3} or consensus {:.3} below {:.2}",
                    ml_confidence, consensus_confidence, t.weak_below
                ),
            };
        }

        Classification {
            strength: SignalStrength::NoSignal,
            rule: "NO_SIGNAL: no tier admitted the inputs".to_string(),
        }
    }

    /// Weighted confidence, raised (never lowered) by strong agreement
    pub fn combined_confidence(
        &self,
        ml_confidence: f64,
        consensus_confidence: f64,
        agreement_score: f64,
    ) -> f64 {
        let b = &self.config.blend;
        let bonus = ((agreement_score - b.agreement_pivot) * b.agreement_bonus_scale).max(0.0);
        (b.ml_weight * ml_confidence + b.consensus_weight * consensus_confidence + bonus)
            .clamp(0.0, 1.0)
    }

    pub fn position_size_multiplier(
        &self,
        strength: SignalStrength,
        combined_confidence: f64,
    ) -> f64 {
        let s = &self.config.sizing;
        let multiplier = match strength {
            SignalStrength::VeryStrong => {
                s.very_strong_base + combined_confidence * s.very_strong_scale
            }
            SignalStrength::Strong => s.strong,
            SignalStrength::Moderate => s.moderate_base + combined_confidence * s.moderate_scale,
            SignalStrength::Weak | SignalStrength::Conflict | SignalStrength::NoSignal => 0.0,
        };
        multiplier.clamp(0.0, MAX_POSITION_MULTIPLIER)
    }
}

/// Fuse with the default calibration
pub fn fuse(
    consensus: &ConsensusSignal,
    ml: &MlPrediction,
) -> Result<HybridSignal, ValidationError> {
    FusionEngine::default().fuse(consensus, ml)
}

#[allow(clippy::too_many_arguments)]
fn trace(
    consensus: &ConsensusSignal,
    ml: &MlPrediction,
    classification: &Classification,
    action: TradeAction,
    directional_match: bool,
    agreement_score: f64,
    combined_confidence: f64,
    multiplier: f64,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} -> {:?}", classification.strength, action);
    let _ = writeln!(out, "rule: {}", classification.rule);
    let _ = writeln!(
        out,
        "ml: {} confidence={:.3} predicted_return={:+.4} model_agreement={:.3}",
        ml.direction, ml.confidence, ml.predicted_return, ml.model_agreement
    );
    let _ = writeln!(
        out,
        "consensus: {} confidence={:.3} provider_agreement={:.3} providers=[{}]",
        consensus.direction,
        consensus.confidence,
        consensus.provider_agreement,
        consensus.contributing_providers.join(", ")
    );
    let _ = write!(
        out,
        "agreement_score={:.3} match={} combined_confidence={:.3} position_size_multiplier={:.3}",
        agreement_score,
        directional_match,
        combined_confidence,
        multiplier
    );
    out
}
