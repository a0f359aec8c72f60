// Signal Validators
// Contract checks on fusion inputs and outputs. Violations are programming
// errors in a collaborator and are never coerced into range.

use common::{ConsensusSignal, HybridSignal, MlPrediction};
use thiserror::Error;

use crate::config::MAX_POSITION_MULTIPLIER;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("{field} is not a finite number")]
    NonFinite { field: &'static str },
    #[error("hybrid signal violates invariant: {0}")]
    Invariant(&'static str),
}

fn in_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFinite { field });
    }
    if value < min || value > max {
        return Err(ValidationError::OutOfRange { field, value, min, max });
    }
    Ok(())
}

fn unit(field: &'static str, value: f64) -> Result<(), ValidationError> {
    in_range(field, value, 0.0, 1.0)
}

pub fn validate_consensus(consensus: &ConsensusSignal) -> Result<(), ValidationError> {
    unit("consensus.confidence", consensus.confidence)?;
    unit("consensus.provider_agreement", consensus.provider_agreement)
}

pub fn validate_prediction(prediction: &MlPrediction) -> Result<(), ValidationError> {
    unit("ml.confidence", prediction.confidence)?;
    unit("ml.model_agreement", prediction.model_agreement)?;
    if !prediction.predicted_return.is_finite() {
        return Err(ValidationError::NonFinite {
            field: "ml.predicted_return",
        });
    }
    Ok(())
}

/// Check the guarantees every fused signal must uphold
pub fn validate_hybrid(signal: &HybridSignal) -> Result<(), ValidationError> {
    unit("hybrid.combined_confidence", signal.combined_confidence)?;
    unit("hybrid.agreement_score", signal.agreement_score)?;
    in_range(
        "hybrid.position_size_multiplier",
        signal.position_size_multiplier,
        0.0,
        MAX_POSITION_MULTIPLIER,
    )?;

    if signal.action.is_entry() && !signal.directional_match {
        return Err(ValidationError::Invariant("entry action without directional match"));
    }
    if signal.action.is_entry() != signal.strength.is_actionable() {
        return Err(ValidationError::Invariant("action does not follow strength"));
    }
    if !signal.strength.is_actionable() && signal.position_size_multiplier != 0.0 {
        return Err(ValidationError::Invariant("non-zero size on a non-actionable signal"));
    }
    Ok(())
}
