//! Weighted voting over provider signals
//!
//! Pure functions: renormalize the surviving weights, score each direction
//! bucket by Σ weight·confidence, and pick the winner.

use common::{MarketBias, ProviderSignal, ProviderWeight, WeightedVote};

/// Scores closer than this are treated as an exact tie
pub const TIE_EPSILON: f64 = 1e-9;

/// Redistribute weights so they sum to 1.0.
///
/// Returns `None` when there is nothing to distribute.
pub fn renormalize_weights(weights: &[f64]) -> Option<Vec<f64>> {
    let total: f64 = weights.iter().sum();
    if weights.is_empty() || total <= 0.0 || !total.is_finite() {
        return None;
    }
    Some(weights.iter().map(|w| w / total).collect())
}

/// Per-direction weighted confidence
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VoteTally {
    pub bullish: f64,
    pub bearish: f64,
    pub neutral: f64,
}

impl VoteTally {
    pub fn add(&mut self, direction: MarketBias, weighted_confidence: f64) {
        match direction {
            MarketBias::Bullish => self.bullish += weighted_confidence,
            MarketBias::Bearish => self.bearish += weighted_confidence,
            MarketBias::Neutral => self.neutral += weighted_confidence,
        }
    }

    pub fn score(&self, direction: MarketBias) -> f64 {
        match direction {
            MarketBias::Bullish => self.bullish,
            MarketBias::Bearish => self.bearish,
            MarketBias::Neutral => self.neutral,
        }
    }

    pub fn total(&self) -> f64 {
        self.bullish + self.bearish + self.neutral
    }

    /// Highest-scoring bucket; any tie for the top resolves to neutral
    pub fn winner(&self) -> MarketBias {
        let best = MarketBias::ALL
            .iter()
            .map(|d| self.score(*d))
            .fold(f64::NEG_INFINITY, f64::max);

        let leaders: Vec<MarketBias> = MarketBias::ALL
            .iter()
            .copied()
            .filter(|d| (self.score(*d) - best).abs() <= TIE_EPSILON)
            .collect();

        match leaders.as_slice() {
            [single] => *single,
            _ => MarketBias::Neutral,
        }
    }
}

/// Outcome of one weighted vote
#[derive(Debug, Clone, PartialEq)]
pub struct VoteResult {
    pub direction: MarketBias,
    pub confidence: f64,
    pub provider_agreement: f64,
    pub votes: Vec<WeightedVote>,
    pub tally: VoteTally,
}

/// Vote over the providers that answered.
///
/// `successes` must only contain providers that produced a signal; their
/// configured weights are renormalized here. Returns `None` if empty.
pub fn weighted_vote(successes: &[(ProviderWeight, ProviderSignal)]) -> Option<VoteResult> {
    let raw: Vec<f64> = successes.iter().map(|(w, _)| w.weight).collect();
    let weights = renormalize_weights(&raw)?;

    let mut tally = VoteTally::default();
    let mut votes = Vec::with_capacity(successes.len());
    for ((config, signal), weight) in successes.iter().zip(weights) {
        tally.add(signal.direction, weight * signal.confidence);
        votes.push(WeightedVote {
            provider_id: config.provider_id.clone(),
            direction: signal.direction,
            confidence: signal.confidence,
            weight,
        });
    }

    let direction = tally.winner();
    let winning_score = tally.score(direction);
    let total = tally.total();
    let provider_agreement = if total > 0.0 {
        (winning_score / total).clamp(0.0, 1.0)
    } else {
        0.0
    };

    Some(VoteResult {
        direction,
        // Renormalized weights sum to 1, so this is already a weighted mean
        confidence: winning_score.clamp(0.0, 1.0),
        provider_agreement,
        votes,
        tally,
    })
}
