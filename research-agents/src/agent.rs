//! Provider capability and provider-level failure taxonomy
//!
//! Every natural-language reasoning provider implements [`SignalProvider`]
//! so the orchestrator can fan out to them uniformly. Concrete providers are
//! chosen at startup through the [`crate::registry::ProviderRegistry`].

use async_trait::async_trait;
use chrono::Utc;
use common::{MarketBias, ProviderSignal};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// What a provider is asked about
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub instrument: String,
    pub timeframe: String,
    /// Number of bars of history the provider should reason over
    pub lookback_window: u32,
    pub context: Option<serde_json::Value>,
}

/// Raw opinion as returned by a provider, before it is stamped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderOpinion {
    pub direction: MarketBias,
    pub confidence: f64,
    pub reasoning: String,
}

impl ProviderOpinion {
    pub fn new(direction: MarketBias, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self {
            direction,
            confidence,
            reasoning: reasoning.into(),
        }
    }

    /// Reject confidences a collaborator should never have produced
    pub fn validate(&self) -> Result<(), ProviderFailure> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(ProviderFailure::MalformedResponse(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        Ok(())
    }

    pub fn into_signal(self, provider_id: &str) -> ProviderSignal {
        ProviderSignal {
            provider_id: provider_id.to_string(),
            direction: self.direction,
            confidence: self.confidence,
            reasoning: self.reasoning,
            timestamp: Utc::now(),
        }
    }
}

/// Coarse failure class, used for logging and audit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Auth,
    RateLimit,
    Network,
    Timeout,
    MalformedResponse,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureCategory::Auth => "auth",
            FailureCategory::RateLimit => "rate_limit",
            FailureCategory::Network => "network",
            FailureCategory::Timeout => "timeout",
            FailureCategory::MalformedResponse => "malformed_response",
        };
        f.write_str(name)
    }
}

/// A single provider could not produce an opinion.
///
/// Recovered locally by the orchestrator: the provider is excluded and the
/// remaining weights are renormalized.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderFailure {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ProviderFailure {
    pub fn category(&self) -> FailureCategory {
        match self {
            ProviderFailure::Auth(_) => FailureCategory::Auth,
            ProviderFailure::RateLimited(_) => FailureCategory::RateLimit,
            ProviderFailure::Network(_) => FailureCategory::Network,
            ProviderFailure::Timeout { .. } => FailureCategory::Timeout,
            ProviderFailure::MalformedResponse(_) => FailureCategory::MalformedResponse,
        }
    }
}

/// Capability every reasoning provider implements
#[async_trait]
pub trait SignalProvider: Send + Sync {
    /// Stable id, matched against the configured weights
    fn provider_id(&self) -> &str;

    /// Produce a directional opinion for the request
    async fn request(&self, request: &ProviderRequest) -> Result<ProviderOpinion, ProviderFailure>;
}

lazy_static! {
    static ref FENCED_JSON: Regex =
        Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("valid fenced-json pattern");
    static ref BARE_JSON: Regex = Regex::new(r"(?s)\{.*\}").expect("valid json pattern");
}

#[derive(Debug, Deserialize)]
struct RawOpinion {
    direction: String,
    confidence: f64,
    #[serde(default)]
    reasoning: Option<String>,
}

fn parse_bias(label: &str) -> Option<MarketBias> {
    match label.trim().to_lowercase().as_str() {
        "bullish" | "long" | "buy" | "up" => Some(MarketBias::Bullish),
        "bearish" | "short" | "sell" | "down" => Some(MarketBias::Bearish),
        "neutral" | "hold" | "flat" => Some(MarketBias::Neutral),
        _ => None,
    }
}

/// Extract an opinion from a free-text provider reply.
///
/// Providers are prompted to answer with a JSON object
/// `{"direction": ..., "confidence": ..., "reasoning": ...}`; the object may be
/// wrapped in a fenced code block or surrounded by prose. Anything that cannot
/// be read that way is a [`ProviderFailure::MalformedResponse`].
pub fn parse_provider_response(text: &str) -> Result<ProviderOpinion, ProviderFailure> {
    let json = FENCED_JSON
        .captures(text)
        .and_then(|caps| caps.get(1))
        .or_else(|| BARE_JSON.find(text))
        .map(|m| m.as_str())
        .ok_or_else(|| ProviderFailure::MalformedResponse("no JSON object in reply".to_string()))?;

    let raw: RawOpinion = serde_json::from_str(json)
        .map_err(|e| ProviderFailure::MalformedResponse(format!("invalid opinion JSON: {}", e)))?;

    let direction = parse_bias(&raw.direction).ok_or_else(|| {
        ProviderFailure::MalformedResponse(format!("unknown direction '{}'", raw.direction))
    })?;

    let opinion = ProviderOpinion {
        direction,
        confidence: raw.confidence,
        reasoning: raw.reasoning.unwrap_or_default(),
    };
    opinion.validate()?;
    Ok(opinion)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fenced_reply() {
        let reply = concat!(
            "Here is my view:\n```json\n",
            "{\"direction\": \"Bullish\", \"confidence\": 0.72, \"reasoning\": \"higher lows\"}",
            "\n```\nThanks.",
        );
        let opinion = parse_provider_response(reply).unwrap();
        assert_eq!(opinion.direction, MarketBias::Bullish);
        assert_eq!(opinion.confidence, 0.72);
        assert_eq!(opinion.reasoning, "higher lows");
    }

    #[test]
    fn test_parse_bare_reply_with_synonym() {
        let reply = r#"{"direction": "sell", "confidence": 0.4}"#;
        let opinion = parse_provider_response(reply).unwrap();
        assert_eq!(opinion.direction, MarketBias::Bearish);
        assert!(opinion.reasoning.is_empty());
    }

    #[test]
    fn test_parse_rejects_out_of_range_confidence() {
        let reply = r#"{"direction": "bullish", "confidence": 85}"#;
        let err = parse_provider_response(reply).unwrap_err();
        assert_eq!(err.category(), FailureCategory::MalformedResponse);
    }

    #[test]
    fn test_parse_rejects_unknown_direction_and_prose() {
        let sideways = r#"{"direction": "sideways", "confidence": 0.5}"#;
        assert!(parse_provider_response(sideways).is_err());
        let err = parse_provider_response("I think it goes up").unwrap_err();
        assert!(matches!(err, ProviderFailure::MalformedResponse(_)));
    }

    #[test]
    fn test_opinion_validation() {
        assert!(ProviderOpinion::new(MarketBias::Neutral, 1.0, "").validate().is_ok());
        assert!(ProviderOpinion::new(MarketBias::Neutral, f64::NAN, "").validate().is_err());
        assert!(ProviderOpinion::new(MarketBias::Neutral, -0.1, "").validate().is_err());
    }

    #[test]
    fn test_failure_categories() {
        assert_eq!(ProviderFailure::Timeout { after_ms: 10 }.category(), FailureCategory::Timeout);
        assert_eq!(
            ProviderFailure::RateLimited("429".into()).category(),
            FailureCategory::RateLimit
        );
        assert_eq!(FailureCategory::RateLimit.to_string(), "rate_limit");
    }
}
