//! Research Agents - provider consensus layer
//!
//! This crate turns the opinions of several natural-language reasoning
//! providers into one weighted consensus. It includes:
//! - `SignalProvider` trait implemented by every concrete provider
//! - Provider registry chosen at startup
//! - Consensus orchestrator with per-provider timeouts and partial-failure handling
//! - Weighted voting with renormalization
//! - Single-flight signal cache keyed by (instrument, timeframe)

pub mod agent;
pub mod cache;
pub mod config;
pub mod orchestrator;
pub mod registry;
pub mod voting;

// Re-export commonly used types
pub use agent::{
    parse_provider_response, FailureCategory, ProviderFailure, ProviderOpinion, ProviderRequest,
    SignalProvider,
};
pub use cache::{CacheKey, CacheStats, SignalCache};
pub use config::{ConfigError, ConsensusConfig};
pub use orchestrator::{
    ConsensusContext, ConsensusOrchestrator, ConsensusUnavailable, FailedProvider,
};
pub use registry::ProviderRegistry;
pub use voting::{renormalize_weights, weighted_vote, VoteResult, VoteTally};

// Re-export common types for convenience
pub use common::{ConsensusSignal, MarketBias, ProviderSignal, ProviderWeight};
