//! Shared value types for hybrid signal generation
//!
//! Everything in here is plain data: provider opinions, the weighted
//! consensus, the ML forecast, and the fused decision handed to execution.
//! None of these types are mutated after construction.

pub mod signals;

pub use signals::{
    ConsensusSignal, HybridSignal, MarketBias, MlPrediction, PredictedMove, ProviderSignal,
    ProviderWeight, SignalDirection, SignalStrength, TradeAction, WeightedVote,
};

// Re-export for downstream crates that key things by id
pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;
