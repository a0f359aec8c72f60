// Hybrid Signal Generation (Layer 2)
// Fuses the provider consensus with the ML forecast into trade decisions

pub mod config;
pub mod fusion;
pub mod pipeline;
pub mod prediction;
pub mod validators;

pub use config::{
    create_config_template, load_config, save_config, AgreementWeights, ConfidenceBlend,
    FusionConfig, HybridConfig, SizingConfig, StrengthThresholds, TierThreshold,
    MAX_POSITION_MULTIPLIER,
};
pub use fusion::{fuse, matched_direction, Classification, FusionEngine};
pub use pipeline::{HybridSignalError, HybridSignalPipeline, PipelineStats};
pub use prediction::{FeatureSource, FeatureVector, MlPredictor, MlSourceFailure};
pub use validators::{validate_consensus, validate_hybrid, validate_prediction, ValidationError};

pub use common::{HybridSignal, MlPrediction, PredictedMove, SignalStrength, TradeAction};
