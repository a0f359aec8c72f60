// Hybrid Signal Pipeline
// Entry point for the execution layer: consensus (cached) plus a fresh ML
// prediction, fused into one decision.

use crate::config::{FusionConfig, HybridConfig};
use crate::fusion::FusionEngine;
use crate::prediction::{FeatureSource, MlPredictor, MlSourceFailure};
use crate::validators::{validate_hybrid, ValidationError};
use common::{ConsensusSignal, HybridSignal, MlPrediction};
use research_agents::{
    ConfigError, ConsensusOrchestrator, ConsensusUnavailable, ProviderRegistry,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Why no decision was produced this cycle
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HybridSignalError {
    #[error(transparent)]
    ConsensusUnavailable(#[from] ConsensusUnavailable),
    #[error("ML source failure: {0}")]
    MlSource(#[from] MlSourceFailure),
    #[error("invalid fusion input: {0}")]
    Validation(#[from] ValidationError),
}

/// Counters over the pipeline's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub requests: u64,
    pub fused: u64,
    pub entries: u64,
    pub waits: u64,
    pub consensus_unavailable: u64,
    pub ml_failures: u64,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    fused: AtomicU64,
    entries: AtomicU64,
    waits: AtomicU64,
    consensus_unavailable: AtomicU64,
    ml_failures: AtomicU64,
}

/// Hybrid signal pipeline
pub struct HybridSignalPipeline {
    orchestrator: Arc<ConsensusOrchestrator>,
    features: Arc<dyn FeatureSource>,
    predictor: Arc<dyn MlPredictor>,
    fusion: RwLock<Arc<FusionEngine>>,
    counters: Counters,
}

impl HybridSignalPipeline {
    /// Create a pipeline over an existing orchestrator
    pub fn new(
        orchestrator: Arc<ConsensusOrchestrator>,
        features: Arc<dyn FeatureSource>,
        predictor: Arc<dyn MlPredictor>,
        fusion: FusionEngine,
    ) -> Self {
        Self {
            orchestrator,
            features,
            predictor,
            fusion: RwLock::new(Arc::new(fusion)),
            counters: Counters::default(),
        }
    }

    /// Build everything from a loaded configuration file
    pub fn from_config(
        config: HybridConfig,
        registry: ProviderRegistry,
        features: Arc<dyn FeatureSource>,
        predictor: Arc<dyn MlPredictor>,
    ) -> Result<Self, ConfigError> {
        let fusion = FusionEngine::new(config.fusion)?;
        let orchestrator = Arc::new(ConsensusOrchestrator::new(config.consensus, registry)?);
        Ok(Self::new(orchestrator, features, predictor, fusion))
    }

    pub fn orchestrator(&self) -> &Arc<ConsensusOrchestrator> {
        &self.orchestrator
    }

    /// Produce the trading decision for an instrument/timeframe.
    ///
    /// A `wait` signal is a normal outcome. An error means there is no
    /// decision this cycle and the caller should skip it.
    pub async fn fuse_signal(
        &self,
        instrument: &str,
        timeframe: &str,
    ) -> Result<HybridSignal, HybridSignalError> {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        let fusion = self.fusion.read().await.clone();

        let consensus = self.orchestrator.get_consensus(instrument, timeframe);
        let prediction = self.predict(instrument, timeframe);
        tokio::pin!(consensus, prediction);

        // Whichever side fails first ends the cycle; on a tie the consensus
        // error is reported
        let (consensus, prediction) = tokio::select! {
            biased;
            consensus_result = &mut consensus => {
                let consensus = self.consensus_failed(instrument, timeframe, consensus_result)?;
                let prediction = self.ml_failed(instrument, timeframe, prediction.await)?;
                (consensus, prediction)
            }
            prediction_result = &mut prediction => {
                let prediction = self.ml_failed(instrument, timeframe, prediction_result)?;
                let consensus = self.consensus_failed(instrument, timeframe, consensus.await)?;
                (consensus, prediction)
            }
        };

        let signal = fusion.fuse(&consensus, &prediction)?;
        validate_hybrid(&signal)?;

        self.counters.fused.fetch_add(1, Ordering::Relaxed);
        if signal.action.is_entry() {
            self.counters.entries.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.waits.fetch_add(1, Ordering::Relaxed);
        }

        info!(
            "Hybrid signal for {} {}: {} {:?} (confidence {:.2}, agreement {:.2}, size x{:.2})",
            instrument,
            timeframe,
            signal.strength,
            signal.action,
            signal.combined_confidence,
            signal.agreement_score,
            signal.position_size_multiplier
        );
        Ok(signal)
    }

    fn consensus_failed(
        &self,
        instrument: &str,
        timeframe: &str,
        result: Result<ConsensusSignal, ConsensusUnavailable>,
    ) -> Result<ConsensusSignal, HybridSignalError> {
        result.map_err(|e| {
            self.counters.consensus_unavailable.fetch_add(1, Ordering::Relaxed);
            warn!("Skipping {} {}: {}", instrument, timeframe, e);
            e.into()
        })
    }

    fn ml_failed(
        &self,
        instrument: &str,
        timeframe: &str,
        result: Result<MlPrediction, MlSourceFailure>,
    ) -> Result<MlPrediction, HybridSignalError> {
        result.map_err(|e| {
            self.counters.ml_failures.fetch_add(1, Ordering::Relaxed);
            error!("Skipping {} {}: {}", instrument, timeframe, e);
            e.into()
        })
    }

    /// Consensus alone, for diagnostics
    pub async fn get_consensus(
        &self,
        instrument: &str,
        timeframe: &str,
    ) -> Result<ConsensusSignal, ConsensusUnavailable> {
        self.orchestrator.get_consensus(instrument, timeframe).await
    }

    async fn predict(
        &self,
        instrument: &str,
        timeframe: &str,
    ) -> Result<MlPrediction, MlSourceFailure> {
        let features = self.features.features(instrument, timeframe).await?;
        self.predictor.predict(&features).await
    }

    /// Swap the fusion calibration; in-flight requests keep the old one
    pub async fn update_fusion_config(&self, config: FusionConfig) -> Result<(), ConfigError> {
        let engine = FusionEngine::new(config)?;
        *self.fusion.write().await = Arc::new(engine);
        info!("Fusion configuration updated");
        Ok(())
    }

    /// Cancel in-flight consensus rounds
    pub fn shutdown(&self) {
        self.orchestrator.shutdown();
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.counters;
        PipelineStats {
            requests: c.requests.load(Ordering::Relaxed),
            fused: c.fused.load(Ordering::Relaxed),
            entries: c.entries.load(Ordering::Relaxed),
            waits: c.waits.load(Ordering::Relaxed),
            consensus_unavailable: c.consensus_unavailable.load(Ordering::Relaxed),
            ml_failures: c.ml_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::FeatureVector;
    use async_trait::async_trait;
    use chrono::Utc;
    use common::{MarketBias, PredictedMove, ProviderWeight, TradeAction};
    use research_agents::{
        ConsensusConfig, ProviderFailure, ProviderOpinion, ProviderRequest, SignalProvider,
    };
    use std::time::Duration;

    struct Fixed(&'static str, MarketBias, f64);

    #[async_trait]
    impl SignalProvider for Fixed {
        fn provider_id(&self) -> &str {
            self.0
        }

        async fn request(
            &self,
            _request: &ProviderRequest,
        ) -> Result<ProviderOpinion, ProviderFailure> {
            Ok(ProviderOpinion::new(self.1, self.2, "fixed"))
        }
    }

    struct Slow(Duration);

    #[async_trait]
    impl SignalProvider for Slow {
        fn provider_id(&self) -> &str {
            "slow"
        }

        async fn request(
            &self,
            _request: &ProviderRequest,
        ) -> Result<ProviderOpinion, ProviderFailure> {
            tokio::time::sleep(self.0).await;
            Ok(ProviderOpinion::new(MarketBias::Bearish, 0.7, "took a while"))
        }
    }

    struct Features;

    #[async_trait]
    impl FeatureSource for Features {
        async fn features(
            &self,
            instrument: &str,
            timeframe: &str,
        ) -> Result<FeatureVector, MlSourceFailure> {
            Ok(FeatureVector {
                instrument: instrument.to_string(),
                timeframe: timeframe.to_string(),
                values: vec![0.1, 0.2],
                as_of: Utc::now(),
            })
        }
    }

    struct Model(Option<MlPrediction>);

    #[async_trait]
    impl MlPredictor for Model {
        async fn predict(&self, features: &FeatureVector) -> Result<MlPrediction, MlSourceFailure> {
            self.0.ok_or_else(|| MlSourceFailure::Prediction {
                instrument: features.instrument.clone(),
                reason: "model not loaded".to_string(),
            })
        }
    }

    fn pipeline(prediction: Option<MlPrediction>) -> HybridSignalPipeline {
        let registry =
            ProviderRegistry::new().with(Arc::new(Fixed("solo", MarketBias::Bullish, 0.8)));
        let config = ConsensusConfig::with_providers(vec![ProviderWeight::new("solo", 1.0)]);
        let orchestrator = Arc::new(ConsensusOrchestrator::new(config, registry).unwrap());
        HybridSignalPipeline::new(
            orchestrator,
            Arc::new(Features),
            Arc::new(Model(prediction)),
            FusionEngine::default(),
        )
    }

    #[tokio::test]
    async fn test_fuse_signal_enters_long() {
        let pipeline = pipeline(Some(MlPrediction::new(PredictedMove::Up, 0.8, 0.02, 0.9)));
        let signal = pipeline.fuse_signal("BTCUSDT", "1h").await.unwrap();
        assert_eq!(signal.action, TradeAction::EnterLong);
        assert_eq!(signal.instrument, "BTCUSDT");

        let consensus = pipeline.get_consensus("BTCUSDT", "1h").await.unwrap();
        assert_eq!(consensus.id, signal.consensus_id);

        let stats = pipeline.stats();
        assert_eq!((stats.requests, stats.fused, stats.entries), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_ml_failure_is_fatal() {
        let pipeline = pipeline(None);
        let err = pipeline.fuse_signal("BTCUSDT", "1h").await.unwrap_err();
        assert!(matches!(err, HybridSignalError::MlSource(_)));
        assert_eq!(pipeline.stats().ml_failures, 1);
        assert_eq!(pipeline.stats().fused, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ml_failure_does_not_wait_for_consensus() {
        let registry = ProviderRegistry::new().with(Arc::new(Slow(Duration::from_secs(9))));
        let config = ConsensusConfig::with_providers(vec![ProviderWeight::new("slow", 1.0)]);
        let orchestrator = Arc::new(ConsensusOrchestrator::new(config, registry).unwrap());
        let pipeline = HybridSignalPipeline::new(
            orchestrator,
            Arc::new(Features),
            Arc::new(Model(None)),
            FusionEngine::default(),
        );

        let started = tokio::time::Instant::now();
        let err = pipeline.fuse_signal("BTCUSDT", "1h").await.unwrap_err();
        assert!(matches!(err, HybridSignalError::MlSource(_)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(pipeline.stats().consensus_unavailable, 0);

        // The provider round carries on and serves the next cycle
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(pipeline.orchestrator().cache().len(), 1);
        let consensus = pipeline.get_consensus("BTCUSDT", "1h").await.unwrap();
        assert_eq!(consensus.direction, MarketBias::Bearish);
        assert_eq!(pipeline.orchestrator().cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn test_invalid_prediction_is_validation_error() {
        let pipeline = pipeline(Some(MlPrediction::new(PredictedMove::Up, 1.5, 0.02, 0.9)));
        let err = pipeline.fuse_signal("BTCUSDT", "1h").await.unwrap_err();
        assert!(matches!(err, HybridSignalError::Validation(_)));
    }

    #[tokio::test]
    async fn test_update_fusion_config() {
        let pipeline = pipeline(Some(MlPrediction::new(PredictedMove::Up, 0.8, 0.02, 0.9)));
        let mut config = FusionConfig::default();
        config.thresholds.very_strong.min_consensus_confidence = 0.9;
        pipeline.update_fusion_config(config).await.unwrap();

        let signal = pipeline.fuse_signal("BTCUSDT", "1h").await.unwrap();
        assert_eq!(signal.strength, common::SignalStrength::Strong);

        let mut broken = FusionConfig::default();
        broken.blend.ml_weight = 0.9;
        assert!(pipeline.update_fusion_config(broken).await.is_err());
    }
}
