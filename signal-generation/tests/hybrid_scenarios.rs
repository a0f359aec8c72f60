// End-to-end decision scenarios through scripted providers and a fixed model

use async_trait::async_trait;
use chrono::Utc;
use common::{
    MarketBias, MlPrediction, PredictedMove, ProviderWeight, SignalStrength, TradeAction,
};
use research_agents::{
    ConsensusConfig, ConsensusOrchestrator, ConsensusUnavailable, FailureCategory,
    ProviderFailure, ProviderOpinion, ProviderRegistry, ProviderRequest, SignalProvider,
};
use signal_generation::{
    FeatureSource, FeatureVector, FusionEngine, HybridConfig, HybridSignalError,
    HybridSignalPipeline, MlPredictor, MlSourceFailure,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy)]
enum Script {
    Answer(MarketBias, f64),
    Fail,
    Hang,
}

struct ScriptedProvider {
    id: &'static str,
    script: Script,
}

#[async_trait]
impl SignalProvider for ScriptedProvider {
    fn provider_id(&self) -> &str {
        self.id
    }

    async fn request(
        &self,
        request: &ProviderRequest,
    ) -> Result<ProviderOpinion, ProviderFailure> {
        match self.script {
            Script::Answer(direction, confidence) => Ok(ProviderOpinion::new(
                direction,
                confidence,
                format!("{} view on {}", self.id, request.instrument),
            )),
            Script::Fail => Err(ProviderFailure::Network("connection reset".to_string())),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProviderFailure::Network("unreachable".to_string()))
            }
        }
    }
}

struct StaticFeatures;

#[async_trait]
impl FeatureSource for StaticFeatures {
    async fn features(
        &self,
        instrument: &str,
        timeframe: &str,
    ) -> Result<FeatureVector, MlSourceFailure> {
        Ok(FeatureVector {
            instrument: instrument.to_string(),
            timeframe: timeframe.to_string(),
            values: vec![0.42, -0.17, 1.3],
            as_of: Utc::now(),
        })
    }
}

struct FixedModel {
    prediction: MlPrediction,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl MlPredictor for FixedModel {
    async fn predict(&self, _features: &FeatureVector) -> Result<MlPrediction, MlSourceFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.prediction)
    }
}

fn weights() -> Vec<ProviderWeight> {
    vec![
        ProviderWeight::new("claude", 0.40),
        ProviderWeight::new("gpt", 0.35),
        ProviderWeight::new("gemini", 0.25),
    ]
}

fn build(
    scripts: [Script; 3],
    config: ConsensusConfig,
    prediction: MlPrediction,
) -> (HybridSignalPipeline, Arc<AtomicUsize>) {
    let registry = ["claude", "gpt", "gemini"]
        .into_iter()
        .zip(scripts)
        .fold(ProviderRegistry::new(), |registry, (id, script)| {
            registry.with(Arc::new(ScriptedProvider { id, script }))
        });
    let calls = Arc::new(AtomicUsize::new(0));
    let model = FixedModel {
        prediction,
        calls: Arc::clone(&calls),
    };
    let pipeline = HybridSignalPipeline::from_config(
        HybridConfig {
            consensus: config,
            fusion: Default::default(),
        },
        registry,
        Arc::new(StaticFeatures),
        Arc::new(model),
    )
    .unwrap();
    (pipeline, calls)
}

#[tokio::test]
async fn scenario_a_very_strong_long() {
    let bullish = Script::Answer(MarketBias::Bullish, 0.80);
    let (pipeline, _) = build(
        [bullish; 3],
        ConsensusConfig::with_providers(weights()),
        MlPrediction::new(PredictedMove::Up, 0.80, 0.02, 0.9),
    );

    let signal = pipeline.fuse_signal("BTCUSDT", "4h").await.unwrap();
    assert_eq!(signal.strength, SignalStrength::VeryStrong);
    assert_eq!(signal.action, TradeAction::EnterLong);
    assert!(signal.directional_match);
    assert!((1.0..=1.5).contains(&signal.position_size_multiplier));
    assert!(signal.reasoning.contains("claude"));
}

#[tokio::test]
async fn scenario_b_weak_below_conflict_floor() {
    let bearish = Script::Answer(MarketBias::Bearish, 0.45);
    let (pipeline, _) = build(
        [bearish; 3],
        ConsensusConfig::with_providers(weights()),
        MlPrediction::new(PredictedMove::Up, 0.30, 0.01, 0.6),
    );

    let signal = pipeline.fuse_signal("ETHUSDT", "1h").await.unwrap();
    assert_eq!(signal.strength, SignalStrength::Weak);
    assert_eq!(signal.action, TradeAction::Wait);
    assert_eq!(signal.position_size_multiplier, 0.0);
}

#[tokio::test]
async fn scenario_c_conflict_despite_conviction() {
    let bearish = Script::Answer(MarketBias::Bearish, 0.90);
    let (pipeline, _) = build(
        [bearish; 3],
        ConsensusConfig::with_providers(weights()),
        MlPrediction::new(PredictedMove::Up, 0.90, 0.03, 0.95),
    );

    let signal = pipeline.fuse_signal("SOLUSDT", "1h").await.unwrap();
    assert_eq!(signal.strength, SignalStrength::Conflict);
    assert_eq!(signal.action, TradeAction::Wait);
    assert!(!signal.directional_match);

    let stats = pipeline.stats();
    assert_eq!((stats.fused, stats.waits, stats.entries), (1, 1, 0));
}

#[tokio::test(start_paused = true)]
async fn scenario_d_timed_out_provider_is_renormalized_away() {
    let mut config = ConsensusConfig::with_providers(weights());
    config.provider_timeout_ms = 500;
    let (pipeline, _) = build(
        [
            Script::Answer(MarketBias::Bullish, 0.80),
            Script::Hang,
            Script::Answer(MarketBias::Bullish, 0.60),
        ],
        config,
        MlPrediction::new(PredictedMove::Up, 0.75, 0.01, 0.8),
    );

    let consensus = pipeline.get_consensus("BTCUSDT", "1h").await.unwrap();
    assert_eq!(consensus.contributing_providers, vec!["claude", "gemini"]);
    assert_eq!(consensus.excluded_providers, vec!["gpt"]);
    assert!((consensus.votes[0].weight - 0.40 / 0.65).abs() < 1e-9);
    assert!((consensus.votes[1].weight - 0.25 / 0.65).abs() < 1e-9);
    let expected = (0.40 * 0.80 + 0.25 * 0.60) / 0.65;
    assert!((consensus.confidence - expected).abs() < 1e-9);
    assert!(consensus.reasoning.contains("gpt excluded (timeout)"));

    // Served from the cache, so the fused decision uses the same consensus
    let signal = pipeline.fuse_signal("BTCUSDT", "1h").await.unwrap();
    assert_eq!(signal.consensus_id, consensus.id);
    assert_eq!(signal.action, TradeAction::EnterLong);
}

#[tokio::test]
async fn scenario_e_required_provider_failure_skips_the_cycle() {
    let mut config = ConsensusConfig::with_providers(weights());
    config.require_all_providers = true;
    let (pipeline, _) = build(
        [
            Script::Answer(MarketBias::Bullish, 0.90),
            Script::Fail,
            Script::Answer(MarketBias::Bullish, 0.90),
        ],
        config,
        MlPrediction::new(PredictedMove::Up, 0.90, 0.02, 0.9),
    );

    let err = pipeline.fuse_signal("BTCUSDT", "1h").await.unwrap_err();
    let HybridSignalError::ConsensusUnavailable(ConsensusUnavailable::RequiredProviderFailed {
        failures,
        ..
    }) = &err
    else {
        panic!("expected a required-provider failure, got {err:?}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].provider_id, "gpt");
    assert_eq!(failures[0].category(), FailureCategory::Network);

    let stats = pipeline.stats();
    assert_eq!(stats.fused, 0);
    assert_eq!(stats.consensus_unavailable, 1);
}

#[tokio::test(start_paused = true)]
async fn consensus_error_reported_when_it_fails_first() {
    struct LateBrokenFeatures;

    #[async_trait]
    impl FeatureSource for LateBrokenFeatures {
        async fn features(
            &self,
            instrument: &str,
            _timeframe: &str,
        ) -> Result<FeatureVector, MlSourceFailure> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Err(MlSourceFailure::Features {
                instrument: instrument.to_string(),
                reason: "candles missing".to_string(),
            })
        }
    }

    let registry = ProviderRegistry::new().with(Arc::new(ScriptedProvider {
        id: "claude",
        script: Script::Fail,
    }));
    let config = ConsensusConfig::with_providers(vec![ProviderWeight::new("claude", 1.0)]);
    let orchestrator = Arc::new(ConsensusOrchestrator::new(config, registry).unwrap());
    let model = FixedModel {
        prediction: MlPrediction::new(PredictedMove::Up, 0.9, 0.0, 0.9),
        calls: Arc::new(AtomicUsize::new(0)),
    };
    let pipeline = HybridSignalPipeline::new(
        orchestrator,
        Arc::new(LateBrokenFeatures),
        Arc::new(model),
        FusionEngine::default(),
    );

    let err = pipeline.fuse_signal("BTCUSDT", "1h").await.unwrap_err();
    assert!(matches!(
        err,
        HybridSignalError::ConsensusUnavailable(ConsensusUnavailable::NoSuccessfulProviders { .. })
    ));
    assert_eq!(pipeline.stats().ml_failures, 0);
}

#[tokio::test]
async fn shutdown_cancels_future_cycles() {
    let bullish = Script::Answer(MarketBias::Bullish, 0.80);
    let (pipeline, _) = build(
        [bullish; 3],
        ConsensusConfig::with_providers(weights()),
        MlPrediction::new(PredictedMove::Up, 0.80, 0.02, 0.9),
    );
    pipeline.shutdown();

    let err = pipeline.fuse_signal("BTCUSDT", "1h").await.unwrap_err();
    assert!(matches!(
        err,
        HybridSignalError::ConsensusUnavailable(ConsensusUnavailable::Cancelled { .. })
    ));
}

#[tokio::test]
async fn template_config_drives_a_pipeline() {
    let config: HybridConfig =
        toml::from_str(signal_generation::config::CONFIG_TEMPLATE).unwrap();
    let bullish = Script::Answer(MarketBias::Bullish, 0.70);
    let (pipeline, calls) = build(
        [bullish; 3],
        config.consensus,
        MlPrediction::new(PredictedMove::Up, 0.70, 0.01, 0.7),
    );

    let signal = pipeline.fuse_signal("BTCUSDT", "1d").await.unwrap();
    assert_eq!(signal.strength, SignalStrength::Strong);
    assert_eq!(signal.position_size_multiplier, 1.0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
