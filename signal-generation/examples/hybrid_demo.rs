//! Hybrid signal walkthrough
//!
//! Runs one decision cycle per scenario with scripted providers and a fixed
//! model, then prints the resulting signals. Set `HYBRID_SIGNAL_CONFIG` to a
//! TOML file to use your own calibration instead of the built-in template.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use common::{MlPrediction, PredictedMove};
use research_agents::{
    ProviderFailure, ProviderOpinion, ProviderRegistry, ProviderRequest, SignalProvider,
};
use signal_generation::config::CONFIG_TEMPLATE;
use signal_generation::{
    load_config, FeatureSource, FeatureVector, HybridConfig, HybridSignalPipeline, MlPredictor,
    MlSourceFailure,
};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{info, warn, Level};

/// Replies like a language model would: prose around a JSON object
struct ChattyProvider {
    id: &'static str,
    reply: &'static str,
    latency_ms: u64,
}

#[async_trait]
impl SignalProvider for ChattyProvider {
    fn provider_id(&self) -> &str {
        self.id
    }

    async fn request(
        &self,
        _request: &ProviderRequest,
    ) -> Result<ProviderOpinion, ProviderFailure> {
        sleep(Duration::from_millis(self.latency_ms)).await;
        research_agents::parse_provider_response(self.reply)
    }
}

struct DemoFeatures;

#[async_trait]
impl FeatureSource for DemoFeatures {
    async fn features(
        &self,
        instrument: &str,
        timeframe: &str,
    ) -> Result<FeatureVector, MlSourceFailure> {
        Ok(FeatureVector {
            instrument: instrument.to_string(),
            timeframe: timeframe.to_string(),
            values: vec![0.12, 0.8, -0.3, 1.1],
            as_of: Utc::now(),
        })
    }
}

/// Bullish on BTC, bullish with low conviction on ETH
struct DemoModel;

#[async_trait]
impl MlPredictor for DemoModel {
    async fn predict(&self, features: &FeatureVector) -> Result<MlPrediction, MlSourceFailure> {
        match features.instrument.as_str() {
            "BTCUSDT" => Ok(MlPrediction::new(PredictedMove::Up, 0.82, 0.021, 0.9)),
            "ETHUSDT" => Ok(MlPrediction::new(PredictedMove::Up, 0.55, 0.004, 0.6)),
            other => Err(MlSourceFailure::Prediction {
                instrument: other.to_string(),
                reason: "no model trained for this instrument".to_string(),
            }),
        }
    }
}

fn registry() -> ProviderRegistry {
    ProviderRegistry::new()
        .with(Arc::new(ChattyProvider {
            id: "claude",
            reply: concat!(
                "Momentum is intact.\n```json\n",
                "{\"direction\": \"bullish\", \"confidence\": 0.8, ",
                "\"reasoning\": \"higher lows on rising volume\"}\n```",
            ),
            latency_ms: 120,
        }))
        .with(Arc::new(ChattyProvider {
            id: "gpt",
            reply: concat!(
                "{\"direction\": \"bullish\", \"confidence\": 0.75, ",
                "\"reasoning\": \"funding neutral, spot bid\"}",
            ),
            latency_ms: 200,
        }))
        .with(Arc::new(ChattyProvider {
            id: "gemini",
            reply: "I am not sure how to answer that.",
            latency_ms: 80,
        }))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let config: HybridConfig = match std::env::var("HYBRID_SIGNAL_CONFIG") {
        Ok(path) => {
            info!("Loading configuration from {}", path);
            load_config(&path)?
        }
        Err(_) => toml::from_str(CONFIG_TEMPLATE)?,
    };

    let pipeline = HybridSignalPipeline::from_config(
        config,
        registry(),
        Arc::new(DemoFeatures),
        Arc::new(DemoModel),
    )?;

    for instrument in ["BTCUSDT", "ETHUSDT", "SOLUSDT"] {
        match pipeline.fuse_signal(instrument, "4h").await {
            Ok(signal) => {
                info!("{} -> {} {:?}", instrument, signal.strength, signal.action);
                println!("{}\n{}\n", serde_json::to_string_pretty(&signal)?, signal.reasoning);
            }
            Err(e) => warn!("{}: no decision this cycle ({})", instrument, e),
        }
    }

    // Second pass is served from the consensus cache
    pipeline.fuse_signal("BTCUSDT", "4h").await?;
    let cache = pipeline.orchestrator().cache().stats();
    info!(
        "Cache: {} hits, {} misses, {} entries",
        cache.hits, cache.misses, cache.entries
    );
    info!("Pipeline: {:?}", pipeline.stats());

    pipeline.shutdown();
    Ok(())
}
