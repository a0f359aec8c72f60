// ML Prediction Source
// The trained ensemble lives outside this crate. We only see it through these
// two traits: one assembles features, the other turns them into a forecast.
// There is a single ML source, so any failure here is fatal to the request.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::MlPrediction;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Model input for one instrument/timeframe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub instrument: String,
    pub timeframe: String,
    pub values: Vec<f64>,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MlSourceFailure {
    #[error("feature assembly failed for {instrument}: {reason}")]
    Features { instrument: String, reason: String },
    #[error("prediction failed for {instrument}: {reason}")]
    Prediction { instrument: String, reason: String },
}

/// Builds the feature vector the model expects
#[async_trait]
pub trait FeatureSource: Send + Sync {
    async fn features(
        &self,
        instrument: &str,
        timeframe: &str,
    ) -> Result<FeatureVector, MlSourceFailure>;
}

/// Trained ensemble predictor
#[async_trait]
pub trait MlPredictor: Send + Sync {
    async fn predict(&self, features: &FeatureVector) -> Result<MlPrediction, MlSourceFailure>;
}
