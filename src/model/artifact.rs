use std::sync::Arc;

use serde::Deserialize;

use crate::error::InferenceError;

/// A loaded, immutable model ready to score feature vectors.
pub trait Model: Send + Sync {
    /// Raw output sequence for one feature vector.
    fn predict(&self, features: &[f64]) -> Result<Vec<f64>, InferenceError>;

    /// Short label of the artifact format, for logs.
    fn kind(&self) -> &'static str;
}

/// Shared handle to a loaded model. Holders keep the model alive after the
/// cache has dropped its own reference.
pub type ArtifactHandle = Arc<dyn Model>;

#[derive(Debug, Clone, Deserialize)]
pub struct LinearHead {
    pub weights: Vec<f64>,
    #[serde(default)]
    pub bias: f64,
}

fn affine(weights: &[f64], bias: f64, features: &[f64]) -> Result<f64, InferenceError> {
    if features.len() != weights.len() {
        return Err(InferenceError::DimensionMismatch {
            expected: weights.len(),
            actual: features.len(),
        });
    }
    let dot: f64 = weights.iter().zip(features).map(|(w, x)| w * x).sum();
    Ok(dot + bias)
}

impl LinearHead {
    fn score(&self, features: &[f64]) -> Result<f64, InferenceError> {
        affine(&self.weights, self.bias, features)
    }
}

fn default_threshold() -> f64 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogisticHead {
    pub weights: Vec<f64>,
    #[serde(default)]
    pub bias: f64,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl LogisticHead {
    fn classify(&self, features: &[f64]) -> Result<f64, InferenceError> {
        let logit = affine(&self.weights, self.bias, features)?;
        let probability = 1.0 / (1.0 + (-logit).exp());
        Ok(if probability >= self.threshold { 1.0 } else { 0.0 })
    }
}

/// Models serialized as JSON, tagged by `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JsonModel {
    Linear(LinearHead),
    Logistic(LogisticHead),
    MultiLinear {
        outputs: Vec<LinearHead>,
    },
}

impl JsonModel {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl Model for JsonModel {
    fn predict(&self, features: &[f64]) -> Result<Vec<f64>, InferenceError> {
        match self {
            JsonModel::Linear(head) => Ok(vec![head.score(features)?]),
            JsonModel::Logistic(head) => Ok(vec![head.classify(features)?]),
            JsonModel::MultiLinear { outputs } => outputs
                .iter()
                .map(|head| head.score(features))
                .collect(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            JsonModel::Linear(_) => "linear",
            JsonModel::Logistic(_) => "logistic",
            JsonModel::MultiLinear { .. } => "multi_linear",
        }
    }
}
