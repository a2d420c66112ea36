use std::{borrow::Borrow, fmt, time::Duration};

use serde::{Deserialize, Serialize};

/// Opaque identifier of one artifact generation. Ordering exists only so
/// listings are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(String);

impl VersionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VersionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for VersionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for VersionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for VersionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Shape-normalized model output: a single value is unwrapped to a scalar.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PredictionOutput {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl PredictionOutput {
    pub fn from_raw(mut raw: Vec<f64>) -> Self {
        if raw.len() == 1 {
            PredictionOutput::Scalar(raw.remove(0))
        } else {
            PredictionOutput::Vector(raw)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Prediction {
    pub output: PredictionOutput,
    pub version: VersionId,
    pub latency: Duration,
}

#[derive(Debug, Deserialize)]
pub struct PredictionRequest {
    pub features: Vec<serde_json::Value>,
    pub version: Option<VersionId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionResponse {
    pub prediction: PredictionOutput,
    pub model_version: VersionId,
    pub latency_ms: f64,
}

impl From<Prediction> for PredictionResponse {
    fn from(prediction: Prediction) -> Self {
        Self {
            prediction: prediction.output,
            model_version: prediction.version,
            latency_ms: prediction.latency.as_secs_f64() * 1000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub version: VersionId,
    pub exists: bool,
    pub loaded: bool,
    pub load_time_seconds: Option<f64>,
    pub active: bool,
    pub file_size: Option<u64>,
    /// Seconds since the Unix epoch.
    pub modified_time: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    NoModels,
    NoActiveModel,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub active_version: VersionId,
    pub available_versions: Vec<VersionId>,
    pub models_loaded: usize,
}
