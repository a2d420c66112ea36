use std::{sync::Arc, time::Instant};

use tokio::task;

use crate::{
    error::RegistryError,
    model::{ActiveVersionController, ModelCache, Prediction, PredictionOutput, VersionId},
    observer::{RegistryEvent, RegistryObserver},
};

/// Rejects empty feature vectors and non-finite values.
pub fn validate_features(features: &[f64]) -> Result<(), String> {
    if features.is_empty() {
        return Err("features must not be empty".to_string());
    }
    if let Some(idx) = features.iter().position(|value| !value.is_finite()) {
        return Err(format!("feature {idx} is not a finite number"));
    }
    Ok(())
}

/// Converts raw JSON feature values, rejecting anything that is not a number.
pub fn parse_features(
    values: &[serde_json::Value],
    version: Option<&VersionId>,
) -> Result<Vec<f64>, RegistryError> {
    values
        .iter()
        .enumerate()
        .map(|(idx, value)| {
            value.as_f64().ok_or_else(|| {
                RegistryError::invalid_input(
                    version.cloned(),
                    format!("feature {idx} is not numeric: {value}"),
                )
            })
        })
        .collect()
}

/// Runs one prediction: validate, resolve the version, fetch the artifact,
/// invoke it, and normalize the output.
pub struct PredictionExecutor {
    cache: Arc<ModelCache>,
    active: Arc<ActiveVersionController>,
    observer: Arc<dyn RegistryObserver>,
}

impl PredictionExecutor {
    pub fn new(
        cache: Arc<ModelCache>,
        active: Arc<ActiveVersionController>,
        observer: Arc<dyn RegistryObserver>,
    ) -> Self {
        Self {
            cache,
            active,
            observer,
        }
    }

    pub async fn predict(
        &self,
        features: Vec<f64>,
        version: Option<VersionId>,
    ) -> Result<Prediction, RegistryError> {
        let start = Instant::now();
        let result = self.run(features, version, start).await;
        self.report(&result);
        result
    }

    /// Same as [`predict`](Self::predict) for features still in JSON form;
    /// entries that are not numbers fail as `InvalidInput` and are reported.
    pub async fn predict_values(
        &self,
        values: &[serde_json::Value],
        version: Option<VersionId>,
    ) -> Result<Prediction, RegistryError> {
        match parse_features(values, version.as_ref()) {
            Ok(features) => self.predict(features, version).await,
            Err(err) => {
                let result = Err(err);
                self.report(&result);
                result
            }
        }
    }

    fn report(&self, result: &Result<Prediction, RegistryError>) {
        match result {
            Ok(prediction) => self.observer.on_event(&RegistryEvent::PredictionSucceeded {
                version: prediction.version.clone(),
                latency: prediction.latency,
            }),
            Err(err) => self.observer.on_event(&RegistryEvent::PredictionFailed {
                version: err.version().cloned(),
                kind: err.kind(),
            }),
        }
    }

    async fn run(
        &self,
        features: Vec<f64>,
        version: Option<VersionId>,
        start: Instant,
    ) -> Result<Prediction, RegistryError> {
        if let Err(reason) = validate_features(&features) {
            return Err(RegistryError::InvalidInput { version, reason });
        }

        let version = version.unwrap_or_else(|| self.active.get());
        let entry = self
            .cache
            .get(&version)
            .await
            .map_err(RegistryError::from_prediction_load)?;

        let artifact = entry.artifact;
        let raw = task::spawn_blocking(move || artifact.predict(&features))
            .await
            .map_err(|err| RegistryError::InferenceFailed {
                version: version.clone(),
                reason: format!("inference task failed: {err}"),
            })?
            .map_err(|err| RegistryError::InferenceFailed {
                version: version.clone(),
                reason: err.to_string(),
            })?;

        let output = PredictionOutput::from_raw(raw);
        Ok(Prediction {
            output,
            version,
            latency: start.elapsed(),
        })
    }
}
