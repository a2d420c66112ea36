use std::{
    io,
    sync::Arc,
    time::{Duration, Instant},
};

#[cfg(feature = "tch-backend")]
use tch::Device;
use tracing::debug;

use crate::{
    error::LoadError,
    model::{ArtifactHandle, ArtifactStore, JsonModel, VersionId},
};

/// A freshly deserialized artifact and how long deserialization took.
pub struct LoadedArtifact {
    pub artifact: ArtifactHandle,
    pub load_duration: Duration,
}

/// Turns one stored artifact into a model. Called from a blocking thread.
pub trait ArtifactLoader: Send + Sync + 'static {
    fn load(&self, version: &VersionId) -> Result<LoadedArtifact, LoadError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    Json,
    TorchScript,
}

impl ArtifactFormat {
    pub fn from_file_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".pt") || lower.ends_with(".ts") {
            ArtifactFormat::TorchScript
        } else {
            ArtifactFormat::Json
        }
    }
}

/// Loads artifacts out of an [`ArtifactStore`], picking the decoder from the
/// store's artifact file name.
pub struct StoreLoader {
    store: Arc<dyn ArtifactStore>,
    format: ArtifactFormat,
    #[cfg(feature = "tch-backend")]
    device: Device,
}

impl StoreLoader {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        let format = ArtifactFormat::from_file_name(store.artifact_name());
        Self {
            store,
            format,
            #[cfg(feature = "tch-backend")]
            device: Device::Cpu,
        }
    }

    #[cfg(feature = "tch-backend")]
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    fn decode(&self, version: &VersionId, bytes: &[u8]) -> Result<ArtifactHandle, LoadError> {
        let corrupt = |reason: String| LoadError::Corrupt {
            version: version.clone(),
            reason,
        };
        match self.format {
            ArtifactFormat::Json => {
                let model = JsonModel::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?;
                Ok(Arc::new(model))
            }
            #[cfg(feature = "tch-backend")]
            ArtifactFormat::TorchScript => {
                let model = crate::model::tch_backend::TorchScriptModel::from_bytes(bytes, self.device)
                    .map_err(|e| corrupt(e.to_string()))?;
                Ok(Arc::new(model))
            }
            #[cfg(not(feature = "tch-backend"))]
            ArtifactFormat::TorchScript => Err(corrupt(
                "torchscript artifacts require the tch-backend feature".to_string(),
            )),
        }
    }
}

impl ArtifactLoader for StoreLoader {
    fn load(&self, version: &VersionId) -> Result<LoadedArtifact, LoadError> {
        let bytes = self.store.read(version).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => LoadError::NotFound {
                version: version.clone(),
            },
            _ => LoadError::Io {
                version: version.clone(),
                reason: err.to_string(),
            },
        })?;

        let start = Instant::now();
        let artifact = self.decode(version, &bytes)?;
        let load_duration = start.elapsed();

        debug!(%version, kind = artifact.kind(), bytes = bytes.len(), ?load_duration, "artifact decoded");
        Ok(LoadedArtifact {
            artifact,
            load_duration,
        })
    }
}
