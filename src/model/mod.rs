mod active;
mod artifact;
mod cache;
mod catalog;
mod loader;
mod predict;
mod registry;
mod store;
mod types;

#[cfg(feature = "tch-backend")]
pub mod tch_backend;

pub use active::ActiveVersionController;
pub use artifact::{ArtifactHandle, JsonModel, LinearHead, LogisticHead, Model};
pub use cache::{CacheEntry, ModelCache};
pub use catalog::VersionCatalog;
pub use loader::{ArtifactFormat, ArtifactLoader, LoadedArtifact, StoreLoader};
pub use predict::{PredictionExecutor, parse_features, validate_features};
pub use registry::ModelRegistry;
pub use store::{ArtifactStat, ArtifactStore, FsArtifactStore};
pub use types::{
    HealthReport, HealthStatus, ModelInfo, Prediction, PredictionOutput, PredictionRequest,
    PredictionResponse, VersionId,
};
