use std::{
    sync::Arc,
    time::{Duration, UNIX_EPOCH},
};

use tracing::{info, warn};

use crate::{
    config::AppConfig,
    error::RegistryError,
    model::{
        ActiveVersionController, ArtifactLoader, ArtifactStore, CacheEntry, FsArtifactStore,
        HealthReport, HealthStatus, ModelCache, ModelInfo, Prediction, PredictionExecutor,
        StoreLoader, VersionCatalog, VersionId,
    },
    observer::RegistryObserver,
};

/// Versioned model registry: catalog, cache, active version and prediction
/// path behind one handle. Built once at startup and shared via `Arc`.
pub struct ModelRegistry {
    catalog: VersionCatalog,
    cache: Arc<ModelCache>,
    active: Arc<ActiveVersionController>,
    executor: PredictionExecutor,
}

impl ModelRegistry {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        loader: Arc<dyn ArtifactLoader>,
        initial_version: VersionId,
        observer: Arc<dyn RegistryObserver>,
    ) -> Self {
        let catalog = VersionCatalog::new(store);
        let cache = Arc::new(ModelCache::new(loader, observer.clone()));
        let active = Arc::new(ActiveVersionController::new(
            initial_version,
            catalog.clone(),
            observer.clone(),
        ));
        let executor = PredictionExecutor::new(cache.clone(), active.clone(), observer);
        Self {
            catalog,
            cache,
            active,
            executor,
        }
    }

    /// Registry over the directory tree named by the configuration.
    pub fn initialize(config: &AppConfig, observer: Arc<dyn RegistryObserver>) -> Self {
        let store: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(
            config.models_dir.clone(),
            config.artifact_file.clone(),
        ));
        let loader = StoreLoader::new(store.clone());
        #[cfg(feature = "tch-backend")]
        let loader = loader.with_device(config.device);

        info!(
            models_dir = %config.models_dir.display(),
            default_version = %config.default_version,
            "model registry initialized"
        );
        Self::new(
            store,
            Arc::new(loader),
            config.default_version.clone(),
            observer,
        )
    }

    pub async fn predict(
        &self,
        features: Vec<f64>,
        version: Option<VersionId>,
    ) -> Result<Prediction, RegistryError> {
        self.executor.predict(features, version).await
    }

    pub async fn predict_values(
        &self,
        values: &[serde_json::Value],
        version: Option<VersionId>,
    ) -> Result<Prediction, RegistryError> {
        self.executor.predict_values(values, version).await
    }

    pub fn active_version(&self) -> VersionId {
        self.active.get()
    }

    /// Returns the previously active version.
    pub fn set_active_version(&self, version: VersionId) -> Result<VersionId, RegistryError> {
        self.active.set(version)
    }

    pub fn available_versions(&self) -> Vec<VersionId> {
        self.catalog.list_versions()
    }

    pub fn version_exists(&self, version: &VersionId) -> bool {
        self.catalog.exists(version)
    }

    pub fn is_loaded(&self, version: &VersionId) -> bool {
        self.cache.is_loaded(version)
    }

    pub fn load_duration(&self, version: &VersionId) -> Option<Duration> {
        self.cache.load_duration(version)
    }

    pub fn loaded_versions(&self) -> Vec<VersionId> {
        self.cache.loaded_versions()
    }

    /// Loads `version` into the cache without running a prediction.
    pub async fn preload(&self, version: &VersionId) -> Result<CacheEntry, RegistryError> {
        self.cache
            .get(version)
            .await
            .map_err(RegistryError::from_direct_load)
    }

    /// Loads the active version so the first request does not pay for it.
    /// A missing artifact is tolerated; the service starts empty.
    pub async fn warm_up(&self) {
        let version = self.active_version();
        match self.preload(&version).await {
            Ok(entry) => info!(%version, load_ms = entry.load_duration.as_secs_f64() * 1000.0, "active model warmed up"),
            Err(RegistryError::ModelUnavailable { .. }) => {
                info!(%version, "no artifact for active version yet; starting cold")
            }
            Err(err) => warn!(%version, error = %err, "failed to warm up active model"),
        }
    }

    pub fn evict(&self, version: &VersionId) -> bool {
        self.cache.evict(version)
    }

    pub fn evict_all(&self) -> usize {
        self.cache.evict_all()
    }

    /// Evicts one version, or everything when `version` is `None`.
    pub fn clear_cache(&self, version: Option<&VersionId>) -> usize {
        match version {
            Some(version) => usize::from(self.evict(version)),
            None => self.evict_all(),
        }
    }

    pub fn model_info(&self, version: &VersionId) -> ModelInfo {
        let stat = self.catalog.stat(version);
        let modified_time = stat
            .as_ref()
            .and_then(|s| s.modified)
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64());

        ModelInfo {
            version: version.clone(),
            exists: stat.is_some(),
            loaded: self.cache.is_loaded(version),
            load_time_seconds: self.cache.load_duration(version).map(|d| d.as_secs_f64()),
            active: *version == self.active.get(),
            file_size: stat.map(|s| s.size_bytes),
            modified_time,
        }
    }

    pub fn models_info(&self) -> Vec<ModelInfo> {
        self.available_versions()
            .iter()
            .map(|version| self.model_info(version))
            .collect()
    }

    pub fn health(&self) -> HealthReport {
        let active_version = self.active.get();
        let available_versions = self.catalog.list_versions();
        let models_loaded = available_versions
            .iter()
            .filter(|version| self.cache.is_loaded(version))
            .count();

        let status = if available_versions.is_empty() {
            HealthStatus::NoModels
        } else if !available_versions.contains(&active_version) {
            HealthStatus::NoActiveModel
        } else {
            HealthStatus::Healthy
        };

        HealthReport {
            status,
            active_version,
            available_versions,
            models_loaded,
        }
    }

    /// Releases every cached artifact. In-flight predictions finish with the
    /// handles they already hold.
    pub fn shutdown(&self) {
        let evicted = self.cache.evict_all();
        info!(evicted, "model registry shut down");
    }
}
