use std::{
    fs,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use model_switch::{
    LoadError, MetricsObserver, ModelRegistry, PredictionOutput, RegistryError, RegistryEvent,
    RegistryObserver, VersionId,
    model::{
        ArtifactLoader, ArtifactStore, FsArtifactStore, HealthStatus, LoadedArtifact,
        StoreLoader,
    },
    observer::NoopObserver,
};
use tokio::task::JoinSet;

fn write_artifact(root: &Path, version: &str, body: &str) {
    let dir = root.join(version);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("model.json"), body).unwrap();
}

fn linear(weight: f64) -> String {
    format!(r#"{{"kind":"linear","weights":[{weight},{weight},{weight}],"bias":0.0}}"#)
}

/// Wraps the real loader to count and slow down loads.
struct SlowCountingLoader {
    inner: StoreLoader,
    loads: AtomicUsize,
    delay: Duration,
}

impl ArtifactLoader for SlowCountingLoader {
    fn load(&self, version: &VersionId) -> Result<LoadedArtifact, LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        self.inner.load(version)
    }
}

fn registry_at(root: &Path, initial: &str) -> ModelRegistry {
    let store: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(root, "model.json"));
    let loader = Arc::new(StoreLoader::new(store.clone()));
    ModelRegistry::new(store, loader, initial.into(), Arc::new(NoopObserver))
}

#[tokio::test]
async fn switching_versions_changes_default_but_not_overrides() {
    let dir = tempfile::tempdir().unwrap();
    write_artifact(dir.path(), "v1", &linear(1.0));
    write_artifact(dir.path(), "v2", &linear(2.0));
    let registry = registry_at(dir.path(), "v1");
    let features = vec![1.0, 2.0, 3.0];

    let first = registry.predict(features.clone(), None).await.unwrap();
    assert_eq!(first.version, VersionId::from("v1"));
    assert_eq!(first.output, PredictionOutput::Scalar(6.0));

    assert_eq!(
        registry.set_active_version("v2".into()).unwrap(),
        VersionId::from("v1")
    );
    let second = registry.predict(features.clone(), None).await.unwrap();
    assert_eq!(second.version, VersionId::from("v2"));
    assert_eq!(second.output, PredictionOutput::Scalar(12.0));

    let pinned = registry.predict(features, Some("v1".into())).await.unwrap();
    assert_eq!(pinned.version, VersionId::from("v1"));
    assert_eq!(registry.active_version(), VersionId::from("v2"));
}

#[tokio::test]
async fn rejected_switch_keeps_previous_version() {
    let dir = tempfile::tempdir().unwrap();
    write_artifact(dir.path(), "v1", &linear(1.0));
    let registry = registry_at(dir.path(), "v1");

    let err = registry.set_active_version("v9".into()).unwrap_err();
    assert_eq!(err.kind(), "version_not_found");
    assert_eq!(registry.active_version(), VersionId::from("v1"));
    assert!(!registry.is_loaded(&"v9".into()));
}

#[tokio::test]
async fn switching_does_not_load() {
    let dir = tempfile::tempdir().unwrap();
    write_artifact(dir.path(), "v1", &linear(1.0));
    write_artifact(dir.path(), "v2", &linear(2.0));
    let registry = registry_at(dir.path(), "v1");

    registry.set_active_version("v2".into()).unwrap();
    assert!(!registry.is_loaded(&"v2".into()));

    registry.predict(vec![1.0, 1.0, 1.0], None).await.unwrap();
    assert!(registry.is_loaded(&"v2".into()));
    assert!(registry.load_duration(&"v2".into()).is_some());
}

#[tokio::test]
async fn invalid_features_never_reach_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    write_artifact(dir.path(), "v1", &linear(1.0));
    let registry = registry_at(dir.path(), "v1");

    for features in [vec![], vec![1.0, f64::NAN, 3.0], vec![f64::INFINITY]] {
        let err = registry.predict(features, None).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }
    assert!(registry.loaded_versions().is_empty());

    let ok = registry.predict(vec![1.0, 2.0, 3.0], None).await.unwrap();
    assert_eq!(ok.output, PredictionOutput::Scalar(6.0));
}

#[tokio::test]
async fn empty_store_reports_model_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_at(dir.path(), "v1");

    assert!(registry.available_versions().is_empty());
    let err = registry.predict(vec![1.0], None).await.unwrap_err();
    assert_eq!(
        err,
        RegistryError::ModelUnavailable {
            version: "v1".into()
        }
    );
    assert_eq!(registry.health().status, HealthStatus::NoModels);
}

#[tokio::test]
async fn corrupt_artifact_fails_inference_and_retries_next_time() {
    let dir = tempfile::tempdir().unwrap();
    write_artifact(dir.path(), "v1", "{ truncated");
    let registry = registry_at(dir.path(), "v1");

    let err = registry.predict(vec![1.0, 1.0, 1.0], None).await.unwrap_err();
    assert_eq!(err.kind(), "inference_failed");
    assert_eq!(err.version(), Some(&VersionId::from("v1")));

    let direct = registry.preload(&"v1".into()).await.err().unwrap();
    assert!(matches!(
        direct,
        RegistryError::LoadFailed {
            retriable: false,
            ..
        }
    ));

    write_artifact(dir.path(), "v1", &linear(1.0));
    let ok = registry.predict(vec![1.0, 1.0, 1.0], None).await.unwrap();
    assert_eq!(ok.output, PredictionOutput::Scalar(3.0));
}

#[tokio::test]
async fn wrong_feature_count_is_an_inference_failure() {
    let dir = tempfile::tempdir().unwrap();
    write_artifact(dir.path(), "v1", &linear(1.0));
    let registry = registry_at(dir.path(), "v1");

    let err = registry.predict(vec![1.0], None).await.unwrap_err();
    assert_eq!(err.kind(), "inference_failed");
}

#[tokio::test]
async fn multi_output_models_return_full_sequence() {
    let dir = tempfile::tempdir().unwrap();
    write_artifact(
        dir.path(),
        "v1",
        r#"{"kind":"multi_linear","outputs":[{"weights":[1.0]},{"weights":[-1.0]}]}"#,
    );
    let registry = registry_at(dir.path(), "v1");

    let prediction = registry.predict(vec![2.0], None).await.unwrap();
    assert_eq!(prediction.output, PredictionOutput::Vector(vec![2.0, -2.0]));
}

#[tokio::test]
async fn evict_all_then_reload() {
    let dir = tempfile::tempdir().unwrap();
    write_artifact(dir.path(), "v1", &linear(1.0));
    write_artifact(dir.path(), "v2", &linear(2.0));
    let registry = registry_at(dir.path(), "v1");

    registry.preload(&"v1".into()).await.unwrap();
    registry.preload(&"v2".into()).await.unwrap();
    assert_eq!(registry.clear_cache(None), 2);
    assert!(!registry.is_loaded(&"v1".into()));
    assert!(!registry.is_loaded(&"v2".into()));

    assert_eq!(registry.clear_cache(Some(&"v1".into())), 0);
    registry.predict(vec![1.0, 1.0, 1.0], Some("v2".into())).await.unwrap();
    assert!(registry.is_loaded(&"v2".into()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_predictions_share_a_single_load() {
    let dir = tempfile::tempdir().unwrap();
    write_artifact(dir.path(), "v1", &linear(1.0));
    let store: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(dir.path(), "model.json"));
    let loader = Arc::new(SlowCountingLoader {
        inner: StoreLoader::new(store.clone()),
        loads: AtomicUsize::new(0),
        delay: Duration::from_millis(100),
    });
    let registry = Arc::new(ModelRegistry::new(
        store,
        loader.clone(),
        "v1".into(),
        Arc::new(NoopObserver),
    ));

    let mut set = JoinSet::new();
    for _ in 0..12 {
        let registry = registry.clone();
        set.spawn(async move { registry.predict(vec![1.0, 1.0, 1.0], None).await });
    }
    while let Some(joined) = set.join_next().await {
        let prediction = joined.unwrap().unwrap();
        assert_eq!(prediction.output, PredictionOutput::Scalar(3.0));
    }
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn model_info_and_health_reflect_state() {
    let dir = tempfile::tempdir().unwrap();
    write_artifact(dir.path(), "v1", &linear(1.0));
    write_artifact(dir.path(), "v2", &linear(2.0));
    let registry = registry_at(dir.path(), "v1");
    registry.preload(&"v1".into()).await.unwrap();

    let info = registry.model_info(&"v1".into());
    assert!(info.exists && info.loaded && info.active);
    assert!(info.load_time_seconds.is_some());
    assert!(info.file_size.unwrap() > 0);
    assert!(info.modified_time.is_some());

    let absent = registry.model_info(&"v5".into());
    assert!(!absent.exists && !absent.loaded && !absent.active);
    assert!(absent.file_size.is_none());

    let all = registry.models_info();
    assert_eq!(all.len(), 2);

    let health = registry.health();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.models_loaded, 1);
    assert_eq!(
        health.available_versions,
        vec![VersionId::from("v1"), VersionId::from("v2")]
    );
}

#[tokio::test]
async fn health_flags_missing_active_model() {
    let dir = tempfile::tempdir().unwrap();
    write_artifact(dir.path(), "v2", &linear(1.0));
    let registry = registry_at(dir.path(), "v1");
    assert_eq!(registry.health().status, HealthStatus::NoActiveModel);
}

#[tokio::test]
async fn new_versions_appear_without_restart() {
    let dir = tempfile::tempdir().unwrap();
    write_artifact(dir.path(), "v1", &linear(1.0));
    let registry = registry_at(dir.path(), "v1");
    assert_eq!(registry.available_versions().len(), 1);

    write_artifact(dir.path(), "v3", &linear(3.0));
    assert!(registry.version_exists(&"v3".into()));
    registry.set_active_version("v3".into()).unwrap();
    let prediction = registry.predict(vec![1.0, 0.0, 0.0], None).await.unwrap();
    assert_eq!(prediction.output, PredictionOutput::Scalar(3.0));
}

#[tokio::test]
async fn metrics_observer_sees_registry_events() {
    let dir = tempfile::tempdir().unwrap();
    write_artifact(dir.path(), "v1", &linear(1.0));
    write_artifact(dir.path(), "v2", &linear(1.0));
    let store: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(dir.path(), "model.json"));
    let loader = Arc::new(StoreLoader::new(store.clone()));
    let metrics = Arc::new(MetricsObserver::new("v1".into()).unwrap());
    let registry = ModelRegistry::new(store, loader, "v1".into(), metrics.clone());

    registry.predict(vec![1.0, 1.0, 1.0], None).await.unwrap();
    registry.predict(vec![1.0, 1.0, 1.0], None).await.unwrap();
    registry.predict(vec![], None).await.unwrap_err();
    registry
        .predict_values(&[serde_json::json!("x")], Some("v2".into()))
        .await
        .unwrap_err();
    registry.set_active_version("v2".into()).unwrap();

    let v1_success = [("model_version", "v1"), ("status", "success")];
    assert_eq!(metrics.sample("model_prediction_requests_total", &v1_success), Some(2.0));
    assert_eq!(
        metrics.sample("model_load_time_seconds", &[("model_version", "v1")]),
        Some(1.0)
    );
    assert_eq!(
        metrics.sample(
            "model_cache_lookups_total",
            &[("model_version", "v1"), ("result", "miss")]
        ),
        Some(1.0)
    );
    assert_eq!(
        metrics.sample(
            "model_cache_lookups_total",
            &[("model_version", "v1"), ("result", "hit")]
        ),
        Some(1.0)
    );
    assert_eq!(
        metrics.sample(
            "model_prediction_errors_total",
            &[("model_version", "none"), ("error_type", "invalid_input")]
        ),
        Some(1.0)
    );
    assert_eq!(
        metrics.sample(
            "model_prediction_errors_total",
            &[("model_version", "v2"), ("error_type", "invalid_input")]
        ),
        Some(1.0)
    );
    assert_eq!(metrics.active_version(), Some(VersionId::from("v2")));
}

/// Delays delivery of the switch to one version.
struct StallOnSwitch(VersionId);

impl RegistryObserver for StallOnSwitch {
    fn on_event(&self, event: &RegistryEvent) {
        if let RegistryEvent::ActiveVersionChanged { current, .. } = event {
            if *current == self.0 {
                thread::sleep(Duration::from_millis(200));
            }
        }
    }
}

#[test]
fn racing_switches_leave_metrics_on_the_registry_version() {
    let dir = tempfile::tempdir().unwrap();
    for version in ["v1", "v2", "v3"] {
        write_artifact(dir.path(), version, &linear(1.0));
    }
    let store: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(dir.path(), "model.json"));
    let loader = Arc::new(StoreLoader::new(store.clone()));
    let metrics = Arc::new(MetricsObserver::new("v1".into()).unwrap());
    let observers: Vec<Arc<dyn RegistryObserver>> =
        vec![Arc::new(StallOnSwitch("v2".into())), metrics.clone()];
    let registry = Arc::new(ModelRegistry::new(
        store,
        loader,
        "v1".into(),
        Arc::new(observers),
    ));

    let slow = {
        let registry = registry.clone();
        thread::spawn(move || registry.set_active_version("v2".into()).unwrap())
    };
    thread::sleep(Duration::from_millis(50));
    registry.set_active_version("v3".into()).unwrap();
    slow.join().unwrap();

    assert_eq!(registry.active_version(), VersionId::from("v3"));
    assert_eq!(metrics.active_version(), Some(registry.active_version()));
}

#[tokio::test]
async fn warm_up_tolerates_missing_active_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_at(dir.path(), "v1");
    registry.warm_up().await;
    assert!(registry.loaded_versions().is_empty());

    write_artifact(dir.path(), "v1", &linear(1.0));
    registry.warm_up().await;
    assert!(registry.is_loaded(&"v1".into()));
}
