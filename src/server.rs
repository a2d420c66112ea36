use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{HeaderValue, header},
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    error::{RegistryError, ServiceError},
    model::{
        HealthReport, ModelInfo, ModelRegistry, PredictionRequest, PredictionResponse, VersionId,
    },
    observer::MetricsObserver,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ModelRegistry>,
    pub metrics: Arc<MetricsObserver>,
}

impl AppState {
    /// Wraps a registry failure, attaching the valid versions when the
    /// caller asked for one that does not exist.
    fn failure(&self, error: RegistryError) -> ServiceError {
        let available_versions = match error {
            RegistryError::VersionNotFound { .. } | RegistryError::ModelUnavailable { .. } => {
                self.registry.available_versions()
            }
            _ => Vec::new(),
        };
        ServiceError::Registry {
            error,
            available_versions,
        }
    }
}

#[derive(Serialize)]
struct ServiceInfo {
    name: &'static str,
    description: &'static str,
    version: &'static str,
    health: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct VersionRequest {
    pub version: VersionId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionResponse {
    pub success: bool,
    pub message: String,
    pub active_version: VersionId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActiveVersionResponse {
    pub active_version: VersionId,
    pub available_versions: Vec<VersionId>,
}

#[derive(Debug, Deserialize)]
pub struct ClearCacheQuery {
    pub version: Option<VersionId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearCacheResponse {
    pub success: bool,
    pub message: String,
    pub cleared_version: Option<VersionId>,
}

pub fn build_router(
    config: Arc<AppConfig>,
    registry: Arc<ModelRegistry>,
    metrics: Arc<MetricsObserver>,
) -> Router {
    let cors = cors_layer(&config.cors_origins);
    let state = AppState {
        registry,
        metrics,
        config,
    };

    Router::new()
        .route("/", get(root))
        .route("/predict", post(predict))
        .route("/admin/set-active-version", post(set_active_version))
        .route("/admin/active-version", get(active_version))
        .route("/admin/models", get(models_info))
        .route("/admin/models/:version", get(model_info))
        .route("/admin/cache/clear", post(clear_cache))
        .route("/healthz", get(health))
        .route("/metrics", get(self::metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|origin| origin == "*") {
        return base.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(parsed))
}

async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: "model-switch",
        description: "Versioned model serving with hot version switching",
        version: env!("CARGO_PKG_VERSION"),
        health: "/healthz",
    })
}

async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<PredictionRequest>, JsonRejection>,
) -> Result<Json<PredictionResponse>, ServiceError> {
    let Json(request) = payload?;
    let prediction = state
        .registry
        .predict_values(&request.features, request.version)
        .await
        .map_err(|err| state.failure(err))?;
    Ok(Json(prediction.into()))
}

async fn set_active_version(
    State(state): State<AppState>,
    payload: Result<Json<VersionRequest>, JsonRejection>,
) -> Result<Json<VersionResponse>, ServiceError> {
    let Json(request) = payload?;
    let version = request.version;
    let previous = state
        .registry
        .set_active_version(version.clone())
        .map_err(|err| state.failure(err))?;

    info!(%previous, %version, "active version switched via admin api");
    Ok(Json(VersionResponse {
        success: true,
        message: format!("Successfully switched to version '{version}'"),
        active_version: version,
    }))
}

async fn active_version(State(state): State<AppState>) -> Json<ActiveVersionResponse> {
    Json(ActiveVersionResponse {
        active_version: state.registry.active_version(),
        available_versions: state.registry.available_versions(),
    })
}

async fn models_info(State(state): State<AppState>) -> Json<Vec<ModelInfo>> {
    Json(state.registry.models_info())
}

async fn model_info(
    State(state): State<AppState>,
    Path(version): Path<VersionId>,
) -> Json<ModelInfo> {
    Json(state.registry.model_info(&version))
}

async fn clear_cache(
    State(state): State<AppState>,
    Query(query): Query<ClearCacheQuery>,
) -> Json<ClearCacheResponse> {
    let evicted = state.registry.clear_cache(query.version.as_ref());
    let message = match &query.version {
        Some(version) => format!("Cache cleared for version {version}"),
        None => format!("Cache cleared for all models ({evicted} evicted)"),
    };
    Json(ClearCacheResponse {
        success: true,
        message,
        cleared_version: query.version,
    })
}

async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.registry.health())
}

async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ServiceError> {
    if !state.config.metrics_enabled {
        return Err(ServiceError::NotFound("metrics disabled".into()));
    }
    let (content_type, body) = state.metrics.render()?;
    Ok(([(header::CONTENT_TYPE, content_type)], body))
}
