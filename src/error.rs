use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::model::VersionId;

/// Failure to turn a stored artifact into a ready-to-invoke model.
///
/// Cloneable so every caller waiting on the same in-flight load receives the
/// same outcome.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LoadError {
    #[error("no artifact stored for version '{version}'")]
    NotFound { version: VersionId },
    #[error("artifact for version '{version}' is corrupt: {reason}")]
    Corrupt { version: VersionId, reason: String },
    #[error("failed to read artifact for version '{version}': {reason}")]
    Io { version: VersionId, reason: String },
    #[error("load of version '{version}' was interrupted: {reason}")]
    Interrupted { version: VersionId, reason: String },
}

impl LoadError {
    pub fn version(&self) -> &VersionId {
        match self {
            LoadError::NotFound { version }
            | LoadError::Corrupt { version, .. }
            | LoadError::Io { version, .. }
            | LoadError::Interrupted { version, .. } => version,
        }
    }

    /// Whether issuing the same load again could plausibly succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, LoadError::Io { .. } | LoadError::Interrupted { .. })
    }
}

/// Raised by a loaded artifact when it cannot score a feature vector.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("expected {expected} features, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("backend error: {0}")]
    Backend(String),
}

/// Outcome kinds of the registry operations. Every variant names the version
/// that was being attempted, when one had been resolved.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    #[error("invalid input: {reason}")]
    InvalidInput {
        version: Option<VersionId>,
        reason: String,
    },
    #[error("model version '{version}' not found")]
    VersionNotFound { version: VersionId },
    #[error("model version '{version}' is unavailable")]
    ModelUnavailable { version: VersionId },
    #[error("prediction with version '{version}' failed: {reason}")]
    InferenceFailed { version: VersionId, reason: String },
    #[error("failed to load version '{version}': {reason}")]
    LoadFailed {
        version: VersionId,
        reason: String,
        retriable: bool,
    },
}

impl RegistryError {
    pub fn invalid_input(version: Option<VersionId>, reason: impl Into<String>) -> Self {
        RegistryError::InvalidInput {
            version,
            reason: reason.into(),
        }
    }

    pub fn version(&self) -> Option<&VersionId> {
        match self {
            RegistryError::InvalidInput { version, .. } => version.as_ref(),
            RegistryError::VersionNotFound { version }
            | RegistryError::ModelUnavailable { version }
            | RegistryError::InferenceFailed { version, .. }
            | RegistryError::LoadFailed { version, .. } => Some(version),
        }
    }

    /// Stable label used in logs, metrics and error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::InvalidInput { .. } => "invalid_input",
            RegistryError::VersionNotFound { .. } => "version_not_found",
            RegistryError::ModelUnavailable { .. } => "model_unavailable",
            RegistryError::InferenceFailed { .. } => "inference_failed",
            RegistryError::LoadFailed { .. } => "load_failed",
        }
    }

    /// Mapping used on the prediction path: a missing artifact means the
    /// model is unavailable, anything else surfaces as a failed inference.
    pub fn from_prediction_load(err: LoadError) -> Self {
        match err {
            LoadError::NotFound { version } => RegistryError::ModelUnavailable { version },
            other => RegistryError::InferenceFailed {
                version: other.version().clone(),
                reason: other.to_string(),
            },
        }
    }

    /// Mapping used for explicit loads outside of a prediction.
    pub fn from_direct_load(err: LoadError) -> Self {
        match err {
            LoadError::NotFound { version } => RegistryError::ModelUnavailable { version },
            other => RegistryError::LoadFailed {
                version: other.version().clone(),
                reason: other.to_string(),
                retriable: other.is_retriable(),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{error}")]
    Registry {
        error: RegistryError,
        available_versions: Vec<VersionId>,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("metrics encoding failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl From<RegistryError> for ServiceError {
    fn from(error: RegistryError) -> Self {
        ServiceError::Registry {
            error,
            available_versions: Vec::new(),
        }
    }
}

/// Bodies axum cannot decode are bad input like any other.
impl From<JsonRejection> for ServiceError {
    fn from(rejection: JsonRejection) -> Self {
        RegistryError::invalid_input(None, rejection.body_text()).into()
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::Registry { error, .. } => match error {
                RegistryError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
                RegistryError::VersionNotFound { .. } | RegistryError::ModelUnavailable { .. } => {
                    StatusCode::NOT_FOUND
                }
                RegistryError::InferenceFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                RegistryError::LoadFailed { retriable: true, .. } => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                RegistryError::LoadFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Metrics(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = match &self {
            ServiceError::Registry {
                error,
                available_versions,
            } => {
                let mut body = serde_json::json!({
                    "error": error.to_string(),
                    "kind": error.kind(),
                    "model_version": error.version(),
                });
                if matches!(
                    error,
                    RegistryError::VersionNotFound { .. } | RegistryError::ModelUnavailable { .. }
                ) {
                    body["available_versions"] = serde_json::json!(available_versions);
                }
                body
            }
            other => serde_json::json!({
                "error": other.to_string(),
                "kind": "request",
                "model_version": null,
            }),
        };

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_not_retriable() {
        let err = LoadError::NotFound {
            version: "v1".into(),
        };
        assert!(!err.is_retriable());
        let err = LoadError::Io {
            version: "v1".into(),
            reason: "disk hiccup".into(),
        };
        assert!(err.is_retriable());
    }

    #[test]
    fn prediction_path_maps_missing_artifact_to_unavailable() {
        let mapped = RegistryError::from_prediction_load(LoadError::NotFound {
            version: "v3".into(),
        });
        assert_eq!(
            mapped,
            RegistryError::ModelUnavailable {
                version: "v3".into()
            }
        );

        let mapped = RegistryError::from_prediction_load(LoadError::Corrupt {
            version: "v3".into(),
            reason: "bad json".into(),
        });
        assert_eq!(mapped.kind(), "inference_failed");
        assert_eq!(mapped.version().map(|v| v.as_str()), Some("v3"));
    }

    #[test]
    fn direct_loads_keep_retry_hint() {
        let mapped = RegistryError::from_direct_load(LoadError::Io {
            version: "v2".into(),
            reason: "timed out".into(),
        });
        match mapped {
            RegistryError::LoadFailed { retriable, .. } => assert!(retriable),
            other => panic!("unexpected mapping: {other:?}"),
        }
    }

    #[test]
    fn status_codes_follow_error_kind() {
        let cases = [
            (RegistryError::invalid_input(None, "empty"), StatusCode::BAD_REQUEST),
            (
                RegistryError::VersionNotFound {
                    version: "v9".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                RegistryError::InferenceFailed {
                    version: "v1".into(),
                    reason: "boom".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                RegistryError::LoadFailed {
                    version: "v1".into(),
                    reason: "io".into(),
                    retriable: true,
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (error, expected) in cases {
            let response = ServiceError::from(error).into_response();
            assert_eq!(response.status(), expected);
        }
        assert_eq!(
            ServiceError::NotFound("metrics disabled".into())
                .into_response()
                .status(),
            StatusCode::NOT_FOUND
        );
    }
}
