//! Side-channel signals emitted by the registry.
//!
//! The registry reports what happened through [`RegistryObserver`]; what gets
//! logged, counted, or exported is up to the observer.

use std::{sync::Arc, time::Duration};

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
    proto::MetricType,
};
use tracing::{debug, info, warn};

use crate::{error::LoadError, model::VersionId};

#[derive(Debug, Clone)]
pub enum RegistryEvent {
    ArtifactLoaded {
        version: VersionId,
        duration: Duration,
    },
    ArtifactLoadFailed {
        version: VersionId,
        error: LoadError,
    },
    CacheHit {
        version: VersionId,
    },
    CacheMiss {
        version: VersionId,
    },
    Evicted {
        version: VersionId,
    },
    CacheCleared {
        evicted: usize,
    },
    ActiveVersionChanged {
        previous: VersionId,
        current: VersionId,
    },
    PredictionSucceeded {
        version: VersionId,
        latency: Duration,
    },
    PredictionFailed {
        version: Option<VersionId>,
        kind: &'static str,
    },
}

pub trait RegistryObserver: Send + Sync {
    fn on_event(&self, event: &RegistryEvent);
}

pub struct NoopObserver;

impl RegistryObserver for NoopObserver {
    fn on_event(&self, _event: &RegistryEvent) {}
}

impl RegistryObserver for Vec<Arc<dyn RegistryObserver>> {
    fn on_event(&self, event: &RegistryEvent) {
        for observer in self {
            observer.on_event(event);
        }
    }
}

/// Writes every event as a structured `tracing` record.
pub struct TracingObserver;

impl RegistryObserver for TracingObserver {
    fn on_event(&self, event: &RegistryEvent) {
        match event {
            RegistryEvent::ArtifactLoaded { version, duration } => {
                info!(%version, load_ms = duration.as_secs_f64() * 1000.0, "model loaded");
            }
            RegistryEvent::ArtifactLoadFailed { version, error } => {
                warn!(%version, retriable = error.is_retriable(), error = %error, "model load failed");
            }
            RegistryEvent::CacheHit { version } => debug!(%version, "model cache hit"),
            RegistryEvent::CacheMiss { version } => debug!(%version, "model cache miss"),
            RegistryEvent::Evicted { version } => info!(%version, "model evicted from cache"),
            RegistryEvent::CacheCleared { evicted } => info!(evicted, "model cache cleared"),
            RegistryEvent::ActiveVersionChanged { previous, current } => {
                info!(%previous, %current, "active model version switched");
            }
            RegistryEvent::PredictionSucceeded { version, latency } => {
                debug!(%version, latency_ms = latency.as_secs_f64() * 1000.0, "prediction served");
            }
            RegistryEvent::PredictionFailed { version, kind } => {
                warn!(version = version.as_ref().map(VersionId::as_str), kind, "prediction failed");
            }
        }
    }
}

const LOAD_TIME_BUCKETS: &[f64] = &[0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Label used for failures that happen before a version is resolved.
const UNRESOLVED: &str = "none";

/// Prometheus families for prediction traffic, loads and the active version.
pub struct MetricsObserver {
    registry: Registry,
    inference_latency: HistogramVec,
    prediction_requests: IntCounterVec,
    prediction_errors: IntCounterVec,
    version_active: IntGaugeVec,
    load_time: HistogramVec,
    load_failures: IntCounterVec,
    cache_lookups: IntCounterVec,
}

impl MetricsObserver {
    pub fn new(active_version: VersionId) -> prometheus::Result<Self> {
        let registry = Registry::new();

        let inference_latency = HistogramVec::new(
            HistogramOpts::new(
                "model_inference_latency_seconds",
                "Time spent on model inference",
            ),
            &["model_version"],
        )?;
        let prediction_requests = IntCounterVec::new(
            Opts::new(
                "model_prediction_requests_total",
                "Total number of prediction requests",
            ),
            &["model_version", "status"],
        )?;
        let prediction_errors = IntCounterVec::new(
            Opts::new(
                "model_prediction_errors_total",
                "Total number of prediction errors",
            ),
            &["model_version", "error_type"],
        )?;
        let version_active = IntGaugeVec::new(
            Opts::new("model_version_active", "Currently active model version"),
            &["version"],
        )?;
        let load_time = HistogramVec::new(
            HistogramOpts::new("model_load_time_seconds", "Time spent loading models")
                .buckets(LOAD_TIME_BUCKETS.to_vec()),
            &["model_version"],
        )?;
        let load_failures = IntCounterVec::new(
            Opts::new("model_load_failures_total", "Total number of failed model loads"),
            &["model_version", "retriable"],
        )?;
        let cache_lookups = IntCounterVec::new(
            Opts::new("model_cache_lookups_total", "Model cache lookups by outcome"),
            &["model_version", "result"],
        )?;

        registry.register(Box::new(inference_latency.clone()))?;
        registry.register(Box::new(prediction_requests.clone()))?;
        registry.register(Box::new(prediction_errors.clone()))?;
        registry.register(Box::new(version_active.clone()))?;
        registry.register(Box::new(load_time.clone()))?;
        registry.register(Box::new(load_failures.clone()))?;
        registry.register(Box::new(cache_lookups.clone()))?;

        version_active
            .with_label_values(&[active_version.as_str()])
            .set(1);

        Ok(Self {
            registry,
            inference_latency,
            prediction_requests,
            prediction_errors,
            version_active,
            load_time,
            load_failures,
            cache_lookups,
        })
    }

    /// Text exposition of every family, plus the content type to serve it as.
    pub fn render(&self) -> prometheus::Result<(String, String)> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf)?;
        let body = String::from_utf8(buf).map_err(|err| prometheus::Error::Msg(err.to_string()))?;
        Ok((encoder.format_type().to_string(), body))
    }

    /// Current value of one series: counter and gauge values, or the
    /// observation count for histograms. `None` if the series was never touched.
    pub fn sample(&self, family: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let families = self.registry.gather();
        let family = families.iter().find(|f| f.get_name() == family)?;
        let metric = family.get_metric().iter().find(|metric| {
            let pairs = metric.get_label();
            pairs.len() == labels.len()
                && labels.iter().all(|(name, value)| {
                    pairs
                        .iter()
                        .any(|pair| pair.get_name() == *name && pair.get_value() == *value)
                })
        })?;
        Some(match family.get_field_type() {
            MetricType::COUNTER => metric.get_counter().get_value(),
            MetricType::GAUGE => metric.get_gauge().get_value(),
            MetricType::HISTOGRAM => metric.get_histogram().get_sample_count() as f64,
            _ => return None,
        })
    }

    /// The version whose `model_version_active` gauge is set.
    pub fn active_version(&self) -> Option<VersionId> {
        let families = self.registry.gather();
        let family = families
            .iter()
            .find(|f| f.get_name() == "model_version_active")?;
        family
            .get_metric()
            .iter()
            .find(|metric| metric.get_gauge().get_value() >= 1.0)
            .and_then(|metric| metric.get_label().first())
            .map(|pair| VersionId::from(pair.get_value()))
    }
}

impl RegistryObserver for MetricsObserver {
    fn on_event(&self, event: &RegistryEvent) {
        match event {
            RegistryEvent::ArtifactLoaded { version, duration } => {
                self.load_time
                    .with_label_values(&[version.as_str()])
                    .observe(duration.as_secs_f64());
            }
            RegistryEvent::ArtifactLoadFailed { version, error } => {
                let retriable = if error.is_retriable() { "true" } else { "false" };
                self.load_failures
                    .with_label_values(&[version.as_str(), retriable])
                    .inc();
            }
            RegistryEvent::CacheHit { version } => {
                self.cache_lookups
                    .with_label_values(&[version.as_str(), "hit"])
                    .inc();
            }
            RegistryEvent::CacheMiss { version } => {
                self.cache_lookups
                    .with_label_values(&[version.as_str(), "miss"])
                    .inc();
            }
            RegistryEvent::Evicted { .. } | RegistryEvent::CacheCleared { .. } => {}
            RegistryEvent::ActiveVersionChanged { previous, current } => {
                self.version_active
                    .with_label_values(&[previous.as_str()])
                    .set(0);
                self.version_active
                    .with_label_values(&[current.as_str()])
                    .set(1);
            }
            RegistryEvent::PredictionSucceeded { version, latency } => {
                self.inference_latency
                    .with_label_values(&[version.as_str()])
                    .observe(latency.as_secs_f64());
                self.prediction_requests
                    .with_label_values(&[version.as_str(), "success"])
                    .inc();
            }
            RegistryEvent::PredictionFailed { version, kind } => {
                let version = version.as_ref().map_or(UNRESOLVED, VersionId::as_str);
                self.prediction_requests
                    .with_label_values(&[version, "error"])
                    .inc();
                self.prediction_errors
                    .with_label_values(&[version, *kind])
                    .inc();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prediction_traffic_is_counted_per_version() {
        let metrics = MetricsObserver::new("v1".into()).unwrap();
        metrics.on_event(&RegistryEvent::CacheMiss {
            version: "v1".into(),
        });
        metrics.on_event(&RegistryEvent::ArtifactLoaded {
            version: "v1".into(),
            duration: Duration::from_millis(20),
        });
        for ms in [4, 10] {
            metrics.on_event(&RegistryEvent::PredictionSucceeded {
                version: "v1".into(),
                latency: Duration::from_millis(ms),
            });
        }
        metrics.on_event(&RegistryEvent::PredictionFailed {
            version: Some("v1".into()),
            kind: "inference_failed",
        });
        metrics.on_event(&RegistryEvent::PredictionFailed {
            version: None,
            kind: "invalid_input",
        });

        let v1 = [("model_version", "v1")];
        assert_eq!(metrics.sample("model_inference_latency_seconds", &v1), Some(2.0));
        assert_eq!(metrics.sample("model_load_time_seconds", &v1), Some(1.0));
        assert_eq!(
            metrics.sample(
                "model_prediction_requests_total",
                &[("model_version", "v1"), ("status", "success")]
            ),
            Some(2.0)
        );
        assert_eq!(
            metrics.sample(
                "model_prediction_errors_total",
                &[("model_version", "v1"), ("error_type", "inference_failed")]
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
                "model_cache_lookups_total",
                &[("model_version", "v1"), ("result", "miss")]
            ),
            Some(1.0)
        );
    }

    #[test]
    fn switches_move_the_active_gauge() {
        let metrics = MetricsObserver::new("v1".into()).unwrap();
        assert_eq!(metrics.active_version(), Some("v1".into()));

        metrics.on_event(&RegistryEvent::ActiveVersionChanged {
            previous: "v1".into(),
            current: "v2".into(),
        });
        assert_eq!(metrics.active_version(), Some("v2".into()));
        assert_eq!(
            metrics.sample("model_version_active", &[("version", "v1")]),
            Some(0.0)
        );
    }

    #[test]
    fn render_uses_text_exposition() {
        let metrics = MetricsObserver::new("v1".into()).unwrap();
        metrics.on_event(&RegistryEvent::PredictionSucceeded {
            version: "v1".into(),
            latency: Duration::from_millis(3),
        });

        let (content_type, body) = metrics.render().unwrap();
        assert!(content_type.starts_with("text/plain"));
        assert!(body.contains("# TYPE model_inference_latency_seconds histogram"));
        assert!(body.contains(r#"model_prediction_requests_total{model_version="v1",status="success"} 1"#));
        assert!(body.contains(r#"model_version_active{version="v1"} 1"#));
    }

    #[test]
    fn fanout_reaches_every_observer() {
        let first = Arc::new(MetricsObserver::new("v1".into()).unwrap());
        let second = Arc::new(MetricsObserver::new("v1".into()).unwrap());
        let fanout: Vec<Arc<dyn RegistryObserver>> = vec![first.clone(), second.clone()];
        fanout.on_event(&RegistryEvent::CacheHit {
            version: "v1".into(),
        });
        for observer in [first, second] {
            assert_eq!(
                observer.sample(
                    "model_cache_lookups_total",
                    &[("model_version", "v1"), ("result", "hit")]
                ),
                Some(1.0)
            );
        }
    }
}
