pub mod config;
pub mod error;
pub mod model;
pub mod observer;
pub mod server;

pub use config::AppConfig;
pub use error::{LoadError, RegistryError, ServiceError};
pub use model::{ModelRegistry, Prediction, PredictionOutput, VersionId};
pub use observer::{MetricsObserver, RegistryEvent, RegistryObserver, TracingObserver};
pub use server::build_router;
