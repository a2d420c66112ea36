use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

#[cfg(feature = "tch-backend")]
use tch::Device;

use crate::model::VersionId;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub models_dir: PathBuf,
    pub default_version: VersionId,
    pub artifact_file: String,
    pub metrics_enabled: bool,
    pub warm_start: bool,
    pub cors_origins: Vec<String>,
    #[cfg(feature = "tch-backend")]
    pub device: Device,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `from_env` passes the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr = lookup("SERVER_ADDR")
            .unwrap_or_else(|| "127.0.0.1:8000".into())
            .parse()
            .unwrap_or_else(|_| SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000));

        let models_dir = PathBuf::from(lookup("MODELS_DIR").unwrap_or_else(|| "models".into()));

        let default_version = lookup("DEFAULT_VERSION")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "v1".into());

        let artifact_file = lookup("ARTIFACT_FILE").unwrap_or_else(|| "model.json".into());
        if artifact_file.is_empty() || artifact_file.contains(['/', '\\']) {
            anyhow::bail!("ARTIFACT_FILE must be a plain file name, got {artifact_file:?}");
        }

        let metrics_enabled = lookup("METRICS_ENABLED")
            .and_then(|v| parse_bool(&v))
            .unwrap_or(true);
        let warm_start = lookup("WARM_START")
            .and_then(|v| parse_bool(&v))
            .unwrap_or(true);

        let cors_origins = lookup("CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|origins| !origins.is_empty())
            .unwrap_or_else(|| vec!["*".to_string()]);

        #[cfg(feature = "tch-backend")]
        let device = {
            let raw = lookup("DEVICE").unwrap_or_else(|| "cpu".into());
            crate::model::tch_backend::parse_device(&raw)
        };

        Ok(Self {
            listen_addr,
            models_dir,
            default_version: VersionId::from(default_version),
            artifact_file,
            metrics_enabled,
            warm_start,
            cors_origins,
            #[cfg(feature = "tch-backend")]
            device,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
