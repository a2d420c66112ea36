use std::io::Cursor;

use parking_lot::Mutex;
use tch::{Device, Kind, Tensor, no_grad};
use tracing::warn;

use crate::{error::InferenceError, model::Model};

/// TorchScript module invoked with a `[1, n]` float tensor.
pub struct TorchScriptModel {
    device: Device,
    module: Mutex<tch::CModule>,
}

impl TorchScriptModel {
    pub fn from_bytes(bytes: &[u8], device: Device) -> Result<Self, tch::TchError> {
        let mut reader = Cursor::new(bytes);
        let mut module = tch::CModule::load_data_on_device(&mut reader, device)?;
        module.set_eval();
        Ok(Self {
            device,
            module: Mutex::new(module),
        })
    }
}

impl Model for TorchScriptModel {
    fn predict(&self, features: &[f64]) -> Result<Vec<f64>, InferenceError> {
        let input = Tensor::from_slice(features)
            .to_kind(Kind::Float)
            .reshape([1, features.len() as i64])
            .to(self.device);

        let output = no_grad(|| {
            let module = self.module.lock();
            module.forward_ts(&[input])
        })
        .map_err(|e| InferenceError::Backend(e.to_string()))?;

        let flat = output
            .to_kind(Kind::Double)
            .flatten(0, -1)
            .to(Device::Cpu);
        Vec::<f64>::try_from(&flat).map_err(|e| InferenceError::Backend(e.to_string()))
    }

    fn kind(&self) -> &'static str {
        "torchscript"
    }
}

pub fn parse_device(raw: &str) -> Device {
    let lower = raw.trim().to_lowercase();
    match lower.strip_prefix("cuda") {
        Some(rest) => {
            let idx = rest
                .strip_prefix(':')
                .and_then(|idx| idx.parse::<usize>().ok())
                .unwrap_or(0);
            if tch::Cuda::is_available() {
                Device::Cuda(idx)
            } else {
                warn!(requested = %raw, "CUDA not available, running TorchScript models on CPU");
                Device::Cpu
            }
        }
        None => {
            if lower != "cpu" {
                warn!(requested = %raw, "unrecognised device, running TorchScript models on CPU");
            }
            Device::Cpu
        }
    }
}
