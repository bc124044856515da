//! Compute device selection and candle error mapping

use candle_core::Device;
use serde::{Deserialize, Serialize};
use stance_core::{Error, Result};

/// Device specification (for config files)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSpec {
    /// CPU inference (always available)
    #[default]
    Cpu,
    /// CUDA GPU by index
    Cuda { index: usize },
    /// Metal (Apple Silicon) by index
    Metal { index: usize },
}

impl DeviceSpec {
    /// Create the candle device
    pub fn create(&self) -> Result<Device> {
        match self {
            Self::Cpu => Ok(Device::Cpu),
            Self::Cuda { index } => Device::new_cuda(*index)
                .map_err(|e| Error::config(format!("failed to create CUDA device {index}: {e}"))),
            Self::Metal { index } => Device::new_metal(*index)
                .map_err(|e| Error::config(format!("failed to create Metal device {index}: {e}"))),
        }
    }
}

/// Map a candle error into a model error with context
pub(crate) fn candle_err(context: &'static str) -> impl FnOnce(candle_core::Error) -> Error {
    move |e| Error::model(format!("{context}: {e}"))
}
