//! Device abstraction for model execution
//!
//! Devices are simple enums that map onto ORT execution providers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Device types for model execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Device {
    /// CPU device with intra-op thread count (0 = all available cores)
    Cpu(usize),
    /// CUDA device with device ID
    #[cfg(feature = "cuda")]
    Cuda(usize),
}

impl Default for Device {
    fn default() -> Self {
        Self::Cpu(0)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu(i) => write!(f, "cpu:{i}"),
            #[cfg(feature = "cuda")]
            Self::Cuda(i) => write!(f, "cuda:{i}"),
        }
    }
}

impl std::str::FromStr for Device {
    type Err = crate::AgrivError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        #[inline]
        fn parse_device_id(id_str: Option<&str>) -> usize {
            id_str
                .map(|s| s.trim().parse::<usize>().unwrap_or(0))
                .unwrap_or(0)
        }

        let (device_type, id_part) = s
            .trim()
            .split_once(':')
            .map_or_else(|| (s.trim(), None), |(device, id)| (device, Some(id)));

        match device_type.to_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu(parse_device_id(id_part))),
            #[cfg(feature = "cuda")]
            "cuda" => Ok(Self::Cuda(parse_device_id(id_part))),
            _ => Err(crate::AgrivError::config(format!("Unsupported device: {s}"))),
        }
    }
}

impl Device {
    /// Check if the device is available on the system
    pub fn is_available(&self) -> bool {
        match self {
            Self::Cpu(_) => true,
            #[cfg(feature = "cuda")]
            Self::Cuda(id) => {
                use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
                CUDAExecutionProvider::default()
                    .with_device_id(*id as i32)
                    .is_available()
                    .unwrap_or(false)
            }
        }
    }

    /// Number of intra-op threads a session on this device should use
    pub fn intra_threads(&self) -> usize {
        match self {
            Self::Cpu(0) => available_cores(),
            Self::Cpu(n) => *n,
            #[cfg(feature = "cuda")]
            Self::Cuda(_) => available_cores(),
        }
    }
}

fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// CPU device using every available core
pub fn cpu() -> Device {
    Device::Cpu(0)
}

pub fn cpu_with_threads(threads: usize) -> Device {
    Device::Cpu(threads)
}

#[cfg(feature = "cuda")]
pub fn cuda(device_id: usize) -> Device {
    Device::Cuda(device_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu(0));
        assert_eq!("CPU:4".parse::<Device>().unwrap(), Device::Cpu(4));
        assert_eq!("cpu:abc".parse::<Device>().unwrap(), Device::Cpu(0));
        assert!("tpu:0".parse::<Device>().is_err());
    }

    #[test]
    fn test_intra_threads() {
        assert_eq!(cpu_with_threads(3).intra_threads(), 3);
        assert!(cpu().intra_threads() >= 1);
        assert_eq!(cpu().to_string(), "cpu:0");
    }
}
