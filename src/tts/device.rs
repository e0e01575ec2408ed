//! Compute device selection for inference.
//!
//! Capability probes are evaluated in a fixed order and the first available
//! accelerator wins. CPU is used only when no probe reports availability.

use std::fmt;
use std::path::Path;

use tracing::info;

use crate::config::Provider;

/// GPU-class accelerator categories the vocoder can run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accelerator {
    Cuda,
    CoreMl,
}

/// Compute backend selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceTarget {
    Accelerator(Accelerator),
    Cpu,
}

impl DeviceTarget {
    pub fn is_accelerator(&self) -> bool {
        matches!(self, DeviceTarget::Accelerator(_))
    }
}

impl From<Provider> for DeviceTarget {
    fn from(provider: Provider) -> Self {
        match provider {
            Provider::Cpu => DeviceTarget::Cpu,
            Provider::Cuda => DeviceTarget::Accelerator(Accelerator::Cuda),
            Provider::CoreMl => DeviceTarget::Accelerator(Accelerator::CoreMl),
        }
    }
}

impl fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceTarget::Accelerator(Accelerator::Cuda) => write!(f, "cuda"),
            DeviceTarget::Accelerator(Accelerator::CoreMl) => write!(f, "coreml"),
            DeviceTarget::Cpu => write!(f, "cpu"),
        }
    }
}

/// A check for one accelerator category.
pub trait CapabilityProbe {
    /// The accelerator this probe looks for.
    fn accelerator(&self) -> Accelerator;

    /// Whether the accelerator is usable on this host.
    fn is_available(&self) -> bool;
}

/// Detects NVIDIA GPUs through their device nodes (desktop and Jetson).
pub struct CudaProbe;

impl CapabilityProbe for CudaProbe {
    fn accelerator(&self) -> Accelerator {
        Accelerator::Cuda
    }

    fn is_available(&self) -> bool {
        if !cfg!(target_os = "linux") {
            return false;
        }

        let nvidia_paths = [
            "/dev/nvidia0",
            "/dev/nvidiactl",
            "/dev/nvidia-uvm",
            // Jetson devices
            "/dev/nvhost-ctrl",
            "/dev/nvhost-ctrl-gpu",
            "/etc/nv_tegra_release",
        ];

        nvidia_paths.iter().any(|path| Path::new(path).exists())
    }
}

/// CoreML is available on Apple Silicon Macs.
pub struct CoreMlProbe;

impl CapabilityProbe for CoreMlProbe {
    fn accelerator(&self) -> Accelerator {
        Accelerator::CoreMl
    }

    fn is_available(&self) -> bool {
        cfg!(all(target_os = "macos", target_arch = "aarch64"))
    }
}

/// Default probe order: CUDA first, then CoreML.
pub fn default_probes() -> Vec<Box<dyn CapabilityProbe>> {
    vec![Box::new(CudaProbe), Box::new(CoreMlProbe)]
}

/// Pick the first available accelerator, or CPU when none is found.
pub fn select_device(probes: &[Box<dyn CapabilityProbe>]) -> DeviceTarget {
    for probe in probes {
        if probe.is_available() {
            let device = DeviceTarget::Accelerator(probe.accelerator());
            info!("Detected {} accelerator, using it for vocoding", device);
            return device;
        }
    }

    info!("No accelerator detected, using CPU");
    DeviceTarget::Cpu
}

/// Resolve the device for this process: an explicit override wins, otherwise probe.
pub fn resolve_device(device_override: Option<Provider>) -> DeviceTarget {
    match device_override {
        Some(provider) => {
            let device = DeviceTarget::from(provider);
            info!("Using configured device: {}", device);
            device
        }
        None => select_device(&default_probes()),
    }
}
