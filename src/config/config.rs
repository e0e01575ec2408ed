//! Application configuration and CLI argument parsing.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::tts::DeviceTarget;

/// Acoustic model file name inside the model directory.
pub const ACOUSTIC_MODEL_FILE: &str = "glados.onnx";

/// Vocoder model file name inside the model directory.
pub const VOCODER_MODEL_FILE: &str = "vocoder-gpu.onnx";

/// Hardware acceleration provider for the vocoder.
/// Auto-detected at startup if not specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// CPU inference (default fallback, always available)
    #[default]
    Cpu,
    /// NVIDIA CUDA acceleration (requires CUDA toolkit)
    Cuda,
    /// Apple CoreML acceleration (macOS only, uses Neural Engine)
    #[value(name = "coreml")]
    CoreMl,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Cpu => write!(f, "cpu"),
            Provider::Cuda => write!(f, "cuda"),
            Provider::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Speech synthesis server configuration.
#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(name = "glados-tts-server")]
#[command(author, version, about = "A cached text-to-speech HTTP server", long_about = None)]
pub struct AppConfig {
    /// Directory containing the acoustic model and vocoder
    #[arg(long, short = 'd', env = "MODEL_DIR", default_value = "models")]
    pub model_dir: PathBuf,

    /// Directory holding synthesized WAV files (created on demand)
    #[arg(long, short = 'c', env = "CACHE_DIR", default_value = "cache")]
    pub cache_dir: PathBuf,

    /// Prefix for cached file names
    #[arg(long, default_value = "GLaDOS-tts")]
    pub cache_namespace: String,

    /// Regenerate audio for every request, overwriting a single output file
    #[arg(long)]
    pub no_cache: bool,

    /// Address to listen on
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Port to listen on
    #[arg(long, short = 'P', env = "TTS_PORT", default_value = "8124")]
    pub port: u16,

    /// Compute device for the vocoder (auto-detected if not specified)
    #[arg(long, value_enum)]
    pub device: Option<Provider>,

    /// Number of inference threads (0 = auto-detect based on CPU cores)
    #[arg(long, default_value = "0")]
    pub num_threads: usize,

    /// Abort a request after this many seconds (0 = wait indefinitely)
    #[arg(long, default_value = "0")]
    pub request_timeout_secs: u64,

    /// Path to the espeak-ng executable used for phonemization
    #[arg(long, env = "PHONEMIZER_ESPEAK_PATH")]
    pub espeak_path: Option<PathBuf>,

    /// Path to the espeak-ng native library
    #[arg(long, env = "PHONEMIZER_ESPEAK_LIBRARY")]
    pub espeak_library: Option<PathBuf>,

    /// espeak-ng voice used for phonemization
    #[arg(long, default_value = "en-us")]
    pub espeak_voice: String,

    /// Play every synthesized file on this machine
    #[arg(long)]
    pub play: bool,

    /// Synthesize this text once, print the file path and exit without serving
    #[arg(long)]
    pub say: Option<String>,

    /// Enable verbose logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl AppConfig {
    /// Parse configuration from command line arguments.
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Path to the acoustic model.
    pub fn acoustic_model_path(&self) -> PathBuf {
        self.model_dir.join(ACOUSTIC_MODEL_FILE)
    }

    /// Path to the vocoder model.
    pub fn vocoder_path(&self) -> PathBuf {
        self.model_dir.join(VOCODER_MODEL_FILE)
    }

    /// Socket address the HTTP server binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Request timeout, if one is configured.
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    /// The espeak-ng program to run, falling back to the one on `PATH`.
    pub fn espeak_program(&self) -> PathBuf {
        self.espeak_path.clone().unwrap_or_else(|| PathBuf::from("espeak-ng"))
    }

    /// Thread count for inference that runs on the CPU, including the acoustic
    /// model on every device. Auto-detection uses cores/2, leaving headroom
    /// for the HTTP runtime.
    pub fn cpu_threads(&self) -> usize {
        if self.num_threads > 0 { self.num_threads } else { (num_cpus::get() / 2).max(1) }
    }

    /// Thread count for the vocoder session on `device`.
    ///
    /// On an accelerator (CUDA or CoreML) the device handles parallelism, so
    /// a single CPU thread avoids contention.
    pub fn vocoder_threads(&self, device: DeviceTarget) -> usize {
        if self.num_threads == 0 && device.is_accelerator() { 1 } else { self.cpu_threads() }
    }

    /// Validate the configuration.
    ///
    /// Missing phonemizer paths only produce a warning: they cause tokenization
    /// failures per request rather than a startup failure.
    pub fn validate(&self) -> Result<()> {
        if !self.model_dir.exists() {
            anyhow::bail!("Model directory does not exist: {}", self.model_dir.display());
        }

        for path in [self.acoustic_model_path(), self.vocoder_path()] {
            if !path.exists() {
                anyhow::bail!("Required model file not found: {}", path.display());
            }
        }

        if self.cache_namespace.is_empty() {
            anyhow::bail!("Cache namespace must not be empty");
        }

        if self.cache_namespace.contains(['/', '\\']) {
            anyhow::bail!("Cache namespace must not contain path separators: {}", self.cache_namespace);
        }

        warn_if_missing("espeak-ng executable", self.espeak_path.as_deref());
        warn_if_missing("espeak-ng library", self.espeak_library.as_deref());

        Ok(())
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        info!("Configuration:");
        info!("  Model directory: {}", self.model_dir.display());
        info!("  Cache directory: {}", self.cache_dir.display());
        info!("  Cache namespace: {}", self.cache_namespace);
        info!("  Caching: {}", if self.no_cache { "disabled" } else { "enabled" });
        info!("  Listen address: {}", self.listen_addr());
        if let Some(device) = self.device {
            info!("  Device override: {}", device);
        }
        if let Some(timeout) = self.request_timeout() {
            info!("  Request timeout: {}s", timeout.as_secs());
        }
        info!("  espeak-ng: {}", self.espeak_program().display());
        info!("  espeak-ng voice: {}", self.espeak_voice);
        info!("  Local playback: {}", self.play);
    }
}

fn warn_if_missing(label: &str, path: Option<&Path>) {
    if let Some(path) = path
        && !path.exists()
    {
        warn!("Configured {} not found: {}", label, path.display());
    }
}
