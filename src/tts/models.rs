//! Loading and running the two inference stages (acoustic model and vocoder).

use std::path::Path;

use ort::execution_providers::{CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProviderDispatch};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Tensor;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::device::{Accelerator, DeviceTarget};
use crate::config::{ACOUSTIC_MODEL_FILE, VOCODER_MODEL_FILE};
use crate::error::{TtsError, TtsResult};

/// Intermediate spectral features produced by the acoustic model.
#[derive(Debug, Clone, PartialEq)]
pub struct AcousticFeatures {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Stage 1: token ids to acoustic features.
pub trait AcousticModel: Send + Sync {
    fn generate(&self, tokens: &[i64]) -> TtsResult<AcousticFeatures>;
}

/// Stage 2: acoustic features to a raw float waveform.
pub trait Vocoder: Send + Sync {
    fn run(&self, features: &AcousticFeatures) -> TtsResult<Vec<f32>>;
}

/// The two inference stages, loaded once and shared for the process lifetime.
pub struct InferenceModels {
    pub(crate) acoustic: Box<dyn AcousticModel>,
    pub(crate) vocoder: Box<dyn Vocoder>,
    device: DeviceTarget,
}

impl InferenceModels {
    /// Load both models from `model_dir`.
    ///
    /// The acoustic model always runs on CPU; the vocoder is bound to `device`.
    ///
    /// # Arguments
    /// * `model_dir` - Directory containing `glados.onnx` and `vocoder-gpu.onnx`
    /// * `device` - Execution target for the vocoder
    /// * `cpu_threads` - Intra-op threads for the acoustic model
    /// * `vocoder_threads` - Intra-op threads for the vocoder
    ///
    /// # Errors
    /// Returns [`TtsError::ModelLoad`] if either file is missing or malformed.
    pub fn load(model_dir: &Path, device: DeviceTarget, cpu_threads: usize, vocoder_threads: usize) -> TtsResult<Self> {
        info!("Loading models from {} (vocoder on {})", model_dir.display(), device);

        let acoustic = OnnxAcousticModel::load(&model_dir.join(ACOUSTIC_MODEL_FILE), cpu_threads)?;
        let vocoder = OnnxVocoder::load(&model_dir.join(VOCODER_MODEL_FILE), device, vocoder_threads)?;

        info!("Models loaded successfully");
        Ok(Self::new(Box::new(acoustic), Box::new(vocoder), device))
    }

    pub(crate) fn new(acoustic: Box<dyn AcousticModel>, vocoder: Box<dyn Vocoder>, device: DeviceTarget) -> Self {
        Self { acoustic, vocoder, device }
    }

    /// The device the vocoder runs on.
    pub fn device(&self) -> DeviceTarget {
        self.device
    }
}

/// Acoustic model backed by an ONNX session.
/// The first graph output is the post-net mel spectrogram.
pub struct OnnxAcousticModel {
    session: Mutex<Session>, // run() needs exclusive access
}

impl OnnxAcousticModel {
    pub fn load(path: &Path, threads: usize) -> TtsResult<Self> {
        let session = load_session(path, "acoustic", Vec::new(), threads)?;
        Ok(Self { session: Mutex::new(session) })
    }
}

impl AcousticModel for OnnxAcousticModel {
    fn generate(&self, tokens: &[i64]) -> TtsResult<AcousticFeatures> {
        let input = Tensor::from_array(([1i64, tokens.len() as i64], tokens.to_vec()))
            .map_err(|e| TtsError::Inference(format!("token tensor error: {}", e)))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| TtsError::Inference(format!("acoustic model error: {}", e)))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| TtsError::Inference(format!("acoustic output error: {}", e)))?;

        let features = AcousticFeatures { shape: shape.iter().map(|&d| d as usize).collect(), data: data.to_vec() };
        debug!("Acoustic features: {:?}", features.shape);
        Ok(features)
    }
}

/// Vocoder backed by an ONNX session on the selected device.
pub struct OnnxVocoder {
    session: Mutex<Session>,
}

impl OnnxVocoder {
    pub fn load(path: &Path, device: DeviceTarget, threads: usize) -> TtsResult<Self> {
        let session = load_session(path, "vocoder", execution_providers(device), threads)?;
        Ok(Self { session: Mutex::new(session) })
    }
}

impl Vocoder for OnnxVocoder {
    fn run(&self, features: &AcousticFeatures) -> TtsResult<Vec<f32>> {
        let shape: Vec<i64> = features.shape.iter().map(|&d| d as i64).collect();
        let input = Tensor::from_array((shape, features.data.clone()))
            .map_err(|e| TtsError::Inference(format!("feature tensor error: {}", e)))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| TtsError::Inference(format!("vocoder error: {}", e)))?;

        let (_, audio) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| TtsError::Inference(format!("vocoder output error: {}", e)))?;

        // Output is [1, 1, num_samples], return flat
        Ok(audio.to_vec())
    }
}

fn execution_providers(device: DeviceTarget) -> Vec<ExecutionProviderDispatch> {
    match device {
        DeviceTarget::Accelerator(Accelerator::Cuda) => vec![CUDAExecutionProvider::default().build()],
        DeviceTarget::Accelerator(Accelerator::CoreMl) => vec![CoreMLExecutionProvider::default().build()],
        DeviceTarget::Cpu => Vec::new(),
    }
}

fn load_session(path: &Path, name: &'static str, providers: Vec<ExecutionProviderDispatch>, threads: usize) -> TtsResult<Session> {
    let load_error = |reason: String| TtsError::ModelLoad { name, path: path.to_path_buf(), reason };

    if !path.exists() {
        return Err(load_error("file not found".to_string()));
    }

    debug!("Loading ONNX session: {} from {}", name, path.display());

    let mut builder = Session::builder()
        .map_err(|e| load_error(format!("session builder error: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| load_error(format!("optimization error: {}", e)))?
        .with_intra_threads(threads)
        .map_err(|e| load_error(format!("thread config error: {}", e)))?;

    if !providers.is_empty() {
        builder = builder
            .with_execution_providers(providers)
            .map_err(|e| load_error(format!("execution provider error: {}", e)))?;
    }

    builder.commit_from_file(path).map_err(|e| load_error(e.to_string()))
}
