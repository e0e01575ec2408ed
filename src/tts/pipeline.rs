//! Two-stage synthesis: text → tokens → acoustic features → waveform → PCM16.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use super::models::InferenceModels;
use super::text::TextPreparer;
use crate::audio::AudioArtifact;
use crate::error::TtsResult;

/// Anything that can turn text into a finished audio artifact.
///
/// Implementations are blocking; async callers run them on the blocking pool.
pub trait Synthesizer: Send + Sync {
    fn synthesize(&self, text: &str) -> TtsResult<AudioArtifact>;
}

/// Runs the text preparer, acoustic model and vocoder in sequence.
pub struct SynthesisPipeline {
    preparer: Arc<dyn TextPreparer>,
    models: Arc<InferenceModels>,
}

impl SynthesisPipeline {
    pub fn new(preparer: Arc<dyn TextPreparer>, models: Arc<InferenceModels>) -> Self {
        Self { preparer, models }
    }
}

impl Synthesizer for SynthesisPipeline {
    /// Synthesize `text` into 22.05 kHz mono PCM16.
    ///
    /// # Errors
    /// Returns [`crate::error::TtsError::Inference`] if tokenization or either model fails.
    /// Nothing is retried.
    fn synthesize(&self, text: &str) -> TtsResult<AudioArtifact> {
        debug!("Synthesizing: \"{}\"", text);

        let tokens = self.preparer.prepare(text)?;
        debug!("Prepared {} tokens", tokens.len());

        let started = Instant::now();
        let features = self.models.acoustic.generate(&tokens)?;
        let waveform = self.models.vocoder.run(&features)?;
        let elapsed = started.elapsed();

        let artifact = AudioArtifact::from_waveform(&waveform);
        info!(
            "🎵 The audio sample took {} ms to generate ({:.2}s of audio on {})",
            elapsed.as_millis(),
            artifact.duration_secs(),
            self.models.device()
        );

        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TtsError;
    use crate::tts::DeviceTarget;
    use crate::tts::models::{AcousticFeatures, AcousticModel, Vocoder};

    struct CharTokens;

    impl TextPreparer for CharTokens {
        fn prepare(&self, text: &str) -> TtsResult<Vec<i64>> {
            Ok(text.chars().map(|c| c as i64).collect())
        }
    }

    struct RepeatTokens;

    impl AcousticModel for RepeatTokens {
        fn generate(&self, tokens: &[i64]) -> TtsResult<AcousticFeatures> {
            Ok(AcousticFeatures { shape: vec![1, 1, tokens.len()], data: tokens.iter().map(|_| 0.25).collect() })
        }
    }

    struct FailingAcoustic;

    impl AcousticModel for FailingAcoustic {
        fn generate(&self, _tokens: &[i64]) -> TtsResult<AcousticFeatures> {
            Err(TtsError::Inference("device allocation failed".to_string()))
        }
    }

    struct Upsample(usize);

    impl Vocoder for Upsample {
        fn run(&self, features: &AcousticFeatures) -> TtsResult<Vec<f32>> {
            Ok(features.data.iter().flat_map(|&v| std::iter::repeat_n(v * 8.0, self.0)).collect())
        }
    }

    fn pipeline(acoustic: Box<dyn AcousticModel>) -> SynthesisPipeline {
        let models = InferenceModels::new(acoustic, Box::new(Upsample(4)), DeviceTarget::Cpu);
        SynthesisPipeline::new(Arc::new(CharTokens), Arc::new(models))
    }

    #[test]
    fn test_stages_run_in_order_and_saturate() {
        let artifact = pipeline(Box::new(RepeatTokens)).synthesize("abc").unwrap();
        // 3 tokens x 4 samples, each 0.25 * 8.0 = 2.0 which saturates
        assert_eq!(artifact.samples().len(), 12);
        assert!(artifact.samples().iter().all(|&s| s == i16::MAX));
        assert_eq!(artifact.sample_rate(), 22050);
    }

    #[test]
    fn test_model_errors_propagate_unchanged() {
        let err = pipeline(Box::new(FailingAcoustic)).synthesize("abc").unwrap_err();
        assert_eq!(err.to_string(), "inference failed: device allocation failed");
    }
}
