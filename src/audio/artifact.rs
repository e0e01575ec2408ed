//! Finalized synthesis output and its WAV encoding.

use std::io::{Seek, Write};
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

/// Output sample rate of the vocoder.
pub const SAMPLE_RATE: u32 = 22050;

/// Gain mapping unit-amplitude float samples onto the 16-bit range.
pub const PCM_GAIN: f32 = 32768.0;

/// Mono 16-bit PCM audio at [`SAMPLE_RATE`].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioArtifact {
    samples: Vec<i16>,
}

impl AudioArtifact {
    /// Normalize a raw vocoder waveform into 16-bit PCM.
    ///
    /// Samples are scaled by [`PCM_GAIN`] and saturated to `[-32768, 32767]`;
    /// NaN maps to silence.
    pub fn from_waveform(waveform: &[f32]) -> Self {
        let samples = waveform
            .iter()
            .map(|&s| if s.is_nan() { 0 } else { (s * PCM_GAIN).clamp(i16::MIN as f32, i16::MAX as f32) as i16 })
            .collect();
        Self { samples }
    }

    #[cfg(test)]
    pub fn from_samples(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate() as f32
    }

    /// WAV header parameters shared by every artifact.
    pub fn wav_spec() -> WavSpec {
        WavSpec { channels: 1, sample_rate: SAMPLE_RATE, bits_per_sample: 16, sample_format: SampleFormat::Int }
    }

    /// Encode as WAV into any seekable writer.
    pub fn write_wav<W: Write + Seek>(&self, writer: W) -> hound::Result<()> {
        let mut wav = WavWriter::new(writer, Self::wav_spec())?;
        for &sample in &self.samples {
            wav.write_sample(sample)?;
        }
        wav.finalize()
    }
}

/// Read a WAV file as mono f32 samples in `[-1.0, 1.0]`, returning the sample rate too.
pub fn read_wav_f32(path: &Path) -> hound::Result<(Vec<f32>, u32)> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader.samples::<i32>().map(|s| s.map(|v| v as f32 / scale)).collect::<Result<_, _>>()?
        }
    };

    let channels = spec.channels.max(1) as usize;
    let mono = if channels == 1 {
        interleaved
    } else {
        // Mix down by averaging channels
        interleaved.chunks(channels).map(|frame| frame.iter().sum::<f32>() / channels as f32).collect()
    };

    Ok((mono, spec.sample_rate))
}
