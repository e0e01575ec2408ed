//! Sample rate conversion for local playback.

use anyhow::{Context, Result, anyhow, bail};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{Fft, FixedSync, Resampler};

/// Input frames per FFT block.
const BLOCK_FRAMES: usize = 1024;

/// FFT sub-chunks per block.
const SUB_CHUNKS: usize = 2;

/// Convert a mono clip from `from_rate` to `to_rate`.
///
/// # Arguments
/// * `clip` - Mono samples at `from_rate`
/// * `from_rate` - Rate of the clip (22050 for synthesized audio)
/// * `to_rate` - Rate of the output device
///
/// # Returns
/// `len * to_rate / from_rate` samples aligned with the input: the
/// resampler's output delay is skipped and the tail is flushed with silence.
pub fn resample(clip: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || clip.is_empty() {
        return Ok(clip.to_vec());
    }

    let mut fft = Fft::<f32>::new(from_rate as usize, to_rate as usize, BLOCK_FRAMES, SUB_CHUNKS, 1, FixedSync::Input)
        .with_context(|| format!("Failed to create {} Hz -> {} Hz resampler", from_rate, to_rate))?;

    // May differ from BLOCK_FRAMES after rounding to the rate ratio
    let block = fft.input_frames_next();
    let out_max = fft.output_frames_max();
    let delay = fft.output_delay();
    let target_len = (clip.len() as u64 * to_rate as u64 / from_rate as u64) as usize;

    let mut input = vec![0.0f32; block];
    let mut scratch = vec![0.0f32; out_max];
    let mut converted = Vec::with_capacity(delay + target_len + out_max);

    // Past the end of the clip the blocks are pure silence
    let mut offset = 0;
    while converted.len() < delay + target_len {
        let chunk = clip.get(offset..).map_or(&[][..], |rest| &rest[..rest.len().min(block)]);
        input[..chunk.len()].copy_from_slice(chunk);
        input[chunk.len()..].fill(0.0);
        offset += block;

        let source = InterleavedSlice::new(&input, 1, block).context("Failed to wrap resampler input")?;
        let mut sink = InterleavedSlice::new_mut(&mut scratch, 1, out_max).context("Failed to wrap resampler output")?;

        let (_, written) = fft.process_into_buffer(&source, &mut sink, None).map_err(|e| anyhow!("Resampling failed: {}", e))?;
        if written == 0 {
            bail!("Resampler produced no output");
        }
        converted.extend_from_slice(&scratch[..written]);
    }

    converted.drain(..delay);
    converted.truncate(target_len);
    Ok(converted)
}
