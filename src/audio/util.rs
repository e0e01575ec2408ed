//! Output device helpers for playback.

use anyhow::{Context, Result};
use cpal::traits::DeviceTrait;
use cpal::{Device, SampleFormat, SupportedStreamConfig, SupportedStreamConfigRange};

/// Human-readable device name for logs.
pub fn get_device_name(device: &Device) -> String {
    device.description().ok().map(|desc| desc.name().to_string()).unwrap_or_else(|| "Unknown".to_string())
}

/// Pick an output configuration for `target_sample_rate`.
///
/// Only mono or stereo F32 configurations are considered. The first one whose
/// range covers the target wins; otherwise the first candidate is used with the
/// target clamped into its supported range.
pub fn find_best_config(configs: impl Iterator<Item = SupportedStreamConfigRange>, target_sample_rate: u32) -> Result<SupportedStreamConfig> {
    let candidates: Vec<SupportedStreamConfigRange> =
        configs.filter(|c| c.channels() <= 2 && c.sample_format() == SampleFormat::F32).collect();

    if let Some(config) = candidates.iter().find(|c| (c.min_sample_rate()..=c.max_sample_rate()).contains(&target_sample_rate)) {
        return Ok((*config).with_sample_rate(target_sample_rate));
    }

    let config = candidates.first().context("No mono or stereo F32 output configuration found")?;
    let rate = target_sample_rate.clamp(config.min_sample_rate(), config.max_sample_rate());
    Ok((*config).with_sample_rate(rate))
}
