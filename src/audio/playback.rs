//! In-process playback of synthesized files on the default output device.
//!
//! A clip is resampled to the device rate and fed through a bounded lock-free
//! ring buffer; the output callback drains it and reports when the clip is done.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SupportedStreamConfig};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use tracing::{debug, error};

use super::artifact::read_wav_f32;
use super::dispatcher::PlaybackBackend;
use super::resampler::resample;
use super::util::{find_best_config, get_device_name};

/// Rate requested when the device reports no default configuration.
const FALLBACK_RATE: u32 = 48000;

/// Ring buffer length in seconds of device-rate audio.
const BUFFER_SECS: f64 = 0.5;

/// Pause between feed attempts while the ring buffer is full.
const FEED_INTERVAL: Duration = Duration::from_millis(10);

/// Extra time allowed beyond the clip length before giving up.
const PLAYBACK_GRACE: Duration = Duration::from_secs(1);

/// Plays a WAV file through the default cpal output device.
pub struct DevicePlayback;

impl PlaybackBackend for DevicePlayback {
    fn name(&self) -> &str {
        "audio device"
    }

    fn play(&self, path: &Path) -> Result<()> {
        let (samples, sample_rate) = read_wav_f32(path).with_context(|| format!("Failed to read {}", path.display()))?;
        if samples.is_empty() {
            return Ok(());
        }

        let output = OutputDevice::open_default()?;
        let clip = resample(&samples, sample_rate, output.sample_rate())?;
        output.play_clip(&clip)
    }
}

/// The default output device with the stream configuration chosen for it.
struct OutputDevice {
    device: Device,
    config: SupportedStreamConfig,
}

impl OutputDevice {
    fn open_default() -> Result<Self> {
        let device = cpal::default_host().default_output_device().context("No output device available")?;

        let preferred_rate = device.default_output_config().map(|c| c.sample_rate()).unwrap_or(FALLBACK_RATE);
        let configs = device.supported_output_configs().context("Failed to get supported output configs")?;
        let config = find_best_config(configs, preferred_rate)?;

        debug!("Output device {}: {} Hz, {} channel(s)", get_device_name(&device), config.sample_rate(), config.channels());
        Ok(Self { device, config })
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate()
    }

    /// Play mono samples already at the device rate, blocking until the
    /// callback has drained them or the deadline passes.
    fn play_clip(&self, clip: &[f32]) -> Result<()> {
        let rate = self.sample_rate();
        let capacity = ((rate as f64 * BUFFER_SECS) as usize).max(1);
        let (mut producer, mut consumer) = HeapRb::<f32>::new(capacity).split();

        let fed = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = mpsc::sync_channel::<()>(1);

        let channels = self.config.channels() as usize;
        let all_fed = fed.clone();
        let stream = self.device.build_output_stream(
            &self.config.config(),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                // Mono in, same sample on every channel out
                for frame in data.chunks_mut(channels) {
                    frame.fill(consumer.try_pop().unwrap_or(0.0));
                }
                if all_fed.load(Ordering::Acquire) && consumer.is_empty() {
                    let _ = done_tx.try_send(());
                }
            },
            |err| error!("Audio output error: {}", err),
            None,
        )?;
        stream.play().context("Failed to start playback stream")?;

        let budget = Duration::from_secs_f64(clip.len() as f64 / rate as f64) + PLAYBACK_GRACE;
        let deadline = Instant::now() + budget;

        let mut pending = clip;
        while !pending.is_empty() {
            if Instant::now() > deadline {
                bail!("Playback stalled with {} samples left", pending.len());
            }
            let pushed = producer.push_slice(pending);
            pending = &pending[pushed..];
            if pushed == 0 {
                std::thread::sleep(FEED_INTERVAL);
            }
        }
        fed.store(true, Ordering::Release);

        done_rx
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
            .map_err(|_| anyhow!("Playback did not finish within {:?}", budget))?;

        debug!("Played {} samples at {} Hz", clip.len(), rate);
        Ok(())
    }
}
