//! Request-facing synthesis façade.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::audio::PlaybackDispatcher;
use crate::cache::AudioCache;
use crate::error::{TtsError, TtsResult};

/// Validates requests, resolves them through the cache and optionally plays the result.
///
/// Built once at startup and shared by every request handler.
pub struct SynthesisService {
    cache: AudioCache,
    bypass_cache: bool,
    timeout: Option<Duration>,
    playback: Option<Arc<PlaybackDispatcher>>,
}

impl SynthesisService {
    pub fn new(cache: AudioCache, bypass_cache: bool) -> Self {
        Self { cache, bypass_cache, timeout: None, playback: None }
    }

    /// Fail requests that take longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Play every synthesized file in the background.
    pub fn with_playback(mut self, playback: Arc<PlaybackDispatcher>) -> Self {
        self.playback = Some(playback);
        self
    }

    /// Synthesize `text` (or reuse a cached file) and return the WAV path.
    ///
    /// # Arguments
    /// * `text` - Raw request text; normalized into a cache key by the cache
    ///
    /// # Returns
    /// Path of the WAV file in the cache directory. When playback is enabled
    /// the file is queued for playback before this returns.
    ///
    /// # Errors
    /// - [`TtsError::InvalidRequest`] for empty or whitespace-only text; no file is written
    /// - [`TtsError::Timeout`] when the configured timeout elapses; the
    ///   generation itself keeps running and still fills the cache
    /// - inference and storage errors from the cache
    pub async fn synthesize(&self, text: &str) -> TtsResult<PathBuf> {
        if text.trim().is_empty() {
            return Err(TtsError::InvalidRequest("text is empty".to_string()));
        }

        let resolve = self.cache.resolve(text, self.bypass_cache);
        let path = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, resolve).await.map_err(|_| TtsError::Timeout(limit))??,
            None => resolve.await?,
        };

        if let Some(playback) = &self.playback {
            let playback = playback.clone();
            let file = path.clone();
            debug!("Dispatching playback of {}", file.display());
            tokio::task::spawn_blocking(move || playback.play(&file));
        }

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::audio::AudioArtifact;
    use crate::tts::Synthesizer;

    struct SlowSynth {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl Synthesizer for SlowSynth {
        fn synthesize(&self, _text: &str) -> TtsResult<AudioArtifact> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            Ok(AudioArtifact::from_samples(vec![0; 64]))
        }
    }

    fn service(dir: &std::path::Path, delay: Duration, bypass: bool) -> (SynthesisService, Arc<SlowSynth>) {
        let synth = Arc::new(SlowSynth { calls: AtomicUsize::new(0), delay });
        let cache = AudioCache::new(dir, "GLaDOS-tts", synth.clone());
        (SynthesisService::new(cache, bypass), synth)
    }

    #[tokio::test]
    async fn test_empty_text_is_rejected_without_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let (service, synth) = service(dir.path(), Duration::ZERO, false);

        for text in ["", "   ", "\t\n"] {
            let err = service.synthesize(text).await.unwrap_err();
            assert!(matches!(err, TtsError::InvalidRequest(_)));
        }
        assert_eq!(synth.calls.load(Ordering::SeqCst), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cached_synthesis_runs_inference_once() {
        let dir = tempfile::tempdir().unwrap();
        let (service, synth) = service(dir.path(), Duration::ZERO, false);

        let first = service.synthesize("hello world").await.unwrap();
        let second = service.synthesize("hello world").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(synth.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bypass_mode_runs_inference_every_time() {
        let dir = tempfile::tempdir().unwrap();
        let (service, synth) = service(dir.path(), Duration::ZERO, true);

        let first = service.synthesize("hello world").await.unwrap();
        let second = service.synthesize("hello world").await.unwrap();
        assert_eq!(first, second);
        assert!(first.ends_with("GLaDOS-tts-output.wav"));
        assert_eq!(synth.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _) = service(dir.path(), Duration::from_millis(300), false);
        let service = service.with_timeout(Some(Duration::from_millis(20)));

        let err = service.synthesize("slow").await.unwrap_err();
        assert!(matches!(err, TtsError::Timeout(_)));
    }
}
