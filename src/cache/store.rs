//! Persistent audio cache with at-most-one generation per key.
//!
//! Artifacts are written to a temporary file in the cache directory and
//! renamed into place, so a reader never observes a partially written WAV.

use std::collections::HashMap;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::key::CacheKey;
use crate::error::{TtsError, TtsResult};
use crate::tts::Synthesizer;

/// Outcome of one generation, shared with every caller that joined it.
type Outcome = TtsResult<PathBuf>;

/// Receivers for generations in progress; `None` until the outcome is published.
type InFlight = Arc<Mutex<HashMap<CacheKey, watch::Receiver<Option<Outcome>>>>>;

/// Maps cache keys to WAV files and decides between reuse and regeneration.
pub struct AudioCache {
    dir: PathBuf,                         // Cache directory, created on demand
    namespace: String,                    // File name prefix
    synthesizer: Arc<dyn Synthesizer>,    // Invoked on miss or bypass
    in_flight: InFlight,                  // One entry per key being generated
}

impl AudioCache {
    pub fn new(dir: impl Into<PathBuf>, namespace: impl Into<String>, synthesizer: Arc<dyn Synthesizer>) -> Self {
        Self { dir: dir.into(), namespace: namespace.into(), synthesizer, in_flight: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Full path of the file stored under `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.as_str())
    }

    /// Resolve `text` to an audio file.
    ///
    /// With `bypass_cache` the pipeline always runs and overwrites the single
    /// fixed output file (last writer wins). Otherwise an existing file is
    /// returned as-is, and on a miss exactly one generation runs per key no
    /// matter how many callers ask concurrently. Callers that arrive while a
    /// generation is running join it and receive its outcome, failure included.
    ///
    /// # Arguments
    /// * `text` - Request text; its normalized form selects the cache file
    /// * `bypass_cache` - Regenerate into the fixed no-cache file
    ///
    /// # Returns
    /// Path of a complete WAV file inside the cache directory
    ///
    /// # Errors
    /// Propagates [`TtsError::Inference`] from the pipeline and
    /// [`TtsError::Storage`] from the filesystem. A failed generation leaves
    /// no cache entry, and the next request for the key starts a fresh one.
    pub async fn resolve(&self, text: &str, bypass_cache: bool) -> TtsResult<PathBuf> {
        if bypass_cache {
            let path = self.path_for(&CacheKey::bypass(&self.namespace));
            debug!("Cache bypassed, regenerating {}", path.display());
            return generate_blocking(self.synthesizer.clone(), self.dir.clone(), path, text.to_string()).await;
        }

        let key = CacheKey::derive(&self.namespace, text);
        let path = self.path_for(&key);

        if file_exists(&path).await? {
            debug!("Cache hit: {}", key);
            return Ok(path);
        }

        let mut outcome = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(&key) {
                Some(pending) => {
                    debug!("Joining in-flight generation: {}", key);
                    pending.clone()
                }
                None => {
                    let (publish, pending) = watch::channel(None);
                    in_flight.insert(key.clone(), pending.clone());
                    self.spawn_generation(key, path, text.to_string(), publish);
                    pending
                }
            }
        };

        let published = outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| TtsError::Inference("synthesis task ended without a result".to_string()))?;
        published.clone().unwrap_or_else(|| Err(TtsError::Inference("synthesis task ended without a result".to_string())))
    }

    /// Run the generation for `key` in a detached task.
    ///
    /// The task owns the publishing side, so a cancelled caller neither
    /// aborts the generation nor lets a second one for the same key start.
    fn spawn_generation(&self, key: CacheKey, path: PathBuf, text: String, publish: watch::Sender<Option<Outcome>>) {
        let synthesizer = self.synthesizer.clone();
        let dir = self.dir.clone();
        let in_flight = self.in_flight.clone();

        tokio::spawn(async move {
            let outcome = match file_exists(&path).await {
                Ok(true) => {
                    debug!("Cache filled by concurrent request: {}", key);
                    Ok(path)
                }
                Ok(false) => {
                    info!("Cache miss: {}", key);
                    generate_blocking(synthesizer, dir, path, text).await
                }
                Err(e) => Err(e),
            };

            if let Err(e) = &outcome {
                warn!("Generation for {} failed: {}", key, e);
            }

            // Unregister before publishing: joined callers already hold a receiver,
            // and anyone arriving later starts over.
            in_flight.lock().remove(&key);
            publish.send_replace(Some(outcome));
        });
    }

    /// Number of keys with a generation in progress.
    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        self.in_flight.lock().len()
    }
}

async fn file_exists(path: &Path) -> TtsResult<bool> {
    tokio::fs::try_exists(path).await.map_err(|e| TtsError::storage(path, e))
}

async fn generate_blocking(synthesizer: Arc<dyn Synthesizer>, dir: PathBuf, path: PathBuf, text: String) -> TtsResult<PathBuf> {
    tokio::task::spawn_blocking(move || generate_and_store(synthesizer.as_ref(), &dir, &path, &text).map(|_| path))
        .await
        .map_err(|e| TtsError::Inference(format!("synthesis task failed: {}", e)))?
}

/// Run the pipeline and atomically write its artifact to `path`.
fn generate_and_store(synthesizer: &dyn Synthesizer, dir: &Path, path: &Path, text: &str) -> TtsResult<()> {
    let artifact = synthesizer.synthesize(text)?;

    std::fs::create_dir_all(dir).map_err(|e| TtsError::storage(dir, e))?;

    let mut temp = NamedTempFile::new_in(dir).map_err(|e| TtsError::storage(dir, e))?;
    artifact
        .write_wav(BufWriter::new(temp.as_file_mut()))
        .map_err(|e| TtsError::storage(temp.path(), std::io::Error::other(e)))?;
    temp.persist(path).map_err(|e| TtsError::storage(path, e.error))?;

    debug!("Stored {} ({} samples)", path.display(), artifact.samples().len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::audio::AudioArtifact;

    const NS: &str = "GLaDOS-tts";

    struct CountingSynth {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl CountingSynth {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), delay, fail: false })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), delay: Duration::ZERO, fail: true })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Synthesizer for CountingSynth {
        fn synthesize(&self, text: &str) -> TtsResult<AudioArtifact> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self.fail {
                return Err(TtsError::Inference("model exploded".to_string()));
            }
            Ok(AudioArtifact::from_samples(vec![100; text.len() * 10]))
        }
    }

    fn wav_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir).unwrap().map(|e| e.unwrap().file_name().to_string_lossy().to_string()).collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_second_request_is_a_hit() {
        let dir = tempfile::tempdir().unwrap();
        let synth = CountingSynth::new(Duration::ZERO);
        let cache = AudioCache::new(dir.path(), NS, synth.clone());

        let first = cache.resolve("hello world", false).await.unwrap();
        let second = cache.resolve("Hello   World", false).await.unwrap();

        assert_eq!(synth.calls(), 1);
        assert_eq!(first, second);
        assert_eq!(first, dir.path().join("GLaDOS-tts-hello-world.wav"));
        assert_eq!(wav_files(dir.path()), vec!["GLaDOS-tts-hello-world.wav"]);
    }

    #[tokio::test]
    async fn test_existing_file_is_never_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("GLaDOS-tts-stale.wav"), b"anything").unwrap();
        let synth = CountingSynth::new(Duration::ZERO);
        let cache = AudioCache::new(dir.path(), NS, synth.clone());

        cache.resolve("stale", false).await.unwrap();
        assert_eq!(synth.calls(), 0);
    }

    #[tokio::test]
    async fn test_bypass_always_regenerates_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let synth = CountingSynth::new(Duration::ZERO);
        let cache = AudioCache::new(dir.path(), NS, synth.clone());

        let first = cache.resolve("hello world", true).await.unwrap();
        let second = cache.resolve("hello world", true).await.unwrap();
        let other = cache.resolve("something else", true).await.unwrap();

        assert_eq!(synth.calls(), 3);
        assert_eq!(first, second);
        assert_eq!(first, other);
        assert_eq!(wav_files(dir.path()), vec!["GLaDOS-tts-output.wav"]);
    }

    #[tokio::test]
    async fn test_cache_dir_is_created_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("cache");
        let cache = AudioCache::new(&nested, NS, CountingSynth::new(Duration::ZERO));

        let path = cache.resolve("hi", false).await.unwrap();
        assert!(path.starts_with(&nested));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_failed_generation_leaves_no_entry() {
        let dir = tempfile::tempdir().unwrap();
        let synth = CountingSynth::failing();
        let cache = AudioCache::new(dir.path(), NS, synth.clone());

        let err = cache.resolve("hello", false).await.unwrap_err();
        assert!(matches!(err, TtsError::Inference(_)));
        assert!(!dir.path().join("GLaDOS-tts-hello.wav").exists());

        // No retry happens internally; the next request tries again
        cache.resolve("hello", false).await.unwrap_err();
        assert_eq!(synth.calls(), 2);
        assert_eq!(cache.in_flight_len(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_generate_once() {
        let dir = tempfile::tempdir().unwrap();
        let synth = CountingSynth::new(Duration::from_millis(200));
        let cache = Arc::new(AudioCache::new(dir.path(), NS, synth.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.resolve("hello world", false).await })
            })
            .collect();

        let mut paths = Vec::new();
        for handle in handles {
            paths.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(synth.calls(), 1);
        assert!(paths.iter().all(|p| p == &paths[0]));
        let reader = hound::WavReader::open(&paths[0]).unwrap();
        assert_eq!(reader.len(), 110);
        assert_eq!(cache.in_flight_len(), 0);
        assert_eq!(wav_files(dir.path()), vec!["GLaDOS-tts-hello-world.wav"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_share_one_failure() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(CountingSynth { calls: AtomicUsize::new(0), delay: Duration::from_millis(200), fail: true });
        let cache = Arc::new(AudioCache::new(dir.path(), NS, synth.clone()));

        let started = std::time::Instant::now();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.resolve("hello", false).await })
            })
            .collect();

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, TtsError::Inference(ref msg) if msg == "model exploded"));
        }

        assert_eq!(synth.calls(), 1);
        assert!(started.elapsed() < Duration::from_millis(1000), "callers were serialized: {:?}", started.elapsed());
        assert_eq!(cache.in_flight_len(), 0);
        assert!(wav_files(dir.path()).is_empty());

        // The failure is not remembered
        cache.resolve("hello", false).await.unwrap_err();
        assert_eq!(synth.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_caller_does_not_abort_generation() {
        let dir = tempfile::tempdir().unwrap();
        let synth = CountingSynth::new(Duration::from_millis(300));
        let cache = Arc::new(AudioCache::new(dir.path(), NS, synth.clone()));

        let timed_out = tokio::time::timeout(Duration::from_millis(50), cache.resolve("slow text", false)).await;
        assert!(timed_out.is_err());
        assert!(!dir.path().join("GLaDOS-tts-slow-text.wav").exists());

        // A follow-up request joins the in-flight generation instead of starting another
        let path = cache.resolve("slow text", false).await.unwrap();
        assert!(path.exists());
        assert_eq!(synth.calls(), 1);
    }
}
