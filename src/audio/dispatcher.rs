//! Local playback of synthesized files through an ordered fallback chain.

use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::playback::DevicePlayback;

/// One way of getting a WAV file out of the speakers.
pub trait PlaybackBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Play the file and block until it finishes.
    fn play(&self, path: &Path) -> Result<()>;
}

/// Plays a file by running an external player program.
pub struct CommandPlayback {
    program: String,
    args: Vec<String>,
}

impl CommandPlayback {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self { program: program.into(), args: args.iter().map(|a| a.to_string()).collect() }
    }
}

impl PlaybackBackend for CommandPlayback {
    fn name(&self) -> &str {
        &self.program
    }

    fn play(&self, path: &Path) -> Result<()> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("failed to launch {}", self.program))?;

        if !status.success() {
            bail!("{} exited with {}", self.program, status);
        }
        Ok(())
    }
}

/// Tries each backend in order until one plays the file.
///
/// Playbacks are serialized so clips never overlap.
pub struct PlaybackDispatcher {
    backends: Vec<Box<dyn PlaybackBackend>>,
    busy: Mutex<()>,
}

impl PlaybackDispatcher {
    pub fn new(backends: Vec<Box<dyn PlaybackBackend>>) -> Self {
        Self { backends, busy: Mutex::new(()) }
    }

    /// In-process device output first, then the common command-line players.
    pub fn with_default_chain() -> Self {
        Self::new(vec![
            Box::new(DevicePlayback),
            Box::new(CommandPlayback::new("aplay", &["-q"])),
            Box::new(CommandPlayback::new("pw-play", &[])),
            Box::new(CommandPlayback::new("paplay", &[])),
            Box::new(CommandPlayback::new("afplay", &[])),
        ])
    }

    /// Play `path`, returning whether any backend succeeded.
    ///
    /// Failures are logged and never propagated: the file stays valid either way.
    pub fn play(&self, path: &Path) -> bool {
        let _busy = self.busy.lock();

        for backend in &self.backends {
            debug!("Trying playback via {}", backend.name());
            match backend.play(path) {
                Ok(()) => {
                    info!("🔊 Played {} via {}", path.display(), backend.name());
                    return true;
                }
                Err(e) => warn!("Playback via {} failed: {:#}", backend.name(), e),
            }
        }

        error!("❌ Could not play {}: all playback mechanisms failed", path.display());
        false
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct FakeBackend {
        ok: bool,
        calls: Arc<AtomicUsize>,
    }

    impl PlaybackBackend for FakeBackend {
        fn name(&self) -> &str {
            "fake"
        }

        fn play(&self, _path: &Path) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.ok { Ok(()) } else { bail!("no device") }
        }
    }

    fn backend(ok: bool) -> (Box<dyn PlaybackBackend>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (Box::new(FakeBackend { ok, calls: calls.clone() }), calls)
    }

    #[test]
    fn test_falls_through_to_next_backend() {
        let (first, first_calls) = backend(false);
        let (second, second_calls) = backend(true);
        let (third, third_calls) = backend(true);
        let dispatcher = PlaybackDispatcher::new(vec![first, second, third]);

        assert!(dispatcher.play(Path::new("clip.wav")));
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
        assert_eq!(third_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_total_failure_is_reported_not_raised() {
        let (first, _) = backend(false);
        let (second, _) = backend(false);
        let dispatcher = PlaybackDispatcher::new(vec![first, second]);
        assert!(!dispatcher.play(Path::new("clip.wav")));
    }

    /// Records how many plays run at the same time.
    struct SlowBackend {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl PlaybackBackend for SlowBackend {
        fn name(&self) -> &str {
            "slow"
        }

        fn play(&self, _path: &Path) -> Result<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(100));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_concurrent_plays_never_overlap() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let dispatcher = PlaybackDispatcher::new(vec![Box::new(SlowBackend { active: active.clone(), peak: peak.clone() })]);

        std::thread::scope(|scope| {
            let first = scope.spawn(|| dispatcher.play(Path::new("first.wav")));
            let second = scope.spawn(|| dispatcher.play(Path::new("second.wav")));
            assert!(first.join().unwrap());
            assert!(second.join().unwrap());
        });

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_player_program_is_an_error() {
        let player = CommandPlayback::new("definitely-not-an-audio-player", &[]);
        assert!(player.play(Path::new("clip.wav")).is_err());
    }
}
