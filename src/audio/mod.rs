//! Audio output and encoding.
//!
//! This module holds the finalized PCM artifact and its WAV encoding, plus
//! local playback through cpal with command-line players as fallbacks.

mod artifact;
mod dispatcher;
mod playback;
pub mod resampler;
pub mod util;

pub use artifact::AudioArtifact;
pub use dispatcher::PlaybackDispatcher;
