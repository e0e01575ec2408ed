//! On-disk audio cache.
//!
//! Maps normalized request text to WAV files and coordinates generation so
//! that a key is synthesized at most once at a time.

mod key;
mod store;

pub use store::AudioCache;
