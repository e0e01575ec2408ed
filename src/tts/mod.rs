//! Text-to-speech inference.
//!
//! Device selection, model loading, text preparation and the two-stage
//! synthesis pipeline.

pub mod device;
pub mod models;
mod pipeline;
pub mod text;

pub use device::{DeviceTarget, resolve_device};
pub use models::InferenceModels;
pub use pipeline::{SynthesisPipeline, Synthesizer};
pub use text::EspeakPreparer;
