//! Configuration module for the speech synthesis server.
//!
//! Provides CLI argument parsing and configuration management.

#[allow(clippy::module_inception)]
mod config;

pub use config::{ACOUSTIC_MODEL_FILE, AppConfig, Provider, VOCODER_MODEL_FILE};
