//! Error kinds surfaced by the synthesis pipeline, the audio cache and the service.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors produced while loading models or serving a synthesis request.
#[derive(Debug, Error)]
pub enum TtsError {
    /// A model file is missing or cannot be loaded. Fatal at startup.
    #[error("failed to load {name} model from {path}: {reason}")]
    ModelLoad { name: &'static str, path: PathBuf, reason: String },

    /// The request carried no usable text.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Text preparation or one of the model stages failed.
    #[error("inference failed: {0}")]
    Inference(String),

    /// Reading or writing the cache directory failed.
    #[error("storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The request did not complete within the configured timeout.
    #[error("synthesis timed out after {0:?}")]
    Timeout(Duration),
}

impl TtsError {
    /// Build a storage error for the given path.
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage { path: path.into(), source }
    }
}

/// Every caller joined on one generation gets its own copy of the outcome.
/// `io::Error` is not `Clone`, so a copied storage error keeps its kind and message.
impl Clone for TtsError {
    fn clone(&self) -> Self {
        match self {
            Self::ModelLoad { name, path, reason } => Self::ModelLoad { name: *name, path: path.clone(), reason: reason.clone() },
            Self::InvalidRequest(msg) => Self::InvalidRequest(msg.clone()),
            Self::Inference(msg) => Self::Inference(msg.clone()),
            Self::Storage { path, source } => {
                Self::Storage { path: path.clone(), source: std::io::Error::new(source.kind(), source.to_string()) }
            }
            Self::Timeout(limit) => Self::Timeout(*limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloned_storage_error_keeps_kind_and_message() {
        let err = TtsError::storage("cache/a.wav", std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"));
        match err.clone() {
            TtsError::Storage { path, source } => {
                assert_eq!(path, PathBuf::from("cache/a.wav"));
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
                assert_eq!(source.to_string(), "read-only");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.clone().to_string(), err.to_string());
    }
}

/// Convenience alias used across the crate.
pub type TtsResult<T> = Result<T, TtsError>;
