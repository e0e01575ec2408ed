//! HTTP endpoint serving synthesized audio.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::service::SynthesisService;
use crate::error::TtsError;

/// Body returned when the request carries no text.
const NO_INPUT: &str = "No input";

/// Query parameters of `GET /synthesize`.
#[derive(Debug, Deserialize)]
struct SynthesizeParams {
    text: Option<String>,
}

/// Create the application router.
pub fn create_router(service: Arc<SynthesisService>) -> Router {
    Router::new().route("/synthesize", get(synthesize)).layer(TraceLayer::new_for_http()).with_state(service)
}

/// Synthesize the `text` parameter and return the WAV file.
///
/// Missing or empty text answers `200 No input` rather than an error status.
async fn synthesize(State(service): State<Arc<SynthesisService>>, Query(params): Query<SynthesizeParams>) -> Response {
    let text = params.text.unwrap_or_default();
    if text.is_empty() {
        return NO_INPUT.into_response();
    }

    info!("🗣️ Request: \"{}\"", text);

    let path = match service.synthesize(&text).await {
        Ok(path) => path,
        Err(TtsError::InvalidRequest(_)) => return NO_INPUT.into_response(),
        Err(e @ TtsError::Timeout(_)) => {
            error!("❌ {}", e);
            return (StatusCode::GATEWAY_TIMEOUT, e.to_string()).into_response();
        }
        Err(e) => {
            error!("❌ Synthesis failed: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "audio/wav")], bytes).into_response(),
        Err(e) => {
            let err = TtsError::storage(&path, e);
            error!("❌ {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}
