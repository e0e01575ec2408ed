//! HTTP surface of the synthesis server.
//!
//! [`SynthesisService`] owns the request semantics (validation, caching,
//! timeout and playback); the axum router only maps its results to responses.

mod routes;
mod service;

pub use routes::create_router;
pub use service::SynthesisService;
