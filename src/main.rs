//! GLaDOS TTS Server - cached speech synthesis over HTTP.
//!
//! Text is phonemized with espeak-ng, run through an ONNX acoustic model and
//! vocoder, and served as 22.05 kHz mono WAV files that are cached on disk.

mod audio;
mod cache;
mod config;
mod error;
mod server;
mod tts;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::LocalTime;

use audio::PlaybackDispatcher;
use cache::AudioCache;
use config::AppConfig;
use server::SynthesisService;
use tts::{EspeakPreparer, InferenceModels, SynthesisPipeline};

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("🛑 Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("🛑 Received SIGTERM, shutting down...");
        }
    }
}

/// Build the synthesis service from the configuration.
///
/// Selects the vocoder device and loads both models; this is the only place
/// a model load failure can occur.
fn build_service(config: &AppConfig, playback: Option<Arc<PlaybackDispatcher>>) -> Result<SynthesisService> {
    let device = tts::resolve_device(config.device);
    let cpu_threads = config.cpu_threads();
    let vocoder_threads = config.vocoder_threads(device);
    info!("Acoustic model on cpu with {} thread(s), vocoder on {} with {} thread(s)", cpu_threads, device, vocoder_threads);

    let models = InferenceModels::load(&config.model_dir, device, cpu_threads, vocoder_threads)
        .context("Failed to load inference models")?;
    let preparer = EspeakPreparer::new(config.espeak_program(), config.espeak_library.clone(), config.espeak_voice.clone());
    let pipeline = SynthesisPipeline::new(Arc::new(preparer), Arc::new(models));

    let cache = AudioCache::new(&config.cache_dir, config.cache_namespace.clone(), Arc::new(pipeline));
    let mut service = SynthesisService::new(cache, config.no_cache).with_timeout(config.request_timeout());
    if let Some(playback) = playback {
        service = service.with_playback(playback);
    }
    Ok(service)
}

/// Synthesize a single text, print the file path and optionally play it.
async fn say_once(config: &AppConfig, text: &str) -> Result<()> {
    let service = build_service(config, None)?;
    let path = service.synthesize(text).await?;
    println!("{}", path.display());

    if config.play {
        let dispatcher = PlaybackDispatcher::with_default_chain();
        let played = tokio::task::spawn_blocking(move || dispatcher.play(&path)).await?;
        if !played {
            warn!("Audio was synthesized but could not be played");
        }
    }
    Ok(())
}

/// Serve `GET /synthesize` until a shutdown signal arrives.
async fn serve(config: &AppConfig) -> Result<()> {
    let playback = config.play.then(|| Arc::new(PlaybackDispatcher::with_default_chain()));
    let service = build_service(config, playback)?;
    let app = server::create_router(Arc::new(service));

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("Failed to bind {}", addr))?;
    info!("🚀 Listening on http://{}", addr);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let config = AppConfig::from_args();

    // Respect RUST_LOG env var, fallback to verbose flag, default to info
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(if config.verbose { "debug" } else { "info" }));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(LocalTime::new(time::macros::format_description!("[hour]:[minute]:[second]")))
        .init();

    info!("🤖 GLaDOS TTS Server v{}", env!("CARGO_PKG_VERSION"));

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("❌ Configuration error: {}", e);
        error!("Place {} and {} in the model directory.", config::ACOUSTIC_MODEL_FILE, config::VOCODER_MODEL_FILE);
        std::process::exit(1);
    }

    config.log_config();

    match &config.say {
        Some(text) => say_once(&config, text).await?,
        None => serve(&config).await?,
    }

    info!("✅ GLaDOS TTS Server stopped");
    Ok(())
}
