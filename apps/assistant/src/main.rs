//! Chatterbox - headless voice assistant.
//!
//! Wires the core pipeline to the shipped engines (energy wake/VAD,
//! whisper recognizer, HTTP TTS, REST music catalog), then runs until
//! Ctrl+C or SIGTERM.

mod config;
mod engines;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chatterbox_core::{bootstrap_services, EngineSet, TtsEngine};
use clap::Parser;
use tokio::signal;

use crate::config::AssistantConfig;
use crate::engines::{EnergyVad, EnergyWake, HttpTts, RestMusicProvider, WhisperRecognizer};

/// Chatterbox - embedded voice assistant.
#[derive(Parser, Debug)]
#[command(name = "chatterbox")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "CHATTERBOX_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Data directory for persistent state (alarms, timers, memos).
    #[arg(short = 'd', long, env = "CHATTERBOX_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Chatterbox v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        AssistantConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(data_dir) = args.data_dir {
        config.core.tools.data_dir = data_dir.display().to_string();
    }

    config
        .core
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("Invalid configuration")?;

    // Engine wiring. Model-based wake/VAD/voiceprint backends plug in here
    // by implementing the core's engine traits.
    let http = reqwest::Client::new();
    let recognizer = WhisperRecognizer::new(&config.core.asr, config.core.audio.sample_rate)
        .context("Failed to load the recognizer model")?;
    let tts: Arc<dyn TtsEngine> = Arc::new(HttpTts::new(
        "http",
        http.clone(),
        config.engines.tts_url.clone(),
        config.engines.tts_voice.clone(),
        config.engines.tts_pcm_rate,
    ));
    let tts_fallback: Option<Arc<dyn TtsEngine>> =
        config.engines.tts_fallback_url.clone().map(|url| {
            Arc::new(HttpTts::new(
                "http-fallback",
                http.clone(),
                url,
                config.engines.tts_voice.clone(),
                config.engines.tts_pcm_rate,
            )) as Arc<dyn TtsEngine>
        });
    let music_provider = if config.core.tools.music.enabled
        && !config.engines.music_api_url.is_empty()
    {
        let name = if config.core.tools.music.provider.is_empty() {
            "rest".to_string()
        } else {
            config.core.tools.music.provider.clone()
        };
        Some(Arc::new(RestMusicProvider::new(
            name,
            http.clone(),
            config.engines.music_api_url.clone(),
        )) as Arc<dyn chatterbox_core::tools::music::MusicProvider>)
    } else {
        None
    };

    let engines = EngineSet {
        wake_model: Box::new(EnergyWake::new(config.core.wake.threshold)),
        vad_model: Box::new(EnergyVad::new(
            config.core.vad.threshold,
            config.core.vad.min_silence_ms,
            config.core.audio.sample_rate,
        )),
        asr_model: Box::new(recognizer),
        tts,
        tts_fallback,
        identifier: None,
        music_provider,
    };

    // Bootstrap and start
    let services = bootstrap_services(&config.core, engines)
        .context("Failed to bootstrap services")?;
    services
        .start_background_tasks()
        .context("Failed to start capture")?;
    log::info!("Services bootstrapped, capture running");

    let pipeline = services.pipeline.clone();
    let pipeline_handle = tokio::spawn(async move { pipeline.run().await });

    // Wait for shutdown signal
    shutdown_signal().await;
    log::info!("Shutdown signal received, cleaning up...");

    services.shutdown();
    let _ = pipeline_handle.await;

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
