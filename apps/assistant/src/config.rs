//! Assistant configuration.
//!
//! Loads the core config tree from YAML and adds the engine-wiring section
//! (TTS endpoints, music catalog endpoints) that only the binary cares
//! about.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Engine endpoints wired by the binary.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// HTTP TTS endpoint (POST text, receive 16-bit LE PCM).
    pub tts_url: String,

    /// Optional fallback TTS endpoint, used when the primary is down.
    pub tts_fallback_url: Option<String>,

    /// Sample rate of the PCM the TTS endpoints return.
    pub tts_pcm_rate: u32,

    /// Voice name passed to the TTS endpoints.
    pub tts_voice: String,

    /// Base URL of the music catalog REST service. Empty disables music.
    pub music_api_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tts_url: "http://127.0.0.1:8880/synthesize".to_string(),
            tts_fallback_url: None,
            tts_pcm_rate: 24_000,
            tts_voice: String::new(),
            music_api_url: String::new(),
        }
    }
}

/// Full assistant configuration: the core tree plus engine wiring.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AssistantConfig {
    /// Everything chatterbox-core recognizes (audio, wake, vad, asr, llm,
    /// tts, dialog, tools, voiceprint).
    #[serde(flatten)]
    pub core: chatterbox_core::Config,

    /// Engine endpoints.
    pub engines: EngineConfig,
}

impl AssistantConfig {
    /// Loads configuration from a YAML file; a missing path means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };
        Ok(config)
    }
}
