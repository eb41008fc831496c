//! Core configuration types.
//!
//! Provides the typed configuration tree ([`Config`] and its sections). All
//! fields have sensible defaults so a partial config file works; `validate`
//! catches the values that would break the realtime pipeline at startup.

use serde::{Deserialize, Serialize};

/// Audio capture configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AudioConfig {
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
    /// Capture channel count (the pipeline consumes mono).
    pub channels: u16,
    /// Samples per capture frame (e.g. 512 = 32 ms at 16 kHz).
    pub frame_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            frame_size: 512,
        }
    }
}

/// Wake-word detector inputs.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct WakeConfig {
    /// Detection threshold, engine-specific scale.
    pub threshold: f32,
    /// Path to the wake-word model.
    pub model_path: String,
    /// Path to the keywords file.
    pub keywords_file: String,
}

/// Voice-activity detector inputs.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VadConfig {
    /// Speech probability threshold.
    pub threshold: f32,
    /// Trailing silence before the detector reports an endpoint (ms).
    pub min_silence_ms: u64,
    /// Path to the VAD model.
    pub model_path: String,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            min_silence_ms: 500,
            model_path: String::new(),
        }
    }
}

/// Streaming recognizer inputs, including the endpointing rules.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AsrConfig {
    /// Path to the recognizer model.
    pub model_path: String,
    /// Inference threads.
    pub num_threads: usize,
    /// Trailing silence that ends an utterance before any speech (s).
    pub rule1_min_trailing_silence: f32,
    /// Trailing silence that ends an utterance after speech (s).
    pub rule2_min_trailing_silence: f32,
    /// Minimum utterance length before an endpoint fires (s).
    pub rule3_min_utterance_length: f32,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            model_path: String::new(),
            num_threads: 2,
            rule1_min_trailing_silence: 2.4,
            rule2_min_trailing_silence: 1.2,
            rule3_min_utterance_length: 20.0,
        }
    }
}

/// LLM endpoint configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    /// OpenAI-compatible chat-completions URL.
    pub api_url: String,
    /// Bearer token.
    pub api_key: String,
    /// Model name sent with every request.
    pub model: String,
    /// System prompt for the conversation.
    pub system_prompt: String,
    /// Maximum non-system messages retained in history.
    pub max_history: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            system_prompt: "You are a helpful voice assistant. Keep replies short and speakable."
                .to_string(),
            max_history: 20,
        }
    }
}

/// Text-to-speech engine selection.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TtsConfig {
    /// Engine name (the binary maps this to a constructed engine).
    pub engine: String,
    /// Optional fallback engine name, used when the main engine is
    /// presumed unreachable (e.g. network-error notices).
    pub fallback: Option<String>,
}

/// Dialogue pacing and canned replies.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DialogConfig {
    /// Spoken immediately after a wake event. Empty = go straight to listening.
    pub wake_reply: String,
    /// Spoken after an interruption. Empty = silent interrupt.
    pub interrupt_reply: String,
    /// Delay before re-opening the mic after assistant speech (ms).
    pub listen_delay: u64,
    /// Idle time in continuous dialogue before dropping back to idle (s).
    pub continuous_timeout: u64,
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            wake_reply: String::new(),
            interrupt_reply: String::new(),
            listen_delay: 300,
            continuous_timeout: 15,
        }
    }
}

/// Music tool configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MusicConfig {
    /// Whether the music tools are registered at all.
    pub enabled: bool,
    /// Provider identifier (must match the provider's `name()`).
    pub provider: String,
    /// Directory for cached MP3 files and the index.
    pub cache_dir: String,
    /// Cache size cap in MB. 0 disables the cache.
    pub cache_max_size: u64,
}

impl Default for MusicConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: String::new(),
            cache_dir: String::new(),
            cache_max_size: 512,
        }
    }
}

/// Tool-suite configuration.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ToolsConfig {
    /// Directory for persisted tool state (alarms, timers, memos).
    pub data_dir: String,
    /// Music tool configuration.
    #[serde(default)]
    pub music: MusicConfig,
}

/// Speaker-identification side channel.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct VoiceprintConfig {
    /// Whether identification runs at all.
    pub enabled: bool,
    /// Seconds of audio buffered for identification.
    pub buffer_secs: u64,
    /// Owner name checked by the privileged-tool gate.
    pub owner_name: String,
}

impl Default for VoiceprintConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            buffer_secs: 3,
            owner_name: String::new(),
        }
    }
}

/// Configuration for the Chatterbox assistant.
///
/// All sections have defaults; a missing section in the config file means
/// "use the defaults".
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Audio capture settings.
    #[serde(default)]
    pub audio: AudioConfig,
    /// Wake-word detector settings.
    #[serde(default)]
    pub wake: WakeConfig,
    /// Voice-activity detector settings.
    #[serde(default)]
    pub vad: VadConfig,
    /// Streaming recognizer settings.
    #[serde(default)]
    pub asr: AsrConfig,
    /// LLM endpoint settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Text-to-speech settings.
    #[serde(default)]
    pub tts: TtsConfig,
    /// Dialogue pacing settings.
    #[serde(default)]
    pub dialog: DialogConfig,
    /// Tool-suite settings.
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Voiceprint settings.
    #[serde(default)]
    pub voiceprint: VoiceprintConfig,
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.audio.sample_rate == 0 {
            return Err("audio.sample_rate must be > 0".to_string());
        }
        if self.audio.channels == 0 {
            return Err("audio.channels must be >= 1".to_string());
        }
        if self.audio.frame_size == 0 {
            return Err("audio.frame_size must be >= 1".to_string());
        }
        if self.llm.api_url.is_empty() {
            return Err("llm.api_url must be set".to_string());
        }
        if self.llm.max_history == 0 {
            return Err("llm.max_history must be >= 1".to_string());
        }
        if self.dialog.continuous_timeout == 0 {
            return Err("dialog.continuous_timeout must be >= 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_frame_size_rejected() {
        let mut config = Config::default();
        config.audio.frame_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_cache_size_means_disabled_not_invalid() {
        let mut config = Config::default();
        config.tools.music.cache_max_size = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_like_json_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"audio": {"sample_rate": 48000, "channels": 1, "frame_size": 1024}}"#).unwrap();
        assert_eq!(config.audio.sample_rate, 48_000);
        assert_eq!(config.dialog.listen_delay, 300);
        assert_eq!(config.llm.max_history, 20);
    }
}
