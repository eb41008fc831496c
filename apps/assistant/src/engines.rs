//! Engine implementations wired by the binary.
//!
//! The core consumes model runtimes behind traits; this module provides
//! the lightweight set the assistant ships with:
//!
//! - [`EnergyWake`]: an energy-burst voice trigger (keyword-free wake)
//! - [`EnergyVad`]: RMS voice-activity detection with a silence hangover
//! - [`WhisperRecognizer`]: windowed re-transcription over whisper-rs with
//!   rule-based endpointing
//! - [`HttpTts`]: POST text, stream back 16-bit PCM
//! - [`RestMusicProvider`]: thin JSON client for a music catalog service
//!
//! Model-based wake/VAD backends drop in by implementing the same traits.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use chatterbox_core::audio::pcm;
use chatterbox_core::error::{ChatterboxError, ChatterboxResult};
use chatterbox_core::speech::{KeywordModel, RecognizerModel, TtsAudio, TtsEngine, VadModel};
use chatterbox_core::state::AsrConfig;
use chatterbox_core::tools::music::{MusicProvider, Song};

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

// ─── Energy wake ────────────────────────────────────────────────────────────

/// Frames of sustained energy required to trigger.
const WAKE_BURST_FRAMES: u32 = 3;

/// Energy-burst voice trigger: sustained loudness wakes the assistant.
pub struct EnergyWake {
    threshold: f32,
    hot_frames: u32,
}

impl EnergyWake {
    /// Creates the trigger. A zero threshold falls back to a sane default.
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: if threshold > 0.0 { threshold } else { 0.15 },
            hot_frames: 0,
        }
    }
}

impl KeywordModel for EnergyWake {
    fn accept(&mut self, samples: &[f32]) -> bool {
        if rms(samples) >= self.threshold {
            self.hot_frames += 1;
        } else {
            self.hot_frames = 0;
        }
        self.hot_frames >= WAKE_BURST_FRAMES
    }
    fn reset(&mut self) {
        self.hot_frames = 0;
    }
}

// ─── Energy VAD ─────────────────────────────────────────────────────────────

/// RMS voice-activity detector with a trailing-silence hangover.
pub struct EnergyVad {
    threshold: f32,
    hangover_samples: usize,
    silence_run: usize,
    active: bool,
}

impl EnergyVad {
    /// Creates the detector for the capture sample rate.
    pub fn new(threshold: f32, min_silence_ms: u64, sample_rate: u32) -> Self {
        Self {
            threshold: if threshold > 0.0 { threshold } else { 0.02 },
            hangover_samples: (min_silence_ms as usize * sample_rate as usize) / 1000,
            silence_run: 0,
            active: false,
        }
    }
}

impl VadModel for EnergyVad {
    fn accept(&mut self, samples: &[f32]) {
        if rms(samples) >= self.threshold {
            self.active = true;
            self.silence_run = 0;
        } else {
            self.silence_run += samples.len();
            if self.silence_run >= self.hangover_samples {
                self.active = false;
            }
        }
    }
    fn is_speech(&self) -> bool {
        self.active
    }
    fn reset(&mut self) {
        self.active = false;
        self.silence_run = 0;
    }
}

// ─── Whisper recognizer ─────────────────────────────────────────────────────

/// Below this RMS a frame counts as trailing silence for endpointing.
const ENDPOINT_SILENCE_RMS: f32 = 0.015;

/// Minimum buffered audio before a transcription pass runs.
const MIN_DECODE_SECONDS: f32 = 0.5;

/// How often the worker re-transcribes the accumulated window.
const DECODE_INTERVAL: Duration = Duration::from_millis(250);

struct WhisperShared {
    buffer: Mutex<Vec<f32>>,
    text: Mutex<String>,
    generation: AtomicU64,
    stop: AtomicBool,
}

/// Pseudo-streaming recognizer: buffers the utterance and re-transcribes
/// the whole window on a worker thread, so partials grow as speech
/// continues. Endpointing follows the configured trailing-silence rules.
pub struct WhisperRecognizer {
    shared: Arc<WhisperShared>,
    worker: Option<JoinHandle<()>>,
    rules: AsrConfig,
    sample_rate: u32,
    total_samples: usize,
    trailing_silence: usize,
}

impl WhisperRecognizer {
    /// Loads the model and starts the transcription worker.
    pub fn new(config: &AsrConfig, sample_rate: u32) -> ChatterboxResult<Self> {
        if config.model_path.is_empty() {
            return Err(ChatterboxError::Config(
                "asr.model_path must be set".to_string(),
            ));
        }
        let context =
            WhisperContext::new_with_params(&config.model_path, WhisperContextParameters::default())
                .map_err(|e| ChatterboxError::Config(format!("whisper model load: {e}")))?;

        let shared = Arc::new(WhisperShared {
            buffer: Mutex::new(Vec::new()),
            text: Mutex::new(String::new()),
            generation: AtomicU64::new(0),
            stop: AtomicBool::new(false),
        });
        let worker = std::thread::Builder::new()
            .name("whisper-decode".to_string())
            .spawn({
                let shared = Arc::clone(&shared);
                let threads = config.num_threads.max(1) as i32;
                let min_samples = (MIN_DECODE_SECONDS * sample_rate as f32) as usize;
                move || decode_worker(&context, &shared, threads, min_samples)
            })
            .map_err(|e| ChatterboxError::Internal(format!("worker spawn: {e}")))?;

        Ok(Self {
            shared,
            worker: Some(worker),
            rules: config.clone(),
            sample_rate,
            total_samples: 0,
            trailing_silence: 0,
        })
    }
}

fn decode_worker(
    context: &WhisperContext,
    shared: &WhisperShared,
    threads: i32,
    min_samples: usize,
) {
    let mut state = match context.create_state() {
        Ok(state) => state,
        Err(e) => {
            log::error!("[Whisper] State init failed: {e}");
            return;
        }
    };
    let mut last_len = 0usize;
    while !shared.stop.load(Ordering::Acquire) {
        std::thread::sleep(DECODE_INTERVAL);
        let generation = shared.generation.load(Ordering::Acquire);
        let snapshot = {
            let buffer = shared.buffer.lock();
            if buffer.len() < min_samples || buffer.len() == last_len {
                continue;
            }
            buffer.clone()
        };
        last_len = snapshot.len();

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_n_threads(threads);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        if let Err(e) = state.full(params, &snapshot) {
            log::warn!("[Whisper] Transcription pass failed: {e}");
            continue;
        }
        let mut text = String::new();
        let segments = state.full_n_segments();
        for i in 0..segments {
            if let Some(segment) = state.get_segment(i) {
                if let Ok(segment_text) = segment.to_str() {
                    text.push_str(segment_text.trim());
                }
            }
        }
        // A reset happened mid-pass: this window belongs to the previous
        // utterance, discard it.
        if shared.generation.load(Ordering::Acquire) == generation {
            *shared.text.lock() = text;
        } else {
            last_len = 0;
        }
    }
}

impl RecognizerModel for WhisperRecognizer {
    fn accept(&mut self, samples: &[f32]) {
        self.shared.buffer.lock().extend_from_slice(samples);
        self.total_samples += samples.len();
        if rms(samples) < ENDPOINT_SILENCE_RMS {
            self.trailing_silence += samples.len();
        } else {
            self.trailing_silence = 0;
        }
    }

    fn partial(&self) -> String {
        self.shared.text.lock().clone()
    }

    fn is_endpoint(&self) -> bool {
        let silence_s = self.trailing_silence as f32 / self.sample_rate as f32;
        let utterance_s = self.total_samples as f32 / self.sample_rate as f32;
        let has_text = !self.shared.text.lock().is_empty();
        if has_text && silence_s >= self.rules.rule2_min_trailing_silence {
            return true;
        }
        if !has_text && silence_s >= self.rules.rule1_min_trailing_silence {
            return true;
        }
        utterance_s >= self.rules.rule3_min_utterance_length
    }

    fn reset(&mut self) {
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        self.shared.buffer.lock().clear();
        self.shared.text.lock().clear();
        self.total_samples = 0;
        self.trailing_silence = 0;
    }
}

impl Drop for WhisperRecognizer {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// ─── HTTP TTS ───────────────────────────────────────────────────────────────

/// Speech synthesis over HTTP: POST the text, get 16-bit LE PCM back.
pub struct HttpTts {
    name: String,
    client: reqwest::Client,
    url: String,
    voice: String,
    pcm_rate: u32,
}

impl HttpTts {
    /// Creates a client for one synthesis endpoint.
    pub fn new(
        name: impl Into<String>,
        client: reqwest::Client,
        url: impl Into<String>,
        voice: impl Into<String>,
        pcm_rate: u32,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            url: url.into(),
            voice: voice.into(),
            pcm_rate,
        }
    }
}

#[async_trait]
impl TtsEngine for HttpTts {
    fn name(&self) -> &str {
        &self.name
    }

    async fn synthesize(&self, text: &str) -> ChatterboxResult<TtsAudio> {
        let mut body = serde_json::json!({ "text": text });
        if !self.voice.is_empty() {
            body["voice"] = serde_json::json!(self.voice);
        }
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatterboxError::Network(format!("tts request: {e}")))?;
        if !response.status().is_success() {
            return Err(ChatterboxError::Network(format!(
                "tts endpoint returned {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ChatterboxError::Network(format!("tts body: {e}")))?;
        Ok(TtsAudio {
            samples: pcm::bytes_to_f32(&bytes),
            sample_rate: self.pcm_rate,
        })
    }
}

// ─── REST music provider ────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    songs: Vec<Song>,
}

#[derive(Deserialize)]
struct UrlResponse {
    url: String,
}

/// Thin client for a music catalog REST service:
/// `GET /search?keyword=` and `GET /song_url?id=`.
pub struct RestMusicProvider {
    name: String,
    client: reqwest::Client,
    base_url: String,
}

impl RestMusicProvider {
    /// Creates a provider; `name` becomes the cache-key prefix.
    pub fn new(name: impl Into<String>, client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl MusicProvider for RestMusicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, query: &str) -> ChatterboxResult<Vec<Song>> {
        let response: SearchResponse = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[("keyword", query)])
            .send()
            .await
            .map_err(|e| ChatterboxError::Network(format!("music search: {e}")))?
            .error_for_status()
            .map_err(|e| ChatterboxError::Network(format!("music search: {e}")))?
            .json()
            .await
            .map_err(|e| ChatterboxError::Network(format!("music search body: {e}")))?;
        Ok(response.songs)
    }

    async fn resolve_url(&self, song_id: &str) -> ChatterboxResult<String> {
        let response: UrlResponse = self
            .client
            .get(format!("{}/song_url", self.base_url))
            .query(&[("id", song_id)])
            .send()
            .await
            .map_err(|e| ChatterboxError::Network(format!("url resolve: {e}")))?
            .error_for_status()
            .map_err(|e| ChatterboxError::Network(format!("url resolve: {e}")))?
            .json()
            .await
            .map_err(|e| ChatterboxError::Network(format!("url resolve body: {e}")))?;
        Ok(response.url)
    }
}
