//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. The engine models
//! (wake/VAD/ASR/TTS/voiceprint/music catalog) come in from the
//! application through [`EngineSet`] because model loading is the
//! application's business; everything else is assembled here.
//!
//! Must be called from inside a tokio runtime: the timer service and the
//! ambient tasks spawn immediately.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::audio::{AudioCapture, ClipPlayer};
use crate::cache::MusicCache;
use crate::dialogue::{Conversation, StateMachine};
use crate::error::{ChatterboxError, ChatterboxResult};
use crate::llm::openai::OpenAiClient;
use crate::media::{MediaPlayback, StreamPlayer};
use crate::pipeline::{Pipeline, PipelineConfig, PipelineParts};
use crate::playlist::Playlist;
use crate::speech::{
    KeywordModel, RecognizerModel, SpeakerIdentifier, Speech, StreamingRecognizer, TtsEngine,
    VadModel, VoiceActivityDetector, WakeDetector,
};
use crate::state::Config;
use crate::tools::alarm::{AlarmStore, CancelAlarmTool, ListAlarmsTool, SetAlarmTool};
use crate::tools::memo::{AddMemoTool, DeleteMemoTool, ListMemosTool, MemoStore};
use crate::tools::music::{
    MusicProvider, NextMusicTool, PausedSlot, PauseMusicTool, PlayMusicTool, ResumeMusicTool,
    StopMusicTool,
};
use crate::tools::timer::{CancelTimerTool, ListTimersTool, SetTimerTool, TimerService};
use crate::tools::ToolRegistry;

/// HTTP timeout for LLM and media requests. Streaming bodies are exempt;
/// this bounds connect + headers.
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Model backends the application loads and hands to the core.
pub struct EngineSet {
    /// Keyword-spotting model.
    pub wake_model: Box<dyn KeywordModel>,
    /// Voice-activity model.
    pub vad_model: Box<dyn VadModel>,
    /// Streaming recognizer model.
    pub asr_model: Box<dyn RecognizerModel>,
    /// Primary speech-synthesis engine.
    pub tts: Arc<dyn TtsEngine>,
    /// Optional fallback synthesis engine.
    pub tts_fallback: Option<Arc<dyn TtsEngine>>,
    /// Optional voiceprint identifier.
    pub identifier: Option<Arc<dyn SpeakerIdentifier>>,
    /// Optional music catalog provider.
    pub music_provider: Option<Arc<dyn MusicProvider>>,
}

/// Container for all bootstrapped services.
pub struct BootstrappedServices {
    /// The orchestrator. Spawn [`Pipeline::run`] on a clone to start
    /// routing frames.
    pub pipeline: Pipeline,
    /// Microphone capture.
    pub capture: Arc<AudioCapture>,
    /// Tool registry (for registering application-specific tools).
    pub tools: Arc<ToolRegistry>,
    /// Shared playlist handle.
    pub playlist: Arc<Playlist>,
    /// Music cache, when music is enabled.
    pub cache: Option<Arc<MusicCache>>,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
    /// Timer-expiry labels, consumed by `start_background_tasks`.
    timer_due: Mutex<Option<mpsc::Receiver<String>>>,
    /// Shared HTTP client for connection pooling.
    http_client: Client,
}

impl BootstrappedServices {
    /// Returns the shared HTTP client.
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Opens the capture device and starts the ambient tasks (alarm sweep,
    /// timer announcer).
    pub fn start_background_tasks(&self) -> ChatterboxResult<()> {
        self.capture.start()?;
        let timer_due = self
            .timer_due
            .lock()
            .take()
            .ok_or_else(|| ChatterboxError::Internal("background tasks already started".into()))?;
        self.pipeline.start_background_tasks(timer_due);
        Ok(())
    }

    /// Initiates graceful shutdown: pipeline first, then playback scopes,
    /// then the capture device (reverse dependency order).
    pub fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");
        self.pipeline.shutdown();
        self.capture.close();
        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Creates the shared HTTP client.
///
/// Only the connect phase is bounded: LLM and MP3 responses stream for
/// arbitrarily long.
fn create_http_client() -> ChatterboxResult<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .build()
        .map_err(|e| ChatterboxError::Config(format!("HTTP client: {e}")))
}

/// Bootstraps all services with their dependencies.
///
/// Wiring order follows the dependency graph: shared infrastructure first
/// (HTTP client, cancellation token), then leaf components (capture,
/// wrappers, player, cache), then the stores and tools, and the pipeline
/// last.
pub fn bootstrap_services(
    config: &Config,
    engines: EngineSet,
) -> ChatterboxResult<BootstrappedServices> {
    config.validate().map_err(ChatterboxError::Config)?;

    let http_client = create_http_client()?;
    let cancel_token = CancellationToken::new();

    // Audio in.
    let capture = Arc::new(AudioCapture::new(config.audio.clone()));
    let frames = capture.frames();

    // Realtime model wrappers.
    let wake = Arc::new(WakeDetector::new(engines.wake_model));
    let vad = Arc::new(VoiceActivityDetector::new(engines.vad_model));
    let asr = Arc::new(StreamingRecognizer::new(engines.asr_model));

    // Audio out.
    let speech = Arc::new(Speech::new(
        engines.tts,
        engines.tts_fallback,
        Arc::new(ClipPlayer::new()),
    ));
    let player: Arc<dyn MediaPlayback> = Arc::new(StreamPlayer::new(http_client.clone()));

    // Music state.
    let music_provider = engines
        .music_provider
        .clone()
        .filter(|_| config.tools.music.enabled);
    let cache = if music_provider.is_some() && !config.tools.music.cache_dir.is_empty() {
        Some(Arc::new(MusicCache::open(
            &config.tools.music.cache_dir,
            config.tools.music.cache_max_size,
        )?))
    } else {
        None
    };
    let playlist = Arc::new(Playlist::new());
    let paused: PausedSlot = Arc::new(Mutex::new(None));

    // Tools.
    let tools = Arc::new(ToolRegistry::new());
    if let Some(provider) = music_provider.clone() {
        tools.register(Arc::new(PlayMusicTool::new(
            Arc::clone(&provider),
            cache.clone(),
            Arc::clone(&playlist),
        )));
        tools.register(Arc::new(NextMusicTool::new(
            Arc::clone(&provider),
            cache.clone(),
            Arc::clone(&playlist),
        )));
        tools.register(Arc::new(PauseMusicTool::new(
            Arc::clone(&player),
            Arc::clone(&playlist),
            Arc::clone(&paused),
        )));
        tools.register(Arc::new(ResumeMusicTool::new(
            provider,
            cache.clone(),
            Arc::clone(&playlist),
            Arc::clone(&paused),
        )));
        tools.register(Arc::new(StopMusicTool::new(
            Arc::clone(&player),
            Arc::clone(&playlist),
            Arc::clone(&paused),
        )));
    }

    let mut alarms = None;
    let mut timer_due = None;
    if !config.tools.data_dir.is_empty() {
        let data_dir = &config.tools.data_dir;
        let alarm_store = Arc::new(AlarmStore::open(data_dir));
        tools.register(Arc::new(SetAlarmTool::new(Arc::clone(&alarm_store))));
        tools.register(Arc::new(ListAlarmsTool::new(Arc::clone(&alarm_store))));
        tools.register(Arc::new(CancelAlarmTool::new(Arc::clone(&alarm_store))));
        alarms = Some(alarm_store);

        let (timer_service, due_rx) = TimerService::open(data_dir);
        tools.register(Arc::new(SetTimerTool::new(Arc::clone(&timer_service))));
        tools.register(Arc::new(ListTimersTool::new(Arc::clone(&timer_service))));
        tools.register(Arc::new(CancelTimerTool::new(timer_service)));
        timer_due = Some(due_rx);

        let memo_store = Arc::new(MemoStore::open(data_dir));
        tools.register(Arc::new(AddMemoTool::new(Arc::clone(&memo_store))));
        tools.register(Arc::new(ListMemosTool::new(Arc::clone(&memo_store))));
        tools.register(Arc::new(DeleteMemoTool::new(memo_store)));
    }
    let timer_due = timer_due.unwrap_or_else(|| {
        // No timer store: hand the announcer a closed channel so it exits.
        let (_tx, rx) = mpsc::channel(1);
        rx
    });

    // Conversation and LLM.
    let conversation = Arc::new(Conversation::new(
        config.llm.system_prompt.clone(),
        config.llm.max_history,
    ));
    let llm = Arc::new(OpenAiClient::new(http_client.clone(), &config.llm));

    let pipeline_config = PipelineConfig {
        sample_rate: config.audio.sample_rate,
        wake_reply: config.dialog.wake_reply.clone(),
        interrupt_reply: config.dialog.interrupt_reply.clone(),
        listen_delay: Duration::from_millis(config.dialog.listen_delay),
        continuous_timeout: Duration::from_secs(config.dialog.continuous_timeout),
        voiceprint_enabled: config.voiceprint.enabled && engines.identifier.is_some(),
        voiceprint_buffer_secs: config.voiceprint.buffer_secs,
        owner_name: config.voiceprint.owner_name.clone(),
        ..PipelineConfig::default()
    };

    let pipeline = Pipeline::new(
        pipeline_config,
        PipelineParts {
            state: Arc::new(StateMachine::new()),
            frames,
            wake,
            vad,
            asr,
            speech,
            player,
            cache: cache.clone(),
            playlist: Arc::clone(&playlist),
            provider: music_provider,
            llm,
            tools: Arc::clone(&tools),
            conversation,
            identifier: engines.identifier,
            alarms,
            root: cancel_token.clone(),
        },
    );

    log::info!(
        "[Bootstrap] Services wired ({} tools registered)",
        tools.len()
    );

    Ok(BootstrappedServices {
        pipeline,
        capture,
        tools,
        playlist,
        cache,
        cancel_token,
        timer_due: Mutex::new(Some(timer_due)),
        http_client,
    })
}
