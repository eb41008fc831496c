//! Pipeline orchestrator: the frame router, interruption controller, tool
//! loop, and music auto-advance.
//!
//! One main loop consumes capture frames serially and routes each by the
//! current dialogue state: idle frames go to the wake detector, listening
//! frames to VAD + ASR, and frames during processing/speaking back to the
//! wake detector so a wake word interrupts the assistant. Heavy work (LLM
//! rounds, synthesis, playback, identification) runs on spawned tasks under
//! cancellation scopes owned here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::audio::{AudioFrame, FrameQueue, PlayOutcome};
use crate::cache::MusicCache;
use crate::dialogue::{Conversation, DialogueState, StateMachine};
use crate::error::ChatterboxError;
use crate::llm::ChatClient;
use crate::media::{MediaPlayback, PlayOptions};
use crate::playlist::Playlist;
use crate::speech::{
    Speech, SpeakerIdentifier, StreamingRecognizer, VoiceActivityDetector, WakeDetector,
};
use crate::tools::music::{self, MusicToolResult, PLAYBACK_TOOLS};
use crate::tools::{alarm::AlarmStore, ToolRegistry};

/// Suppression window after a wake detection.
const WAKE_COOLDOWN: Duration = Duration::from_millis(1000);

/// Suppression window after an interrupt.
const INTERRUPT_COOLDOWN: Duration = Duration::from_millis(500);

/// Period of the due-alarm sweep.
const ALARM_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Spoken when no alarm label was set.
const DEFAULT_ALARM_LABEL: &str = "闹钟时间到";

/// Pacing and policy knobs for the orchestrator.
#[derive(Clone)]
pub struct PipelineConfig {
    /// Capture sample rate (for voiceprint buffer sizing).
    pub sample_rate: u32,
    /// Spoken right after a wake event; empty = straight to listening.
    pub wake_reply: String,
    /// Spoken after an interruption; empty = silent.
    pub interrupt_reply: String,
    /// Delay before re-opening the mic after assistant output.
    pub listen_delay: Duration,
    /// Idle window in continuous dialogue before returning to idle.
    pub continuous_timeout: Duration,
    /// Maximum LLM rounds per user turn.
    pub max_tool_rounds: usize,
    /// Whether the voiceprint side channel runs.
    pub voiceprint_enabled: bool,
    /// Seconds of utterance audio buffered for identification.
    pub voiceprint_buffer_secs: u64,
    /// Owner name for the privileged-tool gate.
    pub owner_name: String,
    /// Tools only the owner may call.
    pub privileged_tools: Vec<String>,
    /// Spoken when the LLM endpoint is unreachable.
    pub network_error_notice: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            wake_reply: String::new(),
            interrupt_reply: String::new(),
            listen_delay: Duration::from_millis(300),
            continuous_timeout: Duration::from_secs(15),
            max_tool_rounds: 5,
            voiceprint_enabled: false,
            voiceprint_buffer_secs: 3,
            owner_name: String::new(),
            privileged_tools: vec![
                "enroll_voiceprint".to_string(),
                "delete_voiceprint".to_string(),
            ],
            network_error_notice: "网络连接出现问题，请稍后再试".to_string(),
        }
    }
}

/// Everything the orchestrator owns; assembled by the composition root.
pub struct PipelineParts {
    /// Dialogue state machine.
    pub state: Arc<StateMachine>,
    /// Capture frame queue (consumer side).
    pub frames: Arc<FrameQueue>,
    /// Wake-word detector.
    pub wake: Arc<WakeDetector>,
    /// Voice-activity detector.
    pub vad: Arc<VoiceActivityDetector>,
    /// Streaming recognizer.
    pub asr: Arc<StreamingRecognizer>,
    /// Speech synthesis service.
    pub speech: Arc<Speech>,
    /// Streaming media player.
    pub player: Arc<dyn MediaPlayback>,
    /// Music cache (None when music is disabled).
    pub cache: Option<Arc<MusicCache>>,
    /// Shared playlist.
    pub playlist: Arc<Playlist>,
    /// Music catalog provider (None when music is disabled).
    pub provider: Option<Arc<dyn music::MusicProvider>>,
    /// LLM client.
    pub llm: Arc<dyn ChatClient>,
    /// Tool registry.
    pub tools: Arc<ToolRegistry>,
    /// Conversation context.
    pub conversation: Arc<Conversation>,
    /// Voiceprint identifier (None when disabled).
    pub identifier: Option<Arc<dyn SpeakerIdentifier>>,
    /// Alarm store for the ambient sweep (None when tools are disabled).
    pub alarms: Option<Arc<AlarmStore>>,
    /// Root cancellation scope for the whole assistant.
    pub root: CancellationToken,
}

struct PipelineInner {
    config: PipelineConfig,
    state: Arc<StateMachine>,
    frames: Arc<FrameQueue>,
    wake: Arc<WakeDetector>,
    vad: Arc<VoiceActivityDetector>,
    asr: Arc<StreamingRecognizer>,
    speech: Arc<Speech>,
    player: Arc<dyn MediaPlayback>,
    cache: Option<Arc<MusicCache>>,
    playlist: Arc<Playlist>,
    provider: Option<Arc<dyn music::MusicProvider>>,
    llm: Arc<dyn ChatClient>,
    tools: Arc<ToolRegistry>,
    conversation: Arc<Conversation>,
    identifier: Option<Arc<dyn SpeakerIdentifier>>,
    alarms: Option<Arc<AlarmStore>>,
    root: CancellationToken,

    interrupted: AtomicBool,
    cooldown_until: Mutex<Option<Instant>>,
    turn_token: Mutex<Option<CancellationToken>>,
    continuous_timer: Mutex<Option<JoinHandle<()>>>,
    voice_buffer: Mutex<Option<Vec<f32>>>,
    ident_task: Mutex<Option<JoinHandle<()>>>,
    last_partial: Mutex<String>,
}

/// The pipeline orchestrator. Cloning yields another handle to the same
/// pipeline; spawned tasks each hold one.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    /// Builds the orchestrator from its parts.
    pub fn new(config: PipelineConfig, parts: PipelineParts) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                config,
                state: parts.state,
                frames: parts.frames,
                wake: parts.wake,
                vad: parts.vad,
                asr: parts.asr,
                speech: parts.speech,
                player: parts.player,
                cache: parts.cache,
                playlist: parts.playlist,
                provider: parts.provider,
                llm: parts.llm,
                tools: parts.tools,
                conversation: parts.conversation,
                identifier: parts.identifier,
                alarms: parts.alarms,
                root: parts.root,
                interrupted: AtomicBool::new(false),
                cooldown_until: Mutex::new(None),
                turn_token: Mutex::new(None),
                continuous_timer: Mutex::new(None),
                voice_buffer: Mutex::new(None),
                ident_task: Mutex::new(None),
                last_partial: Mutex::new(String::new()),
            }),
        }
    }

    /// The dialogue state machine (for observers).
    pub fn state(&self) -> &Arc<StateMachine> {
        &self.inner.state
    }

    /// Consumes capture frames until shutdown. This is the only mutator of
    /// the state machine on the common path.
    pub async fn run(&self) {
        log::info!("[Pipeline] Main loop running");
        loop {
            let frame = tokio::select! {
                () = self.inner.root.cancelled() => break,
                frame = self.inner.frames.pop() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };
            self.route_frame(&frame);
        }
        log::info!("[Pipeline] Main loop ended");
    }

    /// Starts the ambient tasks: the due-alarm sweep and the timer-expiry
    /// announcer.
    pub fn start_background_tasks(&self, mut timer_due: mpsc::Receiver<String>) {
        if let Some(alarms) = self.inner.alarms.clone() {
            let this = self.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(ALARM_SWEEP_INTERVAL);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        () = this.inner.root.cancelled() => break,
                        _ = tick.tick() => {}
                    }
                    for alarm in alarms.pop_due(Utc::now()) {
                        let label = if alarm.label.is_empty() {
                            DEFAULT_ALARM_LABEL.to_string()
                        } else {
                            alarm.label
                        };
                        log::info!("[Pipeline] Alarm due: {label}");
                        this.speak_announcement(&label).await;
                    }
                }
            });
        }
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let label = tokio::select! {
                    () = this.inner.root.cancelled() => break,
                    label = timer_due.recv() => match label {
                        Some(label) => label,
                        None => break,
                    },
                };
                log::info!("[Pipeline] Timer due: {label}");
                this.speak_announcement(&label).await;
            }
        });
    }

    /// Graceful shutdown: cancel every scope, stop playback and timers.
    pub fn shutdown(&self) {
        log::info!("[Pipeline] Shutting down");
        let turn = self.inner.turn_token.lock().take();
        if let Some(token) = turn {
            token.cancel();
        }
        self.inner.player.stop();
        self.stop_continuous_timer();
        self.inner.root.cancel();
        self.inner.frames.close();
    }

    // ─── Frame routing ──────────────────────────────────────────────────

    fn route_frame(&self, frame: &AudioFrame) {
        match self.inner.state.current() {
            DialogueState::Idle => {
                if !self.cooldown_active() && self.inner.wake.detect(&frame.samples) {
                    self.on_wake();
                }
            }
            DialogueState::Listening => self.on_listening_frame(frame),
            DialogueState::Processing | DialogueState::Speaking => {
                if !self.cooldown_active() && self.inner.wake.detect(&frame.samples) {
                    self.on_interrupt();
                }
            }
        }
    }

    fn on_wake(&self) {
        log::info!("[Pipeline] Wake word detected");
        self.set_cooldown(WAKE_COOLDOWN);
        self.inner.wake.reset();
        self.inner.vad.reset();
        self.inner.asr.reset();
        self.inner.last_partial.lock().clear();
        self.start_voice_buffer();

        if self.inner.config.wake_reply.is_empty() {
            self.inner.state.transition(DialogueState::Listening);
            self.restart_continuous_timer();
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            this.inner.state.force(DialogueState::Speaking);
            let token = this.inner.root.child_token();
            if let Err(e) = this
                .inner
                .speech
                .speak(&this.inner.config.wake_reply, &token)
                .await
            {
                log::warn!("[Pipeline] Wake reply failed: {e}");
            }
            this.open_mic().await;
        });
    }

    fn on_listening_frame(&self, frame: &AudioFrame) {
        self.inner.vad.feed(&frame.samples);
        self.inner.asr.feed(&frame.samples);
        self.append_voice_buffer(&frame.samples);

        let partial = self.inner.asr.partial_result();
        if !partial.is_empty() {
            let changed = {
                let mut last = self.inner.last_partial.lock();
                if *last != partial {
                    *last = partial;
                    true
                } else {
                    false
                }
            };
            if changed {
                self.restart_continuous_timer();
            }
        }

        if !self.inner.asr.is_endpoint() {
            return;
        }
        let text = self.inner.asr.final_result().trim().to_string();
        self.inner.asr.reset();
        self.inner.vad.reset();
        self.inner.last_partial.lock().clear();
        if text.is_empty() {
            // Stay in Listening; the continuous timer decides when to give up.
            return;
        }
        log::info!("[Pipeline] Utterance: {text}");
        self.stop_continuous_timer();
        self.spawn_identification();
        self.inner.state.transition(DialogueState::Processing);
        let this = self.clone();
        tokio::spawn(async move {
            this.process_query(text).await;
        });
    }

    /// Interrupt sequence: cancel everything in flight and re-open the mic.
    fn on_interrupt(&self) {
        log::info!("[Pipeline] Wake word during output, interrupting");
        self.set_cooldown(INTERRUPT_COOLDOWN);
        self.inner.wake.reset();
        self.inner.interrupted.store(true, Ordering::SeqCst);
        let turn = self.inner.turn_token.lock().take();
        if let Some(token) = turn {
            token.cancel();
        }
        self.inner.player.stop();
        self.inner.vad.reset();
        self.inner.asr.reset();
        self.inner.last_partial.lock().clear();
        self.start_voice_buffer();

        let this = self.clone();
        tokio::spawn(async move {
            if !this.inner.config.interrupt_reply.is_empty() {
                this.inner.state.force(DialogueState::Speaking);
                let token = this.inner.root.child_token();
                if let Err(e) = this
                    .inner
                    .speech
                    .speak(&this.inner.config.interrupt_reply, &token)
                    .await
                {
                    log::warn!("[Pipeline] Interrupt reply failed: {e}");
                }
            }
            this.open_mic().await;
        });
    }

    /// Evicts echo and force-resets into continuous listening.
    async fn open_mic(&self) {
        tokio::time::sleep(self.inner.config.listen_delay).await;
        let drained = self.inner.frames.drain();
        if drained > 0 {
            log::debug!("[Pipeline] Drained {drained} echo frames");
        }
        self.inner.vad.reset();
        self.inner.asr.reset();
        self.inner.state.force(DialogueState::Listening);
        self.restart_continuous_timer();
    }

    // ─── Cooldown / timers / voiceprint ─────────────────────────────────

    fn set_cooldown(&self, window: Duration) {
        *self.inner.cooldown_until.lock() = Some(Instant::now() + window);
    }

    fn cooldown_active(&self) -> bool {
        let mut until = self.inner.cooldown_until.lock();
        match *until {
            Some(expiry) if Instant::now() < expiry => true,
            Some(_) => {
                *until = None;
                false
            }
            None => false,
        }
    }

    fn restart_continuous_timer(&self) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(this.inner.config.continuous_timeout).await;
            if this.inner.state.current() == DialogueState::Listening {
                log::info!("[Pipeline] Continuous dialogue timed out");
                this.inner.state.force(DialogueState::Idle);
            }
        });
        let previous = self.inner.continuous_timer.lock().replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn stop_continuous_timer(&self) {
        if let Some(handle) = self.inner.continuous_timer.lock().take() {
            handle.abort();
        }
    }

    fn start_voice_buffer(&self) {
        if self.inner.config.voiceprint_enabled && self.inner.identifier.is_some() {
            let capacity = (self.inner.config.voiceprint_buffer_secs
                * u64::from(self.inner.config.sample_rate)) as usize;
            *self.inner.voice_buffer.lock() = Some(Vec::with_capacity(capacity.min(1 << 22)));
        }
    }

    fn append_voice_buffer(&self, samples: &[f32]) {
        let target = (self.inner.config.voiceprint_buffer_secs
            * u64::from(self.inner.config.sample_rate)) as usize;
        let mut slot = self.inner.voice_buffer.lock();
        if let Some(buffer) = slot.as_mut() {
            if buffer.len() < target {
                let take = samples.len().min(target - buffer.len());
                buffer.extend_from_slice(&samples[..take]);
            }
        }
    }

    /// Kicks off bounded speaker identification when at least one second of
    /// utterance audio was captured.
    fn spawn_identification(&self) {
        let Some(identifier) = self.inner.identifier.clone() else {
            return;
        };
        let Some(buffer) = self.inner.voice_buffer.lock().take() else {
            return;
        };
        if buffer.len() < self.inner.config.sample_rate as usize {
            return;
        }
        let conversation = Arc::clone(&self.inner.conversation);
        let sample_rate = self.inner.config.sample_rate;
        let handle = tokio::spawn(async move {
            match identifier.identify(&buffer, sample_rate).await {
                Ok(Some(profile)) => {
                    log::info!("[Pipeline] Speaker identified: {}", profile.name);
                    conversation.set_speaker(profile.name, profile.preferences);
                }
                Ok(None) => {}
                Err(e) => log::warn!("[Pipeline] Identification failed: {e}"),
            }
        });
        let previous = self.inner.ident_task.lock().replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    // ─── Tool loop ──────────────────────────────────────────────────────

    /// Drives one user turn: LLM rounds, tool dispatch, spoken reply or
    /// music playback, then the continuous-dialogue follow-up.
    async fn process_query(&self, text: String) {
        // Let an in-flight identification land before the first round so
        // the system prompt carries the right speaker.
        let ident = self.inner.ident_task.lock().take();
        if let Some(handle) = ident {
            let _ = handle.await;
        }
        self.inner.interrupted.store(false, Ordering::SeqCst);
        self.inner.conversation.add_user(text);

        let token = self.inner.root.child_token();
        *self.inner.turn_token.lock() = Some(token.clone());

        let follow_up = self.run_rounds(&token).await;

        self.inner.turn_token.lock().take();
        if follow_up && !self.inner.interrupted.load(Ordering::SeqCst) {
            self.continuous_follow_up().await;
        }
    }

    /// Runs up to `max_tool_rounds` LLM rounds. Returns whether the turn
    /// should end in continuous dialogue.
    async fn run_rounds(&self, token: &CancellationToken) -> bool {
        for _round in 0..self.inner.config.max_tool_rounds {
            if self.inner.interrupted.load(Ordering::SeqCst) {
                return true;
            }
            let stream = match self
                .inner
                .llm
                .chat_stream_with_tools(
                    self.inner.conversation.snapshot(),
                    self.inner.tools.definitions(),
                    token.clone(),
                )
                .await
            {
                Ok(stream) => stream,
                Err(ChatterboxError::Cancelled) => return true,
                Err(e) => {
                    self.llm_failure(&e).await;
                    return false;
                }
            };

            // Drain the whole text stream even when interrupted so the
            // result channel closes cleanly.
            let mut tokens = stream.tokens;
            let mut reply = String::new();
            while let Some(piece) = tokens.recv().await {
                reply.push_str(&piece);
            }
            let outcome = match stream.result.await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(ChatterboxError::Cancelled)) => return true,
                Ok(Err(e)) => {
                    self.llm_failure(&e).await;
                    return false;
                }
                Err(_) => {
                    self.llm_failure(&ChatterboxError::Llm(
                        "result channel closed without a final record".to_string(),
                    ))
                    .await;
                    return false;
                }
            };

            if outcome.tool_calls.is_empty() {
                let reply = if outcome.content.is_empty() {
                    reply
                } else {
                    outcome.content
                };
                if !reply.is_empty() {
                    // The log keeps the full reply even if playback is
                    // interrupted partway.
                    self.inner.conversation.add_assistant(reply.as_str());
                    if !self.inner.interrupted.load(Ordering::SeqCst) {
                        self.inner.state.transition(DialogueState::Speaking);
                        match self.inner.speech.speak_chunks(&reply, token).await {
                            Ok(_) => {}
                            Err(e) if e.is_cancelled() => {}
                            Err(e) => log::warn!("[Pipeline] Reply playback failed: {e}"),
                        }
                    }
                }
                return true;
            }

            // Tool-call round: the preamble text is contract noise, never
            // spoken.
            self.inner
                .conversation
                .add_assistant_with_tool_calls(outcome.tool_calls.clone());
            self.inner.state.force(DialogueState::Processing);

            for call in &outcome.tool_calls {
                if self.inner.interrupted.load(Ordering::SeqCst) {
                    return true;
                }
                let result = if self.is_gated(&call.name) {
                    log::warn!(
                        "[Pipeline] Refusing privileged tool {} for non-owner",
                        call.name
                    );
                    json!({
                        "success": false,
                        "error": "permission denied: this action is restricted to the owner",
                    })
                    .to_string()
                } else {
                    match self.inner.tools.execute(&call.name, &call.arguments).await {
                        Ok(result) => result,
                        Err(e) => e.to_string(),
                    }
                };
                self.inner
                    .conversation
                    .add_tool(call.name.as_str(), call.id.as_str(), result.as_str());

                if PLAYBACK_TOOLS.contains(&call.name.as_str()) {
                    if let Some(music) = music::parse_music_result(&result) {
                        if music.success && (music.url.is_some() || music.cache_key.is_some()) {
                            self.play_music_path(music, token).await;
                            return true;
                        }
                    }
                }
            }
        }
        log::warn!(
            "[Pipeline] Tool loop hit the {}-round cap",
            self.inner.config.max_tool_rounds
        );
        true
    }

    /// Privileged-tool gate: the configured set is owner-only.
    fn is_gated(&self, tool_name: &str) -> bool {
        self.inner
            .config
            .privileged_tools
            .iter()
            .any(|name| name == tool_name)
            && self.inner.conversation.speaker() != self.inner.config.owner_name
    }

    async fn llm_failure(&self, err: &ChatterboxError) {
        log::error!("[Pipeline] LLM request failed: {err}");
        self.inner.state.force(DialogueState::Speaking);
        let token = self.inner.root.child_token();
        if let Err(e) = self
            .inner
            .speech
            .speak_notice(&self.inner.config.network_error_notice, &token)
            .await
        {
            log::warn!("[Pipeline] Error notice failed too: {e}");
        }
        self.inner.state.force(DialogueState::Idle);
    }

    // ─── Music playback path ────────────────────────────────────────────

    /// Plays the tool result, then keeps advancing through the playlist
    /// (iteratively, honoring the play mode) until it runs dry, playback is
    /// cancelled, or an error ends the session.
    async fn play_music_path(&self, first: MusicToolResult, token: &CancellationToken) {
        let mut current = first;
        loop {
            self.inner.state.force(DialogueState::Speaking);
            log::info!(
                "[Pipeline] Playing {} - {}",
                current.artist,
                current.song_name
            );
            let key = current.cache_key.clone();
            let was_cached = key
                .as_deref()
                .and_then(|k| self.inner.cache.as_ref().and_then(|c| c.lookup(k)))
                .is_some();
            let start_seconds = current.position_sec.unwrap_or(0.0);

            let outcome = match &current.url {
                Some(url) => {
                    let options = PlayOptions {
                        cache: self.inner.cache.clone(),
                        cache_key: key.clone(),
                        start_seconds,
                    };
                    self.inner.player.play(url, options, token).await
                }
                None => {
                    let cached_path = key
                        .as_deref()
                        .and_then(|k| self.inner.cache.as_ref().and_then(|c| c.lookup(k)));
                    match cached_path {
                        Some(path) => {
                            let result =
                                self.inner.player.play_file(&path, start_seconds, token).await;
                            if matches!(result, Ok(PlayOutcome::Completed)) {
                                if let (Some(cache), Some(k)) =
                                    (&self.inner.cache, key.as_deref())
                                {
                                    cache.touch_last_played(k);
                                }
                            }
                            result
                        }
                        None => Err(ChatterboxError::Cache(
                            "nothing playable: no URL and no cached file".to_string(),
                        )),
                    }
                }
            };

            match outcome {
                Ok(PlayOutcome::Cancelled) => return,
                Ok(PlayOutcome::Completed) => {
                    // A fresh download that tee-committed gets indexed now.
                    if !was_cached {
                        if let (Some(cache), Some(k)) = (&self.inner.cache, key.as_deref()) {
                            if cache.file_path(k).exists() {
                                let album = self
                                    .inner
                                    .playlist
                                    .current()
                                    .map(|item| item.album)
                                    .unwrap_or_default();
                                if let Err(e) =
                                    cache.store(k, &current.song_name, &current.artist, &album)
                                {
                                    log::warn!("[Pipeline] Cache index update failed: {e}");
                                } else {
                                    cache.touch_last_played(k);
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    // Treated like any playback failure: fall through to
                    // continuous dialogue.
                    log::warn!("[Pipeline] Playback failed: {e}");
                    return;
                }
            }

            let Some(next) = self.inner.playlist.next() else {
                log::info!("[Pipeline] Playlist finished");
                return;
            };
            current = match &self.inner.provider {
                Some(provider) => {
                    music::resolve_item(
                        provider.as_ref(),
                        self.inner.cache.as_ref(),
                        &next,
                        self.inner.playlist.len(),
                    )
                    .await
                }
                None => MusicToolResult {
                    success: next.url.is_some() || next.cache_key.is_some(),
                    song_name: next.name.clone(),
                    artist: next.artist.clone(),
                    url: next.url.clone(),
                    cache_key: next.cache_key.clone(),
                    ..MusicToolResult::default()
                },
            };
            if !current.success {
                log::warn!("[Pipeline] Could not resolve next track, stopping auto-advance");
                return;
            }
            if self.inner.interrupted.load(Ordering::SeqCst) || token.is_cancelled() {
                return;
            }
        }
    }

    // ─── Continuous dialogue ────────────────────────────────────────────

    /// After a finished turn: clear the speaker, evict echo, and hold the
    /// mic open for a bounded follow-up window.
    async fn continuous_follow_up(&self) {
        self.inner.conversation.set_speaker("", "");
        self.start_voice_buffer();
        self.open_mic().await;
    }

    // ─── Ambient speech ─────────────────────────────────────────────────

    /// Speaks outside a conversation turn (alarms, timers), honoring the
    /// "playback only in Speaking" rule and restoring the prior state.
    async fn speak_announcement(&self, text: &str) {
        let previous = self.inner.state.current();
        self.inner.state.force(DialogueState::Speaking);
        let token = self.inner.root.child_token();
        if let Err(e) = self.inner.speech.speak(text, &token).await {
            log::warn!("[Pipeline] Announcement failed: {e}");
        }
        self.inner.frames.drain();
        self.inner.state.force(previous);
    }
}
