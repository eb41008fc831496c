//! End-to-end pipeline scenarios driven by scripted models.
//!
//! Frames use marker amplitudes: 0.9 trips the wake model, 0.5 counts as
//! speech for the scripted recognizer, 0.0 is silence. Synthesis is
//! recorded per chunk and playback time scales with text length so tests
//! can interrupt mid-reply.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use chatterbox_core::audio::FrameQueue;
use chatterbox_core::cache::MusicCache;
use chatterbox_core::dialogue::{Conversation, DialogueState, StateMachine};
use chatterbox_core::error::{ChatterboxError, ChatterboxResult};
use chatterbox_core::llm::{
    ChatClient, ChatMessage, ChatOutcome, ChatStream, Role, ToolCallRecord, ToolDefinition,
};
use chatterbox_core::media::{MediaPlayback, PlayOptions};
use chatterbox_core::pipeline::{Pipeline, PipelineConfig, PipelineParts};
use chatterbox_core::playlist::Playlist;
use chatterbox_core::speech::{
    AudioSink, KeywordModel, RecognizerModel, Speech, TtsAudio, TtsEngine, VadModel,
    VoiceActivityDetector, StreamingRecognizer, WakeDetector,
};
use chatterbox_core::tools::{Tool, ToolRegistry};
use chatterbox_core::PlayOutcome;

const WAKE_MARK: f32 = 0.9;
const SPEECH_MARK: f32 = 0.5;
const SILENCE: f32 = 0.0;

fn frame(mark: f32) -> chatterbox_core::AudioFrame {
    chatterbox_core::AudioFrame {
        samples: vec![mark; 160],
    }
}

// ─── Scripted models ────────────────────────────────────────────────────────

struct MarkerWake;

impl KeywordModel for MarkerWake {
    fn accept(&mut self, samples: &[f32]) -> bool {
        samples.first().copied().unwrap_or(0.0) > 0.8
    }
    fn reset(&mut self) {}
}

struct MarkerVad {
    speech: bool,
}

impl VadModel for MarkerVad {
    fn accept(&mut self, samples: &[f32]) {
        self.speech = samples.first().copied().unwrap_or(0.0) > 0.2;
    }
    fn is_speech(&self) -> bool {
        self.speech
    }
    fn reset(&mut self) {
        self.speech = false;
    }
}

#[derive(Default)]
struct AsrScriptInner {
    pending: VecDeque<String>,
    speech_frames: usize,
    endpoint: bool,
}

/// Shared script: each queued utterance becomes the partial once speech
/// frames arrive; silence after speech fires the endpoint; reset consumes
/// the utterance.
#[derive(Clone, Default)]
struct AsrScript(Arc<Mutex<AsrScriptInner>>);

impl AsrScript {
    fn push(&self, utterance: &str) {
        self.0.lock().pending.push_back(utterance.to_string());
    }
}

struct ScriptedAsr(AsrScript);

impl RecognizerModel for ScriptedAsr {
    fn accept(&mut self, samples: &[f32]) {
        let mark = samples.first().copied().unwrap_or(0.0);
        let mut inner = self.0 .0.lock();
        if mark > 0.2 && mark < 0.8 {
            inner.speech_frames += 1;
        } else if inner.speech_frames > 0 {
            inner.endpoint = true;
        }
    }
    fn partial(&self) -> String {
        let inner = self.0 .0.lock();
        if inner.speech_frames > 0 {
            inner.pending.front().cloned().unwrap_or_default()
        } else {
            String::new()
        }
    }
    fn is_endpoint(&self) -> bool {
        self.0 .0.lock().endpoint
    }
    fn reset(&mut self) {
        let mut inner = self.0 .0.lock();
        if inner.endpoint {
            inner.pending.pop_front();
        }
        inner.speech_frames = 0;
        inner.endpoint = false;
    }
}

// ─── Recording synthesis + paced sink ───────────────────────────────────────

#[derive(Default)]
struct RecordingTts {
    synthesized: Mutex<Vec<String>>,
}

#[async_trait]
impl TtsEngine for RecordingTts {
    fn name(&self) -> &str {
        "recording"
    }
    async fn synthesize(&self, text: &str) -> ChatterboxResult<TtsAudio> {
        self.synthesized.lock().push(text.to_string());
        Ok(TtsAudio {
            samples: vec![0.0; text.chars().count()],
            sample_rate: 16_000,
        })
    }
}

/// Plays one "sample" (= one character) per `per_char_ms` milliseconds.
struct CharPacedSink {
    per_char_ms: u64,
}

#[async_trait]
impl AudioSink for CharPacedSink {
    async fn play(
        &self,
        audio: TtsAudio,
        cancel: &CancellationToken,
    ) -> ChatterboxResult<PlayOutcome> {
        let duration = Duration::from_millis(self.per_char_ms * audio.samples.len() as u64);
        tokio::select! {
            () = cancel.cancelled() => Ok(PlayOutcome::Cancelled),
            () = tokio::time::sleep(duration) => Ok(PlayOutcome::Completed),
        }
    }
}

// ─── Scripted chat backend ──────────────────────────────────────────────────

struct ChatRound {
    tokens: Vec<String>,
    outcome: ChatOutcome,
}

#[derive(Default)]
struct ScriptedChat {
    rounds: Mutex<VecDeque<ChatRound>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChat {
    fn push_text(&self, preamble_tokens: &[&str], content: &str) {
        self.rounds.lock().push_back(ChatRound {
            tokens: preamble_tokens.iter().map(|s| s.to_string()).collect(),
            outcome: ChatOutcome {
                content: content.to_string(),
                tool_calls: Vec::new(),
            },
        });
    }

    fn push_tool_call(&self, preamble: &str, id: &str, name: &str, arguments: &str) {
        self.rounds.lock().push_back(ChatRound {
            tokens: vec![preamble.to_string()],
            outcome: ChatOutcome {
                content: preamble.to_string(),
                tool_calls: vec![ToolCallRecord {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                }],
            },
        });
    }
}

#[async_trait]
impl ChatClient for ScriptedChat {
    async fn chat_stream_with_tools(
        &self,
        messages: Vec<ChatMessage>,
        _tools: Vec<ToolDefinition>,
        _cancel: CancellationToken,
    ) -> ChatterboxResult<ChatStream> {
        self.requests.lock().push(messages);
        let round = self
            .rounds
            .lock()
            .pop_front()
            .ok_or_else(|| ChatterboxError::Llm("script exhausted".to_string()))?;
        let (token_tx, token_rx) = tokio::sync::mpsc::channel(16);
        let (result_tx, result_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            for token in round.tokens {
                let _ = token_tx.send(token).await;
            }
            drop(token_tx);
            let _ = result_tx.send(Ok(round.outcome));
        });
        Ok(ChatStream {
            tokens: token_rx,
            result: result_rx,
        })
    }
}

// ─── Fake media player ──────────────────────────────────────────────────────

struct PlayRecord {
    url: Option<String>,
    cache_key: Option<String>,
}

#[derive(Default)]
struct FakePlayer {
    plays: Mutex<Vec<PlayRecord>>,
    /// Writes this payload to the cache path before completing, simulating
    /// the download tee.
    commit_cache: Mutex<Option<Arc<MusicCache>>>,
}

#[async_trait]
impl MediaPlayback for FakePlayer {
    async fn play(
        &self,
        url: &str,
        options: PlayOptions,
        _parent: &CancellationToken,
    ) -> ChatterboxResult<PlayOutcome> {
        if let (Some(cache), Some(key)) = (self.commit_cache.lock().clone(), &options.cache_key) {
            std::fs::write(cache.file_path(key), vec![0u8; 1024]).unwrap();
        }
        self.plays.lock().push(PlayRecord {
            url: Some(url.to_string()),
            cache_key: options.cache_key,
        });
        Ok(PlayOutcome::Completed)
    }
    async fn play_file(
        &self,
        path: &std::path::Path,
        _start_seconds: f64,
        _parent: &CancellationToken,
    ) -> ChatterboxResult<PlayOutcome> {
        self.plays.lock().push(PlayRecord {
            url: None,
            cache_key: path.file_stem().map(|s| s.to_string_lossy().into_owned()),
        });
        Ok(PlayOutcome::Completed)
    }
    fn stop(&self) {}
    fn position(&self) -> f64 {
        0.0
    }
    fn is_active(&self) -> bool {
        false
    }
}

// ─── Stub tools ─────────────────────────────────────────────────────────────

struct StaticTool {
    name: &'static str,
    result: String,
    calls: Arc<Mutex<usize>>,
}

#[async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "test tool"
    }
    fn parameters(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _args: &str) -> ChatterboxResult<String> {
        *self.calls.lock() += 1;
        Ok(self.result.clone())
    }
}

// ─── Harness ────────────────────────────────────────────────────────────────

struct Harness {
    pipeline: Pipeline,
    frames: Arc<FrameQueue>,
    conversation: Arc<Conversation>,
    states: Arc<Mutex<Vec<(DialogueState, DialogueState)>>>,
    tts: Arc<RecordingTts>,
    asr: AsrScript,
    chat: Arc<ScriptedChat>,
    player: Arc<FakePlayer>,
    tools: Arc<ToolRegistry>,
    root: CancellationToken,
}

struct HarnessOptions {
    wake_reply: String,
    interrupt_reply: String,
    continuous_timeout: Duration,
    per_char_ms: u64,
    cache: Option<Arc<MusicCache>>,
    privileged_tools: Vec<String>,
    owner_name: String,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            wake_reply: String::new(),
            interrupt_reply: String::new(),
            continuous_timeout: Duration::from_secs(5),
            per_char_ms: 0,
            cache: None,
            privileged_tools: Vec::new(),
            owner_name: String::new(),
        }
    }
}

impl Harness {
    fn start(options: HarnessOptions) -> Self {
        let states: Arc<Mutex<Vec<(DialogueState, DialogueState)>>> =
            Arc::new(Mutex::new(Vec::new()));
        let state = Arc::new(StateMachine::new());
        {
            let sink = Arc::clone(&states);
            state.on_change(move |from, to| sink.lock().push((from, to)));
        }

        let frames = Arc::new(FrameQueue::new(256));
        let asr = AsrScript::default();
        let tts = Arc::new(RecordingTts::default());
        let chat = Arc::new(ScriptedChat::default());
        let player = Arc::new(FakePlayer::default());
        let tools = Arc::new(ToolRegistry::new());
        let playlist = Arc::new(Playlist::new());
        let conversation = Arc::new(Conversation::new("you are a test assistant", 20));
        let root = CancellationToken::new();

        let speech = Arc::new(Speech::new(
            Arc::clone(&tts) as Arc<dyn TtsEngine>,
            None,
            Arc::new(CharPacedSink {
                per_char_ms: options.per_char_ms,
            }),
        ));

        let config = PipelineConfig {
            sample_rate: 16_000,
            wake_reply: options.wake_reply,
            interrupt_reply: options.interrupt_reply,
            listen_delay: Duration::from_millis(10),
            continuous_timeout: options.continuous_timeout,
            owner_name: options.owner_name,
            privileged_tools: options.privileged_tools,
            ..PipelineConfig::default()
        };

        let pipeline = Pipeline::new(
            config,
            PipelineParts {
                state,
                frames: Arc::clone(&frames),
                wake: Arc::new(WakeDetector::new(Box::new(MarkerWake))),
                vad: Arc::new(VoiceActivityDetector::new(Box::new(MarkerVad {
                    speech: false,
                }))),
                asr: Arc::new(StreamingRecognizer::new(Box::new(ScriptedAsr(
                    asr.clone(),
                )))),
                speech,
                player: Arc::clone(&player) as Arc<dyn MediaPlayback>,
                cache: options.cache.clone(),
                playlist: Arc::clone(&playlist),
                provider: None,
                llm: Arc::clone(&chat) as Arc<dyn ChatClient>,
                tools: Arc::clone(&tools),
                conversation: Arc::clone(&conversation),
                identifier: None,
                alarms: None,
                root: root.clone(),
            },
        );

        {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.run().await });
        }

        Self {
            pipeline,
            frames,
            conversation,
            states,
            tts,
            asr,
            chat,
            player,
            tools,
            root,
        }
    }

    async fn feed(&self, mark: f32, count: usize) {
        for _ in 0..count {
            self.frames.push(frame(mark));
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    fn state(&self) -> DialogueState {
        self.pipeline.state().current()
    }

    fn transitions(&self) -> Vec<(DialogueState, DialogueState)> {
        self.states.lock().clone()
    }

    /// Non-system conversation messages.
    fn log(&self) -> Vec<ChatMessage> {
        self.conversation.snapshot()[1..].to_vec()
    }
}

async fn wait_for(mut cond: impl FnMut() -> bool, timeout_ms: u64) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

// ─── Scenarios ──────────────────────────────────────────────────────────────

/// Happy wake + chat: full state cycle, one assistant message recorded.
#[tokio::test]
async fn wake_then_chat_cycles_through_all_states() {
    let harness = Harness::start(HarnessOptions {
        continuous_timeout: Duration::from_millis(300),
        ..HarnessOptions::default()
    });
    harness.asr.push("今天几号？");
    harness
        .chat
        .push_text(&["今天是", "二零二六年二月十三日。"], "今天是二零二六年二月十三日。");

    harness.feed(SILENCE, 3).await;
    assert_eq!(harness.state(), DialogueState::Idle);

    harness.feed(WAKE_MARK, 1).await;
    assert!(wait_for(|| harness.state() == DialogueState::Listening, 500).await);

    harness.feed(SPEECH_MARK, 5).await;
    harness.feed(SILENCE, 1).await;

    // Reply spoken, then continuous dialogue, then timeout back to idle.
    assert!(wait_for(|| harness.state() == DialogueState::Idle, 3000).await);

    let log = harness.log();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].role, Role::User);
    assert_eq!(log[0].content, "今天几号？");
    assert_eq!(log[1].role, Role::Assistant);
    assert_eq!(log[1].content, "今天是二零二六年二月十三日。");

    let transitions = harness.transitions();
    assert_eq!(
        transitions,
        vec![
            (DialogueState::Idle, DialogueState::Listening),
            (DialogueState::Listening, DialogueState::Processing),
            (DialogueState::Processing, DialogueState::Speaking),
            (DialogueState::Speaking, DialogueState::Listening),
            (DialogueState::Listening, DialogueState::Idle),
        ]
    );
}

/// Tool round: preamble is never spoken, the log keeps the full linkage,
/// and the spoken chunks concatenate to the final reply.
#[tokio::test]
async fn tool_call_round_trip_speaks_only_the_summary() {
    let harness = Harness::start(HarnessOptions::default());
    let weather_calls = Arc::new(Mutex::new(0));
    harness.tools.register(Arc::new(StaticTool {
        name: "get_weather",
        result: "北京明天多云，10到20度".to_string(),
        calls: Arc::clone(&weather_calls),
    }));
    harness.asr.push("明天北京天气怎么样？");
    harness.chat.push_tool_call(
        "让我查一下。",
        "call_1",
        "get_weather",
        r#"{"city":"北京"}"#,
    );
    harness
        .chat
        .push_text(&["北京明天多云，10到20度。"], "北京明天多云，10到20度。");

    harness.feed(WAKE_MARK, 1).await;
    assert!(wait_for(|| harness.state() == DialogueState::Listening, 500).await);
    harness.feed(SPEECH_MARK, 4).await;
    harness.feed(SILENCE, 1).await;

    assert!(wait_for(|| harness.log().len() == 4, 3000).await);
    assert_eq!(*weather_calls.lock(), 1);

    let log = harness.log();
    assert_eq!(log[0].role, Role::User);
    assert_eq!(log[1].role, Role::Assistant);
    assert_eq!(log[1].tool_calls.len(), 1);
    assert_eq!(log[1].tool_calls[0].name, "get_weather");
    assert_eq!(log[2].role, Role::Tool);
    assert_eq!(log[2].tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(log[2].content, "北京明天多云，10到20度");
    assert_eq!(log[3].role, Role::Assistant);
    assert_eq!(log[3].content, "北京明天多云，10到20度。");

    assert!(wait_for(|| harness.state() == DialogueState::Listening, 2000).await);
    let spoken = harness.tts.synthesized.lock().clone();
    assert!(!spoken.iter().any(|s| s.contains("让我查一下")));
    assert_eq!(spoken.concat(), "北京明天多云，10到20度。");
}

/// Interrupt during Speaking: playback cancelled, no extra assistant
/// message, the already-appended reply stays untruncated, state ends in
/// Listening.
#[tokio::test]
async fn wake_during_speaking_interrupts_playback() {
    let harness = Harness::start(HarnessOptions {
        interrupt_reply: "我在".to_string(),
        per_char_ms: 40,
        ..HarnessOptions::default()
    });
    let reply = "第一句话说完了。第二句话说完了。第三句话说完了。第四句话说完了。第五句话说完了。\
                 第六句话说完了。第七句话说完了。第八句话说完了。第九句话说完了。第十句话说完了。";
    harness.asr.push("讲个长故事");
    harness.chat.push_text(&[reply], reply);

    harness.feed(WAKE_MARK, 1).await;
    assert!(wait_for(|| harness.state() == DialogueState::Listening, 500).await);
    harness.feed(SPEECH_MARK, 4).await;
    harness.feed(SILENCE, 1).await;

    assert!(wait_for(|| harness.state() == DialogueState::Speaking, 2000).await);
    // Outlive the wake cooldown (1 s), then barge in mid-reply.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(harness.state(), DialogueState::Speaking);
    harness.feed(WAKE_MARK, 1).await;

    assert!(wait_for(|| harness.state() == DialogueState::Listening, 2000).await);

    let spoken = harness.tts.synthesized.lock().clone();
    let reply_chunks_spoken = spoken.iter().filter(|s| s.contains("句话")).count();
    assert!(
        reply_chunks_spoken < 10,
        "playback should have been cut short, spoke {reply_chunks_spoken} chunks"
    );
    assert!(spoken.iter().any(|s| s == "我在"), "interrupt reply missing");

    // The log keeps exactly one full assistant message.
    let log = harness.log();
    let assistant: Vec<&ChatMessage> =
        log.iter().filter(|m| m.role == Role::Assistant).collect();
    assert_eq!(assistant.len(), 1);
    assert_eq!(assistant[0].content, reply);
}

/// Endpoint with empty text keeps listening; the continuous timer returns
/// the pipeline to idle.
#[tokio::test]
async fn empty_endpoint_stays_listening_until_timeout() {
    let harness = Harness::start(HarnessOptions {
        continuous_timeout: Duration::from_millis(300),
        ..HarnessOptions::default()
    });
    harness.asr.push("");

    harness.feed(WAKE_MARK, 1).await;
    assert!(wait_for(|| harness.state() == DialogueState::Listening, 500).await);
    harness.feed(SPEECH_MARK, 2).await;
    harness.feed(SILENCE, 1).await;

    // No Processing transition ever happens.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.state(), DialogueState::Listening);
    assert!(wait_for(|| harness.state() == DialogueState::Idle, 1000).await);
    assert!(!harness
        .transitions()
        .iter()
        .any(|(_, to)| *to == DialogueState::Processing));
    assert!(harness.log().is_empty());
}

/// Music tool result drives the playback path: player gets the URL, the
/// tee-committed file is indexed, and the turn ends in continuous dialogue.
#[tokio::test]
async fn music_tool_result_enters_playback_path() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(MusicCache::open(dir.path(), 64).unwrap());
    let harness = Harness::start(HarnessOptions {
        cache: Some(Arc::clone(&cache)),
        ..HarnessOptions::default()
    });
    *harness.player.commit_cache.lock() = Some(Arc::clone(&cache));

    harness.tools.register(Arc::new(StaticTool {
        name: "play_music",
        result: json!({
            "success": true,
            "song_name": "晴天",
            "artist": "周杰伦",
            "url": "https://music.example/12345.mp3",
            "cache_key": "qq_12345",
            "playlist_size": 1,
        })
        .to_string(),
        calls: Arc::new(Mutex::new(0)),
    }));
    harness.asr.push("播放晴天");
    harness
        .chat
        .push_tool_call("好的，马上播放。", "call_1", "play_music", r#"{"song":"晴天"}"#);

    harness.feed(WAKE_MARK, 1).await;
    assert!(wait_for(|| harness.state() == DialogueState::Listening, 500).await);
    harness.feed(SPEECH_MARK, 4).await;
    harness.feed(SILENCE, 1).await;

    assert!(wait_for(|| !harness.player.plays.lock().is_empty(), 3000).await);
    {
        let plays = harness.player.plays.lock();
        assert_eq!(plays[0].url.as_deref(), Some("https://music.example/12345.mp3"));
        assert_eq!(plays[0].cache_key.as_deref(), Some("qq_12345"));
    }

    // Tee-committed download gets indexed and touched.
    assert!(wait_for(|| cache.lookup("qq_12345").is_some(), 2000).await);
    let entry = &cache.list()[0];
    assert_eq!(entry.name, "晴天");
    assert_eq!(entry.play_count, 1);

    // One item, sequence mode: no auto-advance, turn falls into continuous
    // dialogue.
    assert!(wait_for(|| harness.state() == DialogueState::Listening, 2000).await);
    assert_eq!(harness.player.plays.lock().len(), 1);
    let spoken = harness.tts.synthesized.lock().clone();
    assert!(!spoken.iter().any(|s| s.contains("马上播放")));
}

/// The privileged gate refuses owner-only tools for unidentified speakers
/// without executing them.
#[tokio::test]
async fn privileged_tool_is_refused_for_non_owner() {
    let harness = Harness::start(HarnessOptions {
        privileged_tools: vec!["enroll_voiceprint".to_string()],
        owner_name: "主人".to_string(),
        ..HarnessOptions::default()
    });
    let enroll_calls = Arc::new(Mutex::new(0));
    harness.tools.register(Arc::new(StaticTool {
        name: "enroll_voiceprint",
        result: "enrolled".to_string(),
        calls: Arc::clone(&enroll_calls),
    }));
    harness.asr.push("记住我的声音");
    harness
        .chat
        .push_tool_call("", "call_1", "enroll_voiceprint", "{}");
    harness.chat.push_text(&["这个操作只有主人可以做。"], "这个操作只有主人可以做。");

    harness.feed(WAKE_MARK, 1).await;
    assert!(wait_for(|| harness.state() == DialogueState::Listening, 500).await);
    harness.feed(SPEECH_MARK, 4).await;
    harness.feed(SILENCE, 1).await;

    assert!(wait_for(|| harness.log().len() == 4, 3000).await);
    assert_eq!(*enroll_calls.lock(), 0, "gated tool must not run");
    let log = harness.log();
    assert_eq!(log[2].role, Role::Tool);
    assert!(log[2].content.contains("permission denied"));
}

/// Shutdown cancels the root scope and ends the main loop.
#[tokio::test]
async fn shutdown_ends_the_main_loop() {
    let harness = Harness::start(HarnessOptions::default());
    harness.pipeline.shutdown();
    assert!(harness.root.is_cancelled());
    // Frames pushed after close are dropped, not processed.
    harness.feed(WAKE_MARK, 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.state(), DialogueState::Idle);
}
