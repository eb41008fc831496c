//! Text-to-speech: engine contract, sentence chunking, and the speech
//! service that plays synthesized clips.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::audio::{ClipPlayer, PlayOutcome};
use crate::error::{ChatterboxError, ChatterboxResult};

/// Characters that end a spoken chunk.
pub const SENTENCE_ENDINGS: [char; 8] = ['。', '！', '？', '；', '.', '!', '?', '\n'];

/// Maximum characters per synthesized chunk.
pub const MAX_CHUNK_CHARS: usize = 100;

/// One synthesized utterance.
#[derive(Debug, Clone)]
pub struct TtsAudio {
    /// Normalized mono samples.
    pub samples: Vec<f32>,
    /// Sample rate of the synthesis.
    pub sample_rate: u32,
}

/// Runtime contract for a speech-synthesis engine.
#[async_trait]
pub trait TtsEngine: Send + Sync {
    /// Engine identifier (matches `tts.engine` in the config).
    fn name(&self) -> &str;
    /// Synthesizes `text` into playable audio.
    async fn synthesize(&self, text: &str) -> ChatterboxResult<TtsAudio>;
}

/// Playback seam so tests can capture speech instead of opening a device.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Plays one finite clip to completion or cancellation.
    async fn play(
        &self,
        audio: TtsAudio,
        cancel: &CancellationToken,
    ) -> ChatterboxResult<PlayOutcome>;
}

#[async_trait]
impl AudioSink for ClipPlayer {
    async fn play(
        &self,
        audio: TtsAudio,
        cancel: &CancellationToken,
    ) -> ChatterboxResult<PlayOutcome> {
        ClipPlayer::play(self, audio.samples, audio.sample_rate, cancel).await
    }
}

/// Splits `text` into chunks of at most `max_chars`, ending a chunk at every
/// sentence-ending punctuation mark. Concatenating the chunks reproduces the
/// input exactly.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;
    for c in text.chars() {
        current.push(c);
        count += 1;
        if SENTENCE_ENDINGS.contains(&c) || count >= max_chars {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Speech service: synthesis (with optional fallback engine) plus clip
/// playback through the configured sink.
pub struct Speech {
    engine: Arc<dyn TtsEngine>,
    fallback: Option<Arc<dyn TtsEngine>>,
    sink: Arc<dyn AudioSink>,
}

impl Speech {
    /// Wires the speech service.
    pub fn new(
        engine: Arc<dyn TtsEngine>,
        fallback: Option<Arc<dyn TtsEngine>>,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        Self {
            engine,
            fallback,
            sink,
        }
    }

    /// Synthesizes and plays one chunk of text to completion or
    /// cancellation. Falls back to the secondary engine when the primary
    /// fails to synthesize.
    pub async fn speak(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> ChatterboxResult<PlayOutcome> {
        if text.trim().is_empty() {
            return Ok(PlayOutcome::Completed);
        }
        if cancel.is_cancelled() {
            return Ok(PlayOutcome::Cancelled);
        }
        let audio = match self.engine.synthesize(text).await {
            Ok(audio) => audio,
            Err(e) if !e.is_cancelled() => match &self.fallback {
                Some(fallback) => {
                    log::warn!(
                        "[Speech] Engine {} failed ({e}), using fallback {}",
                        self.engine.name(),
                        fallback.name()
                    );
                    fallback.synthesize(text).await?
                }
                None => return Err(e),
            },
            Err(e) => return Err(e),
        };
        if cancel.is_cancelled() {
            return Ok(PlayOutcome::Cancelled);
        }
        self.sink.play(audio, cancel).await
    }

    /// Speaks a short notice, preferring the fallback engine (used when the
    /// primary engine's backend is presumed unreachable).
    pub async fn speak_notice(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> ChatterboxResult<PlayOutcome> {
        let engine = self.fallback.as_ref().unwrap_or(&self.engine);
        let audio = engine.synthesize(text).await?;
        if cancel.is_cancelled() {
            return Ok(PlayOutcome::Cancelled);
        }
        self.sink.play(audio, cancel).await
    }

    /// Splits `text` into speakable chunks and plays them in order,
    /// stopping early on cancellation. Returns whether the whole text was
    /// spoken.
    pub async fn speak_chunks(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> ChatterboxResult<PlayOutcome> {
        for chunk in split_text(text, MAX_CHUNK_CHARS) {
            if cancel.is_cancelled() {
                return Ok(PlayOutcome::Cancelled);
            }
            match self.speak(&chunk, cancel).await? {
                PlayOutcome::Completed => {}
                PlayOutcome::Cancelled => return Ok(PlayOutcome::Cancelled),
            }
        }
        Ok(PlayOutcome::Completed)
    }
}
