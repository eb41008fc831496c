//! Streaming MP3 playback: URL or cached file in, speaker out.
//!
//! One player instance allows one active playback; the pipeline is the
//! arbiter that serializes sessions. The network path wires together the
//! streaming buffer, the resumable downloader (with optional tee-to-cache),
//! and the decode task; the cached path decodes straight from the file and
//! supports a start offset for resume-after-pause.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;

use crate::audio::{self, PlayOutcome};
use crate::cache::MusicCache;
use crate::error::{ChatterboxError, ChatterboxResult};
use crate::media::buffer::{StreamReader, StreamingBuffer};
use crate::media::decode::{self, DecodeStats};
use crate::media::download::{self, CacheWriter};

/// Bytes that must be buffered before the decoder is allowed to probe.
const FIRST_BATCH_BYTES: usize = 32 * 1024;

/// Poll interval while waiting for the first batch.
const FIRST_BATCH_POLL: Duration = Duration::from_millis(20);

/// Options for one playback session.
#[derive(Default, Clone)]
pub struct PlayOptions {
    /// Cache handle for the short-circuit and the download tee.
    pub cache: Option<Arc<MusicCache>>,
    /// Cache key of the item being played.
    pub cache_key: Option<String>,
    /// Seconds of audio to discard before playback starts (resume path).
    pub start_seconds: f64,
}

/// Playback seam between the orchestrator/tools and the concrete player.
#[async_trait::async_trait]
pub trait MediaPlayback: Send + Sync {
    /// Plays the MP3 at `url` (cache short-circuit and tee per options).
    async fn play(
        &self,
        url: &str,
        options: PlayOptions,
        parent: &CancellationToken,
    ) -> ChatterboxResult<PlayOutcome>;
    /// Plays a local file starting `start_seconds` in.
    async fn play_file(
        &self,
        path: &Path,
        start_seconds: f64,
        parent: &CancellationToken,
    ) -> ChatterboxResult<PlayOutcome>;
    /// Cancels the active session, if any.
    fn stop(&self);
    /// Seconds played in the current session.
    fn position(&self) -> f64;
    /// True while a session is running.
    fn is_active(&self) -> bool;
}

/// Streaming media player. One active session at a time.
pub struct StreamPlayer {
    client: Client,
    active: Mutex<Option<CancellationToken>>,
    position_secs: Arc<Mutex<f64>>,
}

impl StreamPlayer {
    /// Creates a player over the shared HTTP client.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            active: Mutex::new(None),
            position_secs: Arc::new(Mutex::new(0.0)),
        }
    }

    /// True while a session is running.
    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Seconds of audio delivered to the device in the current session.
    pub fn position(&self) -> f64 {
        *self.position_secs.lock()
    }

    /// Cancels the active session, if any. The `play` call returns
    /// `Cancelled` once every suspend point has observed the token.
    pub fn stop(&self) {
        if let Some(token) = self.active.lock().as_ref() {
            token.cancel();
        }
    }

    /// Plays the MP3 at `url` to completion, cancellation, or error.
    ///
    /// With a cache handle and key in `options`, a cached file short-circuits
    /// the network entirely and a miss tees the download into the cache.
    pub async fn play(
        &self,
        url: &str,
        options: PlayOptions,
        parent: &CancellationToken,
    ) -> ChatterboxResult<PlayOutcome> {
        let token = self.claim(parent)?;
        let result = self.play_inner(url, &options, &token).await;
        self.release();
        result
    }

    /// Plays a local MP3 file starting `start_seconds` in. If the file is
    /// shorter than the offset, playback restarts from the beginning.
    pub async fn play_file(
        &self,
        path: &Path,
        start_seconds: f64,
        parent: &CancellationToken,
    ) -> ChatterboxResult<PlayOutcome> {
        let token = self.claim(parent)?;
        let result = self.play_file_inner(path, start_seconds, &token).await;
        self.release();
        result
    }

    fn claim(&self, parent: &CancellationToken) -> ChatterboxResult<CancellationToken> {
        let mut active = self.active.lock();
        if active.is_some() {
            return Err(ChatterboxError::Internal(
                "playback already active".to_string(),
            ));
        }
        let token = parent.child_token();
        *active = Some(token.clone());
        *self.position_secs.lock() = 0.0;
        Ok(token)
    }

    fn release(&self) {
        self.active.lock().take();
    }

    async fn play_inner(
        &self,
        url: &str,
        options: &PlayOptions,
        token: &CancellationToken,
    ) -> ChatterboxResult<PlayOutcome> {
        // Cache short-circuit.
        if let (Some(cache), Some(key)) = (&options.cache, &options.cache_key) {
            if let Some(path) = cache.lookup(key) {
                log::info!("[Player] Cache hit for {key}");
                let outcome = self
                    .play_file_inner(&path, options.start_seconds, token)
                    .await?;
                if outcome == PlayOutcome::Completed {
                    cache.touch_last_played(key);
                }
                return Ok(outcome);
            }
        }

        let buffer = StreamingBuffer::new();
        let tee = match (&options.cache, &options.cache_key) {
            (Some(cache), Some(key)) if cache.enabled() => {
                match CacheWriter::create(&cache.temp_file_path(key), &cache.file_path(key)).await
                {
                    Ok(writer) => Some(writer),
                    Err(e) => {
                        log::warn!("[Player] Cache tee unavailable: {e}");
                        None
                    }
                }
            }
            _ => None,
        };

        // The downloader gets its own scope so a decoder failure can stop
        // the transfer without cancelling the whole playback token.
        let download_token = token.child_token();
        let download = tokio::spawn(download::run_download(
            self.client.clone(),
            url.to_string(),
            Arc::clone(&buffer),
            tee,
            download_token.clone(),
        ));

        // Pre-buffer before letting the decoder probe the stream.
        loop {
            if buffer.len() >= FIRST_BATCH_BYTES || buffer.is_finished() {
                break;
            }
            tokio::select! {
                () = token.cancelled() => {
                    buffer.cancel();
                    let _ = download.await;
                    return Ok(PlayOutcome::Cancelled);
                }
                () = tokio::time::sleep(FIRST_BATCH_POLL) => {}
            }
        }

        let decoded = match decode::start(Box::new(StreamReader::new(Arc::clone(&buffer))), 0.0, token.clone()).await {
            Ok(d) => d,
            Err(ChatterboxError::Cancelled) => {
                let _ = download.await;
                return Ok(PlayOutcome::Cancelled);
            }
            Err(e) => {
                download_token.cancel();
                buffer.cancel();
                let _ = download.await;
                return Err(e);
            }
        };

        let result = self.play_decoded(decoded, token).await;
        if !matches!(result, Ok((PlayOutcome::Completed, _))) {
            download_token.cancel();
            buffer.cancel();
        }
        let _ = download.await;
        result.map(|(outcome, _)| outcome)
    }

    async fn play_file_inner(
        &self,
        path: &Path,
        start_seconds: f64,
        token: &CancellationToken,
    ) -> ChatterboxResult<PlayOutcome> {
        let file = std::fs::File::open(path)
            .map_err(|e| ChatterboxError::Cache(format!("open {}: {e}", path.display())))?;
        let decoded = decode::start(Box::new(file), start_seconds, token.clone()).await?;
        let (outcome, stats) = self.play_decoded(decoded, token).await?;

        // The offset consumed the entire file: rewind and play from the top.
        if outcome == PlayOutcome::Completed && start_seconds > 0.0 && stats.emitted_samples == 0
        {
            log::info!(
                "[Player] Start offset past end of {}, rewinding",
                path.display()
            );
            let file = std::fs::File::open(path)
                .map_err(|e| ChatterboxError::Cache(format!("open {}: {e}", path.display())))?;
            let decoded = decode::start(Box::new(file), 0.0, token.clone()).await?;
            return Ok(self.play_decoded(decoded, token).await?.0);
        }
        Ok(outcome)
    }

    /// Preloads one chunk, opens the output device at the decoded rate, and
    /// drives the device callback from the chunk channel (zero-fill on
    /// underrun, done on channel close).
    async fn play_decoded(
        &self,
        decoded: decode::DecodedStream,
        token: &CancellationToken,
    ) -> ChatterboxResult<(PlayOutcome, DecodeStats)> {
        let decode::DecodedStream {
            sample_rate,
            mut chunks,
            task,
        } = decoded;

        // Pre-buffer-to-play latency floor: one chunk before the device opens.
        let first = tokio::select! {
            () = token.cancelled() => {
                drop(chunks);
                let _ = task.await;
                return Ok((PlayOutcome::Cancelled, DecodeStats::default()));
            }
            chunk = chunks.recv() => chunk,
        };
        let Some(first) = first else {
            // Channel closed with no audio: either an empty stream or a
            // decoder failure; the task result tells us which.
            let stats = match task.await {
                Ok(result) => result?,
                Err(e) => {
                    return Err(ChatterboxError::Internal(format!(
                        "decoder task panicked: {e}"
                    )))
                }
            };
            return Ok((PlayOutcome::Completed, stats));
        };

        let done = Arc::new(AtomicBool::new(false));
        let position = Arc::clone(&self.position_secs);
        let mut current: Vec<f32> = first;
        let mut cursor = 0usize;
        let mut played: u64 = 0;
        let mut exhausted = false;

        let source = move |out: &mut [f32]| -> bool {
            let mut written = 0usize;
            while written < out.len() {
                if cursor >= current.len() {
                    match chunks.try_recv() {
                        Ok(next) => {
                            current = next;
                            cursor = 0;
                            continue;
                        }
                        // Underrun: leave the rest of the buffer zeroed.
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            exhausted = true;
                            break;
                        }
                    }
                }
                let take = (out.len() - written).min(current.len() - cursor);
                out[written..written + take].copy_from_slice(&current[cursor..cursor + take]);
                written += take;
                cursor += take;
            }
            played += written as u64;
            *position.lock() = played as f64 / f64::from(sample_rate);
            !exhausted
        };

        let stream = audio::open_output(sample_rate, source, Arc::clone(&done))?;
        let outcome = audio::wait_for_completion(&done, token).await;
        drop(stream);

        let stats = match task.await {
            Ok(Ok(stats)) => stats,
            Ok(Err(ChatterboxError::Cancelled)) => DecodeStats::default(),
            Ok(Err(e)) => {
                if outcome == PlayOutcome::Cancelled {
                    DecodeStats::default()
                } else {
                    return Err(e);
                }
            }
            Err(e) => {
                return Err(ChatterboxError::Internal(format!(
                    "decoder task panicked: {e}"
                )))
            }
        };
        Ok((outcome, stats))
    }
}

#[async_trait::async_trait]
impl MediaPlayback for StreamPlayer {
    async fn play(
        &self,
        url: &str,
        options: PlayOptions,
        parent: &CancellationToken,
    ) -> ChatterboxResult<PlayOutcome> {
        StreamPlayer::play(self, url, options, parent).await
    }
    async fn play_file(
        &self,
        path: &Path,
        start_seconds: f64,
        parent: &CancellationToken,
    ) -> ChatterboxResult<PlayOutcome> {
        StreamPlayer::play_file(self, path, start_seconds, parent).await
    }
    fn stop(&self) {
        StreamPlayer::stop(self);
    }
    fn position(&self) -> f64 {
        StreamPlayer::position(self)
    }
    fn is_active(&self) -> bool {
        StreamPlayer::is_active(self)
    }
}
