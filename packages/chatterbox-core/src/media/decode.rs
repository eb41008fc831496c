//! MP3 decode task: compressed source in, fixed-size mono float chunks out.
//!
//! Initialization (container probe + codec setup) and the decode loop both
//! run on a blocking task because the source may be a [`StreamReader`]
//! whose reads park until the downloader appends more bytes. The sample
//! rate is handed back through a oneshot as soon as the probe finishes so
//! the player can open the output device while decoding proceeds.
//!
//! [`StreamReader`]: crate::media::buffer::StreamReader

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::audio::pcm;
use crate::error::{ChatterboxError, ChatterboxResult};

/// Mono samples per emitted chunk.
pub(crate) const CHUNK_SAMPLES: usize = 2048;

/// Bounded depth of the chunk channel (the pre-buffer).
pub(crate) const CHUNK_CHANNEL_CAPACITY: usize = 8;

/// Counters the player uses to detect a start-offset past the end of file.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct DecodeStats {
    /// Mono samples actually emitted (after any skip).
    pub emitted_samples: u64,
}

/// A running decode session.
pub(crate) struct DecodedStream {
    /// Sample rate reported by the codec.
    pub sample_rate: u32,
    /// Fixed-size mono chunks; closes when the stream is exhausted.
    pub chunks: mpsc::Receiver<Vec<f32>>,
    /// Completes with decode statistics or the terminal error.
    pub task: JoinHandle<ChatterboxResult<DecodeStats>>,
}

/// Probes `source` as MP3 and spawns the decode loop.
///
/// `skip_seconds` of decoded audio are discarded before the first chunk is
/// emitted (the seek-to-position path for cached files).
pub(crate) async fn start(
    source: Box<dyn MediaSource>,
    skip_seconds: f64,
    cancel: CancellationToken,
) -> ChatterboxResult<DecodedStream> {
    let (rate_tx, rate_rx) = oneshot::channel();
    let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);

    let task = tokio::task::spawn_blocking(move || {
        decode_loop(source, skip_seconds, rate_tx, chunk_tx, cancel)
    });

    match rate_rx.await {
        Ok(sample_rate) => Ok(DecodedStream {
            sample_rate,
            chunks: chunk_rx,
            task,
        }),
        // The probe failed before reporting a rate; surface its error.
        Err(_) => {
            let result = task
                .await
                .map_err(|e| ChatterboxError::Internal(format!("decoder task panicked: {e}")))?;
            match result {
                Err(e) => Err(e),
                Ok(_) => Err(ChatterboxError::Decoder(
                    "decoder ended before reporting a sample rate".to_string(),
                )),
            }
        }
    }
}

fn map_io_error(err: std::io::Error) -> ChatterboxError {
    if err.kind() == std::io::ErrorKind::Interrupted {
        ChatterboxError::Cancelled
    } else {
        ChatterboxError::Decoder(format!("source error: {err}"))
    }
}

fn decode_loop(
    source: Box<dyn MediaSource>,
    skip_seconds: f64,
    rate_tx: oneshot::Sender<u32>,
    chunk_tx: mpsc::Sender<Vec<f32>>,
    cancel: CancellationToken,
) -> ChatterboxResult<DecodeStats> {
    let stream = MediaSourceStream::new(source, MediaSourceStreamOptions::default());
    let mut hint = Hint::new();
    hint.with_extension("mp3");

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| match e {
            SymphoniaError::IoError(io) => map_io_error(io),
            other => ChatterboxError::Decoder(format!("probe failed: {other}")),
        })?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| ChatterboxError::Decoder("no decodable track".to_string()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| ChatterboxError::Decoder("unknown sample rate".to_string()))?;
    let mut decoder: Box<dyn Decoder> = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| ChatterboxError::Decoder(format!("codec init: {e}")))?;

    // The player is waiting on this to open the output device.
    let _ = rate_tx.send(sample_rate);

    let mut skip_remaining = (skip_seconds * f64::from(sample_rate)).round() as u64;
    let mut stats = DecodeStats::default();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut pending: Vec<f32> = Vec::with_capacity(CHUNK_SAMPLES * 2);

    loop {
        if cancel.is_cancelled() {
            return Err(ChatterboxError::Cancelled);
        }
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(io))
                if io.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::IoError(io)) => return Err(map_io_error(io)),
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(ChatterboxError::Decoder(format!("demux failed: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            // Skip over a malformed frame; the stream usually recovers.
            Err(SymphoniaError::DecodeError(e)) => {
                log::debug!("[Decode] Skipping bad frame: {e}");
                continue;
            }
            Err(SymphoniaError::IoError(io)) => return Err(map_io_error(io)),
            Err(e) => return Err(ChatterboxError::Decoder(format!("decode failed: {e}"))),
        };

        let spec = *decoded.spec();
        let needed = decoded.capacity() as u64;
        let too_small = sample_buf
            .as_ref()
            .map_or(true, |b| (b.capacity() as u64) < needed * spec.channels.count() as u64);
        if too_small {
            sample_buf = Some(SampleBuffer::new(needed, spec));
        }
        let Some(buf) = sample_buf.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);
        let mut mono = pcm::mix_to_mono(buf.samples(), spec.channels.count());

        if skip_remaining > 0 {
            let drop_now = skip_remaining.min(mono.len() as u64) as usize;
            mono.drain(..drop_now);
            skip_remaining -= drop_now as u64;
            if mono.is_empty() {
                continue;
            }
        }

        pending.extend_from_slice(&mono);
        while pending.len() >= CHUNK_SAMPLES {
            let rest = pending.split_off(CHUNK_SAMPLES);
            let chunk = std::mem::replace(&mut pending, rest);
            stats.emitted_samples += chunk.len() as u64;
            if chunk_tx.blocking_send(chunk).is_err() {
                // Receiver gone: playback was stopped.
                return Err(ChatterboxError::Cancelled);
            }
        }
    }

    // Flush the partial tail chunk.
    if !pending.is_empty() {
        stats.emitted_samples += pending.len() as u64;
        if chunk_tx.blocking_send(pending).is_err() {
            return Err(ChatterboxError::Cancelled);
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::buffer::{StreamReader, StreamingBuffer};
    use std::sync::Arc;

    #[tokio::test]
    async fn garbage_input_fails_the_probe() {
        let buffer = StreamingBuffer::new();
        buffer.append(&[0u8; 4096]);
        buffer.finish();
        let result = start(
            Box::new(StreamReader::new(Arc::clone(&buffer))),
            0.0,
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(ChatterboxError::Decoder(_))));
    }

    #[tokio::test]
    async fn cancelled_source_reports_cancellation() {
        let buffer = StreamingBuffer::new();
        buffer.cancel();
        let result = start(
            Box::new(StreamReader::new(Arc::clone(&buffer))),
            0.0,
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(ChatterboxError::Cancelled)));
    }
}
