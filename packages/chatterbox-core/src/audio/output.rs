//! Shared cpal output-stream plumbing.
//!
//! Both the short-clip player and the streaming media player drive the
//! default output device the same way: a mono f32 source callback is
//! interleaved across however many channels the device wants, a `done` flag
//! flips when the source is exhausted, and the caller polls completion
//! against a cancellation token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleRate, StreamConfig};
use tokio_util::sync::CancellationToken;

use crate::audio::capture::SendStream;
use crate::error::{ChatterboxError, ChatterboxResult};

/// How a playback session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// The source was played to its end.
    Completed,
    /// The session was cancelled through its scope.
    Cancelled,
}

/// Polling interval for completion/cancellation checks.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A mono sample source for the output callback.
///
/// `fill` must write the whole slice (zero-padding any tail it cannot fill)
/// and return `false` once the source is exhausted; the slice contents of
/// that final call are still played.
pub(crate) trait MonoSource: Send + 'static {
    fn fill(&mut self, out: &mut [f32]) -> bool;
}

impl<F> MonoSource for F
where
    F: FnMut(&mut [f32]) -> bool + Send + 'static,
{
    fn fill(&mut self, out: &mut [f32]) -> bool {
        self(out)
    }
}

/// Opens the default output device at `sample_rate` and drives `source`
/// through it until exhaustion, setting `done` when the source reports it.
pub(crate) fn open_output(
    sample_rate: u32,
    source: impl MonoSource,
    done: Arc<AtomicBool>,
) -> ChatterboxResult<SendStream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| ChatterboxError::Device("no default output device".to_string()))?;
    let supported = device
        .default_output_config()
        .map_err(|e| ChatterboxError::Device(format!("output config: {e}")))?;

    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => build_output::<f32>(&device, &config, source, done)?,
        cpal::SampleFormat::I16 => build_output::<i16>(&device, &config, source, done)?,
        cpal::SampleFormat::U16 => build_output::<u16>(&device, &config, source, done)?,
        other => {
            return Err(ChatterboxError::Device(format!(
                "unsupported output sample format {other:?}"
            )))
        }
    };
    stream
        .play()
        .map_err(|e| ChatterboxError::Device(format!("output start: {e}")))?;
    Ok(SendStream(stream))
}

fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut source: impl MonoSource,
    done: Arc<AtomicBool>,
) -> ChatterboxResult<cpal::Stream>
where
    T: cpal::SizedSample + FromSample<f32>,
{
    let channels = (config.channels as usize).max(1);
    let mut mono: Vec<f32> = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                data.fill(T::from_sample(0.0));
                if done.load(Ordering::Acquire) {
                    return;
                }
                let frames = data.len() / channels;
                mono.resize(frames, 0.0);
                mono.fill(0.0);
                let more = source.fill(&mut mono);
                for (out, &value) in data.chunks_mut(channels).zip(mono.iter()) {
                    out.fill(T::from_sample(value));
                }
                if !more {
                    done.store(true, Ordering::Release);
                }
            },
            |err| log::warn!("[Output] Stream error: {err}"),
            None,
        )
        .map_err(|e| ChatterboxError::Device(format!("output open: {e}")))
}

/// Waits until `done` flips or the scope is cancelled.
pub(crate) async fn wait_for_completion(
    done: &AtomicBool,
    cancel: &CancellationToken,
) -> PlayOutcome {
    loop {
        if done.load(Ordering::Acquire) {
            return PlayOutcome::Completed;
        }
        tokio::select! {
            () = cancel.cancelled() => return PlayOutcome::Cancelled,
            () = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completion_wins_over_pending_cancel() {
        let done = AtomicBool::new(true);
        let cancel = CancellationToken::new();
        assert_eq!(
            wait_for_completion(&done, &cancel).await,
            PlayOutcome::Completed
        );
    }

    #[tokio::test]
    async fn cancellation_unblocks_the_wait() {
        let done = AtomicBool::new(false);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            wait_for_completion(&done, &cancel).await,
            PlayOutcome::Cancelled
        );
    }
}
