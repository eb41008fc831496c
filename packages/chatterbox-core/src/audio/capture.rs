//! Microphone capture through the default cpal input device.
//!
//! The device callback converts whatever sample format the driver hands us
//! to normalized mono f32, slices the result into exact `frame_size` frames,
//! and offers each frame to the shared [`FrameQueue`]. The callback never
//! blocks; backpressure is absorbed by the queue's drop policy.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleRate, StreamConfig};
use parking_lot::Mutex;

use crate::audio::frames::{AudioFrame, FrameQueue};
use crate::audio::pcm;
use crate::error::{ChatterboxError, ChatterboxResult};
use crate::state::AudioConfig;

/// Wrapper to make `cpal::Stream` Send.
///
/// `cpal::Stream` is `!Send` on some platforms due to internal raw pointers,
/// but we only hold it alive - it is never accessed from another thread
/// after creation, only dropped.
pub(crate) struct SendStream(#[allow(dead_code)] pub(crate) cpal::Stream);

// SAFETY: the stream is stored solely to keep the device callback alive;
// all access after construction is the drop at teardown.
unsafe impl Send for SendStream {}

/// Accumulates converted samples and emits exact-size frames.
struct FrameAssembler {
    queue: Arc<FrameQueue>,
    pending: Vec<f32>,
    frame_size: usize,
}

impl FrameAssembler {
    fn push_samples(&mut self, mono: &[f32]) {
        self.pending.extend_from_slice(mono);
        while self.pending.len() >= self.frame_size {
            let rest = self.pending.split_off(self.frame_size);
            let samples = std::mem::replace(&mut self.pending, rest);
            self.queue.push(AudioFrame { samples });
        }
    }
}

/// Microphone capture service.
///
/// Owns the cpal input stream and the producer side of the frame queue.
pub struct AudioCapture {
    config: AudioConfig,
    queue: Arc<FrameQueue>,
    stream: Mutex<Option<SendStream>>,
}

impl AudioCapture {
    /// Capacity of the frame queue: ~2 seconds of audio at the default
    /// 32 ms frame.
    const QUEUE_FRAMES: usize = 64;

    /// Creates the capture service and its frame queue. The device is not
    /// opened until [`start`](Self::start).
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            queue: Arc::new(FrameQueue::new(Self::QUEUE_FRAMES)),
            stream: Mutex::new(None),
        }
    }

    /// The consumer-side handle. There is exactly one consumer: the pipeline.
    pub fn frames(&self) -> Arc<FrameQueue> {
        Arc::clone(&self.queue)
    }

    /// Opens the default input device and starts the callback.
    ///
    /// Device-init and device-start failures are fatal at startup.
    pub fn start(&self) -> ChatterboxResult<()> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| ChatterboxError::Device("no default input device".to_string()))?;
        let supported = device
            .default_input_config()
            .map_err(|e| ChatterboxError::Device(format!("input config: {e}")))?;

        let channels = self.config.channels;
        let stream_config = StreamConfig {
            channels,
            sample_rate: SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let assembler = FrameAssembler {
            queue: Arc::clone(&self.queue),
            pending: Vec::with_capacity(self.config.frame_size * 2),
            frame_size: self.config.frame_size,
        };

        let stream = match supported.sample_format() {
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, assembler)?,
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, assembler)?,
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, assembler)?,
            other => {
                return Err(ChatterboxError::Device(format!(
                    "unsupported input sample format {other:?}"
                )))
            }
        };

        stream
            .play()
            .map_err(|e| ChatterboxError::Device(format!("input start: {e}")))?;
        log::info!(
            "[Capture] Started: {} Hz, {} ch, {} samples/frame",
            self.config.sample_rate,
            channels,
            self.config.frame_size
        );
        *self.stream.lock() = Some(SendStream(stream));
        Ok(())
    }

    /// Pauses the input stream without tearing it down.
    pub fn stop(&self) {
        if let Some(SendStream(stream)) = self.stream.lock().as_ref() {
            if let Err(e) = stream.pause() {
                log::warn!("[Capture] Pause failed: {e}");
            }
        }
    }

    /// Discards all queued frames; returns the discard count.
    pub fn drain(&self) -> usize {
        self.queue.drain()
    }

    /// Drops the stream and closes the frame queue.
    pub fn close(&self) {
        self.stream.lock().take();
        self.queue.close();
        let dropped = self.queue.dropped();
        if dropped > 0 {
            log::info!("[Capture] Closed ({dropped} frames dropped under backpressure)");
        } else {
            log::info!("[Capture] Closed");
        }
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut assembler: FrameAssembler,
) -> ChatterboxResult<cpal::Stream>
where
    T: cpal::SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::new();
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|&s| f32::from_sample(s)));
                let mono = pcm::mix_to_mono(&scratch, channels);
                assembler.push_samples(&mono);
            },
            // Runtime read faults are logged and the stream continues.
            |err| log::warn!("[Capture] Stream error: {err}"),
            None,
        )
        .map_err(|e| ChatterboxError::Device(format!("input open: {e}")))
}
