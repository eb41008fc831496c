//! Short-clip playback for synthesized speech.
//!
//! Plays one finite buffer of mono samples at a given rate to completion or
//! cancellation. Each call opens the output device fresh; clips are short
//! (one TTS chunk) so the open cost is irrelevant next to synthesis.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::audio::output::{self, PlayOutcome};
use crate::error::ChatterboxResult;

/// Player for finite sample buffers.
#[derive(Default)]
pub struct ClipPlayer;

impl ClipPlayer {
    /// Creates a clip player.
    pub fn new() -> Self {
        Self
    }

    /// Plays `samples` at `sample_rate` to completion or cancellation.
    ///
    /// An empty buffer completes immediately.
    pub async fn play(
        &self,
        samples: Vec<f32>,
        sample_rate: u32,
        cancel: &CancellationToken,
    ) -> ChatterboxResult<PlayOutcome> {
        if samples.is_empty() {
            return Ok(PlayOutcome::Completed);
        }
        if cancel.is_cancelled() {
            return Ok(PlayOutcome::Cancelled);
        }

        let done = Arc::new(AtomicBool::new(false));
        let mut cursor = 0usize;
        let source = move |out: &mut [f32]| -> bool {
            let remaining = samples.len() - cursor;
            let take = remaining.min(out.len());
            out[..take].copy_from_slice(&samples[cursor..cursor + take]);
            cursor += take;
            cursor < samples.len()
        };

        let stream = output::open_output(sample_rate, source, Arc::clone(&done))?;
        let outcome = output::wait_for_completion(&done, cancel).await;
        drop(stream);
        Ok(outcome)
    }
}
