//! Audio capture, sample conversion, and device output.

pub mod capture;
pub mod clip;
pub mod frames;
mod output;
pub mod pcm;

pub use capture::AudioCapture;
pub use clip::ClipPlayer;
pub use frames::{AudioFrame, FrameQueue};
pub use output::PlayOutcome;

pub(crate) use output::{open_output, wait_for_completion};
