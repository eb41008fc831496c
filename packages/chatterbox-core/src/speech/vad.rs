//! Voice-activity detector wrapper.

use parking_lot::Mutex;

/// Runtime contract for a voice-activity model.
pub trait VadModel: Send {
    /// Feeds one frame of normalized mono samples.
    fn accept(&mut self, samples: &[f32]);
    /// Whether the model currently hears speech.
    fn is_speech(&self) -> bool;
    /// Clears internal state.
    fn reset(&mut self);
}

/// Serialized VAD wrapper.
pub struct VoiceActivityDetector {
    model: Mutex<Box<dyn VadModel>>,
}

impl VoiceActivityDetector {
    /// Wraps a loaded VAD model.
    pub fn new(model: Box<dyn VadModel>) -> Self {
        Self {
            model: Mutex::new(model),
        }
    }

    /// Feeds one frame.
    pub fn feed(&self, samples: &[f32]) {
        self.model.lock().accept(samples);
    }

    /// Whether speech is currently present.
    pub fn is_speech(&self) -> bool {
        self.model.lock().is_speech()
    }

    /// Clears model state.
    pub fn reset(&self) {
        self.model.lock().reset();
    }
}
