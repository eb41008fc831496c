//! Wake-word detector wrapper.
//!
//! Wraps whichever keyword-spotting runtime the application loads behind
//! the [`KeywordModel`] contract, serializing access and reporting only the
//! rising edge of a detection.

use parking_lot::Mutex;

/// Runtime contract for a keyword-spotting model.
///
/// `accept` consumes one frame of normalized mono samples and returns true
/// while the model considers the keyword active in its window.
pub trait KeywordModel: Send {
    /// Feeds one frame; returns whether the keyword is currently spotted.
    fn accept(&mut self, samples: &[f32]) -> bool;
    /// Clears internal state.
    fn reset(&mut self);
}

struct WakeInner {
    model: Box<dyn KeywordModel>,
    was_active: bool,
}

/// Serialized wake detector with rising-edge semantics.
pub struct WakeDetector {
    inner: Mutex<WakeInner>,
}

impl WakeDetector {
    /// Wraps a loaded keyword model.
    pub fn new(model: Box<dyn KeywordModel>) -> Self {
        Self {
            inner: Mutex::new(WakeInner {
                model,
                was_active: false,
            }),
        }
    }

    /// Feeds one frame and returns true exactly once per keyword spot
    /// (the rising edge), resetting the model afterwards.
    pub fn detect(&self, samples: &[f32]) -> bool {
        let mut inner = self.inner.lock();
        let active = inner.model.accept(samples);
        let edge = active && !inner.was_active;
        inner.was_active = active;
        if edge {
            inner.model.reset();
            inner.was_active = false;
        }
        edge
    }

    /// Clears model and edge state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.model.reset();
        inner.was_active = false;
    }
}
