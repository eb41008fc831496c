//! Streaming recognizer wrapper.
//!
//! The wrapped model produces incremental partial text and an endpoint
//! signal governed by its trailing-silence rules. The final result of an
//! utterance is the last partial before `reset`.

use parking_lot::Mutex;

/// Runtime contract for a streaming speech recognizer.
pub trait RecognizerModel: Send {
    /// Feeds one frame of normalized mono samples.
    fn accept(&mut self, samples: &[f32]);
    /// Text recognized so far for the current utterance.
    fn partial(&self) -> String;
    /// Whether the model's endpointing rules fired.
    fn is_endpoint(&self) -> bool;
    /// Clears utterance state.
    fn reset(&mut self);
}

/// Serialized recognizer wrapper.
pub struct StreamingRecognizer {
    model: Mutex<Box<dyn RecognizerModel>>,
}

impl StreamingRecognizer {
    /// Wraps a loaded recognizer model.
    pub fn new(model: Box<dyn RecognizerModel>) -> Self {
        Self {
            model: Mutex::new(model),
        }
    }

    /// Feeds one frame.
    pub fn feed(&self, samples: &[f32]) {
        self.model.lock().accept(samples);
    }

    /// Text recognized so far.
    pub fn partial_result(&self) -> String {
        self.model.lock().partial()
    }

    /// Whether the utterance has ended.
    pub fn is_endpoint(&self) -> bool {
        self.model.lock().is_endpoint()
    }

    /// The utterance's final text: the last partial before reset.
    pub fn final_result(&self) -> String {
        self.model.lock().partial()
    }

    /// Clears utterance state for the next turn.
    pub fn reset(&self) {
        self.model.lock().reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted {
        text: String,
        endpoint: bool,
    }

    impl RecognizerModel for Scripted {
        fn accept(&mut self, samples: &[f32]) {
            if samples.iter().any(|s| *s != 0.0) {
                self.text.push('x');
            } else if !self.text.is_empty() {
                self.endpoint = true;
            }
        }
        fn partial(&self) -> String {
            self.text.clone()
        }
        fn is_endpoint(&self) -> bool {
            self.endpoint
        }
        fn reset(&mut self) {
            self.text.clear();
            self.endpoint = false;
        }
    }

    #[test]
    fn final_result_matches_last_partial() {
        let asr = StreamingRecognizer::new(Box::new(Scripted {
            text: String::new(),
            endpoint: false,
        }));
        asr.feed(&[0.5; 4]);
        asr.feed(&[0.5; 4]);
        assert!(!asr.is_endpoint());
        asr.feed(&[0.0; 4]);
        assert!(asr.is_endpoint());
        assert_eq!(asr.final_result(), asr.partial_result());
        asr.reset();
        assert!(asr.partial_result().is_empty());
        assert!(!asr.is_endpoint());
    }
}
