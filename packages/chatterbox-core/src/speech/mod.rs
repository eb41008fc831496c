//! Speech components: wake word, voice activity, recognition, synthesis,
//! and speaker identification.

pub mod asr;
pub mod tts;
pub mod vad;
pub mod voiceprint;
pub mod wake;

pub use asr::{RecognizerModel, StreamingRecognizer};
pub use tts::{split_text, AudioSink, Speech, TtsAudio, TtsEngine, MAX_CHUNK_CHARS};
pub use vad::{VadModel, VoiceActivityDetector};
pub use voiceprint::{SpeakerIdentifier, SpeakerProfile};
pub use wake::{KeywordModel, WakeDetector};
