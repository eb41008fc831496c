//! Chatterbox Core - library for the Chatterbox voice assistant.
//!
//! This crate provides the realtime conversational pipeline of Chatterbox,
//! an embedded voice assistant: wake word in, transcribed utterance to an
//! LLM with tool schemas, tools executed, reply spoken - with streaming
//! music playback as a first-class output.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`audio`]: Microphone capture, sample conversion, device output
//! - [`media`]: Streaming buffer, resumable download, MP3 decode, player
//! - [`cache`]: Size-bounded content-addressed MP3 store
//! - [`speech`]: Wake/VAD/ASR wrappers, synthesis, speaker identification
//! - [`llm`]: Streaming chat contract and the OpenAI-compatible client
//! - [`tools`]: Tool registry and the built-in tool suite
//! - [`dialogue`]: Conversation context and the dialogue state machine
//! - [`pipeline`]: The orchestrator that routes frames and drives turns
//! - [`playlist`]: Play queue with sequence/loop/single modes
//! - [`bootstrap`]: Composition root
//! - [`error`]: Centralized error types
//!
//! # Abstraction traits
//!
//! Model inference and external catalogs stay outside the core. The
//! application wires them in through trait objects:
//!
//! - [`KeywordModel`](speech::KeywordModel), [`VadModel`](speech::VadModel),
//!   [`RecognizerModel`](speech::RecognizerModel): realtime model runtimes
//! - [`TtsEngine`](speech::TtsEngine): speech synthesis
//! - [`SpeakerIdentifier`](speech::SpeakerIdentifier): voiceprints
//! - [`ChatClient`](llm::ChatClient): the LLM transport
//! - [`MusicProvider`](tools::music::MusicProvider): the music catalog
//! - [`MediaPlayback`](media::MediaPlayback): the streaming player seam

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod audio;
pub mod bootstrap;
pub mod cache;
pub mod dialogue;
pub mod error;
pub mod llm;
pub mod media;
pub mod pipeline;
pub mod playlist;
pub mod speech;
pub mod state;
pub mod tools;

// Re-export commonly used types at the crate root
pub use audio::{AudioCapture, AudioFrame, ClipPlayer, FrameQueue, PlayOutcome};
pub use bootstrap::{bootstrap_services, BootstrappedServices, EngineSet};
pub use cache::{CacheEntry, MusicCache};
pub use dialogue::{Conversation, DialogueState, StateMachine};
pub use error::{ChatterboxError, ChatterboxResult};
pub use llm::{ChatClient, ChatMessage, ChatOutcome, ChatStream, Role, ToolCallRecord, ToolDefinition};
pub use media::{MediaPlayback, PlayOptions, StreamPlayer, StreamingBuffer};
pub use pipeline::{Pipeline, PipelineConfig, PipelineParts};
pub use playlist::{PlayMode, Playlist, PlaylistItem};
pub use speech::{Speech, SpeakerProfile, TtsAudio, TtsEngine};
pub use state::Config;
pub use tools::{Tool, ToolRegistry};
