//! Streaming media substrate: incremental buffer, resumable download,
//! MP3 decode, and the streaming player that wires them together.

pub mod buffer;
mod decode;
pub mod download;
pub mod player;

pub use buffer::{StreamReader, StreamingBuffer};
pub use download::CacheWriter;
pub use player::{MediaPlayback, PlayOptions, StreamPlayer};
