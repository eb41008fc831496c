//! Dialogue state machine and conversation context.

pub mod context;
pub mod machine;

pub use context::Conversation;
pub use machine::{DialogueState, StateMachine};
