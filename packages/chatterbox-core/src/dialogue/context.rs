//! Conversation context: the bounded message log behind every LLM round.
//!
//! One system prompt, then an ordered run of non-system messages capped at
//! `max_history`. Truncation never strands a tool result from the
//! assistant message that called for it: after dropping the oldest entry,
//! any tool messages left at the front go with it.

use parking_lot::Mutex;

use crate::llm::{ChatMessage, Role, ToolCallRecord};

struct ContextInner {
    messages: Vec<ChatMessage>,
    speaker: String,
    speaker_prefs: String,
}

/// Bounded, speaker-aware conversation log.
pub struct Conversation {
    system_prompt: String,
    max_history: usize,
    inner: Mutex<ContextInner>,
}

impl Conversation {
    /// Creates an empty conversation.
    pub fn new(system_prompt: impl Into<String>, max_history: usize) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            max_history: max_history.max(1),
            inner: Mutex::new(ContextInner {
                messages: Vec::new(),
                speaker: String::new(),
                speaker_prefs: String::new(),
            }),
        }
    }

    /// Appends a user message.
    pub fn add_user(&self, text: impl Into<String>) {
        self.push(ChatMessage::user(text));
    }

    /// Appends a plain assistant message.
    pub fn add_assistant(&self, text: impl Into<String>) {
        self.push(ChatMessage::assistant(text));
    }

    /// Appends an assistant message carrying tool calls.
    pub fn add_assistant_with_tool_calls(&self, tool_calls: Vec<ToolCallRecord>) {
        self.push(ChatMessage::assistant_with_tool_calls("", tool_calls));
    }

    /// Appends a tool result.
    pub fn add_tool(
        &self,
        name: impl Into<String>,
        call_id: impl Into<String>,
        result: impl Into<String>,
    ) {
        self.push(ChatMessage::tool(name, call_id, result));
    }

    /// Sets the identified speaker and their preferences.
    pub fn set_speaker(&self, name: impl Into<String>, preferences: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.speaker = name.into();
        inner.speaker_prefs = preferences.into();
    }

    /// The current speaker name (empty when unknown).
    pub fn speaker(&self) -> String {
        self.inner.lock().speaker.clone()
    }

    /// Snapshot for one LLM round: the system message (with any speaker
    /// annotation folded in) followed by the bounded history.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        let inner = self.inner.lock();
        let mut system = self.system_prompt.clone();
        if !inner.speaker.is_empty() {
            system.push_str(&format!("\nCurrent speaker: {}.", inner.speaker));
            if !inner.speaker_prefs.is_empty() {
                system.push_str(&format!(" Preferences: {}.", inner.speaker_prefs));
            }
        }
        let mut messages = Vec::with_capacity(inner.messages.len() + 1);
        messages.push(ChatMessage::system(system));
        messages.extend(inner.messages.iter().cloned());
        messages
    }

    /// Number of non-system messages retained.
    pub fn len(&self) -> usize {
        self.inner.lock().messages.len()
    }

    /// True when no non-system messages are retained.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().messages.is_empty()
    }

    fn push(&self, message: ChatMessage) {
        let mut inner = self.inner.lock();
        inner.messages.push(message);
        // Drop oldest entries past the cap, keeping tool results glued to
        // their assistant parent.
        while inner.messages.len() > self.max_history {
            inner.messages.remove(0);
            while inner
                .messages
                .first()
                .is_some_and(|m| m.role == Role::Tool)
            {
                inner.messages.remove(0);
            }
        }
    }
}
