//! LLM streaming-chat contract.
//!
//! The pipeline talks to any chat backend through [`ChatClient`]: it
//! submits the conversation plus tool schemas and gets back a token stream
//! and exactly one final record carrying the aggregated content and any
//! tool calls. [`openai`] implements the contract for OpenAI-compatible
//! endpoints.

pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::ChatterboxResult;

/// Message role in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The system prompt.
    System,
    /// The human speaking to the assistant.
    User,
    /// The model's replies.
    Assistant,
    /// A tool result answering an assistant tool call.
    Tool,
}

/// One tool invocation requested by the model. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Unique id, echoed back in the tool result message.
    pub id: String,
    /// Registered tool name.
    pub name: String,
    /// Raw JSON argument string, passed through unparsed.
    pub arguments: String,
}

/// One conversation entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who produced the entry.
    pub role: Role,
    /// Text content (empty for pure tool-call messages).
    pub content: String,
    /// Tool calls attached to an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    /// For tool messages: the call id being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For tool messages: the tool's name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    /// Builds a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    /// Builds a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    /// Builds a plain assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Builds an assistant message carrying tool calls.
    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRecord>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
            tool_name: None,
        }
    }

    /// Builds a tool-result message.
    pub fn tool(
        name: impl Into<String>,
        call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
            tool_name: Some(name.into()),
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }
}

/// A registered tool as presented to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human description.
    pub description: String,
    /// JSON schema of the parameters object.
    pub parameters: serde_json::Value,
}

/// The single final record of one chat round.
#[derive(Debug, Clone, Default)]
pub struct ChatOutcome {
    /// Aggregated assistant text.
    pub content: String,
    /// Requested tool calls, in model order. Empty for a plain reply.
    pub tool_calls: Vec<ToolCallRecord>,
}

/// Streaming response handles for one chat round.
pub struct ChatStream {
    /// Content tokens in arrival order; closes when the round ends.
    pub tokens: mpsc::Receiver<String>,
    /// Exactly one final record (or the terminal error).
    pub result: oneshot::Receiver<ChatterboxResult<ChatOutcome>>,
}

/// Streaming chat backend with function calling.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Starts one chat round. A failure to start is returned directly; a
    /// mid-stream failure closes the token stream early and surfaces on
    /// the result channel.
    async fn chat_stream_with_tools(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDefinition>,
        cancel: CancellationToken,
    ) -> ChatterboxResult<ChatStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_message_carries_linkage() {
        let msg = ChatMessage::tool("get_weather", "call_1", "cloudy");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.tool_name.as_deref(), Some("get_weather"));
    }

    #[test]
    fn roles_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        assert_eq!(serde_json::to_string(&Role::Tool).unwrap(), "\"tool\"");
    }

    #[test]
    fn plain_message_skips_empty_tool_fields() {
        let json = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("tool_call_id").is_none());
    }
}
