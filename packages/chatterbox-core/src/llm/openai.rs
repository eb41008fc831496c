//! OpenAI-compatible streaming chat-completions client.
//!
//! Speaks the `/v1/chat/completions` wire format with `stream: true`:
//! server-sent `data:` lines carrying delta chunks, tool-call fragments
//! merged by index, and a `[DONE]` sentinel. One request produces one
//! [`ChatStream`].

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{ChatterboxError, ChatterboxResult};
use crate::llm::{ChatClient, ChatMessage, ChatOutcome, ChatStream, Role, ToolDefinition};
use crate::state::LlmConfig;

/// Depth of the token channel; the tool loop drains continuously.
const TOKEN_CHANNEL_CAPACITY: usize = 64;

/// OpenAI-compatible chat client over the shared HTTP connection pool.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    /// Creates a client for the configured endpoint.
    pub fn new(http: reqwest::Client, config: &LlmConfig) -> Self {
        Self {
            http,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    fn build_body(&self, messages: &[ChatMessage], tools: &[ToolDefinition]) -> Value {
        let messages: Vec<Value> = messages.iter().map(wire_message).collect();
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(wire_tool).collect());
        }
        body
    }
}

/// Serializes one conversation entry into the wire shape.
fn wire_message(message: &ChatMessage) -> Value {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };
    let mut wire = json!({ "role": role, "content": message.content });
    if !message.tool_calls.is_empty() {
        wire["tool_calls"] = Value::Array(
            message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": { "name": call.name, "arguments": call.arguments },
                    })
                })
                .collect(),
        );
    }
    if let Some(id) = &message.tool_call_id {
        wire["tool_call_id"] = json!(id);
    }
    if let Some(name) = &message.tool_name {
        wire["name"] = json!(name);
    }
    wire
}

fn wire_tool(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        },
    })
}

// ─── Wire chunk shapes ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Deserialize, Default)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Tool-call fragments merged by stream index.
#[derive(Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

struct Aggregator {
    content: String,
    calls: Vec<PartialCall>,
}

impl Aggregator {
    fn new() -> Self {
        Self {
            content: String::new(),
            calls: Vec::new(),
        }
    }

    fn apply(&mut self, delta: Delta) -> Option<String> {
        for fragment in delta.tool_calls {
            while self.calls.len() <= fragment.index {
                self.calls.push(PartialCall::default());
            }
            let call = &mut self.calls[fragment.index];
            if let Some(id) = fragment.id {
                call.id = id;
            }
            if let Some(function) = fragment.function {
                if let Some(name) = function.name {
                    call.name = name;
                }
                if let Some(arguments) = function.arguments {
                    call.arguments.push_str(&arguments);
                }
            }
        }
        if let Some(token) = delta.content {
            if !token.is_empty() {
                self.content.push_str(&token);
                return Some(token);
            }
        }
        None
    }

    fn finish(self) -> ChatOutcome {
        ChatOutcome {
            content: self.content,
            tool_calls: self
                .calls
                .into_iter()
                .filter(|c| !c.name.is_empty())
                .map(|c| crate::llm::ToolCallRecord {
                    id: c.id,
                    name: c.name,
                    arguments: c.arguments,
                })
                .collect(),
        }
    }
}

/// Extracts the payload of one SSE line, if it carries one.
fn sse_payload(line: &str) -> Option<&str> {
    line.trim().strip_prefix("data:").map(str::trim)
}

#[async_trait]
impl ChatClient for OpenAiClient {
    async fn chat_stream_with_tools(
        &self,
        messages: Vec<ChatMessage>,
        tools: Vec<ToolDefinition>,
        cancel: CancellationToken,
    ) -> ChatterboxResult<ChatStream> {
        let body = self.build_body(&messages, &tools);
        let mut request = self.http.post(&self.api_url).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = tokio::select! {
            () = cancel.cancelled() => return Err(ChatterboxError::Cancelled),
            result = request.send() => result.map_err(|e| ChatterboxError::Llm(format!("request failed: {e}")))?,
        };
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ChatterboxError::Llm(format!(
                "HTTP {status}: {}",
                detail.chars().take(200).collect::<String>()
            )));
        }

        let (token_tx, token_rx) = mpsc::channel(TOKEN_CHANNEL_CAPACITY);
        let (result_tx, result_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut aggregator = Aggregator::new();
            let mut line_buf = String::new();

            loop {
                let chunk = tokio::select! {
                    () = cancel.cancelled() => {
                        let _ = result_tx.send(Err(ChatterboxError::Cancelled));
                        return;
                    }
                    chunk = stream.next() => chunk,
                };
                let bytes = match chunk {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        let _ = result_tx
                            .send(Err(ChatterboxError::Llm(format!("stream failed: {e}"))));
                        return;
                    }
                    // Stream ended without [DONE]; treat what we have as final.
                    None => break,
                };
                line_buf.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(newline) = line_buf.find('\n') {
                    let line = line_buf[..newline].to_string();
                    line_buf.drain(..=newline);
                    let Some(payload) = sse_payload(&line) else {
                        continue;
                    };
                    if payload == "[DONE]" {
                        let _ = result_tx.send(Ok(aggregator.finish()));
                        return;
                    }
                    match serde_json::from_str::<StreamChunk>(payload) {
                        Ok(chunk) => {
                            for choice in chunk.choices {
                                if let Some(token) = aggregator.apply(choice.delta) {
                                    // Receiver gone: keep aggregating for the
                                    // final record anyway.
                                    let _ = token_tx.send(token).await;
                                }
                            }
                        }
                        Err(e) => log::debug!("[LLM] Skipping unparseable chunk: {e}"),
                    }
                }
            }
            let _ = result_tx.send(Ok(aggregator.finish()));
        });

        Ok(ChatStream {
            tokens: token_rx,
            result: result_rx,
        })
    }
}
