//! OpenAI-compatible chat-completion wire types, the target shape for `MessageConverter`
//! and the source shape `StreamProcessor` consumes (§4.3, §4.4).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One message in an OpenAI-shaped `messages` array.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// `"system"`, `"user"`, `"assistant"`, or `"tool"`.
    pub role: String,
    /// Message content; `None` for assistant messages that are pure tool calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    /// Present only on `role: "tool"` messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Present only on assistant messages that invoke tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// A structured tool invocation in an assistant message.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCall {
    /// Tool call id, echoed back by a later `tool` message.
    pub id: String,
    /// Always `"function"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The invoked function.
    pub function: FunctionCall,
}

/// The function half of a [`ToolCall`].
#[derive(Debug, Clone, Serialize)]
pub struct FunctionCall {
    /// Function name.
    pub name: String,
    /// JSON-stringified arguments.
    pub arguments: String,
}

/// A declared function tool, OpenAI shape.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    /// Always `"function"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The function schema.
    pub function: FunctionDefinition,
}

/// The function half of a [`ToolDefinition`].
#[derive(Debug, Clone, Serialize)]
pub struct FunctionDefinition {
    /// Function name.
    pub name: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the function's arguments.
    pub parameters: Value,
}

/// `POST /chat/completions` request body this gateway sends upstream.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    /// Backend model id (already normalized).
    pub model: String,
    /// Converted conversation turns.
    pub messages: Vec<ChatMessage>,
    /// Always `true`; this gateway only streams upstream (§4.4).
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    /// Provider-specific passthrough fields (§4.3a): NIM's `thinking`, `reasoning_split`,
    /// `chat_template_kwargs`, etc., or OpenRouter's `reasoning`.
    #[serde(skip_serializing_if = "Option::is_none", flatten)]
    pub extra_body: Option<Value>,
}

/// One SSE-delivered chunk of a streaming chat completion.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChunk {
    /// Per-choice deltas; this gateway only ever requests `n=1`.
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

/// The single choice carried by a [`ChatCompletionChunk`].
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    /// The incremental content for this chunk.
    #[serde(default)]
    pub delta: ChunkDelta,
    /// Set on the final chunk for this choice.
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// The incremental fields a provider may populate per chunk.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    /// Plain assistant text.
    #[serde(default)]
    pub content: Option<String>,
    /// Reasoning text, under whichever key this provider uses for it.
    #[serde(default, alias = "reasoning")]
    pub reasoning_content: Option<String>,
    /// Structured tool-call fragments, indexed by `tool_calls[i].index`.
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// One fragment of a streaming structured tool call.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallDelta {
    /// Slot index; stable across chunks for the same tool call.
    pub index: usize,
    /// Tool call id, usually only present on the first fragment.
    #[serde(default)]
    pub id: Option<String>,
    /// The function fragment.
    #[serde(default)]
    pub function: Option<FunctionCallDelta>,
}

/// The function half of a [`ToolCallDelta`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionCallDelta {
    /// Name fragment (may be partial or, on some providers, the full name every time).
    #[serde(default)]
    pub name: Option<String>,
    /// Arguments fragment (JSON text, assembled incrementally).
    #[serde(default)]
    pub arguments: Option<String>,
}
