//! Anthropic-shape wire types for `POST /v1/messages` (§3 MessageRequest).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Either a bare string or a list of content blocks — Anthropic's `content` field shape.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum StringOrBlocks {
    /// A plain string, treated as a single `text` block.
    Text(String),
    /// An explicit list of content blocks.
    Blocks(Vec<ContentBlock>),
}

impl StringOrBlocks {
    /// Normalize into an owned vector of blocks, wrapping a bare string as one `text` block.
    pub fn into_blocks(self) -> Vec<ContentBlock> {
        match self {
            StringOrBlocks::Text(text) => vec![ContentBlock::Text { text }],
            StringOrBlocks::Blocks(blocks) => blocks,
        }
    }
}

/// A single Anthropic content block (§3 block variants).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text itself.
        text: String,
    },
    /// An inline image.
    Image {
        /// Image payload.
        source: ImageSource,
    },
    /// An assistant-emitted tool invocation.
    ToolUse {
        /// Synthetic or model-issued tool call id.
        id: String,
        /// Tool name as declared in the request's `tools`.
        name: String,
        /// Tool arguments, already-parsed JSON.
        input: Value,
    },
    /// A user-supplied result for a prior `tool_use`.
    ToolResult {
        /// The `tool_use.id` this result answers.
        tool_use_id: String,
        /// Result payload; Anthropic allows either a string or block list here too.
        #[serde(default)]
        content: Option<StringOrBlocks>,
        /// Whether the tool invocation itself errored.
        #[serde(default)]
        is_error: bool,
    },
    /// Extended reasoning emitted by the assistant in a prior turn.
    Thinking {
        /// The reasoning text.
        thinking: String,
    },
}

/// Inline image source (only base64 is in scope; §4.3 Images).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageSource {
    /// Always `"base64"` in practice; other values pass through unconverted.
    #[serde(rename = "type")]
    pub kind: String,
    /// e.g. `"image/png"`.
    pub media_type: String,
    /// Base64-encoded image bytes.
    pub data: String,
}

/// One message in the Anthropic `messages` array.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    /// `"user"` or `"assistant"`.
    pub role: String,
    /// Message content; a bare string or block list.
    pub content: StringOrBlocks,
}

/// A declared tool (§3 `tools[{name,description,input_schema}]`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Tool {
    /// Tool name, referenced by `tool_use.name` / `tool_choice`.
    pub name: String,
    /// Human-readable description passed to the model.
    #[serde(default)]
    pub description: Option<String>,
    /// JSON Schema describing the tool's arguments.
    pub input_schema: Value,
}

/// Tool-choice directive (§4.3 tool_choice).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    /// The model may call zero or more tools.
    Auto,
    /// The model must call at least one tool.
    Any,
    /// The model must call the named tool.
    Tool {
        /// The tool it must call.
        name: String,
    },
}

/// Extended-thinking request toggle (§3 `thinking{enabled}`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThinkingConfig {
    /// Whether the model should emit a reasoning trace.
    pub enabled: bool,
}

/// `POST /v1/messages` request body (§3 MessageRequest).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessagesRequest {
    /// Free-form model id, normalized before dispatch (§4.5).
    pub model: String,
    /// Conversation turns.
    pub messages: Vec<Message>,
    /// System prompt, as a bare string or a list of text blocks.
    #[serde(default)]
    pub system: Option<StringOrBlocks>,
    /// Maximum tokens to generate.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Nucleus sampling parameter.
    #[serde(default)]
    pub top_p: Option<f64>,
    /// Top-k sampling parameter.
    #[serde(default)]
    pub top_k: Option<u32>,
    /// Stop sequences.
    #[serde(default)]
    pub stop_sequences: Option<Vec<String>>,
    /// Declared tools the model may call.
    #[serde(default)]
    pub tools: Option<Vec<Tool>>,
    /// Tool-choice directive.
    #[serde(default)]
    pub tool_choice: Option<ToolChoice>,
    /// Extended-thinking toggle.
    #[serde(default)]
    pub thinking: Option<ThinkingConfig>,
    /// Whether to stream the response as SSE.
    #[serde(default)]
    pub stream: Option<bool>,
    /// Opaque passthrough fields some clients set; never interpreted by this gateway.
    #[serde(default)]
    pub extra_body: Option<Value>,
}

impl MessagesRequest {
    /// True when the request asked for a streaming response (defaults to `false`).
    pub fn wants_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }
}

/// `POST /v1/messages/count_tokens` response (§6).
#[derive(Debug, Clone, Serialize)]
pub struct CountTokensResponse {
    /// Estimated input token count.
    pub input_tokens: u32,
}

/// Non-streaming `POST /v1/messages` response shape (§6).
#[derive(Debug, Clone, Serialize)]
pub struct MessagesResponse {
    /// Message id.
    pub id: String,
    /// Always `"message"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Always `"assistant"`.
    pub role: String,
    /// Emitted content blocks.
    pub content: Vec<ResponseBlock>,
    /// The (normalized) model that produced the response.
    pub model: String,
    /// Why generation stopped.
    pub stop_reason: Option<String>,
    /// Always `None` — this gateway never reports the triggering stop sequence.
    pub stop_sequence: Option<String>,
    /// Token usage.
    pub usage: Usage,
}

/// A content block as it appears in a non-streaming response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBlock {
    /// Assistant reasoning.
    Thinking {
        /// Reasoning text.
        thinking: String,
    },
    /// Assistant text.
    Text {
        /// Text content.
        text: String,
    },
    /// An invoked tool.
    ToolUse {
        /// Tool call id.
        id: String,
        /// Tool name.
        name: String,
        /// Parsed arguments.
        input: Value,
    },
}

/// Token usage, reported in both the non-streaming response and the final `message_delta`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Usage {
    /// Tokens in the converted request payload.
    pub input_tokens: u32,
    /// Tokens in the generated response.
    pub output_tokens: u32,
}
