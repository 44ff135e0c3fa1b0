//! Anthropic SSE event construction for streaming responses (§4.4), ported from
//! `providers/common/sse_builder.py`.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::tokenizer;

/// Map an OpenAI `finish_reason` to an Anthropic `stop_reason` (§4.4 Stop-reason map).
pub fn map_stop_reason(openai_reason: Option<&str>) -> &'static str {
    match openai_reason {
        Some("stop") => "end_turn",
        Some("length") => "max_tokens",
        Some("tool_calls") => "tool_use",
        Some("content_filter") => "end_turn",
        _ => "end_turn",
    }
}

/// Per-tool-call streaming state, keyed by the upstream's `tool_calls[i].index`.
#[derive(Debug, Clone, Default)]
pub struct ToolCallState {
    /// Allocated content-block index, once started.
    pub block_index: Option<usize>,
    /// Synthetic or upstream-issued tool call id.
    pub tool_id: String,
    /// Tool name, possibly still being assembled from fragments.
    pub name: String,
    /// Argument fragments emitted so far (for token estimation and replay).
    pub contents: Vec<String>,
    /// Whether `content_block_start` has been emitted for this tool.
    pub started: bool,
    /// Buffered arguments for the `Task` tool's whole-JSON-at-once special case.
    pub task_arg_buffer: String,
    /// Whether the buffered `Task` arguments have already been flushed.
    pub task_args_emitted: bool,
}

/// Allocates monotonic content-block indices and tracks which blocks are open.
#[derive(Debug, Default)]
pub struct ContentBlockManager {
    next_index: usize,
    thinking_index: Option<usize>,
    text_index: Option<usize>,
    thinking_started: bool,
    text_started: bool,
    tool_states: BTreeMap<usize, ToolCallState>,
    /// Synthetic tool-call indices for heuristically-detected tool calls, which have no
    /// upstream `tool_calls[i].index` of their own. Starts well past any realistic
    /// structured tool-call index so the two key spaces never collide.
    next_heuristic_slot: usize,
}

impl Default for ContentBlockManager {
    fn default() -> Self {
        Self {
            next_index: 0,
            thinking_index: None,
            text_index: None,
            thinking_started: false,
            text_started: false,
            tool_states: BTreeMap::new(),
            next_heuristic_slot: 1_000_000,
        }
    }
}

impl ContentBlockManager {
    fn allocate_index(&mut self) -> usize {
        let idx = self.next_index;
        self.next_index += 1;
        idx
    }

    /// Look up a tool's bookkeeping state, if a call has been seen for this index.
    pub fn tool_state(&self, tool_index: usize) -> Option<&ToolCallState> {
        self.tool_states.get(&tool_index)
    }

    /// Register or merge a streaming tool-name fragment, handling both providers that
    /// stream the name incrementally and those that resend the full name every chunk.
    pub fn register_tool_name(&mut self, tool_index: usize, name: &str) {
        let state = self.tool_states.entry(tool_index).or_default();
        if state.tool_id.is_empty() && state.name.is_empty() && !state.started {
            // First sighting: seed name as-is (mirrors the Python `dict.setdefault` path).
        }
        let prev = state.name.clone();
        if prev.is_empty() || name.starts_with(&prev) {
            state.name = name.to_owned();
        } else if !prev.starts_with(name) {
            state.name = format!("{prev}{name}");
        }
    }

    /// Buffer `Task` tool arguments; once the buffer parses as JSON, patch
    /// `run_in_background=false` and return the patched object.
    pub fn buffer_task_args(&mut self, tool_index: usize, args: &str) -> Option<Value> {
        let state = self.tool_states.get_mut(&tool_index)?;
        if state.task_args_emitted {
            return None;
        }

        state.task_arg_buffer.push_str(args);
        let parsed: Value = serde_json::from_str(&state.task_arg_buffer).ok()?;
        let mut object = parsed.as_object().cloned().unwrap_or_default();
        let run_in_background_is_false = matches!(object.get("run_in_background"), Some(Value::Bool(false)));
        if !run_in_background_is_false {
            object.insert("run_in_background".to_owned(), Value::Bool(false));
        }

        state.task_args_emitted = true;
        state.task_arg_buffer.clear();
        Some(Value::Object(object))
    }

    /// Flush any remaining `Task` argument buffers at end-of-stream. Returns
    /// `(tool_index, json_string)` pairs; invalid-JSON buffers flush as `"{}"`.
    pub fn flush_task_arg_buffers(&mut self) -> Vec<(usize, String)> {
        let mut results = Vec::new();
        for (tool_index, state) in self.tool_states.iter_mut() {
            if state.task_arg_buffer.is_empty() || state.task_args_emitted {
                continue;
            }

            let out = match serde_json::from_str::<Value>(&state.task_arg_buffer) {
                Ok(Value::Object(mut object)) => {
                    let run_in_background_is_false = matches!(object.get("run_in_background"), Some(Value::Bool(false)));
                    if !run_in_background_is_false {
                        object.insert("run_in_background".to_owned(), Value::Bool(false));
                    }
                    serde_json::to_string(&Value::Object(object)).unwrap_or_else(|_| "{}".to_owned())
                }
                _ => "{}".to_owned(),
            };

            state.task_args_emitted = true;
            state.task_arg_buffer.clear();
            results.push((*tool_index, out));
        }
        results
    }
}

/// Incrementally builds the Anthropic SSE event sequence for one streaming response, and
/// tracks accumulated text/reasoning for the final token estimate.
pub struct SseBuilder {
    message_id: String,
    model: String,
    input_tokens: u32,
    blocks: ContentBlockManager,
    accumulated_text: Vec<String>,
    accumulated_reasoning: Vec<String>,
}

fn format_event(event_type: &str, data: &impl Serialize) -> String {
    let body = serde_json::to_string(data).unwrap_or_else(|_| "{}".to_owned());
    format!("event: {event_type}\ndata: {body}\n\n")
}

impl SseBuilder {
    /// A fresh builder for one `message_id`/`model` pair, seeded with the request's
    /// estimated input token count.
    pub fn new(message_id: impl Into<String>, model: impl Into<String>, input_tokens: u32) -> Self {
        Self {
            message_id: message_id.into(),
            model: model.into(),
            input_tokens,
            blocks: ContentBlockManager::default(),
            accumulated_text: Vec::new(),
            accumulated_reasoning: Vec::new(),
        }
    }

    /// Mutable access to block bookkeeping, for the `StreamProcessor` driving this builder.
    pub fn blocks_mut(&mut self) -> &mut ContentBlockManager {
        &mut self.blocks
    }

    /// Read-only access to block bookkeeping.
    pub fn blocks(&self) -> &ContentBlockManager {
        &self.blocks
    }

    /// Allocate the next synthetic tool-call slot for a heuristically-detected tool call.
    pub fn next_heuristic_tool_slot(&mut self) -> usize {
        let slot = self.blocks.next_heuristic_slot;
        self.blocks.next_heuristic_slot += 1;
        slot
    }

    /// `message_start` event.
    pub fn message_start(&self) -> String {
        format_event(
            "message_start",
            &json!({
                "type": "message_start",
                "message": {
                    "id": self.message_id,
                    "type": "message",
                    "role": "assistant",
                    "content": [],
                    "model": self.model,
                    "stop_reason": Value::Null,
                    "stop_sequence": Value::Null,
                    "usage": {"input_tokens": self.input_tokens, "output_tokens": 1},
                },
            }),
        )
    }

    /// `message_delta` event reporting the final stop reason and output token count.
    pub fn message_delta(&self, stop_reason: &str, output_tokens: u32) -> String {
        format_event(
            "message_delta",
            &json!({
                "type": "message_delta",
                "delta": {"stop_reason": stop_reason, "stop_sequence": Value::Null},
                "usage": {"input_tokens": self.input_tokens, "output_tokens": output_tokens},
            }),
        )
    }

    /// `message_stop` event.
    pub fn message_stop(&self) -> String {
        format_event("message_stop", &json!({"type": "message_stop"}))
    }

    fn content_block_start_thinking(&self, index: usize) -> String {
        format_event(
            "content_block_start",
            &json!({"type": "content_block_start", "index": index, "content_block": {"type": "thinking", "thinking": ""}}),
        )
    }

    fn content_block_start_text(&self, index: usize) -> String {
        format_event(
            "content_block_start",
            &json!({"type": "content_block_start", "index": index, "content_block": {"type": "text", "text": ""}}),
        )
    }

    fn content_block_start_tool(&self, index: usize, id: &str, name: &str) -> String {
        format_event(
            "content_block_start",
            &json!({
                "type": "content_block_start",
                "index": index,
                "content_block": {"type": "tool_use", "id": id, "name": name, "input": {}},
            }),
        )
    }

    fn content_block_delta(&self, index: usize, delta_type: &str, field: &str, content: &str) -> String {
        format_event(
            "content_block_delta",
            &json!({"type": "content_block_delta", "index": index, "delta": {"type": delta_type, field: content}}),
        )
    }

    /// `content_block_stop` event.
    pub fn content_block_stop(&self, index: usize) -> String {
        format_event("content_block_stop", &json!({"type": "content_block_stop", "index": index}))
    }

    /// Start a thinking block, allocating its index.
    pub fn start_thinking_block(&mut self) -> String {
        let idx = self.blocks.allocate_index();
        self.blocks.thinking_index = Some(idx);
        self.blocks.thinking_started = true;
        self.content_block_start_thinking(idx)
    }

    /// Emit a thinking-content delta, accumulating it for the final token estimate.
    pub fn emit_thinking_delta(&mut self, content: &str) -> String {
        self.accumulated_reasoning.push(content.to_owned());
        let idx = self.blocks.thinking_index.expect("thinking block must be started first");
        self.content_block_delta(idx, "thinking_delta", "thinking", content)
    }

    /// Stop the open thinking block.
    pub fn stop_thinking_block(&mut self) -> String {
        self.blocks.thinking_started = false;
        self.content_block_stop(self.blocks.thinking_index.expect("thinking block must be started first"))
    }

    /// Start a text block, allocating its index.
    pub fn start_text_block(&mut self) -> String {
        let idx = self.blocks.allocate_index();
        self.blocks.text_index = Some(idx);
        self.blocks.text_started = true;
        self.content_block_start_text(idx)
    }

    /// Emit a text-content delta, accumulating it for the final token estimate.
    pub fn emit_text_delta(&mut self, content: &str) -> String {
        self.accumulated_text.push(content.to_owned());
        let idx = self.blocks.text_index.expect("text block must be started first");
        self.content_block_delta(idx, "text_delta", "text", content)
    }

    /// Stop the open text block.
    pub fn stop_text_block(&mut self) -> String {
        self.blocks.text_started = false;
        self.content_block_stop(self.blocks.text_index.expect("text block must be started first"))
    }

    /// Start a `tool_use` block for the given upstream tool-call index.
    pub fn start_tool_block(&mut self, tool_index: usize, tool_id: &str, name: &str) -> String {
        let block_idx = self.blocks.allocate_index();
        let state = self.blocks.tool_states.entry(tool_index).or_default();
        state.block_index = Some(block_idx);
        state.tool_id = tool_id.to_owned();
        state.name = name.to_owned();
        state.started = true;
        self.content_block_start_tool(block_idx, tool_id, name)
    }

    /// Emit a tool `input_json_delta`, accumulating it for the final token estimate.
    pub fn emit_tool_delta(&mut self, tool_index: usize, partial_json: &str) -> String {
        let state = self.blocks.tool_states.get_mut(&tool_index).expect("tool block must be started first");
        state.contents.push(partial_json.to_owned());
        let idx = state.block_index.expect("tool block must be started first");
        self.content_block_delta(idx, "input_json_delta", "partial_json", partial_json)
    }

    /// Stop a tool block.
    pub fn stop_tool_block(&self, tool_index: usize) -> String {
        let idx = self.blocks.tool_states[&tool_index].block_index.expect("tool block must be started first");
        self.content_block_stop(idx)
    }

    /// Close the text block, then open a thinking block — only the transitions actually
    /// required. Returns the events to emit, in order.
    pub fn ensure_thinking_block(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if self.blocks.text_started {
            events.push(self.stop_text_block());
        }
        if !self.blocks.thinking_started {
            events.push(self.start_thinking_block());
        }
        events
    }

    /// Close the thinking block, then open a text block — only the transitions actually
    /// required.
    pub fn ensure_text_block(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if self.blocks.thinking_started {
            events.push(self.stop_thinking_block());
        }
        if !self.blocks.text_started {
            events.push(self.start_text_block());
        }
        events
    }

    /// Close whichever of the thinking/text blocks are open (used before starting a tool
    /// block).
    pub fn close_content_blocks(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if self.blocks.thinking_started {
            events.push(self.stop_thinking_block());
        }
        if self.blocks.text_started {
            events.push(self.stop_text_block());
        }
        events
    }

    /// Close every open block (thinking, text, and any started tool blocks).
    pub fn close_all_blocks(&mut self) -> Vec<String> {
        let mut events = self.close_content_blocks();
        let started: Vec<usize> = self
            .blocks
            .tool_states
            .iter()
            .filter(|(_, s)| s.started)
            .map(|(i, _)| *i)
            .collect();
        for tool_index in started {
            events.push(self.stop_tool_block(tool_index));
        }
        events
    }

    /// Render `error_message` as a standalone text block (start, one delta, stop).
    pub fn emit_error(&mut self, error_message: &str) -> Vec<String> {
        let idx = self.blocks.allocate_index();
        vec![
            self.content_block_start_text(idx),
            self.content_block_delta(idx, "text_delta", "text", error_message),
            self.content_block_stop(idx),
        ]
    }

    /// All text deltas emitted so far, concatenated.
    pub fn accumulated_text(&self) -> String {
        self.accumulated_text.concat()
    }

    /// All thinking deltas emitted so far, concatenated.
    pub fn accumulated_reasoning(&self) -> String {
        self.accumulated_reasoning.concat()
    }

    /// Estimate output tokens from everything accumulated so far (§4.6).
    pub fn estimate_output_tokens(&self) -> u32 {
        let text = self.accumulated_text();
        let reasoning = self.accumulated_reasoning();

        if tokenizer::has_encoder() {
            let text_tokens = tokenizer::count_tokens(&text);
            let reasoning_tokens = tokenizer::count_tokens(&reasoning);

            let mut tool_tokens = 0u32;
            let mut started_tool_count = 0u32;
            for state in self.blocks.tool_states.values() {
                tool_tokens += tokenizer::count_tokens(&state.name);
                tool_tokens += tokenizer::count_tokens(&state.contents.concat());
                tool_tokens += 15;
                if state.started {
                    started_tool_count += 1;
                }
            }

            let block_count = u32::from(!reasoning.is_empty()) + u32::from(!text.is_empty()) + started_tool_count;
            let block_overhead = block_count * 4;

            text_tokens + reasoning_tokens + tool_tokens + block_overhead
        } else {
            let text_tokens = (text.len() / 4) as u32;
            let reasoning_tokens = (reasoning.len() / 4) as u32;
            let tool_tokens = self.blocks.tool_states.values().filter(|s| s.started).count() as u32 * 50;
            text_tokens + reasoning_tokens + tool_tokens
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_start_reports_seeded_input_tokens() {
        let builder = SseBuilder::new("msg_1", "gpt-test", 42);
        let event = builder.message_start();
        assert!(event.contains("\"input_tokens\":42"));
        assert!(event.starts_with("event: message_start\n"));
    }

    #[test]
    fn text_block_lifecycle_allocates_and_emits() {
        let mut builder = SseBuilder::new("msg_1", "gpt-test", 0);
        let start = builder.start_text_block();
        assert!(start.contains("\"index\":0"));
        let delta = builder.emit_text_delta("hello");
        assert!(delta.contains("\"text\":\"hello\""));
        assert_eq!(builder.accumulated_text(), "hello");
        let stop = builder.stop_text_block();
        assert!(stop.contains("content_block_stop"));
    }

    #[test]
    fn ensure_thinking_block_closes_open_text_first() {
        let mut builder = SseBuilder::new("msg_1", "gpt-test", 0);
        builder.start_text_block();
        let events = builder.ensure_thinking_block();
        assert_eq!(events.len(), 2);
        assert!(events[0].contains("content_block_stop"));
        assert!(events[1].contains("\"type\":\"thinking\""));
    }

    #[test]
    fn task_args_buffer_until_valid_json_then_patch_run_in_background() {
        let mut blocks = ContentBlockManager::default();
        blocks.register_tool_name(0, "Task");
        blocks.tool_states.get_mut(&0).unwrap().tool_id = "toolu_1".into();

        assert!(blocks.buffer_task_args(0, "{\"prompt\": \"go\", ").is_none());
        let patched = blocks.buffer_task_args(0, "\"run_in_background\": true}").unwrap();
        assert_eq!(patched["run_in_background"], false);
        assert_eq!(patched["prompt"], "go");
    }

    #[test]
    fn register_tool_name_merges_fragments() {
        let mut blocks = ContentBlockManager::default();
        blocks.register_tool_name(0, "Gr");
        blocks.register_tool_name(0, "Grep");
        assert_eq!(blocks.tool_states[&0].name, "Grep");
    }

    #[test]
    fn map_stop_reason_defaults_to_end_turn() {
        assert_eq!(map_stop_reason(Some("tool_calls")), "tool_use");
        assert_eq!(map_stop_reason(Some("length")), "max_tokens");
        assert_eq!(map_stop_reason(None), "end_turn");
        assert_eq!(map_stop_reason(Some("unknown")), "end_turn");
    }
}
