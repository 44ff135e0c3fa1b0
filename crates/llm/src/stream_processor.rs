//! Drives an [`SseBuilder`] from a stream of upstream chat-completion chunks (§4.4).

use crate::heuristic_tool::HeuristicToolParser;
use crate::messages::openai::ChatCompletionChunk;
use crate::sse_builder::{map_stop_reason, SseBuilder};
use crate::think_tag::{ThinkFragment, ThinkTagParser};

/// The `Task` tool's arguments are buffered as whole JSON rather than streamed
/// incrementally — see [`crate::sse_builder::ContentBlockManager::buffer_task_args`].
const TASK_ARG_BUFFERING_TOOL_NAME: &str = "Task";

/// Processes one upstream streaming response, translating chunks into Anthropic SSE events.
pub struct StreamProcessor {
    builder: SseBuilder,
    think_tag: ThinkTagParser,
    heuristic_tool: HeuristicToolParser,
    task_arg_buffering_enabled: bool,
    finish_reason: Option<String>,
}

impl StreamProcessor {
    /// Start processing a fresh stream for `message_id`/`model`, seeded with the request's
    /// estimated input tokens.
    pub fn new(message_id: impl Into<String>, model: impl Into<String>, input_tokens: u32, task_arg_buffering_enabled: bool) -> Self {
        Self {
            builder: SseBuilder::new(message_id, model, input_tokens),
            think_tag: ThinkTagParser::new(),
            heuristic_tool: HeuristicToolParser::new(),
            task_arg_buffering_enabled,
            finish_reason: None,
        }
    }

    /// The opening `message_start` event; always the first thing written to the client.
    pub fn message_start(&self) -> String {
        self.builder.message_start()
    }

    /// All plain-text content accumulated so far.
    pub fn accumulated_text(&self) -> String {
        self.builder.accumulated_text()
    }

    /// All reasoning content accumulated so far.
    pub fn accumulated_reasoning(&self) -> String {
        self.builder.accumulated_reasoning()
    }

    /// The Anthropic stop reason implied by the upstream `finish_reason` seen so far.
    pub fn stop_reason(&self) -> &'static str {
        map_stop_reason(self.finish_reason.as_deref())
    }

    /// Estimated output tokens for everything accumulated so far (§4.6).
    pub fn estimate_output_tokens(&self) -> u32 {
        self.builder.estimate_output_tokens()
    }

    /// Render an upstream-stream error as a text block, then close every open block and
    /// emit the terminal `message_delta`/`message_stop` pair, consuming the processor.
    pub fn finish_with_error(mut self, message: &str) -> Vec<String> {
        let mut events = self.builder.emit_error(message);
        events.extend(self.builder.close_all_blocks());
        let output_tokens = self.builder.estimate_output_tokens();
        events.push(self.builder.message_delta("end_turn", output_tokens));
        events.push(self.builder.message_stop());
        events
    }

    /// Process one upstream chunk, returning the SSE events it produces, in order.
    pub fn process_chunk(&mut self, chunk: ChatCompletionChunk) -> Vec<String> {
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Vec::new();
        };

        let mut events = Vec::new();

        if let Some(reasoning) = choice.delta.reasoning_content {
            if !reasoning.is_empty() {
                events.extend(self.builder.ensure_thinking_block());
                events.push(self.builder.emit_thinking_delta(&reasoning));
            }
        }

        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                for fragment in self.think_tag.feed(&content) {
                    self.emit_think_fragment(fragment, &mut events);
                }
            }
        }

        if let Some(tool_calls) = choice.delta.tool_calls {
            for delta in tool_calls {
                self.process_tool_call_delta(delta, &mut events);
            }
        }

        if choice.finish_reason.is_some() {
            self.finish_reason = choice.finish_reason;
        }

        events
    }

    fn emit_think_fragment(&mut self, fragment: ThinkFragment, events: &mut Vec<String>) {
        match fragment {
            ThinkFragment::Thinking(text) => {
                if !text.is_empty() {
                    events.extend(self.builder.ensure_thinking_block());
                    events.push(self.builder.emit_thinking_delta(&text));
                }
            }
            ThinkFragment::Text(text) => {
                if text.is_empty() {
                    return;
                }
                let (passthrough, detected_tools) = self.heuristic_tool.feed(&text);
                if !passthrough.is_empty() {
                    events.extend(self.builder.ensure_text_block());
                    events.push(self.builder.emit_text_delta(&passthrough));
                }
                for tool in detected_tools {
                    events.extend(self.builder.close_content_blocks());
                    let slot = self.builder.next_heuristic_tool_slot();
                    events.push(self.builder.start_tool_block(slot, &tool.id, &tool.name));
                    let args = serde_json::to_string(&tool.input).unwrap_or_else(|_| "{}".to_owned());
                    events.push(self.builder.emit_tool_delta(slot, &args));
                    events.push(self.builder.stop_tool_block(slot));
                }
            }
        }
    }

    fn process_tool_call_delta(&mut self, delta: crate::messages::openai::ToolCallDelta, events: &mut Vec<String>) {
        let tool_index = delta.index;

        if let Some(function) = &delta.function {
            if let Some(name_fragment) = &function.name {
                self.builder.blocks_mut().register_tool_name(tool_index, name_fragment);
            }
        }

        let already_started = self
            .builder
            .blocks()
            .tool_state(tool_index)
            .map(|s| s.started)
            .unwrap_or(false);

        if !already_started {
            let has_args = delta
                .function
                .as_ref()
                .and_then(|f| f.arguments.as_deref())
                .is_some_and(|a| !a.is_empty());
            if has_args {
                events.extend(self.builder.close_content_blocks());
                let tool_id = delta.id.clone().unwrap_or_default();
                let name = self
                    .builder
                    .blocks()
                    .tool_state(tool_index)
                    .map(|s| s.name.clone())
                    .unwrap_or_default();
                events.push(self.builder.start_tool_block(tool_index, &tool_id, &name));
            } else {
                return;
            }
        }

        let Some(function) = delta.function else { return };
        let Some(args) = function.arguments else { return };
        if args.is_empty() {
            return;
        }

        let name = self.builder.blocks().tool_state(tool_index).map(|s| s.name.clone()).unwrap_or_default();

        if self.task_arg_buffering_enabled && name == TASK_ARG_BUFFERING_TOOL_NAME {
            if let Some(patched) = self.builder.blocks_mut().buffer_task_args(tool_index, &args) {
                let json = serde_json::to_string(&patched).unwrap_or_else(|_| "{}".to_owned());
                events.push(self.builder.emit_tool_delta(tool_index, &json));
            }
        } else {
            events.push(self.builder.emit_tool_delta(tool_index, &args));
        }
    }

    /// Finalize the stream: flush pending parser/tool-argument buffers, close open blocks,
    /// and emit `message_delta` + `message_stop`.
    pub fn finish(mut self) -> Vec<String> {
        let mut events = Vec::new();

        for fragment in self.think_tag.flush() {
            self.emit_think_fragment(fragment, &mut events);
        }
        for tool in self.heuristic_tool.flush() {
            events.extend(self.builder.close_content_blocks());
            let slot = self.builder.next_heuristic_tool_slot();
            events.push(self.builder.start_tool_block(slot, &tool.id, &tool.name));
            let args = serde_json::to_string(&tool.input).unwrap_or_else(|_| "{}".to_owned());
            events.push(self.builder.emit_tool_delta(slot, &args));
            events.push(self.builder.stop_tool_block(slot));
        }

        for (tool_index, json) in self.builder.blocks_mut().flush_task_arg_buffers() {
            events.push(self.builder.emit_tool_delta(tool_index, &json));
        }

        events.extend(self.builder.close_all_blocks());

        let stop_reason = map_stop_reason(self.finish_reason.as_deref());
        let output_tokens = self.builder.estimate_output_tokens();
        events.push(self.builder.message_delta(stop_reason, output_tokens));
        events.push(self.builder.message_stop());

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::openai::{ChatCompletionChunk, ChunkChoice, ChunkDelta};

    fn chunk_with_content(text: &str) -> ChatCompletionChunk {
        ChatCompletionChunk {
            choices: vec![ChunkChoice {
                delta: ChunkDelta {
                    content: Some(text.to_owned()),
                    reasoning_content: None,
                    tool_calls: None,
                },
                finish_reason: None,
            }],
        }
    }

    #[test]
    fn plain_text_chunk_opens_text_block_and_emits_delta() {
        let mut processor = StreamProcessor::new("msg_1", "m", 0, true);
        let events = processor.process_chunk(chunk_with_content("hello"));
        assert!(events.iter().any(|e| e.contains("content_block_start") && e.contains("\"text\"")));
        assert!(events.iter().any(|e| e.contains("text_delta")));
    }

    #[test]
    fn inline_think_tag_reroutes_to_thinking_block() {
        let mut processor = StreamProcessor::new("msg_1", "m", 0, true);
        let events = processor.process_chunk(chunk_with_content("<think>reasoning</think>answer"));
        assert!(events.iter().any(|e| e.contains("thinking_delta")));
        assert!(events.iter().any(|e| e.contains("text_delta")));
    }

    #[test]
    fn finish_emits_message_delta_and_stop() {
        let processor = StreamProcessor::new("msg_1", "m", 0, true);
        let events = processor.finish();
        assert!(events[events.len() - 2].contains("message_delta"));
        assert!(events[events.len() - 1].contains("message_stop"));
    }
}
