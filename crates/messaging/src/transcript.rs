//! In-memory accumulator for a node's live transcript: thinking/text/tool blocks folded
//! into a single renderable document, plus the short status line a given CLI event maps
//! to (§4.10, §4.10a).

use crate::cli_session::CliEvent;
use crate::render_ctx::RenderCtx;

/// One accumulated block of the transcript, in arrival order.
#[derive(Debug, Clone)]
enum Block {
    Thinking(String),
    Text(String),
    ToolUse { name: String },
    ToolResult,
    Error(String),
}

/// Accumulates CLI events into a renderable transcript document. One buffer per node;
/// dropped once the node finishes.
#[derive(Debug, Default)]
pub struct TranscriptBuffer {
    blocks: Vec<Block>,
}

impl TranscriptBuffer {
    /// Start a fresh, empty transcript.
    pub fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    /// True if this event kind is one the transcript tracks at all (§4.10a).
    pub fn is_transcript_event(kind: &str) -> bool {
        matches!(
            kind,
            "thinking_start"
                | "thinking_delta"
                | "thinking_stop"
                | "text_start"
                | "text_delta"
                | "text_stop"
                | "tool_use_start"
                | "tool_use_delta"
                | "tool_use_stop"
                | "tool_result"
                | "block_stop"
                | "error"
        )
    }

    /// Fold one event into the buffer. Deltas append to the most recent block of the same
    /// kind; `*_start`/`tool_result`/`error` open a new block.
    pub fn apply(&mut self, event: &CliEvent) {
        match event.kind.as_str() {
            "thinking_start" => self.blocks.push(Block::Thinking(String::new())),
            "thinking_delta" => self.append_thinking(event.text.as_deref().unwrap_or_default()),
            "text_start" => self.blocks.push(Block::Text(String::new())),
            "text_delta" => self.append_text(event.text.as_deref().unwrap_or_default()),
            "tool_use_start" => self.blocks.push(Block::ToolUse {
                name: event.name.clone().unwrap_or_else(|| "tool".to_owned()),
            }),
            "tool_result" => self.blocks.push(Block::ToolResult),
            "error" => self.blocks.push(Block::Error(event.message.clone().unwrap_or_else(|| "Unknown error".to_owned()))),
            _ => {}
        }
    }

    /// Append a literal line, e.g. the original's `"Done."` fallback for a transcript-less
    /// `complete` event.
    pub fn apply_text_line(&mut self, text: &str) {
        self.blocks.push(Block::Text(text.to_owned()));
    }

    fn append_thinking(&mut self, delta: &str) {
        if let Some(Block::Thinking(buf)) = self.blocks.last_mut() {
            buf.push_str(delta);
        } else {
            self.blocks.push(Block::Thinking(delta.to_owned()));
        }
    }

    fn append_text(&mut self, delta: &str) {
        if let Some(Block::Text(buf)) = self.blocks.last_mut() {
            buf.push_str(delta);
        } else {
            self.blocks.push(Block::Text(delta.to_owned()));
        }
    }

    /// True once at least one block has been recorded.
    pub fn has_content(&self) -> bool {
        !self.blocks.is_empty()
    }

    /// Render the accumulated transcript plus an optional trailing status line, truncated
    /// to `limit_chars` by dropping the oldest blocks first.
    pub fn render(&self, render_ctx: &RenderCtx, limit_chars: usize, status: Option<&str>) -> String {
        let mut rendered_blocks: Vec<String> = self
            .blocks
            .iter()
            .filter_map(|block| match block {
                Block::Thinking(text) if !text.trim().is_empty() => Some(format!("_{}_", render_ctx.escape_text(text.trim()))),
                Block::Text(text) if !text.trim().is_empty() => Some(render_ctx.render_markdown(text.trim())),
                Block::ToolUse { name } => Some(render_ctx.code_inline(name)),
                Block::Error(message) => Some(format!("❌ {}", render_ctx.escape_text(message))),
                _ => None,
            })
            .collect();

        if let Some(status) = status {
            rendered_blocks.push(render_ctx.escape_text(status));
        }

        let mut document = rendered_blocks.join("\n\n");
        while document.chars().count() > limit_chars && rendered_blocks.len() > 1 {
            rendered_blocks.remove(0);
            document = rendered_blocks.join("\n\n");
        }
        if document.chars().count() > limit_chars {
            document = document.chars().take(limit_chars).collect();
        }
        document
    }
}

/// Map a CLI event kind (plus its parsed payload) to the short status line shown while the
/// node is in progress, or `None` if this event kind carries no status update (§4.10a).
pub fn status_for_event(render_ctx: &RenderCtx, event: &CliEvent) -> Option<String> {
    let status = match event.kind.as_str() {
        "thinking_start" | "thinking_delta" | "thinking_chunk" => render_ctx.format_status("🧠", "Claude is thinking...", None),
        "text_start" | "text_delta" | "text_chunk" => render_ctx.format_status("🧠", "Claude is working...", None),
        "tool_result" => render_ctx.format_status("⏳", "Executing tools...", None),
        "tool_use_start" | "tool_use_delta" | "tool_use" => {
            if event.name.as_deref() == Some("Task") {
                render_ctx.format_status("🤖", "Running subagent...", None)
            } else {
                render_ctx.format_status("⏳", "Executing tools...", None)
            }
        }
        _ => return None,
    };
    Some(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: &str) -> CliEvent {
        CliEvent {
            kind: kind.to_owned(),
            session_id: None,
            text: None,
            name: None,
            content: None,
            message: None,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn text_deltas_accumulate_into_a_single_block() {
        let mut buffer = TranscriptBuffer::new();
        buffer.apply(&event("text_start"));
        buffer.apply(&CliEvent {
            text: Some("hel".to_owned()),
            ..event("text_delta")
        });
        buffer.apply(&CliEvent {
            text: Some("lo".to_owned()),
            ..event("text_delta")
        });
        let rendered = buffer.render(&RenderCtx::telegram_markdown_v2(), 3900, None);
        assert_eq!(rendered, "hello");
    }

    #[test]
    fn task_tool_renders_subagent_status() {
        let ctx = RenderCtx::telegram_markdown_v2();
        let evt = CliEvent {
            name: Some("Task".to_owned()),
            ..event("tool_use_start")
        };
        assert_eq!(status_for_event(&ctx, &evt), Some(ctx.format_status("🤖", "Running subagent...", None)));
    }

    #[test]
    fn render_drops_oldest_blocks_to_respect_the_limit() {
        let mut buffer = TranscriptBuffer::new();
        buffer.apply_text_line("aaaaaaaaaa");
        buffer.apply_text_line("bbbbbbbbbb");
        let rendered = buffer.render(&RenderCtx::telegram_markdown_v2(), 10, None);
        assert!(rendered.contains('b'));
        assert!(!rendered.contains('a'));
    }
}
