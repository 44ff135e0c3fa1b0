//! Token estimation (§4.6): a tiktoken `cl100k_base` encoder when available, with a
//! chars/4 fallback otherwise. Ported from `providers/common/sse_builder.py`'s `ENCODER`.

use std::sync::OnceLock;
use tiktoken_rs::CoreBPE;

fn encoder() -> Option<&'static CoreBPE> {
    static ENCODER: OnceLock<Option<CoreBPE>> = OnceLock::new();
    ENCODER.get_or_init(|| tiktoken_rs::cl100k_base().ok()).as_ref()
}

/// Count tokens in `text` with the `cl100k_base` encoder, or `text.len() / 4` if the
/// encoder's vocabulary files couldn't be loaded.
pub fn count_tokens(text: &str) -> u32 {
    match encoder() {
        Some(bpe) => bpe.encode_ordinary(text).len() as u32,
        None => (text.len() / 4) as u32,
    }
}

/// True when the real BPE encoder is available (used to pick the per-tool/per-block
/// overhead formula to match in §4.6's two estimation paths).
pub fn has_encoder() -> bool {
    encoder().is_some()
}

/// Estimate the input token count for `POST /v1/messages/count_tokens` and for seeding
/// `SseBuilder`'s `usage.input_tokens` (§4.6): every text/thinking block, tool schema, and
/// tool_use/tool_result payload is counted, with the same per-block/per-tool overhead the
/// streaming estimator uses.
pub fn estimate_request_tokens(request: &crate::messages::anthropic::MessagesRequest) -> u32 {
    use crate::messages::anthropic::{ContentBlock, StringOrBlocks};

    let mut text = String::new();
    let mut block_count = 0u32;
    let mut tool_overhead = 0u32;

    if let Some(system) = &request.system {
        for block in system.clone().into_blocks() {
            if let ContentBlock::Text { text: t } = block {
                text.push_str(&t);
                block_count += 1;
            }
        }
    }

    for message in &request.messages {
        for block in message.content.clone().into_blocks() {
            match block {
                ContentBlock::Text { text: t } | ContentBlock::Thinking { thinking: t } => {
                    text.push_str(&t);
                    block_count += 1;
                }
                ContentBlock::ToolUse { name, input, .. } => {
                    text.push_str(&name);
                    text.push_str(&serde_json::to_string(&input).unwrap_or_default());
                    tool_overhead += 15;
                    block_count += 1;
                }
                ContentBlock::ToolResult { content, .. } => {
                    if let Some(content) = content {
                        if let StringOrBlocks::Text(t) = content {
                            text.push_str(&t);
                        }
                    }
                    block_count += 1;
                }
                ContentBlock::Image { .. } => block_count += 1,
            }
        }
    }

    if let Some(tools) = &request.tools {
        for tool in tools {
            text.push_str(&tool.name);
            text.push_str(&serde_json::to_string(&tool.input_schema).unwrap_or_default());
            tool_overhead += 15;
        }
    }

    count_tokens(&text) + tool_overhead + block_count * 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_nonzero_tokens_for_nonempty_text() {
        assert!(count_tokens("hello world, this is a test") > 0);
    }

    #[test]
    fn empty_text_has_zero_tokens() {
        assert_eq!(count_tokens(""), 0);
    }
}
