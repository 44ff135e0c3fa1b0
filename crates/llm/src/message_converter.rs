//! Translates an Anthropic `MessagesRequest` into an OpenAI-compatible chat-completion
//! body (§4.3), including the per-provider `extra_body` fields of §4.3a.

use serde_json::{json, Map, Value};

use config::{LmStudioConfig, NimConfig, OpenRouterConfig};

use crate::messages::anthropic::{ContentBlock, Message, MessagesRequest, StringOrBlocks, Tool, ToolChoice};
use crate::messages::openai::{ChatCompletionRequest, ChatMessage, FunctionCall, FunctionDefinition, ToolCall, ToolDefinition};

/// Which backend this request is being converted for; picks the §4.3a `extra_body` shape.
pub enum TargetProvider<'a> {
    /// NVIDIA NIM.
    Nim(&'a NimConfig),
    /// OpenRouter.
    OpenRouter(&'a OpenRouterConfig),
    /// A local LM Studio server.
    LmStudio(&'a LmStudioConfig),
}

/// Convert an Anthropic request plus the already-normalized backend model name into the
/// OpenAI-compatible body to send upstream.
pub fn convert(request: &MessagesRequest, backend_model: &str, provider: TargetProvider<'_>) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(system) = &request.system {
        messages.push(ChatMessage {
            role: "system".to_owned(),
            content: Some(Value::String(render_system(system))),
            tool_call_id: None,
            tool_calls: None,
        });
    }

    for message in &request.messages {
        convert_message(message, &mut messages);
    }

    let wants_thinking = request.thinking.as_ref().is_some_and(|t| t.enabled);

    let max_tokens = resolve_max_tokens(request, &provider);

    ChatCompletionRequest {
        model: backend_model.to_owned(),
        messages,
        stream: true,
        temperature: request.temperature,
        top_p: request.top_p,
        stop: request.stop_sequences.clone(),
        max_tokens,
        tools: request.tools.as_ref().map(|tools| tools.iter().map(convert_tool).collect()),
        tool_choice: request.tool_choice.as_ref().map(convert_tool_choice),
        extra_body: extra_body(&provider, wants_thinking, request.extra_body.as_ref()),
    }
}

fn render_system(system: &StringOrBlocks) -> String {
    match system {
        StringOrBlocks::Text(text) => text.clone(),
        StringOrBlocks::Blocks(blocks) => blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn convert_message(message: &Message, out: &mut Vec<ChatMessage>) {
    let blocks = message.content.clone().into_blocks();

    if message.role == "assistant" {
        let mut text_parts = Vec::new();
        let mut tool_calls = Vec::new();

        for block in &blocks {
            match block {
                ContentBlock::Text { text } => text_parts.push(text.clone()),
                // Reasoning traces are never re-sent upstream (§4.3).
                ContentBlock::Thinking { .. } => {}
                ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id: id.clone(),
                    kind: "function".to_owned(),
                    function: FunctionCall {
                        name: name.clone(),
                        arguments: serde_json::to_string(input).unwrap_or_else(|_| "{}".to_owned()),
                    },
                }),
                ContentBlock::Image { .. } | ContentBlock::ToolResult { .. } => {}
            }
        }

        out.push(ChatMessage {
            role: "assistant".to_owned(),
            content: if text_parts.is_empty() { None } else { Some(Value::String(text_parts.join(""))) },
            tool_call_id: None,
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        });
        return;
    }

    // A user turn containing tool_result blocks is split: each result becomes its own
    // `role: tool` message, and any surrounding text becomes a separate `role: user` message.
    let mut user_parts: Vec<Value> = Vec::new();
    for block in &blocks {
        match block {
            ContentBlock::Text { text } => user_parts.push(json!({"type": "text", "text": text})),
            ContentBlock::Image { source } => user_parts.push(json!({
                "type": "image_url",
                "image_url": {"url": format!("data:{};base64,{}", source.media_type, source.data)},
            })),
            ContentBlock::ToolResult { tool_use_id, content, .. } => {
                if !user_parts.is_empty() {
                    out.push(ChatMessage {
                        role: "user".to_owned(),
                        content: Some(Value::Array(std::mem::take(&mut user_parts))),
                        tool_call_id: None,
                        tool_calls: None,
                    });
                }
                out.push(ChatMessage {
                    role: "tool".to_owned(),
                    content: Some(Value::String(content.clone().map(render_system).unwrap_or_default())),
                    tool_call_id: Some(tool_use_id.clone()),
                    tool_calls: None,
                });
            }
            ContentBlock::ToolUse { .. } | ContentBlock::Thinking { .. } => {}
        }
    }

    if !user_parts.is_empty() {
        out.push(ChatMessage {
            role: "user".to_owned(),
            content: Some(Value::Array(user_parts)),
            tool_call_id: None,
            tool_calls: None,
        });
    }
}

fn convert_tool(tool: &Tool) -> ToolDefinition {
    ToolDefinition {
        kind: "function".to_owned(),
        function: FunctionDefinition {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.input_schema.clone(),
        },
    }
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => Value::String("auto".to_owned()),
        ToolChoice::Any => Value::String("required".to_owned()),
        ToolChoice::Tool { name } => json!({"type": "function", "function": {"name": name}}),
    }
}

fn resolve_max_tokens(request: &MessagesRequest, provider: &TargetProvider<'_>) -> Option<u32> {
    match provider {
        TargetProvider::Nim(cfg) => Some(request.max_tokens.unwrap_or(cfg.max_tokens_cap).min(cfg.max_tokens_cap)),
        TargetProvider::OpenRouter(cfg) => Some(request.max_tokens.unwrap_or(cfg.default_max_tokens)),
        TargetProvider::LmStudio(cfg) => Some(request.max_tokens.unwrap_or(cfg.default_max_tokens)),
    }
}

/// Build the upstream `extra_body`, seeded from the client's own `extra_body` field first so
/// its keys win, then filled in with provider defaults that only apply where the client left
/// a gap (mirrors `extra_body.update(request_extra)` followed by `setdefault(...)`).
fn extra_body(provider: &TargetProvider<'_>, wants_thinking: bool, client_extra_body: Option<&Value>) -> Option<Value> {
    let mut body = client_extra_body.and_then(Value::as_object).cloned().unwrap_or_default();

    match provider {
        TargetProvider::Nim(cfg) => {
            if wants_thinking {
                set_default(&mut body, "thinking", json!({"type": "enabled"}));
                set_default(&mut body, "reasoning_split", Value::Bool(true));
                if let Some(effort) = &cfg.reasoning_effort {
                    set_default(&mut body, "reasoning_effort", Value::String(effort.clone()));
                }
            }
            if let Some(kwargs) = &cfg.chat_template_kwargs {
                set_default(&mut body, "chat_template_kwargs", kwargs.clone());
            }
            set_default_opt(&mut body, "top_k", cfg.top_k);
            set_default_opt(&mut body, "min_p", cfg.min_p);
            set_default_opt(&mut body, "repetition_penalty", cfg.repetition_penalty);
            set_default_opt(&mut body, "min_tokens", cfg.min_tokens);
            set_default_opt(&mut body, "ignore_eos", cfg.ignore_eos);
            set_default_opt(&mut body, "chat_template", cfg.chat_template.clone());
            set_default_opt(&mut body, "return_tokens_as_token_ids", cfg.return_tokens_as_token_ids);
            set_default_opt(&mut body, "include_stop_str_in_output", cfg.include_stop_str_in_output);
            set_default_opt(&mut body, "include_reasoning", cfg.include_reasoning);
        }
        TargetProvider::OpenRouter(_) => {
            if wants_thinking {
                set_default(&mut body, "reasoning", json!({"enabled": true}));
            }
        }
        TargetProvider::LmStudio(_) => {}
    }

    if body.is_empty() { None } else { Some(Value::Object(body)) }
}

/// Insert `key` only if the client's own `extra_body` didn't already set it.
fn set_default(body: &mut Map<String, Value>, key: &str, value: Value) {
    body.entry(key.to_owned()).or_insert(value);
}

fn set_default_opt<T: Into<Value>>(body: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value {
        set_default(body, key, value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::anthropic::Message;

    fn nim_config() -> NimConfig {
        NimConfig {
            reasoning_effort: Some("high".to_owned()),
            ..Default::default()
        }
    }

    #[test]
    fn system_prompt_becomes_leading_system_message() {
        let request = MessagesRequest {
            model: "claude-3-haiku".into(),
            messages: vec![Message { role: "user".into(), content: StringOrBlocks::Text("hi".into()) }],
            system: Some(StringOrBlocks::Text("be terse".into())),
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            tools: None,
            tool_choice: None,
            thinking: None,
            stream: None,
            extra_body: None,
        };
        let cfg = nim_config();
        let converted = convert(&request, "backend-model", TargetProvider::Nim(&cfg));
        assert_eq!(converted.messages[0].role, "system");
        assert_eq!(converted.messages[0].content, Some(Value::String("be terse".into())));
    }

    #[test]
    fn thinking_enabled_injects_nim_extra_body() {
        let request = MessagesRequest {
            model: "m".into(),
            messages: vec![Message { role: "user".into(), content: StringOrBlocks::Text("hi".into()) }],
            system: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            tools: None,
            tool_choice: None,
            thinking: Some(crate::messages::anthropic::ThinkingConfig { enabled: true }),
            stream: None,
            extra_body: None,
        };
        let cfg = nim_config();
        let converted = convert(&request, "backend-model", TargetProvider::Nim(&cfg));
        let body = converted.extra_body.unwrap();
        assert_eq!(body["thinking"]["type"], "enabled");
        assert_eq!(body["reasoning_split"], true);
        assert_eq!(body["reasoning_effort"], "high");
    }

    #[test]
    fn client_extra_body_overrides_provider_defaults() {
        let request = MessagesRequest {
            model: "m".into(),
            messages: vec![Message { role: "user".into(), content: StringOrBlocks::Text("hi".into()) }],
            system: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            tools: None,
            tool_choice: None,
            thinking: Some(crate::messages::anthropic::ThinkingConfig { enabled: true }),
            stream: None,
            extra_body: Some(json!({"reasoning_effort": "low", "top_k": 7})),
        };
        let cfg = nim_config();
        let converted = convert(&request, "backend-model", TargetProvider::Nim(&cfg));
        let body = converted.extra_body.unwrap();
        assert_eq!(body["reasoning_effort"], "low");
        assert_eq!(body["top_k"], 7);
        assert_eq!(body["thinking"]["type"], "enabled");
    }

    #[test]
    fn tool_result_splits_into_separate_tool_message() {
        let request = MessagesRequest {
            model: "m".into(),
            messages: vec![Message {
                role: "user".into(),
                content: StringOrBlocks::Blocks(vec![ContentBlock::ToolResult {
                    tool_use_id: "toolu_1".into(),
                    content: Some(StringOrBlocks::Text("42".into())),
                    is_error: false,
                }]),
            }],
            system: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            tools: None,
            tool_choice: None,
            thinking: None,
            stream: None,
            extra_body: None,
        };
        let cfg = nim_config();
        let converted = convert(&request, "m", TargetProvider::Nim(&cfg));
        assert_eq!(converted.messages[0].role, "tool");
        assert_eq!(converted.messages[0].tool_call_id.as_deref(), Some("toolu_1"));
    }
}
