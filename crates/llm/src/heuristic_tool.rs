//! Fallback tool-call detector for models that emit `● <function=Name><parameter=key>value</parameter>`
//! as plain text instead of using structured tool-call fields (§4.2), ported from
//! `providers/common/heuristic_tool_parser.py`.

use serde_json::{Map, Value};
use std::sync::LazyLock;

use regex::Regex;

static FUNC_START: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"●\s*<function=([^>]+)>").unwrap());
static PARAM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<parameter=([^>]+)>(.*?)(?:</parameter>|$)").unwrap());
static CONTROL_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<\|[^|>]{1,80}\|>").unwrap());

const CONTROL_TOKEN_START: &str = "<|";
const CONTROL_TOKEN_END: &str = "|>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    Text,
    MatchingFunction,
    ParsingParameters,
}

/// A heuristically-detected tool invocation, in Anthropic `tool_use` shape.
#[derive(Debug, Clone)]
pub struct DetectedTool {
    /// Synthetic `toolu_heuristic_<hex>` id.
    pub id: String,
    /// Tool name captured from the `<function=Name>` tag.
    pub name: String,
    /// Parameters captured from `<parameter=key>value</parameter>` pairs, as a JSON object
    /// mapping each key to its raw string value.
    pub input: Value,
}

/// Stateful detector for the `●<function=...><parameter=...>` text tool-call format.
pub struct HeuristicToolParser {
    state: ParserState,
    buffer: String,
    current_id: Option<String>,
    current_name: Option<String>,
    current_params: Map<String, Value>,
}

impl Default for HeuristicToolParser {
    fn default() -> Self {
        Self::new()
    }
}

impl HeuristicToolParser {
    /// A fresh parser in the `Text` state with an empty buffer.
    pub fn new() -> Self {
        Self {
            state: ParserState::Text,
            buffer: String::new(),
            current_id: None,
            current_name: None,
            current_params: Map::new(),
        }
    }

    fn strip_control_tokens(&mut self) {
        if CONTROL_TOKEN.is_match(&self.buffer) {
            self.buffer = CONTROL_TOKEN.replace_all(&self.buffer, "").into_owned();
        }
    }

    /// If the buffer ends in an incomplete `<|...|>` sentinel, hold that fragment back and
    /// return the text that's safe to emit now.
    fn split_incomplete_control_token_tail(&mut self) -> String {
        let Some(start) = self.buffer.rfind(CONTROL_TOKEN_START) else {
            return String::new();
        };
        if self.buffer[start..].contains(CONTROL_TOKEN_END) {
            return String::new();
        }

        let prefix = self.buffer[..start].to_owned();
        self.buffer = self.buffer[start..].to_owned();
        prefix
    }

    /// Feed newly-arrived text into the parser. Returns the text safe to forward as normal
    /// message content, plus any tool calls completed during this feed.
    pub fn feed(&mut self, text: &str) -> (String, Vec<DetectedTool>) {
        self.buffer.push_str(text);
        self.strip_control_tokens();

        let mut detected = Vec::new();
        let mut out = String::new();

        loop {
            if self.state == ParserState::Text {
                if let Some(idx) = self.buffer.find('●') {
                    out.push_str(&self.buffer[..idx]);
                    self.buffer = self.buffer[idx..].to_owned();
                    self.state = ParserState::MatchingFunction;
                } else {
                    let safe_prefix = self.split_incomplete_control_token_tail();
                    if !safe_prefix.is_empty() {
                        out.push_str(&safe_prefix);
                        break;
                    }
                    out.push_str(&self.buffer);
                    self.buffer.clear();
                    break;
                }
            }

            if self.state == ParserState::MatchingFunction {
                if let Some(caps) = FUNC_START.captures(&self.buffer) {
                    let whole = caps.get(0).unwrap();
                    self.current_name = Some(caps.get(1).unwrap().as_str().trim().to_owned());
                    self.current_id = Some(format!("toolu_heuristic_{}", short_hex_id()));
                    self.current_params = Map::new();
                    self.buffer = self.buffer[whole.end()..].to_owned();
                    self.state = ParserState::ParsingParameters;
                } else if self.buffer.len() > 100 {
                    out.push_str(&self.buffer[..1]);
                    self.buffer = self.buffer[1..].to_owned();
                    self.state = ParserState::Text;
                } else {
                    break;
                }
            }

            if self.state == ParserState::ParsingParameters {
                loop {
                    let Some(caps) = PARAM.captures(&self.buffer) else { break };
                    let whole = caps.get(0).unwrap();
                    if !whole.as_str().contains("</parameter>") {
                        break;
                    }

                    let pre = &self.buffer[..whole.start()];
                    if !pre.is_empty() {
                        out.push_str(pre);
                    }

                    let key = caps.get(1).unwrap().as_str().trim().to_owned();
                    let val = caps.get(2).unwrap().as_str().trim().to_owned();
                    self.current_params.insert(key, Value::String(val));
                    self.buffer = self.buffer[whole.end()..].to_owned();
                }

                let mut finished = false;

                if let Some(idx) = self.buffer.find('●') {
                    if idx > 0 {
                        out.push_str(&self.buffer[..idx]);
                        self.buffer = self.buffer[idx..].to_owned();
                    }
                    finished = true;
                } else if !self.buffer.is_empty() && !self.buffer.trim_start().starts_with('<') && !self.buffer.contains("<parameter=") {
                    out.push_str(&self.buffer);
                    self.buffer.clear();
                    finished = true;
                }

                if finished {
                    detected.push(DetectedTool {
                        id: self.current_id.clone().unwrap_or_default(),
                        name: self.current_name.clone().unwrap_or_default(),
                        input: Value::Object(self.current_params.clone()),
                    });
                    self.state = ParserState::Text;
                } else {
                    break;
                }
            }
        }

        (out, detected)
    }

    /// Flush any tool call left mid-parse when the stream ends, even without a closing
    /// `</parameter>` tag.
    pub fn flush(&mut self) -> Vec<DetectedTool> {
        self.strip_control_tokens();

        let mut detected = Vec::new();
        if self.state == ParserState::ParsingParameters {
            if let Ok(re) = Regex::new(r"(?s)<parameter=([^>]+)>(.*)$") {
                for caps in re.captures_iter(&self.buffer.clone()) {
                    let key = caps.get(1).unwrap().as_str().trim().to_owned();
                    let val = caps.get(2).unwrap().as_str().trim().to_owned();
                    self.current_params.insert(key, Value::String(val));
                }
            }

            detected.push(DetectedTool {
                id: self.current_id.clone().unwrap_or_default(),
                name: self.current_name.clone().unwrap_or_default(),
                input: Value::Object(self.current_params.clone()),
            });
            self.state = ParserState::Text;
            self.buffer.clear();
        }

        detected
    }
}

fn short_hex_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_plain_text_through_untouched() {
        let mut parser = HeuristicToolParser::new();
        let (text, tools) = parser.feed("hello world");
        assert_eq!(text, "hello world");
        assert!(tools.is_empty());
    }

    #[test]
    fn detects_single_tool_call_in_one_chunk() {
        let mut parser = HeuristicToolParser::new();
        let (text, tools) = parser.feed("before ● <function=Grep><parameter=pattern>foo</parameter></parameter> after");
        assert_eq!(text, "before ");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "Grep");
        assert_eq!(tools[0].input["pattern"], "foo");
    }

    #[test]
    fn handles_split_across_chunks() {
        let mut parser = HeuristicToolParser::new();
        let (t1, d1) = parser.feed("● <function=Gr");
        let (t2, d2) = parser.feed("ep><parameter=pattern>foo</parameter>");
        let (t3, d3) = parser.feed("● <function=Next>");
        assert!(t1.is_empty());
        assert!(d1.is_empty());
        assert!(t2.is_empty());
        assert!(d2.is_empty());
        assert_eq!(t3, "");
        assert_eq!(d3.len(), 1);
        assert_eq!(d3[0].name, "Grep");
    }

    #[test]
    fn strips_control_tokens() {
        let mut parser = HeuristicToolParser::new();
        let (text, _) = parser.feed("hello <|tool_call_end|> world");
        assert_eq!(text, "hello  world");
    }

    #[test]
    fn flush_emits_unterminated_tool_call() {
        let mut parser = HeuristicToolParser::new();
        let _ = parser.feed("● <function=Grep><parameter=pattern>foo");
        let tools = parser.flush();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].input["pattern"], "foo");
    }
}
