//! Splits a character stream into `<think>...</think>` reasoning spans and plain text (§4.1).

/// A classified fragment emitted by [`ThinkTagParser::feed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThinkFragment {
    /// Text inside a `<think>...</think>` span.
    Thinking(String),
    /// Text outside any `<think>` span.
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Text,
    Thinking,
}

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

/// Stateful parser that reroutes inline `<think>` content to a separate reasoning channel,
/// holding partial sentinels across chunk boundaries.
pub struct ThinkTagParser {
    state: State,
    buffer: String,
}

impl Default for ThinkTagParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ThinkTagParser {
    /// A fresh parser in the `Text` state with an empty buffer.
    pub fn new() -> Self {
        Self {
            state: State::Text,
            buffer: String::new(),
        }
    }

    /// Feed a chunk of upstream text. Returns classified fragments in encounter order.
    pub fn feed(&mut self, chunk: &str) -> Vec<ThinkFragment> {
        self.buffer.push_str(chunk);
        let mut out = Vec::new();

        loop {
            let sentinel = match self.state {
                State::Text => OPEN_TAG,
                State::Thinking => CLOSE_TAG,
            };

            let Some(idx) = self.buffer.find(sentinel) else {
                // No full sentinel yet. Hold back a tail that could be its prefix.
                let keep_from = longest_partial_sentinel_start(&self.buffer, sentinel);
                if keep_from < self.buffer.len() {
                    let emit = self.buffer[..keep_from].to_owned();
                    if !emit.is_empty() {
                        out.push(wrap(self.state, emit));
                    }
                    self.buffer = self.buffer[keep_from..].to_owned();
                }
                break;
            };

            let before = self.buffer[..idx].to_owned();
            if !before.is_empty() {
                out.push(wrap(self.state, before));
            }
            self.buffer = self.buffer[idx + sentinel.len()..].to_owned();
            self.state = match self.state {
                State::Text => State::Thinking,
                State::Thinking => State::Text,
            };
        }

        out
    }

    /// Flush any buffered text at end-of-stream. A lone unresolved `<` (or similar partial
    /// sentinel) is emitted as plain text, per §4.1.
    pub fn flush(&mut self) -> Vec<ThinkFragment> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let remaining = std::mem::take(&mut self.buffer);
        vec![wrap(self.state, remaining)]
    }
}

fn wrap(state: State, text: String) -> ThinkFragment {
    match state {
        State::Text => ThinkFragment::Text(text),
        State::Thinking => ThinkFragment::Thinking(text),
    }
}

/// Find the start index of the longest suffix of `buffer` that is a proper, non-empty
/// prefix of `sentinel` — the part that must be held back in case more bytes arrive.
fn longest_partial_sentinel_start(buffer: &str, sentinel: &str) -> usize {
    let max_len = sentinel.len().saturating_sub(1).min(buffer.len());
    for len in (1..=max_len).rev() {
        let tail = &buffer[buffer.len() - len..];
        if sentinel.starts_with(tail) {
            return buffer.len() - len;
        }
    }
    buffer.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_plain_text_through() {
        let mut parser = ThinkTagParser::new();
        let out = parser.feed("hello world");
        assert_eq!(out, vec![ThinkFragment::Text("hello world".into())]);
    }

    #[test]
    fn routes_think_span_to_thinking() {
        let mut parser = ThinkTagParser::new();
        let out = parser.feed("before <think>reasoning</think> after");
        assert_eq!(
            out,
            vec![
                ThinkFragment::Text("before ".into()),
                ThinkFragment::Thinking("reasoning".into()),
                ThinkFragment::Text(" after".into()),
            ]
        );
    }

    #[test]
    fn holds_partial_sentinel_across_chunks() {
        let mut parser = ThinkTagParser::new();
        let out1 = parser.feed("before <thi");
        assert_eq!(out1, vec![ThinkFragment::Text("before ".into())]);
        let out2 = parser.feed("nk>reasoning</think>");
        assert_eq!(out2, vec![ThinkFragment::Thinking("reasoning".into())]);
    }

    #[test]
    fn flush_emits_unresolved_lone_angle_bracket_as_text() {
        let mut parser = ThinkTagParser::new();
        let _ = parser.feed("trailing <");
        let out = parser.flush();
        assert_eq!(out, vec![ThinkFragment::Text("trailing <".into())]);
    }
}
