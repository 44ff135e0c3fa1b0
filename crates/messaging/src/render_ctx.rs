//! Per-platform rendering primitives: bold/code/escape/markdown, chosen once at
//! construction from the platform's name (§9 "Per-platform rendering").

/// Bold/code/escape/markdown function-pointer bundle plus the platform's text limit. The
/// core only ever calls through this capability set — it never branches on platform name
/// itself once a `RenderCtx` is built.
#[derive(Clone, Copy)]
pub struct RenderCtx {
    bold_fn: fn(&str) -> String,
    code_inline_fn: fn(&str) -> String,
    escape_text_fn: fn(&str) -> String,
    escape_code_fn: fn(&str) -> String,
    render_markdown_fn: fn(&str) -> String,
    /// Maximum characters a single message may contain on this platform.
    pub limit_chars: usize,
}

impl RenderCtx {
    /// Build the Discord rendering context: no parse-mode wrapping, 1900-char limit.
    pub fn discord() -> Self {
        Self {
            bold_fn: discord::bold,
            code_inline_fn: discord::code_inline,
            escape_text_fn: discord::escape_text,
            escape_code_fn: discord::escape_code,
            render_markdown_fn: discord::render_markdown,
            limit_chars: 1900,
        }
    }

    /// Build the Telegram MarkdownV2 rendering context: 3900-char limit.
    pub fn telegram_markdown_v2() -> Self {
        Self {
            bold_fn: telegram::bold,
            code_inline_fn: telegram::code_inline,
            escape_text_fn: telegram::escape_text,
            escape_code_fn: telegram::escape_code,
            render_markdown_fn: telegram::render_markdown,
            limit_chars: 3900,
        }
    }

    /// Pick a rendering context by platform name (`"discord"` vs anything else, per §6).
    pub fn for_platform(name: &str) -> Self {
        if name.eq_ignore_ascii_case("discord") {
            Self::discord()
        } else {
            Self::telegram_markdown_v2()
        }
    }

    /// Wrap `text` in the platform's bold syntax.
    pub fn bold(&self, text: &str) -> String {
        (self.bold_fn)(text)
    }

    /// Wrap `text` as inline code.
    pub fn code_inline(&self, text: &str) -> String {
        (self.code_inline_fn)(text)
    }

    /// Escape `text` so it renders literally outside of code spans.
    pub fn escape_text(&self, text: &str) -> String {
        (self.escape_text_fn)(text)
    }

    /// Escape `text` for use inside a code span.
    pub fn escape_code(&self, text: &str) -> String {
        (self.escape_code_fn)(text)
    }

    /// Translate generic markdown produced by the transcript renderer into this
    /// platform's flavor.
    pub fn render_markdown(&self, text: &str) -> String {
        (self.render_markdown_fn)(text)
    }

    /// The `(emoji, label[, suffix])` status-line formatter shared by both platforms —
    /// the string itself doesn't need platform-specific escaping since it's built from
    /// literal emoji/labels, only `suffix` (free text) is escaped.
    pub fn format_status(&self, emoji: &str, label: &str, suffix: Option<&str>) -> String {
        match suffix {
            Some(suffix) if !suffix.is_empty() => format!("{emoji} {}\n{}", self.bold(label), self.escape_text(suffix)),
            _ => format!("{emoji} {}", self.bold(label)),
        }
    }
}

mod discord {
    pub fn bold(text: &str) -> String {
        format!("**{text}**")
    }

    pub fn code_inline(text: &str) -> String {
        format!("`{text}`")
    }

    pub fn escape_text(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for ch in text.chars() {
            if matches!(ch, '*' | '_' | '`' | '~' | '|' | '\\') {
                out.push('\\');
            }
            out.push(ch);
        }
        out
    }

    pub fn escape_code(text: &str) -> String {
        text.replace('`', "\\`")
    }

    pub fn render_markdown(text: &str) -> String {
        text.to_owned()
    }
}

mod telegram {
    const SPECIAL: &[char] = &[
        '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
    ];

    pub fn bold(text: &str) -> String {
        format!("*{text}*")
    }

    pub fn code_inline(text: &str) -> String {
        format!("`{text}`")
    }

    pub fn escape_text(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for ch in text.chars() {
            if SPECIAL.contains(&ch) || ch == '\\' {
                out.push('\\');
            }
            out.push(ch);
        }
        out
    }

    pub fn escape_code(text: &str) -> String {
        text.replace('\\', "\\\\").replace('`', "\\`")
    }

    pub fn render_markdown(text: &str) -> String {
        text.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discord_selected_by_name_others_fall_back_to_telegram() {
        assert_eq!(RenderCtx::for_platform("discord").limit_chars, 1900);
        assert_eq!(RenderCtx::for_platform("telegram").limit_chars, 3900);
        assert_eq!(RenderCtx::for_platform("anything-else").limit_chars, 3900);
    }

    #[test]
    fn telegram_escapes_markdown_v2_special_characters() {
        let ctx = RenderCtx::telegram_markdown_v2();
        assert_eq!(ctx.escape_text("a.b!c"), "a\\.b\\!c");
    }

    #[test]
    fn format_status_includes_escaped_suffix() {
        let ctx = RenderCtx::telegram_markdown_v2();
        let status = ctx.format_status("⏹", "Stopped.", Some("Cancelled 2 requests."));
        assert!(status.contains("Stopped"));
        assert!(status.contains("Cancelled"));
    }
}
