//! Model-name normalization (§4.5), ported from `providers/model_utils.py`.

const PROVIDER_PREFIXES: &[&str] = &["anthropic/", "openai/", "gemini/"];
const CLAUDE_IDENTIFIERS: &[&str] = &["haiku", "sonnet", "opus", "claude"];

/// Strip a leading `anthropic/`, `openai/`, or `gemini/` prefix, if present.
pub fn strip_provider_prefix(model: &str) -> &str {
    for prefix in PROVIDER_PREFIXES {
        if let Some(stripped) = model.strip_prefix(prefix) {
            return stripped;
        }
    }
    model
}

/// True if the (prefix-stripped) model name identifies as a Claude model.
pub fn is_claude_model(model: &str) -> bool {
    let lower = model.to_lowercase();
    CLAUDE_IDENTIFIERS.iter().any(|name| lower.contains(name))
}

/// The per-family model mapping consulted when a request names a Claude model.
pub trait ModelMapping {
    /// Model to substitute for `claude-3-haiku`-style names.
    fn haiku_model(&self) -> Option<&str>;
    /// Model to substitute for `claude-3-sonnet`-style names.
    fn sonnet_model(&self) -> Option<&str>;
    /// Model to substitute for `claude-3-opus`-style names.
    fn opus_model(&self) -> Option<&str>;
    /// Fallback for any other Claude-family name.
    fn default_model(&self) -> &str;
}

/// Normalize a model name: strip provider prefixes, then map Claude-family names to the
/// configured backend model. Non-Claude names pass through unchanged.
pub fn normalize_model_name(model: &str, mapping: &impl ModelMapping) -> String {
    let clean = strip_provider_prefix(model);

    if is_claude_model(clean) {
        let lower = clean.to_lowercase();

        if lower.contains("haiku") {
            if let Some(haiku) = mapping.haiku_model().filter(|m| !m.is_empty()) {
                return haiku.to_owned();
            }
        }
        if lower.contains("sonnet") {
            if let Some(sonnet) = mapping.sonnet_model().filter(|m| !m.is_empty()) {
                return sonnet.to_owned();
            }
        }
        if lower.contains("opus") {
            if let Some(opus) = mapping.opus_model().filter(|m| !m.is_empty()) {
                return opus.to_owned();
            }
        }

        return mapping.default_model().to_owned();
    }

    model.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Mapping {
        haiku: Option<String>,
        sonnet: Option<String>,
        opus: Option<String>,
        default: String,
    }

    impl ModelMapping for Mapping {
        fn haiku_model(&self) -> Option<&str> {
            self.haiku.as_deref()
        }
        fn sonnet_model(&self) -> Option<&str> {
            self.sonnet.as_deref()
        }
        fn opus_model(&self) -> Option<&str> {
            self.opus.as_deref()
        }
        fn default_model(&self) -> &str {
            &self.default
        }
    }

    fn mapping() -> Mapping {
        Mapping {
            haiku: Some("small-model".into()),
            sonnet: Some("mid-model".into()),
            opus: None,
            default: "fallback-model".into(),
        }
    }

    #[test]
    fn strips_provider_prefix() {
        assert_eq!(strip_provider_prefix("anthropic/claude-3-haiku"), "claude-3-haiku");
        assert_eq!(strip_provider_prefix("claude-3-haiku"), "claude-3-haiku");
    }

    #[test]
    fn maps_claude_families() {
        assert_eq!(normalize_model_name("anthropic/claude-3-haiku-20240307", &mapping()), "small-model");
        assert_eq!(normalize_model_name("claude-3-5-sonnet-20241022", &mapping()), "mid-model");
    }

    #[test]
    fn unmapped_opus_falls_back_to_default() {
        assert_eq!(normalize_model_name("claude-3-opus-20240229", &mapping()), "fallback-model");
    }

    #[test]
    fn non_claude_model_passes_through() {
        assert_eq!(normalize_model_name("llama-3.1-70b", &mapping()), "llama-3.1-70b");
    }

    #[test]
    fn non_claude_model_keeps_its_provider_prefix() {
        assert_eq!(normalize_model_name("openai/gpt-4", &mapping()), "openai/gpt-4");
    }
}
