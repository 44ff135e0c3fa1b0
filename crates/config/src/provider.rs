use secrecy::SecretString;
use serde::Deserialize;
use std::time::Duration;

use crate::HttpTimeouts;

/// Selects which backend the `Provider` layer (§4.7) dispatches translated requests to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// NVIDIA NIM (OpenAI-compatible with NIM-specific `extra_body` fields).
    NvidiaNim,
    /// OpenRouter.
    OpenRouter,
    /// A local LM Studio server.
    Lmstudio,
}

/// Shared, provider-agnostic knobs: concurrency, the sliding-window rate limit, and HTTP
/// timeouts. Each concrete provider config below adds its own base URL / API key / model
/// defaults on top of these.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    /// HTTP connect/read/write timeouts.
    pub timeouts: HttpTimeouts,
    /// Sliding-window + concurrency rate limit applied before every upstream request.
    pub rate_limit: RateLimitConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            timeouts: HttpTimeouts::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Sliding-window acquisition count + concurrency semaphore + global cooldown on 429 (§4.7/§5).
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Maximum acquisitions allowed within `window`.
    pub max_requests: u32,
    /// Width of the sliding window.
    #[serde(with = "crate::duration_secs")]
    pub window: Duration,
    /// Maximum number of concurrently in-flight upstream requests.
    pub max_concurrency: usize,
    /// How long a 429 response blocks all further acquisitions for, process-wide.
    #[serde(with = "crate::duration_secs")]
    pub cooldown_on_429: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
            max_concurrency: 8,
            cooldown_on_429: Duration::from_secs(60),
        }
    }
}

/// NVIDIA NIM provider configuration, including the optional `extra_body` fields the
/// original request builder threads through only when configured (§4.3a).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NimConfig {
    /// API key; wrapped so it never appears in `Debug` output.
    pub api_key: Option<SecretString>,
    /// Base URL of the NIM OpenAI-compatible endpoint.
    pub base_url: String,
    /// Hard cap applied to `max_tokens`, regardless of what the request asked for.
    pub max_tokens_cap: u32,
    /// `chat_template_kwargs` passed through verbatim when set.
    pub chat_template_kwargs: Option<serde_json::Value>,
    /// `top_k` sampling parameter.
    pub top_k: Option<u32>,
    /// `min_p` sampling parameter.
    pub min_p: Option<f64>,
    /// `repetition_penalty` sampling parameter.
    pub repetition_penalty: Option<f64>,
    /// `min_tokens` floor on generated output length.
    pub min_tokens: Option<u32>,
    /// `reasoning_effort`, injected only when the request's `thinking.enabled` is true.
    pub reasoning_effort: Option<String>,
    /// `ignore_eos` passthrough.
    pub ignore_eos: Option<bool>,
    /// `chat_template` override passthrough.
    pub chat_template: Option<String>,
    /// `return_tokens_as_token_ids` passthrough.
    pub return_tokens_as_token_ids: Option<bool>,
    /// `include_stop_str_in_output` passthrough.
    pub include_stop_str_in_output: Option<bool>,
    /// `include_reasoning` passthrough.
    pub include_reasoning: Option<bool>,
}

impl Default for NimConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://integrate.api.nvidia.com/v1".to_owned(),
            max_tokens_cap: 32768,
            chat_template_kwargs: None,
            top_k: None,
            min_p: None,
            repetition_penalty: None,
            min_tokens: None,
            reasoning_effort: None,
            ignore_eos: None,
            chat_template: None,
            return_tokens_as_token_ids: None,
            include_stop_str_in_output: None,
            include_reasoning: None,
        }
    }
}

/// OpenRouter provider configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OpenRouterConfig {
    /// API key; wrapped so it never appears in `Debug` output.
    pub api_key: Option<SecretString>,
    /// Base URL of the OpenRouter OpenAI-compatible endpoint.
    pub base_url: String,
    /// Default `max_tokens` when the request doesn't specify one.
    pub default_max_tokens: u32,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://openrouter.ai/api/v1".to_owned(),
            default_max_tokens: 81920,
        }
    }
}

/// LM Studio provider configuration (a local, unauthenticated OpenAI-compatible server).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LmStudioConfig {
    /// Base URL of the local LM Studio server.
    pub base_url: String,
    /// Default `max_tokens` when the request doesn't specify one.
    pub default_max_tokens: u32,
}

impl Default for LmStudioConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234/v1".to_owned(),
            default_max_tokens: 81920,
        }
    }
}
