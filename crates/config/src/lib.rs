//! Settings for the gateway: model-name mappings, provider credentials and timeouts,
//! rate limits, and the messaging front end's platform/session configuration.

#![deny(missing_docs)]

mod error;
mod loader;
mod messaging;
mod provider;

pub use error::Error;
pub use messaging::{MessagingConfig, PlatformConfig, StatusMessagePrefixes};
pub use provider::{LmStudioConfig, NimConfig, OpenRouterConfig, ProviderConfig, ProviderType, RateLimitConfig};

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Root settings structure, loaded from a TOML file with `{{ env.VAR }}` interpolation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Which backend provider to dispatch translated requests to.
    pub provider_type: ProviderType,
    /// NVIDIA NIM provider configuration (used when `provider_type = "nvidia_nim"`).
    pub nim: NimConfig,
    /// OpenRouter provider configuration (used when `provider_type = "open_router"`).
    pub open_router: OpenRouterConfig,
    /// LM Studio provider configuration (used when `provider_type = "lmstudio"`).
    pub lmstudio: LmStudioConfig,
    /// Shared HTTP client timeouts and rate limiting, applied to whichever provider is active.
    pub provider: ProviderConfig,
    /// Model-name normalization targets (§4.5).
    pub models: ModelMapping,
    /// Messaging front end (Telegram/Discord, session store path, commands).
    pub messaging: MessagingConfig,
    /// Address the gateway's HTTP server binds to.
    pub listen_address: std::net::SocketAddr,
    /// When true (default), the `Task` tool's streamed arguments are buffered until they
    /// parse as valid JSON before being emitted as a single delta (see SPEC_FULL.md §9).
    pub task_arg_buffering_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider_type: ProviderType::NvidiaNim,
            nim: NimConfig::default(),
            open_router: OpenRouterConfig::default(),
            lmstudio: LmStudioConfig::default(),
            provider: ProviderConfig::default(),
            models: ModelMapping::default(),
            messaging: MessagingConfig::default(),
            listen_address: ([127, 0, 0, 1], 8000).into(),
            task_arg_buffering_enabled: true,
        }
    }
}

/// Model-name mapping targets used by `llm::model_name::normalize` (§4.5).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ModelMapping {
    /// Target model id substituted for any request naming a haiku-class Claude model.
    pub haiku_model: String,
    /// Target model id substituted for any request naming a sonnet-class Claude model.
    pub sonnet_model: String,
    /// Target model id substituted for any request naming an opus-class Claude model.
    pub opus_model: String,
    /// Target model id substituted for any other Claude-identified request.
    pub model_name: String,
}

/// HTTP connect/read/write timeouts, expressed as the parsed durations used by `reqwest::Client`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HttpTimeouts {
    /// Upper bound on establishing the TCP/TLS connection.
    #[serde(with = "duration_secs")]
    pub connect: Duration,
    /// Upper bound on waiting for the next chunk of a streaming response.
    #[serde(with = "duration_secs")]
    pub read: Duration,
    /// Upper bound on writing the request body.
    #[serde(with = "duration_secs")]
    pub write: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            read: Duration::from_secs(120),
            write: Duration::from_secs(30),
        }
    }
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

impl Settings {
    /// Load settings from a TOML file, expanding `{{ env.VAR }}` placeholders in string
    /// values before deserializing, and validating the result.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Settings> {
        loader::load(path)
    }

    /// Validate cross-field invariants that `serde` alone can't express (e.g. the active
    /// provider has a usable API key).
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_empty_toml() {
        let settings: Settings = toml::from_str("").unwrap();
        assert!(matches!(settings.provider_type, ProviderType::NvidiaNim));
        assert_eq!(settings.lmstudio.default_max_tokens, 81920);
    }
}
