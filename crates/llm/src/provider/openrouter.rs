use std::sync::Arc;

use async_trait::async_trait;
use secrecy::ExposeSecret;

use config::OpenRouterConfig;
use rate_limit::GlobalRateLimiter;

use super::{http_client, post_streaming, ChatCompletionStream, Provider};
use crate::error::GatewayError;
use crate::messages::openai::ChatCompletionRequest;

/// OpenRouter, an OpenAI-compatible aggregator.
pub struct OpenRouterProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    rate_limiter: Arc<GlobalRateLimiter>,
}

impl OpenRouterProvider {
    /// Build a provider for OpenRouter from its resolved configuration, sharing `rate_limiter`
    /// with the gateway state.
    pub fn new(config: &OpenRouterConfig, timeouts: config::HttpTimeouts, rate_limiter: Arc<GlobalRateLimiter>) -> reqwest::Result<Self> {
        Ok(Self {
            client: http_client::build(timeouts)?,
            base_url: config.base_url.clone(),
            api_key: config.api_key.as_ref().map(|key| key.expose_secret().to_owned()),
            rate_limiter,
        })
    }
}

#[async_trait]
impl Provider for OpenRouterProvider {
    async fn stream_chat_completion(&self, request: ChatCompletionRequest) -> Result<ChatCompletionStream, GatewayError> {
        let url = format!("{}/chat/completions", self.base_url);
        post_streaming(&self.client, &url, self.api_key.as_deref(), &request, &self.rate_limiter).await
    }
}
