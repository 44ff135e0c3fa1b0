use std::sync::Arc;

use async_trait::async_trait;

use config::LmStudioConfig;
use rate_limit::GlobalRateLimiter;

use super::{http_client, post_streaming, ChatCompletionStream, Provider};
use crate::error::GatewayError;
use crate::messages::openai::ChatCompletionRequest;

/// A local, unauthenticated LM Studio server.
pub struct LmStudioProvider {
    client: reqwest::Client,
    base_url: String,
    rate_limiter: Arc<GlobalRateLimiter>,
}

impl LmStudioProvider {
    /// Build a provider for LM Studio from its resolved configuration, sharing `rate_limiter`
    /// with the gateway state.
    pub fn new(config: &LmStudioConfig, timeouts: config::HttpTimeouts, rate_limiter: Arc<GlobalRateLimiter>) -> reqwest::Result<Self> {
        Ok(Self {
            client: http_client::build(timeouts)?,
            base_url: config.base_url.clone(),
            rate_limiter,
        })
    }
}

#[async_trait]
impl Provider for LmStudioProvider {
    async fn stream_chat_completion(&self, request: ChatCompletionRequest) -> Result<ChatCompletionStream, GatewayError> {
        let url = format!("{}/chat/completions", self.base_url);
        post_streaming(&self.client, &url, None, &request, &self.rate_limiter).await
    }
}
