//! Upstream OpenAI-compatible backends (§4.7): NVIDIA NIM, OpenRouter, and LM Studio.

mod http_client;
mod lmstudio;
mod nim;
mod openrouter;

pub use lmstudio::LmStudioProvider;
pub use nim::NimProvider;
pub use openrouter::OpenRouterProvider;

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::StatusCode;

use rate_limit::GlobalRateLimiter;

use crate::error::GatewayError;
use crate::messages::openai::{ChatCompletionChunk, ChatCompletionRequest};

/// A stream of parsed upstream chunks, or an error for a malformed/failed event.
pub type ChatCompletionStream = BoxStream<'static, Result<ChatCompletionChunk, GatewayError>>;

/// Bound on retry attempts for transient connect/read timeouts and 502/503/504 (§4.7).
const MAX_ATTEMPTS: u32 = 4;
/// Base delay for the exponential backoff between retries, doubled on each attempt.
const BASE_RETRY_DELAY: Duration = Duration::from_millis(250);

/// One upstream backend the translation engine can dispatch a converted request to.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Start a streaming chat completion and return the event stream (§4.4 feeds this into
    /// `StreamProcessor`).
    async fn stream_chat_completion(&self, request: ChatCompletionRequest) -> Result<ChatCompletionStream, GatewayError>;
}

/// Send `request` as a streaming POST to `url`, retrying transient failures with bounded
/// exponential backoff (§4.7), and adapt the response into a [`ChatCompletionStream`].
///
/// Retries only transient connect/read timeouts and 502/503/504 responses, honoring a
/// `Retry-After` header when the upstream sends one. A 429 sets the rate limiter's global
/// cooldown and is never retried here; every other error is returned immediately.
pub(crate) async fn post_streaming(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    request: &ChatCompletionRequest,
    rate_limiter: &GlobalRateLimiter,
) -> Result<ChatCompletionStream, GatewayError> {
    let mut attempt = 0;

    loop {
        attempt += 1;

        let mut builder = client.post(url).json(request);
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }

        let outcome = builder.send().await;

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                let mapped = map_transport_error(err);
                if is_retryable(&mapped) && attempt < MAX_ATTEMPTS {
                    tokio::time::sleep(backoff_delay(attempt, None)).await;
                    continue;
                }
                return Err(mapped);
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = retry_after_delay(&response);

            if status == StatusCode::TOO_MANY_REQUESTS {
                rate_limiter.set_blocked();
                return Err(GatewayError::RateLimitExceeded);
            }

            let body = response.text().await.unwrap_or_default();
            let mapped = map_http_status_error(status, body);

            if is_retryable(&mapped) && attempt < MAX_ATTEMPTS {
                tokio::time::sleep(backoff_delay(attempt, retry_after)).await;
                continue;
            }
            return Err(mapped);
        }

        let stream = response
            .bytes_stream()
            .eventsource()
            .filter_map(|event| async move {
                match event {
                    Ok(event) if event.data == "[DONE]" => None,
                    Ok(event) => Some(
                        serde_json::from_str::<ChatCompletionChunk>(&event.data)
                            .map_err(|err| GatewayError::Internal(anyhow::anyhow!("malformed upstream chunk: {err}"))),
                    ),
                    Err(err) => Some(Err(GatewayError::Internal(anyhow::anyhow!("SSE decode error: {err}")))),
                }
            })
            .boxed();

        return Ok(stream);
    }
}

/// Whether `error` is one of the transient classes retried with backoff (§4.7): connect/read
/// timeouts, and a 5xx the upstream reports as unavailable or overloaded.
fn is_retryable(error: &GatewayError) -> bool {
    matches!(
        error,
        GatewayError::ConnectTimeout | GatewayError::ReadTimeout(_) | GatewayError::ProviderUnavailable | GatewayError::ProviderOverloaded
    )
}

/// Exponential backoff for `attempt` (1-indexed), honoring an upstream `Retry-After` when given.
fn backoff_delay(attempt: u32, retry_after: Option<Duration>) -> Duration {
    retry_after.unwrap_or_else(|| BASE_RETRY_DELAY * 2u32.pow(attempt - 1))
}

/// Parse the `Retry-After` response header as a number of seconds, if present.
fn retry_after_delay(response: &reqwest::Response) -> Option<Duration> {
    let header = response.headers().get(reqwest::header::RETRY_AFTER)?;
    let seconds: u64 = header.to_str().ok()?.parse().ok()?;
    Some(Duration::from_secs(seconds))
}

fn map_transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::ReadTimeout(err.to_string().parse().unwrap_or(0.0))
    } else if err.is_connect() {
        GatewayError::ConnectTimeout
    } else {
        GatewayError::Internal(anyhow::anyhow!(err))
    }
}

/// Map a non-2xx upstream HTTP status to a [`GatewayError`], following
/// `providers/common/error_mapping.py`'s precedence (auth > rate limit > bad request >
/// overloaded/5xx > generic).
fn map_http_status_error(status: StatusCode, body: String) -> GatewayError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::AuthenticationFailed,
        StatusCode::TOO_MANY_REQUESTS => GatewayError::RateLimitExceeded,
        StatusCode::BAD_REQUEST => GatewayError::ProviderRejectedRequest,
        StatusCode::INTERNAL_SERVER_ERROR => {
            let lower = body.to_lowercase();
            if lower.contains("overloaded") || lower.contains("capacity") {
                GatewayError::ProviderOverloaded
            } else {
                GatewayError::ProviderApiError { status: status.as_u16() }
            }
        }
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => GatewayError::ProviderUnavailable,
        other => GatewayError::ProviderApiError { status: other.as_u16() },
    }
}
