//! HTTP front door for the translation engine: `POST /v1/messages`,
//! `POST /v1/messages/count_tokens`, and `GET /health` (§6).

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, StreamExt};

use config::{ModelMapping as ModelMappingConfig, Settings};
use rate_limit::GlobalRateLimiter;

use crate::error::GatewayError;
use crate::message_converter::{self, TargetProvider};
use crate::messages::anthropic::{CountTokensResponse, MessagesRequest, MessagesResponse, ResponseBlock, Usage};
use crate::model_name::{self, ModelMapping};
use crate::provider::Provider;
use crate::stream_processor::StreamProcessor;
use crate::tokenizer;

/// Everything a request handler needs: the active provider, its config snapshot for
/// `extra_body` construction, the model-name mapping, and the shared rate limiter.
pub struct GatewayState {
    provider: Arc<dyn Provider>,
    provider_config: ProviderConfigSnapshot,
    models: ModelMappingConfig,
    rate_limiter: Arc<GlobalRateLimiter>,
    task_arg_buffering_enabled: bool,
}

/// A clonable snapshot of whichever provider's config section is active, enough to build
/// `extra_body` without re-reading `Settings` on every request.
#[derive(Clone)]
pub enum ProviderConfigSnapshot {
    /// NVIDIA NIM.
    Nim(config::NimConfig),
    /// OpenRouter.
    OpenRouter(config::OpenRouterConfig),
    /// A local LM Studio server.
    LmStudio(config::LmStudioConfig),
}

impl ModelMapping for ModelMappingConfig {
    fn haiku_model(&self) -> Option<&str> {
        Some(&self.haiku_model).filter(|s| !s.is_empty())
    }
    fn sonnet_model(&self) -> Option<&str> {
        Some(&self.sonnet_model).filter(|s| !s.is_empty())
    }
    fn opus_model(&self) -> Option<&str> {
        Some(&self.opus_model).filter(|s| !s.is_empty())
    }
    fn default_model(&self) -> &str {
        &self.model_name
    }
}

impl GatewayState {
    /// Build the shared state for one running gateway instance.
    pub fn new(
        provider: Arc<dyn Provider>,
        provider_config: ProviderConfigSnapshot,
        settings: &Settings,
        rate_limiter: Arc<GlobalRateLimiter>,
    ) -> Self {
        Self {
            provider,
            provider_config,
            models: settings.models.clone(),
            rate_limiter,
            task_arg_buffering_enabled: settings.task_arg_buffering_enabled,
        }
    }

    fn target_provider(&self) -> TargetProvider<'_> {
        match &self.provider_config {
            ProviderConfigSnapshot::Nim(cfg) => TargetProvider::Nim(cfg),
            ProviderConfigSnapshot::OpenRouter(cfg) => TargetProvider::OpenRouter(cfg),
            ProviderConfigSnapshot::LmStudio(cfg) => TargetProvider::LmStudio(cfg),
        }
    }
}

/// Build the router for the translation engine's HTTP surface.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/v1/messages", post(messages))
        .route("/v1/messages/count_tokens", post(count_tokens))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn count_tokens(Json(request): Json<MessagesRequest>) -> Json<CountTokensResponse> {
    Json(CountTokensResponse {
        input_tokens: tokenizer::estimate_request_tokens(&request),
    })
}

async fn messages(State(state): State<Arc<GatewayState>>, Json(request): Json<MessagesRequest>) -> Result<Response, GatewayError> {
    let backend_model = model_name::normalize_model_name(&request.model, &state.models);
    let input_tokens = tokenizer::estimate_request_tokens(&request);
    let upstream_request = message_converter::convert(&request, &backend_model, state.target_provider());
    let wants_stream = request.wants_stream();

    let _admission = state.rate_limiter.acquire().await;

    let mut chunk_stream = state.provider.stream_chat_completion(upstream_request).await?;
    let message_id = format!("msg_{}", uuid::Uuid::new_v4().simple());
    let mut processor = StreamProcessor::new(message_id, backend_model.clone(), input_tokens, state.task_arg_buffering_enabled);

    if wants_stream {
        let first_event = processor.message_start();
        let tail = stream::unfold(Some((chunk_stream, processor)), |state| async move {
            let (mut chunk_stream, mut processor) = state?;
            match chunk_stream.next().await {
                Some(Ok(chunk)) => {
                    let events = processor.process_chunk(chunk);
                    Some((events, Some((chunk_stream, processor))))
                }
                Some(Err(err)) => {
                    let events = processor.finish_with_error(&err.client_message());
                    Some((events, None))
                }
                None => {
                    let events = processor.finish();
                    Some((events, None))
                }
            }
        })
        .flat_map(stream::iter);

        let body_stream = stream::once(async move { first_event }).chain(tail).map(|event| Ok::<_, std::io::Error>(event));

        let mut response = Response::new(Body::from_stream(body_stream));
        response.headers_mut().insert(CONTENT_TYPE, "text/event-stream".parse().unwrap());
        Ok(response)
    } else {
        while let Some(chunk) = chunk_stream.next().await {
            processor.process_chunk(chunk?);
        }
        let accumulated_text = processor.accumulated_text();
        let accumulated_reasoning = processor.accumulated_reasoning();
        let stop_reason = processor.stop_reason().to_owned();
        let output_tokens = processor.estimate_output_tokens();

        let mut content = Vec::new();
        if !accumulated_reasoning.is_empty() {
            content.push(ResponseBlock::Thinking { thinking: accumulated_reasoning });
        }
        if !accumulated_text.is_empty() {
            content.push(ResponseBlock::Text { text: accumulated_text });
        }

        Ok(Json(MessagesResponse {
            id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            kind: "message".to_owned(),
            role: "assistant".to_owned(),
            content,
            model: backend_model,
            stop_reason: Some(stop_reason),
            stop_sequence: None,
            usage: Usage { input_tokens, output_tokens },
        })
        .into_response())
    }
}
