//! Gateway server supervisor.
//!
//! Builds the active provider from `Settings`, wires the shared rate limiter and
//! translation-engine router, and runs it to completion or graceful shutdown.

#![deny(missing_docs)]

use std::sync::Arc;

use anyhow::anyhow;
use config::{ProviderType, Settings};
use llm::provider::{LmStudioProvider, NimProvider, OpenRouterProvider, Provider};
use llm::server::{GatewayState, ProviderConfigSnapshot};
use rate_limit::GlobalRateLimiter;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

/// Configuration for serving the gateway.
pub struct ServeConfig {
    /// The deserialized gateway settings.
    pub settings: Settings,
    /// Cancellation token for graceful shutdown.
    pub shutdown_signal: CancellationToken,
    /// The version string to log on startup.
    pub version: String,
}

/// Build the active `Provider` and its config snapshot from `settings.provider_type`, sharing
/// `rate_limiter` with the provider so an upstream 429 it observes (§4.7) blocks the same
/// limiter `GatewayState` acquires against.
fn build_provider(settings: &Settings, rate_limiter: Arc<GlobalRateLimiter>) -> anyhow::Result<(Arc<dyn Provider>, ProviderConfigSnapshot)> {
    let timeouts = settings.provider.timeouts;

    match settings.provider_type {
        ProviderType::NvidiaNim => {
            let provider = NimProvider::new(&settings.nim, timeouts, rate_limiter)?;
            Ok((Arc::new(provider), ProviderConfigSnapshot::Nim(settings.nim.clone())))
        }
        ProviderType::OpenRouter => {
            let provider = OpenRouterProvider::new(&settings.open_router, timeouts, rate_limiter)?;
            Ok((Arc::new(provider), ProviderConfigSnapshot::OpenRouter(settings.open_router.clone())))
        }
        ProviderType::Lmstudio => {
            let provider = LmStudioProvider::new(&settings.lmstudio, timeouts, rate_limiter)?;
            Ok((Arc::new(provider), ProviderConfigSnapshot::LmStudio(settings.lmstudio.clone())))
        }
    }
}

/// Starts and runs the gateway with the provided configuration.
pub async fn serve(ServeConfig { settings, shutdown_signal, version }: ServeConfig) -> anyhow::Result<()> {
    log::info!("gatewayd {version}");

    let listen_address = settings.listen_address;
    let rate_limiter = Arc::new(GlobalRateLimiter::new(&settings.provider.rate_limit));
    let (provider, provider_config) = build_provider(&settings, rate_limiter.clone())?;
    let state = Arc::new(GatewayState::new(provider, provider_config, &settings, rate_limiter));

    let app = llm::server::router(state).layer(CorsLayer::permissive());

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    log::info!("Anthropic gateway endpoint: http://{listen_address}/v1/messages");
    log::info!("Health endpoint: http://{listen_address}/health");

    tokio::select! {
        result = axum::serve(listener, app.into_make_service()) => {
            result.map_err(|e| anyhow!("Failed to start HTTP server: {e}"))?;
        }
        _ = shutdown_signal.cancelled() => {
            log::info!("Received shutdown signal, shutting down gracefully...");
        }
    }

    Ok(())
}
