//! Gateway error type and its Anthropic-shaped HTTP representation (§7), adapted from the
//! teacher's `LlmError`/`IntoResponse` idiom and the status/message mapping in
//! `providers/common/error_mapping.py`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Result alias used throughout the translation engine.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Errors surfaced to Anthropic-API clients, each carrying enough to pick an HTTP status
/// and an `error.type` string (§7).
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request body didn't deserialize into `MessagesRequest`.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No provider is configured for the requested (normalized) model.
    #[error("Model '{0}' is not available")]
    ModelNotFound(String),

    /// The configured provider rejected our credentials.
    #[error("Provider authentication failed. Check API key.")]
    AuthenticationFailed,

    /// The provider's rate limiter (or our own sliding window / cooldown) is blocking
    /// requests.
    #[error("Provider rate limit reached. Please retry shortly.")]
    RateLimitExceeded,

    /// The provider rejected the translated request body.
    #[error("Invalid request sent to provider.")]
    ProviderRejectedRequest,

    /// The provider reported it is overloaded (5xx with "overloaded"/"capacity" wording).
    #[error("Provider is currently overloaded. Please retry.")]
    ProviderOverloaded,

    /// A read timeout elapsed waiting on the provider.
    #[error("Provider request timed out after {0}s.")]
    ReadTimeout(f64),

    /// A connect timeout elapsed reaching the provider.
    #[error("Could not connect to provider.")]
    ConnectTimeout,

    /// The provider responded with a 5xx we don't otherwise special-case.
    #[error("Provider is temporarily unavailable. Please retry.")]
    ProviderUnavailable,

    /// Any other non-2xx response from the provider.
    #[error("Provider API request failed.")]
    ProviderApiError {
        /// The provider's HTTP status code.
        status: u16,
    },

    /// The gateway's own bug or unexpected state; never leaked verbatim to clients.
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    /// The HTTP status code to answer with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::ProviderRejectedRequest => StatusCode::BAD_REQUEST,
            // Never retried; surfaced as a setup problem for the operator to fix, not a transient fault.
            Self::AuthenticationFailed => StatusCode::SERVICE_UNAVAILABLE,
            Self::ModelNotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::ConnectTimeout | Self::ProviderUnavailable => StatusCode::BAD_GATEWAY,
            Self::ProviderOverloaded => StatusCode::SERVICE_UNAVAILABLE,
            Self::ReadTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::ProviderApiError { status } => match *status {
                400 => StatusCode::BAD_REQUEST,
                401 => StatusCode::UNAUTHORIZED,
                403 => StatusCode::FORBIDDEN,
                404 => StatusCode::NOT_FOUND,
                429 => StatusCode::TOO_MANY_REQUESTS,
                500..=599 => StatusCode::BAD_GATEWAY,
                _ => StatusCode::BAD_GATEWAY,
            },
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Anthropic-style `error.type` discriminant.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) | Self::ProviderRejectedRequest => "invalid_request_error",
            Self::AuthenticationFailed => "authentication_error",
            Self::ModelNotFound(_) => "not_found_error",
            Self::RateLimitExceeded => "rate_limit_error",
            Self::ConnectTimeout | Self::ReadTimeout(_) | Self::ProviderUnavailable | Self::ProviderOverloaded | Self::ProviderApiError { .. } => {
                "api_error"
            }
            Self::Internal(_) => "internal_error",
        }
    }

    /// The message text rendered both in the JSON error body and in-band as a text content
    /// block for a request that had already started streaming (§5 Cancellation).
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(_) => "Internal server error".to_owned(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    #[serde(rename = "type")]
    kind: &'static str,
    message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: ErrorDetails {
                kind: self.error_type(),
                message: self.client_message(),
            },
        };
        (status, Json(body)).into_response()
    }
}
