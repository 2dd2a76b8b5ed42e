use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

/// API error types
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("You have used all your {0} anonymous redesigns. Please sign in or register to continue.")]
    AuthRequired(u32),

    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    #[error("Email already registered")]
    EmailTaken,

    #[error("Rate limit exceeded. Please try again later.")]
    UpstreamRateLimited,

    #[error("AI service authentication failed")]
    UpstreamAuthFailed,

    #[error("Image too large for processing. Please use a smaller image.")]
    UpstreamPayloadTooLarge,

    #[error("Gateway error from AI service. Please try again in a few moments.")]
    UpstreamGateway(String),

    #[error("The AI service request timed out. Please try again later.")]
    UpstreamTimeout,

    #[error("Malformed response from AI service: {0}")]
    MalformedUpstreamResponse(String),

    #[error("Not found")]
    NotFound,

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// API error response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ApiError {
    /// Get HTTP status code for this error
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) | ApiError::UnsupportedFormat(_) => StatusCode::BAD_REQUEST,
            ApiError::AuthRequired(_) | ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::EmailTaken => StatusCode::CONFLICT,
            ApiError::UpstreamRateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::UpstreamPayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UpstreamGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::UpstreamAuthFailed
            | ApiError::MalformedUpstreamResponse(_)
            | ApiError::Internal(_)
            | ApiError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get machine-readable error code
    fn error_code(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "INVALID_INPUT",
            ApiError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            ApiError::AuthRequired(_) => "AUTH_REQUIRED",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::EmailTaken => "EMAIL_TAKEN",
            ApiError::UpstreamRateLimited => "UPSTREAM_RATE_LIMITED",
            ApiError::UpstreamAuthFailed => "UPSTREAM_AUTH_FAILED",
            ApiError::UpstreamPayloadTooLarge => "UPSTREAM_PAYLOAD_TOO_LARGE",
            ApiError::UpstreamGateway(_) => "UPSTREAM_GATEWAY",
            ApiError::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            ApiError::MalformedUpstreamResponse(_) => "MALFORMED_UPSTREAM_RESPONSE",
            ApiError::NotFound => "NOT_FOUND",
            ApiError::Internal(_) => "INTERNAL_ERROR",
            ApiError::Config(_) => "CONFIG_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code().to_string();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(code = %error_code, %message, "request failed");
        } else {
            tracing::warn!(code = %error_code, %message, "request rejected");
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Internal(format!("IO error: {err}"))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::InvalidInput(format!("JSON parse error: {err}"))
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}
