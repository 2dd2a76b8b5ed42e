//! Upstream AI provider plumbing.
//!
//! Requests to the two external services (Gemini for chat/image generation,
//! Claude for suggestion generation) flow through a shared executor that
//! classifies failures strictly on HTTP status codes and an enumerated set
//! of transport error kinds, then retries the transient ones with bounded
//! exponential backoff.

pub mod claude;
pub mod executor;
pub mod gemini;

use axum::http::StatusCode;
use serde_json::Value;
use std::time::Duration;

use crate::error::ApiError;

/// Upstream provider identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Gemini,
    Claude,
}

impl Provider {
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::Claude => "claude",
        }
    }
}

/// One fully specified upstream call. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub provider: Provider,
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub payload: Value,
    pub timeout: Duration,
    /// Retry budget: total attempts are `max_retries + 1`.
    pub max_retries: u32,
}

/// Enumerated transport failure kinds. Classification never inspects error
/// message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
}

impl TransportErrorKind {
    /// Classify a reqwest transport error; `None` means not transient.
    pub fn classify(err: &reqwest::Error) -> Option<Self> {
        if err.is_timeout() {
            Some(TransportErrorKind::Timeout)
        } else if err.is_connect() {
            Some(TransportErrorKind::Connect)
        } else {
            None
        }
    }
}

/// Why an attempt may be retried.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryReason {
    /// 429 from upstream; the server-provided delay is honored when present.
    RateLimited { retry_after: Option<Duration> },
    /// Any 5xx.
    ServerError(StatusCode),
    /// Timeout or connection failure before a status was received.
    Transport(TransportErrorKind),
}

/// Terminal failure: retrying cannot help.
#[derive(Debug, Clone, PartialEq)]
pub enum FatalReason {
    /// 401/403 from upstream.
    AuthFailed(StatusCode),
    /// 413 from upstream.
    PayloadTooLarge,
    /// Any other non-retryable status.
    BadStatus(StatusCode),
    /// 200 with a body that was not valid JSON.
    InvalidBody(String),
    /// Transport failure outside the enumerated transient kinds.
    Transport(String),
}

/// Tagged result of one upstream attempt. Drives the executor's loop.
#[derive(Debug)]
pub enum UpstreamOutcome {
    Success(Value),
    Retryable(RetryReason),
    Fatal(FatalReason),
}

/// Map a retryable status line onto an outcome.
pub(crate) fn classify_status(status: StatusCode, retry_after: Option<Duration>) -> Option<UpstreamOutcome> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Some(UpstreamOutcome::Fatal(FatalReason::AuthFailed(status)));
    }
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        return Some(UpstreamOutcome::Fatal(FatalReason::PayloadTooLarge));
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Some(UpstreamOutcome::Retryable(RetryReason::RateLimited {
            retry_after,
        }));
    }
    if status.is_server_error() {
        return Some(UpstreamOutcome::Retryable(RetryReason::ServerError(status)));
    }
    if status.is_success() {
        return None; // caller parses the body
    }
    Some(UpstreamOutcome::Fatal(FatalReason::BadStatus(status)))
}

/// Map the final classified failure onto the user-facing error taxonomy.
pub(crate) fn failure_to_error(provider: Provider, outcome: &UpstreamOutcome) -> ApiError {
    match outcome {
        UpstreamOutcome::Success(_) => {
            ApiError::Internal(format!("{} success treated as failure", provider.name()))
        }
        UpstreamOutcome::Retryable(RetryReason::RateLimited { .. }) => ApiError::UpstreamRateLimited,
        UpstreamOutcome::Retryable(RetryReason::ServerError(status)) => {
            ApiError::UpstreamGateway(format!("{} returned {}", provider.name(), status))
        }
        UpstreamOutcome::Retryable(RetryReason::Transport(TransportErrorKind::Timeout)) => {
            ApiError::UpstreamTimeout
        }
        UpstreamOutcome::Retryable(RetryReason::Transport(TransportErrorKind::Connect)) => {
            ApiError::UpstreamGateway(format!("{} connection failed", provider.name()))
        }
        UpstreamOutcome::Fatal(FatalReason::AuthFailed(_)) => ApiError::UpstreamAuthFailed,
        UpstreamOutcome::Fatal(FatalReason::PayloadTooLarge) => ApiError::UpstreamPayloadTooLarge,
        UpstreamOutcome::Fatal(FatalReason::BadStatus(status)) => {
            ApiError::UpstreamGateway(format!("{} returned {}", provider.name(), status))
        }
        UpstreamOutcome::Fatal(FatalReason::InvalidBody(msg)) => {
            ApiError::MalformedUpstreamResponse(msg.clone())
        }
        UpstreamOutcome::Fatal(FatalReason::Transport(msg)) => {
            ApiError::UpstreamGateway(format!("{} request failed: {}", provider.name(), msg))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_and_payload_statuses_are_fatal() {
        for code in [401u16, 403, 413] {
            let status = StatusCode::from_u16(code).unwrap();
            match classify_status(status, None) {
                Some(UpstreamOutcome::Fatal(_)) => {}
                other => panic!("{code} should be fatal, got {other:?}"),
            }
        }
    }

    #[test]
    fn rate_limit_honors_retry_after() {
        let outcome = classify_status(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(7)));
        match outcome {
            Some(UpstreamOutcome::Retryable(RetryReason::RateLimited { retry_after })) => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("expected retryable rate limit, got {other:?}"),
        }
    }

    #[test]
    fn five_xx_is_retryable_success_is_none() {
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, None),
            Some(UpstreamOutcome::Retryable(RetryReason::ServerError(_)))
        ));
        // 529 "overloaded" is in the 5xx range and retryable
        assert!(matches!(
            classify_status(StatusCode::from_u16(529).unwrap(), None),
            Some(UpstreamOutcome::Retryable(RetryReason::ServerError(_)))
        ));
        assert!(classify_status(StatusCode::OK, None).is_none());
    }

    #[test]
    fn failure_mapping_matches_taxonomy() {
        let rate = UpstreamOutcome::Retryable(RetryReason::RateLimited { retry_after: None });
        assert!(matches!(
            failure_to_error(Provider::Claude, &rate),
            ApiError::UpstreamRateLimited
        ));

        let timeout =
            UpstreamOutcome::Retryable(RetryReason::Transport(TransportErrorKind::Timeout));
        assert!(matches!(
            failure_to_error(Provider::Claude, &timeout),
            ApiError::UpstreamTimeout
        ));

        let auth = UpstreamOutcome::Fatal(FatalReason::AuthFailed(StatusCode::UNAUTHORIZED));
        assert!(matches!(
            failure_to_error(Provider::Gemini, &auth),
            ApiError::UpstreamAuthFailed
        ));
    }
}
