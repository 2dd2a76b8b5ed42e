//! Retry executor for upstream calls.
//!
//! One attempt loop per request: transient outcomes sleep on an exponential
//! backoff (with jitter) and try again until the budget is exhausted; fatal
//! outcomes surface immediately. Timeouts grow on successive attempts to
//! tolerate slow upstream processing.

use futures::StreamExt;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;

use super::{
    classify_status, failure_to_error, FatalReason, RetryReason, TransportErrorKind,
    UpstreamOutcome, UpstreamRequest,
};
use crate::error::{ApiError, ApiResult};

/// Shared HTTP client with connection pooling. Per-request timeouts are set
/// by the executor, not here.
static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(32)
        .build()
        .expect("Failed to build HTTP client")
});

/// Backoff configuration shared by both providers.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Base for exponential backoff.
    pub base_delay: Duration,
    /// Cap on any single computed delay.
    pub max_delay: Duration,
    /// Multiplier applied to the request timeout after a timed-out attempt.
    pub timeout_growth: f64,
    /// Add random jitter to prevent thundering herd.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            timeout_growth: 1.5,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Calculate delay for a specific retry attempt (1-indexed).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        let exponential =
            self.base_delay.as_millis() as f64 * 2f64.powi((attempt - 1) as i32);
        let delay_ms = exponential.min(self.max_delay.as_millis() as f64) as u64;

        // ±25% jitter from the clock's subsecond nanos
        if self.jitter {
            let jitter_range = delay_ms / 4;
            if jitter_range > 0 {
                let nanos = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .subsec_nanos() as u64;
                let jitter = nanos % (jitter_range * 2);
                let with_jitter = delay_ms.saturating_sub(jitter_range) + jitter;
                return Duration::from_millis(with_jitter);
            }
        }

        Duration::from_millis(delay_ms)
    }
}

/// JSON payload of one SSE line, if it carries one.
fn sse_data(line: &str) -> Option<&str> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    Some(data)
}

fn retry_after_header(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// One upstream attempt, classified.
async fn send_once(req: &UpstreamRequest, timeout: Duration) -> UpstreamOutcome {
    let mut builder = HTTP_CLIENT
        .post(&req.url)
        .timeout(timeout)
        .json(&req.payload);
    for (name, value) in &req.headers {
        builder = builder.header(*name, value);
    }

    let response = match builder.send().await {
        Ok(r) => r,
        Err(e) => {
            return match TransportErrorKind::classify(&e) {
                Some(kind) => UpstreamOutcome::Retryable(RetryReason::Transport(kind)),
                None => UpstreamOutcome::Fatal(FatalReason::Transport(e.to_string())),
            };
        }
    };

    let status = response.status();
    let retry_after = retry_after_header(&response);
    if let Some(outcome) = classify_status(status, retry_after) {
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(
            provider = req.provider.name(),
            %status,
            body = %body.chars().take(200).collect::<String>(),
            "upstream attempt failed"
        );
        return outcome;
    }

    match response.json::<Value>().await {
        Ok(v) => UpstreamOutcome::Success(v),
        Err(e) => UpstreamOutcome::Fatal(FatalReason::InvalidBody(e.to_string())),
    }
}

/// Execute an upstream request with bounded retries.
///
/// Makes at most `max_retries + 1` attempts. 401/403/413 never retry;
/// 429 honors a server-provided `retry-after` (plus a one second buffer);
/// 5xx and timeout/connect failures back off exponentially.
pub async fn execute(req: &UpstreamRequest, policy: &RetryPolicy) -> ApiResult<Value> {
    let mut timeout = req.timeout;
    let mut last: Option<RetryReason> = None;

    for attempt in 0..=req.max_retries {
        if attempt > 0 {
            tracing::info!(
                provider = req.provider.name(),
                attempt = attempt + 1,
                total = req.max_retries + 1,
                timeout_secs = timeout.as_secs(),
                "retrying upstream request"
            );
        }

        match send_once(req, timeout).await {
            UpstreamOutcome::Success(v) => return Ok(v),
            outcome @ UpstreamOutcome::Fatal(_) => {
                return Err(failure_to_error(req.provider, &outcome));
            }
            UpstreamOutcome::Retryable(reason) => {
                if attempt < req.max_retries {
                    let delay = match reason {
                        RetryReason::RateLimited {
                            retry_after: Some(after),
                        } => after + Duration::from_secs(1),
                        _ => policy.backoff_delay(attempt + 1),
                    };
                    if matches!(reason, RetryReason::Transport(TransportErrorKind::Timeout)) {
                        timeout = timeout.mul_f64(policy.timeout_growth);
                    }
                    if delay > Duration::from_millis(0) {
                        sleep(delay).await;
                    }
                }
                last = Some(reason);
            }
        }
    }

    let last = last.unwrap_or(RetryReason::Transport(TransportErrorKind::Connect));
    Err(failure_to_error(
        req.provider,
        &UpstreamOutcome::Retryable(last),
    ))
}

/// Execute a streaming upstream request.
///
/// Connection establishment reuses the retry loop; once the stream is open,
/// SSE `data:` payloads are parsed as JSON and handed to `on_chunk` in
/// arrival order. A mid-stream failure surfaces a classified error without
/// retrying — whatever the handler accumulated is the caller's to discard.
pub async fn execute_streaming<F>(
    req: &UpstreamRequest,
    policy: &RetryPolicy,
    mut on_chunk: F,
) -> ApiResult<()>
where
    F: FnMut(Value) -> ApiResult<()>,
{
    let mut timeout = req.timeout;
    let mut last: Option<RetryReason> = None;

    for attempt in 0..=req.max_retries {
        let mut builder = HTTP_CLIENT
            .post(&req.url)
            .timeout(timeout)
            .json(&req.payload);
        for (name, value) in &req.headers {
            builder = builder.header(*name, value);
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                match TransportErrorKind::classify(&e) {
                    Some(kind) => {
                        let reason = RetryReason::Transport(kind);
                        if attempt < req.max_retries {
                            if kind == TransportErrorKind::Timeout {
                                timeout = timeout.mul_f64(policy.timeout_growth);
                            }
                            sleep(policy.backoff_delay(attempt + 1)).await;
                        }
                        last = Some(reason);
                        continue;
                    }
                    None => {
                        return Err(failure_to_error(
                            req.provider,
                            &UpstreamOutcome::Fatal(FatalReason::Transport(e.to_string())),
                        ));
                    }
                }
            }
        };

        let status = response.status();
        if let Some(outcome) = classify_status(status, retry_after_header(&response)) {
            match outcome {
                UpstreamOutcome::Retryable(reason) => {
                    if attempt < req.max_retries {
                        let delay = match reason {
                            RetryReason::RateLimited {
                                retry_after: Some(after),
                            } => after + Duration::from_secs(1),
                            _ => policy.backoff_delay(attempt + 1),
                        };
                        sleep(delay).await;
                    }
                    last = Some(reason);
                    continue;
                }
                fatal => return Err(failure_to_error(req.provider, &fatal)),
            }
        }

        // Stream open: consume chunk by chunk.
        let mut stream = response.bytes_stream();
        let mut buf = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| match TransportErrorKind::classify(&e) {
                Some(TransportErrorKind::Timeout) => ApiError::UpstreamTimeout,
                _ => ApiError::UpstreamGateway(format!(
                    "{} stream interrupted",
                    req.provider.name()
                )),
            })?;
            buf.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buf.find('\n') {
                let line: String = buf.drain(..=pos).collect();
                if let Some(data) = sse_data(&line) {
                    match serde_json::from_str::<Value>(data) {
                        Ok(v) => on_chunk(v)?,
                        Err(e) => {
                            tracing::warn!(error = %e, "skipping undecodable stream chunk");
                        }
                    }
                }
            }
        }

        // The last event may arrive without a trailing newline.
        if let Some(data) = sse_data(&buf) {
            match serde_json::from_str::<Value>(data) {
                Ok(v) => on_chunk(v)?,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping undecodable stream chunk");
                }
            }
        }
        return Ok(());
    }

    let last = last.unwrap_or(RetryReason::Transport(TransportErrorKind::Connect));
    Err(failure_to_error(
        req.provider,
        &UpstreamOutcome::Retryable(last),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Provider;
    use axum::extract::State;
    use axum::routing::post;
    use axum::Router;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn backoff_is_exponential_without_jitter() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(400));
    }

    #[test]
    fn backoff_respects_cap() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_millis(500),
            jitter: false,
            ..RetryPolicy::default()
        };
        assert!(policy.backoff_delay(4) <= Duration::from_millis(500));
    }

    async fn spawn_scripted(statuses: Vec<u16>) -> (String, Arc<AtomicU32>) {
        let hits = Arc::new(AtomicU32::new(0));
        let state = (Arc::new(statuses), hits.clone());
        let app = Router::new().route(
            "/v1/test",
            post(
                |State((script, hits)): State<(Arc<Vec<u16>>, Arc<AtomicU32>)>| async move {
                    let n = hits.fetch_add(1, Ordering::SeqCst) as usize;
                    let code = script.get(n).copied().unwrap_or(200);
                    let status = axum::http::StatusCode::from_u16(code).unwrap();
                    if status.is_success() {
                        (status, axum::Json(json!({"ok": true}))).into_response()
                    } else {
                        status.into_response()
                    }
                },
            ),
        )
        .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/v1/test"), hits)
    }

    use axum::response::IntoResponse;

    fn test_request(url: String, max_retries: u32) -> UpstreamRequest {
        UpstreamRequest {
            provider: Provider::Claude,
            url,
            headers: vec![("x-api-key", "test".to_string())],
            payload: json!({"probe": true}),
            timeout: Duration::from_secs(5),
            max_retries,
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(5),
            jitter: false,
            ..RetryPolicy::default()
        }
    }

    #[tokio::test]
    async fn transient_5xx_is_retried_until_success() {
        let (url, hits) = spawn_scripted(vec![503, 503, 200]).await;
        let body = execute(&test_request(url, 2), &fast_policy()).await.unwrap();
        assert_eq!(body["ok"], json!(true));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn auth_failure_never_retries() {
        let (url, hits) = spawn_scripted(vec![401, 200]).await;
        let err = execute(&test_request(url, 3), &fast_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UpstreamAuthFailed));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn payload_too_large_never_retries() {
        let (url, hits) = spawn_scripted(vec![413, 200]).await;
        let err = execute(&test_request(url, 3), &fast_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UpstreamPayloadTooLarge));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn budget_bounds_attempts_and_surfaces_last_failure() {
        let (url, hits) = spawn_scripted(vec![503, 503, 503, 503, 503]).await;
        let err = execute(&test_request(url, 2), &fast_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UpstreamGateway(_)));
        // max_retries + 1 attempts, no more
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rate_limit_surfaces_as_429_after_budget() {
        let (url, _hits) = spawn_scripted(vec![429, 429]).await;
        let err = execute(&test_request(url, 1), &fast_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UpstreamRateLimited));
    }

    async fn spawn_sse(body: &'static str) -> String {
        let app = Router::new().route(
            "/v1/stream",
            post(move || async move {
                (
                    [(axum::http::header::CONTENT_TYPE, "text/event-stream")],
                    body,
                )
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/v1/stream")
    }

    #[tokio::test]
    async fn streaming_delivers_every_data_event_in_order() {
        let url = spawn_sse(
            "data: {\"n\": 1}\n\ndata: {\"n\": 2}\n\ndata: [DONE]\n",
        )
        .await;
        let mut seen = Vec::new();
        execute_streaming(&test_request(url, 0), &fast_policy(), |v| {
            seen.push(v);
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(seen, vec![json!({"n": 1}), json!({"n": 2})]);
    }

    #[tokio::test]
    async fn streaming_flushes_a_final_event_without_trailing_newline() {
        let url = spawn_sse("data: {\"n\": 1}\n\ndata: {\"n\": 2}").await;
        let mut seen = Vec::new();
        execute_streaming(&test_request(url, 0), &fast_policy(), |v| {
            seen.push(v);
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(seen, vec![json!({"n": 1}), json!({"n": 2})]);
    }

    #[tokio::test]
    async fn streaming_surfaces_fatal_status_without_retrying() {
        let (url, hits) = spawn_scripted(vec![401, 200]).await;
        let err = execute_streaming(&test_request(url, 3), &fast_policy(), |_| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UpstreamAuthFailed));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
