use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, header};
use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::{AppError, UpstreamError};
use crate::message::UpstreamQuery;
use crate::services::endpoints::EndpointSelector;

/// Inbound headers copied verbatim to the upstream call, besides `authorization`.
pub const PASSTHROUGH_HEADERS: &[&str] = &["user-agent", "accept-language", "referer", "cookie"];

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_ERROR_MESSAGE_CHARS: usize = 300;

#[derive(Debug, Clone, Default)]
pub struct ForwardHeaders {
    headers: HeaderMap,
}

impl ForwardHeaders {
    pub fn from_inbound(inbound: &HeaderMap) -> Self {
        let mut headers = HeaderMap::new();
        let names = std::iter::once("authorization").chain(PASSTHROUGH_HEADERS.iter().copied());
        for name in names {
            if let Some(value) = inbound.get(name) {
                if let Ok(name) = header::HeaderName::from_bytes(name.as_bytes()) {
                    headers.insert(name, value.clone());
                }
            }
        }
        Self { headers }
    }

    pub fn with_request_id(mut self, request_id: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(request_id) {
            self.headers.insert(REQUEST_ID_HEADER, value);
        }
        self
    }

    pub fn has_authorization(&self) -> bool {
        self.headers.contains_key(header::AUTHORIZATION)
    }

    #[cfg(test)]
    fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name)
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per endpoint; zero is treated as one.
    pub max_attempts: u32,
    pub timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub backoff_jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            max_attempts: config.max_retries,
            timeout: config.request_timeout,
            backoff_base: config.backoff_base,
            backoff_cap: config.backoff_cap,
            backoff_jitter: config.backoff_jitter,
        }
    }

    /// `min(base * 2^attempt + jitter, cap)`, attempt counted from zero.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.backoff_base.as_millis() as u64;
        let cap = self.backoff_cap.as_millis() as u64;
        let jitter_max = self.backoff_jitter.as_millis() as u64;

        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let jitter = if jitter_max == 0 {
            0
        } else {
            fastrand::u64(0..=jitter_max)
        };
        let delay = base.saturating_mul(factor).saturating_add(jitter);
        Duration::from_millis(delay.min(cap))
    }
}

/// A successful upstream reply: the full body in batch mode, the live response when streaming.
#[derive(Debug)]
pub enum Delivery {
    Body(Bytes),
    Stream(reqwest::Response),
}

#[derive(Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl UpstreamClient {
    pub fn new(policy: RetryPolicy) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("assistant-gateway/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, policy })
    }

    async fn attempt(
        &self,
        url: &str,
        query: &UpstreamQuery,
        headers: &ForwardHeaders,
    ) -> Result<Delivery, UpstreamError> {
        let response = self
            .client
            .post(url)
            .headers(headers.headers.clone())
            .header(header::ACCEPT, "application/json, text/event-stream")
            .json(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                message: extract_error_message(status.as_u16(), &body),
            });
        }

        if query.stream {
            Ok(Delivery::Stream(response))
        } else {
            Ok(Delivery::Body(response.bytes().await?))
        }
    }

    /// Tries one endpoint up to `max_attempts` times. A 404 gives up on it immediately.
    pub async fn send(
        &self,
        endpoint: &str,
        query: &UpstreamQuery,
        headers: &ForwardHeaders,
    ) -> Result<Delivery, UpstreamError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            debug!(endpoint, attempt, attempts, "forwarding to upstream");

            // The timer and the in-flight call live and die with this future.
            let outcome =
                tokio::time::timeout(self.policy.timeout, self.attempt(endpoint, query, headers))
                    .await;

            let err = match outcome {
                Ok(Ok(delivery)) => {
                    debug!(endpoint, attempt, "upstream accepted request");
                    return Ok(delivery);
                }
                Ok(Err(err)) => err,
                Err(_) => UpstreamError::Timeout(self.policy.timeout.as_millis()),
            };

            if err.is_not_found() {
                warn!(endpoint, attempt, "upstream endpoint returned 404, skipping it");
                return Err(err);
            }

            warn!(
                endpoint,
                attempt,
                attempts,
                error = %err,
                detail = ?err,
                "upstream attempt failed"
            );
            if attempt >= attempts {
                return Err(err);
            }

            tokio::time::sleep(self.policy.backoff(attempt - 1)).await;
        }
    }

    /// Walks the endpoints in order until one answers.
    pub async fn forward(
        &self,
        endpoints: &EndpointSelector,
        query: &UpstreamQuery,
        headers: &ForwardHeaders,
    ) -> Result<Delivery, AppError> {
        let mut last_error: Option<UpstreamError> = None;

        for endpoint in endpoints.select() {
            match self.send(endpoint, query, headers).await {
                Ok(delivery) => return Ok(delivery),
                Err(err) => {
                    warn!(endpoint, error = %err, "giving up on endpoint");
                    last_error = Some(err);
                }
            }
        }

        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no upstream endpoints configured".to_string());
        Err(AppError::UpstreamUnavailable(message))
    }
}

/// Picks a human-readable message out of an upstream error body.
pub fn extract_error_message(status: u16, body: &str) -> String {
    let trimmed = body.trim();
    let message = match serde_json::from_str::<Value>(trimmed) {
        Ok(json) => json
            .pointer("/error/message")
            .and_then(Value::as_str)
            .or_else(|| json.get("message").and_then(Value::as_str))
            .or_else(|| json.get("error").and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| trimmed.to_string()),
        Err(_) => trimmed.to_string(),
    };

    if let Some(code) = cloudflare_code(&message) {
        return describe_cloudflare_code(code);
    }
    if message.is_empty() {
        return format!("HTTP error {status}");
    }
    if message.chars().count() > MAX_ERROR_MESSAGE_CHARS {
        let cut: String = message.chars().take(MAX_ERROR_MESSAGE_CHARS).collect();
        return format!("{cut}...");
    }
    message
}

fn cloudflare_code(message: &str) -> Option<&str> {
    let start = message.find("error code: ")? + "error code: ".len();
    let rest = &message[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    (end > 0).then(|| &rest[..end])
}

fn describe_cloudflare_code(code: &str) -> String {
    let description = match code {
        "1000" => "Authentication error - Please check your API key and try again",
        "1015" => "Rate limit exceeded",
        "1019" => "Cloudflare security check failed - Please refresh the page",
        "1020" => "Access denied by security rules",
        _ => "Unknown error",
    };
    format!("{description} (Code: {code})")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            timeout: Duration::from_secs(1),
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_millis(1000),
            backoff_jitter: Duration::from_millis(jitter_ms),
        }
    }

    #[test]
    fn backoff_doubles_until_cap() {
        let p = policy(0);
        assert_eq!(p.backoff(0), Duration::from_millis(100));
        assert_eq!(p.backoff(1), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(800));
        assert_eq!(p.backoff(4), Duration::from_millis(1000));
        assert_eq!(p.backoff(80), Duration::from_millis(1000));
    }

    #[test]
    fn backoff_jitter_stays_in_range() {
        let p = policy(50);
        for _ in 0..100 {
            let d = p.backoff(1);
            assert!(d >= Duration::from_millis(200) && d <= Duration::from_millis(250));
        }
    }

    #[test]
    fn error_message_sources() {
        assert_eq!(
            extract_error_message(500, r#"{"error":{"message":"model overloaded"}}"#),
            "model overloaded"
        );
        assert_eq!(extract_error_message(500, r#"{"message":"bad"}"#), "bad");
        assert_eq!(extract_error_message(500, r#"{"error":"nope"}"#), "nope");
        assert_eq!(extract_error_message(502, "gateway down"), "gateway down");
        assert_eq!(extract_error_message(503, ""), "HTTP error 503");
    }

    #[test]
    fn cloudflare_codes_are_described() {
        assert_eq!(
            extract_error_message(403, r#"{"message":"error code: 1020"}"#),
            "Access denied by security rules (Code: 1020)"
        );
        assert_eq!(
            extract_error_message(429, "error code: 1015"),
            "Rate limit exceeded (Code: 1015)"
        );
        assert_eq!(
            extract_error_message(403, "error code: 1234"),
            "Unknown error (Code: 1234)"
        );
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(1000);
        let msg = extract_error_message(500, &body);
        assert_eq!(msg.chars().count(), MAX_ERROR_MESSAGE_CHARS + 3);
    }

    #[test]
    fn forwards_only_allowed_headers() {
        let mut inbound = HeaderMap::new();
        inbound.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        inbound.insert(header::USER_AGENT, HeaderValue::from_static("test-agent"));
        inbound.insert(header::COOKIE, HeaderValue::from_static("sid=1"));
        inbound.insert(header::HOST, HeaderValue::from_static("gateway.local"));
        inbound.insert("x-secret", HeaderValue::from_static("do-not-forward"));

        let fwd = ForwardHeaders::from_inbound(&inbound).with_request_id("req-1");
        assert!(fwd.has_authorization());
        assert_eq!(fwd.get("user-agent").unwrap(), "test-agent");
        assert_eq!(fwd.get("cookie").unwrap(), "sid=1");
        assert_eq!(fwd.get(REQUEST_ID_HEADER).unwrap(), "req-1");
        assert!(fwd.get("host").is_none());
        assert!(fwd.get("x-secret").is_none());
    }

    #[test]
    fn authorization_is_optional() {
        let fwd = ForwardHeaders::from_inbound(&HeaderMap::new());
        assert!(!fwd.has_authorization());
    }
}
