//! HTTP transport that retries transient failures.
//!
//! A response whose status is in [`RETRYABLE_STATUSES`] is retried until the
//! budget runs out, after which the last response is handed back unchanged so
//! the caller can map it to a domain error. Network errors share the same
//! budget but are re-raised once it is spent.

use async_trait::async_trait;
use protocol::config::RetryConfig;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use system_utils::delay::{backoff_delay, jitter_from_sample, jitter_sample, sleep};
use tracing::{debug, warn};

pub const RETRYABLE_STATUSES: [u16; 4] = [429, 502, 503, 504];

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HTTP_IO_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("vault-exec/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// Fully specified request; the transport never alters it between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: vec![("Accept".to_string(), "application/json".to_string())],
            body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: String) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: vec![
                ("Accept".to_string(), "application/json".to_string()),
                (CONTENT_TYPE.as_str().to_string(), "application/json".to_string()),
            ],
            body: Some(body),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Raw `Retry-After` header, if the server sent one.
    pub retry_after: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn with_retry_after(mut self, value: impl Into<String>) -> Self {
        self.retry_after = Some(value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status / 100 == 2
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Failure to obtain any response at all.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    pub timeout: bool,
    pub connect: bool,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timeout: false,
            connect: false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            message: err.to_string(),
            timeout: err.is_timeout(),
            connect: err.is_connect(),
        }
    }
}

/// One HTTP round trip. Implemented by [`ReqwestSender`] and by test fakes.
#[async_trait]
pub trait HttpSend: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[derive(Clone)]
pub struct ReqwestSender {
    client: Client,
}

impl ReqwestSender {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeouts(HTTP_CONNECT_TIMEOUT, HTTP_IO_TIMEOUT)
    }

    pub fn with_timeouts(connect: Duration, io: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(connect)
            .timeout(io)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpSend for ReqwestSender {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        let response = builder.send().await.map_err(|err| {
            debug!(
                method = request.method.as_str(),
                timeout = err.is_timeout(),
                connect = err.is_connect(),
                error = %err,
                "reqwest error"
            );
            TransportError::from(err)
        })?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;
        Ok(HttpResponse {
            status,
            retry_after,
            body,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            retryable_statuses: RETRYABLE_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Backoff before jitter for the retry following `attempt` (zero based).
    pub fn computed_delay(&self, attempt: u32) -> Duration {
        backoff_delay(self.base_delay, attempt, self.max_delay)
    }

    /// Longest wait a server hint may impose.
    pub fn hint_ceiling(&self) -> Duration {
        self.max_delay.saturating_mul(2)
    }

    /// Delay before the next attempt; a server hint replaces the backoff.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>, sample: f64) -> Duration {
        match hint {
            Some(hint) => {
                let ceiling = self.hint_ceiling();
                let clamped = hint.min(ceiling);
                (clamped + jitter_from_sample(clamped, sample)).min(ceiling)
            }
            None => {
                let delay = self.computed_delay(attempt);
                delay + jitter_from_sample(delay, sample)
            }
        }
    }
}

/// Parses a `Retry-After` value given as delta seconds or an HTTP date.
pub fn parse_retry_after(value: &str, now: SystemTime) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = httpdate::parse_http_date(value).ok()?;
    Some(at.duration_since(now).unwrap_or(Duration::ZERO))
}

#[derive(Debug, Clone, Copy)]
struct RetryState {
    attempt: u32,
    delay: Duration,
}

impl RetryState {
    fn first() -> Self {
        Self {
            attempt: 0,
            delay: Duration::ZERO,
        }
    }

    fn next(self, delay: Duration) -> Self {
        Self {
            attempt: self.attempt + 1,
            delay,
        }
    }
}

#[derive(Clone)]
pub struct RetryingTransport {
    sender: Arc<dyn HttpSend>,
    policy: RetryPolicy,
}

impl RetryingTransport {
    pub fn new(sender: Arc<dyn HttpSend>, policy: RetryPolicy) -> Self {
        Self { sender, policy }
    }

    /// Sends `request`, retrying transient failures. `operation` only labels logs.
    pub async fn send(
        &self,
        request: &HttpRequest,
        operation: &str,
    ) -> Result<HttpResponse, TransportError> {
        let mut state = RetryState::first();
        loop {
            let exhausted = state.attempt >= self.policy.max_retries;
            match self.sender.send(request).await {
                Ok(response) => {
                    if !self.policy.is_retryable(response.status) {
                        return Ok(response);
                    }
                    if exhausted {
                        warn!(
                            operation,
                            attempts = state.attempt + 1,
                            status = response.status,
                            "retries exhausted; returning last response"
                        );
                        return Ok(response);
                    }
                    let hint = response
                        .retry_after
                        .as_deref()
                        .and_then(|value| parse_retry_after(value, SystemTime::now()));
                    let delay = self.policy.delay_for(state.attempt, hint, jitter_sample());
                    warn!(
                        operation,
                        attempt = state.attempt + 1,
                        status = response.status,
                        retry_after = response.retry_after.as_deref().unwrap_or("none"),
                        delay_ms = delay.as_millis() as u64,
                        "retryable status"
                    );
                    state = state.next(delay);
                }
                Err(err) => {
                    if exhausted {
                        warn!(
                            operation,
                            attempts = state.attempt + 1,
                            error = %err,
                            "retries exhausted on network error"
                        );
                        return Err(err);
                    }
                    let delay = self.policy.delay_for(state.attempt, None, jitter_sample());
                    warn!(
                        operation,
                        attempt = state.attempt + 1,
                        error = %err,
                        timeout = err.timeout,
                        connect = err.connect,
                        delay_ms = delay.as_millis() as u64,
                        "network error"
                    );
                    state = state.next(delay);
                }
            }
            sleep(state.delay).await;
        }
    }
}
