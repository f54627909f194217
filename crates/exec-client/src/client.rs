//! Submit, poll and fetch against the queue endpoints.
//!
//! A request moves `submitted -> {queued, processing}* -> completed | failed
//! | expired`, with a client-side timeout when polling runs out of attempts.
//! Polls for one request id are strictly sequential.

use crate::error::ExecError;
use crate::extract;
use crate::sanitize;
use crate::transport::{parse_retry_after, HttpRequest, HttpResponse, RetryingTransport};
use protocol::config::PollConfig;
use protocol::{
    RequestState, StatusReport, SubmitAck, SubmitPayload, API_KEY_HEADER, RESULT_PATH,
    STATUS_PATH, SUBMIT_PATH,
};
use reqwest::Url;
use serde_json::Value;
use std::time::{Duration, SystemTime};
use system_utils::delay::{next_interval, sleep};
use tracing::{debug, info, warn};

const BODY_PREVIEW_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub initial_delay: Duration,
    pub interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from(&PollConfig::default())
    }
}

impl From<&PollConfig> for PollPolicy {
    fn from(config: &PollConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            interval: Duration::from_millis(config.interval_ms),
            multiplier: config.multiplier,
            max_interval: Duration::from_millis(config.max_interval_ms),
            max_attempts: config.max_attempts,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub file_data: Option<Value>,
    /// Overrides [`PollPolicy::max_attempts`] for this call.
    pub max_attempts: Option<u32>,
}

#[derive(Clone)]
pub struct AsyncCommandClient {
    transport: RetryingTransport,
    poll: PollPolicy,
}

impl AsyncCommandClient {
    pub fn new(transport: RetryingTransport, poll: PollPolicy) -> Self {
        Self { transport, poll }
    }

    pub async fn submit(
        &self,
        base_url: &str,
        api_key: &str,
        command: &str,
        file_data: Option<Value>,
    ) -> Result<SubmitAck, ExecError> {
        let payload = SubmitPayload::new(command, file_data);
        let body = serde_json::to_string(&payload)
            .map_err(|err| ExecError::InvalidResponse(format!("unencodable payload: {err}")))?;
        let request = HttpRequest::post_json(endpoint(base_url, SUBMIT_PATH), body)
            .header(API_KEY_HEADER, api_key);
        let response = self.send(&request, "submit").await?;
        match response.status {
            503 => {
                return Err(ExecError::QueueFull {
                    retry_after_secs: retry_after_hint(&response),
                })
            }
            429 => {
                return Err(ExecError::RemoteRateLimited {
                    retry_after_secs: retry_after_hint(&response),
                })
            }
            _ if !response.is_success() => return Err(http_error("submit", &response)),
            _ => {}
        }
        let body = parse_body("submit", &response)?;
        if let Some(message) = extract::body_error(&body) {
            return Err(ExecError::Remote(sanitize::clean_error(&message)));
        }
        let request_id = extract::request_id(&body).ok_or_else(|| {
            ExecError::InvalidResponse("submit response is missing a request id".to_string())
        })?;
        let ack = SubmitAck {
            status: body
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or(RequestState::Queued.as_str())
                .to_string(),
            message: extract::message(&body),
            request_id,
        };
        info!(request_id = %ack.request_id, status = %ack.status, "command submitted");
        Ok(ack)
    }

    pub async fn check_status(
        &self,
        base_url: &str,
        api_key: &str,
        request_id: &str,
    ) -> Result<StatusReport, ExecError> {
        let url = request_url(base_url, STATUS_PATH, request_id)?;
        let request = HttpRequest::get(url).header(API_KEY_HEADER, api_key);
        let response = self.send(&request, "status").await?;
        ensure_found(&response, request_id)?;
        if !response.is_success() {
            return Err(http_error("status", &response));
        }
        let body = parse_body("status", &response)?;
        if let Some(message) = extract::status_body_error(&body) {
            return Err(ExecError::Remote(sanitize::clean_error(&message)));
        }
        let report: StatusReport = serde_json::from_value(body).map_err(|err| {
            ExecError::InvalidResponse(format!("status response for {request_id}: {err}"))
        })?;
        if report.request_id != request_id {
            return Err(ExecError::InvalidResponse(format!(
                "status response for {request_id} names request {}",
                report.request_id
            )));
        }
        Ok(report)
    }

    pub async fn fetch_result(
        &self,
        base_url: &str,
        api_key: &str,
        request_id: &str,
    ) -> Result<Value, ExecError> {
        let url = request_url(base_url, RESULT_PATH, request_id)?;
        let request = HttpRequest::get(url).header(API_KEY_HEADER, api_key);
        let response = self.send(&request, "result").await?;
        ensure_found(&response, request_id)?;
        if !response.is_success() {
            return Err(http_error("result", &response));
        }
        parse_body("result", &response)
    }

    /// Submits `command` and waits for its result.
    pub async fn execute(
        &self,
        base_url: &str,
        api_key: &str,
        command: &str,
        options: ExecuteOptions,
    ) -> Result<Value, ExecError> {
        self.attempt_budget(options.max_attempts)?;
        let ack = self
            .submit(base_url, api_key, command, options.file_data)
            .await?;
        sleep(self.poll.initial_delay).await;
        self.await_request(base_url, api_key, &ack.request_id, options.max_attempts)
            .await
    }

    /// Polls an already submitted request until it is terminal.
    ///
    /// Also usable after a [`ExecError::TimedOut`] to keep waiting on the
    /// same request id.
    pub async fn await_request(
        &self,
        base_url: &str,
        api_key: &str,
        request_id: &str,
        max_attempts: Option<u32>,
    ) -> Result<Value, ExecError> {
        let max_attempts = self.attempt_budget(max_attempts)?;
        let mut interval = self.poll.interval;
        for attempt in 1..=max_attempts {
            let report = self.check_status(base_url, api_key, request_id).await?;
            let state = report.state();
            debug!(request_id, attempt, state = %state, "polled request");
            match state {
                RequestState::Completed => {
                    info!(request_id, attempts = attempt, "command completed");
                    return self.fetch_result(base_url, api_key, request_id).await;
                }
                state if state.is_terminal() => {
                    warn!(request_id, state = %state, "command ended without result");
                    return Err(ExecError::RemoteFailed {
                        request_id: request_id.to_string(),
                        state,
                    });
                }
                _ if attempt < max_attempts => {
                    sleep(interval).await;
                    interval =
                        next_interval(interval, self.poll.multiplier, self.poll.max_interval);
                }
                _ => {}
            }
        }
        warn!(request_id, attempts = max_attempts, "polling gave up");
        Err(ExecError::TimedOut {
            request_id: request_id.to_string(),
            attempts: max_attempts,
        })
    }

    fn attempt_budget(&self, max_attempts: Option<u32>) -> Result<u32, ExecError> {
        match max_attempts.unwrap_or(self.poll.max_attempts) {
            0 => Err(ExecError::InvalidConfig(
                "max_attempts must be greater than zero".to_string(),
            )),
            budget => Ok(budget),
        }
    }

    async fn send(
        &self,
        request: &HttpRequest,
        operation: &str,
    ) -> Result<HttpResponse, ExecError> {
        self.transport
            .send(request, operation)
            .await
            .map_err(|err| ExecError::Network {
                operation: operation.to_string(),
                message: sanitize::redact(&err.message),
            })
    }
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// `{base}{path}/{request_id}` with the id encoded as a single path segment.
fn request_url(base_url: &str, path: &str, request_id: &str) -> Result<String, ExecError> {
    if matches!(request_id.trim(), "" | "." | "..") {
        return Err(ExecError::InvalidCommand(format!(
            "invalid request id {request_id:?}"
        )));
    }
    let mut url = Url::parse(&endpoint(base_url, path))
        .map_err(|err| ExecError::InvalidConfig(format!("invalid api_url {base_url}: {err}")))?;
    url.path_segments_mut()
        .map_err(|_| ExecError::InvalidConfig(format!("api_url {base_url} cannot take a path")))?
        .push(request_id);
    Ok(url.into())
}

fn retry_after_hint(response: &HttpResponse) -> Option<u64> {
    response
        .retry_after
        .as_deref()
        .and_then(|value| parse_retry_after(value, SystemTime::now()))
        .map(|wait| wait.as_secs().max(1))
}

fn ensure_found(response: &HttpResponse, request_id: &str) -> Result<(), ExecError> {
    if response.status == 404 {
        return Err(ExecError::NotFound {
            request_id: request_id.to_string(),
        });
    }
    Ok(())
}

fn parse_body(operation: &str, response: &HttpResponse) -> Result<Value, ExecError> {
    if response.body.trim().is_empty() {
        return Ok(Value::Null);
    }
    response
        .json()
        .map_err(|err| ExecError::InvalidResponse(format!("{operation} response: {err}")))
}

fn http_error(operation: &str, response: &HttpResponse) -> ExecError {
    let body = serde_json::from_str::<Value>(&response.body)
        .ok()
        .and_then(|value| extract::body_error(&value).or_else(|| extract::message(&value)))
        .unwrap_or_else(|| preview(&response.body));
    ExecError::Http {
        operation: operation.to_string(),
        status: response.status,
        body: sanitize::clean_error(&body),
    }
}

fn preview(body: &str) -> String {
    if body.len() <= BODY_PREVIEW_LIMIT {
        return body.to_string();
    }
    let mut end = BODY_PREVIEW_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
