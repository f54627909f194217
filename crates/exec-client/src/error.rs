use protocol::RequestState;
use serde::Serialize;
use std::time::Duration;

/// Which sliding window rejected a submission.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    Minute,
    Hour,
}

impl LimitType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
        }
    }
}

impl std::fmt::Display for LimitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("remote command service is not configured; set api_url and api_key")]
    NotConfigured,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("{message}")]
    RateLimited {
        limit_type: LimitType,
        retry_after_secs: u64,
        message: String,
    },

    #[error("remote command queue is full; try again shortly")]
    QueueFull { retry_after_secs: Option<u64> },

    #[error("remote command service is rate limiting this client; try again shortly")]
    RemoteRateLimited { retry_after_secs: Option<u64> },

    #[error("request {request_id} was not found or has expired on the remote service")]
    NotFound { request_id: String },

    #[error("{operation} failed: {message}")]
    Network { operation: String, message: String },

    #[error("{operation} returned HTTP {status}: {body}")]
    Http {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("request {request_id} {state} on the remote service")]
    RemoteFailed {
        request_id: String,
        state: RequestState,
    },

    #[error(
        "request {request_id} did not finish after {attempts} status checks; \
         it may still be running on the remote service"
    )]
    TimedOut { request_id: String, attempts: u32 },

    #[error("{0}")]
    Remote(String),

    #[error("rate limit store error: {0}")]
    Store(String),
}

impl ExecError {
    pub(crate) fn rate_limited(limit_type: LimitType, retry_after_secs: u64) -> Self {
        let wait = humantime::format_duration(Duration::from_secs(retry_after_secs));
        let window = match limit_type {
            LimitType::Minute => "per-minute",
            LimitType::Hour => "per-hour",
        };
        Self::RateLimited {
            limit_type,
            retry_after_secs,
            message: format!("{window} command limit reached; try again in {wait}"),
        }
    }

    /// Stable identifier for calling UIs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotConfigured => "not_configured",
            Self::InvalidConfig(_) => "invalid_config",
            Self::InvalidCommand(_) => "invalid_command",
            Self::RateLimited { .. } => "rate_limited",
            Self::QueueFull { .. } => "queue_full",
            Self::RemoteRateLimited { .. } => "remote_rate_limited",
            Self::NotFound { .. } => "not_found",
            Self::Network { .. } => "network",
            Self::Http { .. } => "http",
            Self::InvalidResponse(_) => "invalid_response",
            Self::RemoteFailed { .. } => "remote_failed",
            Self::TimedOut { .. } => "timed_out",
            Self::Remote(_) => "remote_error",
            Self::Store(_) => "store",
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Client-side wait, or the server's hint for remote queue errors.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            Self::QueueFull { retry_after_secs } | Self::RemoteRateLimited { retry_after_secs } => {
                *retry_after_secs
            }
            _ => None,
        }
    }

    pub fn is_remote_queue_error(&self) -> bool {
        matches!(self, Self::QueueFull { .. } | Self::RemoteRateLimited { .. })
    }

    pub fn limit_type(&self) -> Option<LimitType> {
        match self {
            Self::RateLimited { limit_type, .. } => Some(*limit_type),
            _ => None,
        }
    }

    /// Errors where resubmitting later can succeed without changing anything.
    pub fn is_retryable_later(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::QueueFull { .. }
                | Self::RemoteRateLimited { .. }
                | Self::Network { .. }
                | Self::TimedOut { .. }
        )
    }

    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload::from(self)
    }
}

/// Serializable error shape handed to callers.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub rate_limited: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub remote_queue: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_type: Option<LimitType>,
    pub retryable: bool,
}

impl From<&ExecError> for ErrorPayload {
    fn from(err: &ExecError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            rate_limited: err.is_rate_limited(),
            remote_queue: err.is_remote_queue_error(),
            retry_after: err.retry_after_secs(),
            limit_type: err.limit_type(),
            retryable: err.is_retryable_later(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rate_limited_payload_carries_machine_fields() {
        let err = ExecError::rate_limited(LimitType::Minute, 42);
        assert_eq!(err.retry_after_secs(), Some(42));
        assert_eq!(err.limit_type(), Some(LimitType::Minute));
        assert!(err.to_string().contains("42s"));
        let payload = serde_json::to_value(err.payload()).expect("serialize");
        assert_eq!(payload["code"], "rate_limited");
        assert_eq!(payload["rate_limited"], true);
        assert_eq!(payload["retry_after"], 42);
        assert_eq!(payload["limit_type"], "minute");
    }

    #[test]
    fn plain_errors_omit_rate_fields() {
        let err = ExecError::NotFound {
            request_id: "r-1".to_string(),
        };
        let payload = serde_json::to_value(err.payload()).expect("serialize");
        assert_eq!(
            payload,
            json!({
                "code": "not_found",
                "message": "request r-1 was not found or has expired on the remote service",
                "retryable": false
            })
        );
    }

    #[test]
    fn timeout_message_mentions_remote_job() {
        let err = ExecError::TimedOut {
            request_id: "r-9".to_string(),
            attempts: 3,
        };
        let message = err.to_string();
        assert!(message.contains("r-9"));
        assert!(message.contains("3 status checks"));
        assert!(message.contains("may still be running"));
    }

    #[test]
    fn remote_queue_errors_are_distinct_from_client_limit() {
        let full = ExecError::QueueFull {
            retry_after_secs: None,
        };
        let limited = ExecError::RemoteRateLimited {
            retry_after_secs: Some(30),
        };
        assert_ne!(full.code(), limited.code());
        assert!(!limited.is_rate_limited());
        let payload = serde_json::to_value(limited.payload()).expect("serialize");
        assert_eq!(payload["remote_queue"], true);
        assert_eq!(payload["retry_after"], 30);
        assert!(payload.get("rate_limited").is_none());
        assert!(payload.get("limit_type").is_none());
    }
}
