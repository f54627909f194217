use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod config;

pub const SUBMIT_PATH: &str = "/executecommand-async";
pub const STATUS_PATH: &str = "/status";
pub const RESULT_PATH: &str = "/result";
pub const API_KEY_HEADER: &str = "api-key";

/// Body posted to the submission endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitPayload {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filedata: Option<Value>,
}

impl SubmitPayload {
    pub fn new(command: impl Into<String>, filedata: Option<Value>) -> Self {
        Self {
            command: command.into(),
            filedata,
        }
    }
}

/// Normalized acknowledgement of a queued command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitAck {
    pub request_id: String,
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Lifecycle of a queued request as reported by the status endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Queued,
    Processing,
    Completed,
    Failed,
    Expired,
    Unknown,
}

impl RequestState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "queued" => Self::Queued,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "expired" => Self::Expired,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `GET /status/{request_id}`.
///
/// `status` stays a raw string so that states this client does not know
/// about keep the poll loop going instead of failing deserialization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusReport {
    pub request_id: String,
    #[serde(default)]
    pub command: Option<String>,
    pub status: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

impl StatusReport {
    pub fn state(&self) -> RequestState {
        RequestState::parse(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn submit_payload_omits_missing_filedata() {
        let payload = SubmitPayload::new("ls", None);
        let json = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(json, json!({ "command": "ls" }));
    }

    #[test]
    fn submit_payload_keeps_filedata() {
        let payload = SubmitPayload::new("import", Some(json!({ "name": "a.json" })));
        let json = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(json["filedata"]["name"], "a.json");
    }

    #[test]
    fn status_report_tolerates_null_timestamps() {
        let raw = r#"{
            "request_id": "abc",
            "command": "ls",
            "status": "processing",
            "created_at": "2024-01-01T00:00:00Z",
            "started_at": null,
            "completed_at": null
        }"#;
        let report: StatusReport = serde_json::from_str(raw).expect("deserialize");
        assert_eq!(report.state(), RequestState::Processing);
        assert!(report.started_at.is_none());
    }

    #[test]
    fn unknown_state_is_not_terminal() {
        let state = RequestState::parse("paused");
        assert_eq!(state, RequestState::Unknown);
        assert!(!state.is_terminal());
        assert!(RequestState::parse(" Completed ").is_terminal());
    }
}
