//! Entry point for running commands against the remote service.

use crate::client::{AsyncCommandClient, ExecuteOptions};
use crate::config::{validate_service, ConfigProvider};
use crate::error::ExecError;
use crate::extract;
use crate::rate_limit::{RateLimiter, RateStatus};
use crate::sanitize;
use protocol::config::ServiceConfig;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Side-effect free command used to check reachability and credentials.
pub const PROBE_COMMAND: &str = "this-device";
const DEFAULT_SUCCESS_MESSAGE: &str = "Command executed successfully";

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub caller_id: Option<String>,
    /// For system-originated commands that must not count against a caller.
    pub skip_rate_limit: bool,
    pub file_data: Option<Value>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CommandOutcome {
    pub success: bool,
    pub data: Value,
    pub message: String,
}

impl CommandOutcome {
    fn failure(err: &ExecError) -> Self {
        Self {
            success: false,
            data: Value::Null,
            message: err.to_string(),
        }
    }
}

pub struct CommandExecutor {
    config: Arc<dyn ConfigProvider>,
    limiter: RateLimiter,
    client: AsyncCommandClient,
}

impl CommandExecutor {
    pub fn new(
        config: Arc<dyn ConfigProvider>,
        limiter: RateLimiter,
        client: AsyncCommandClient,
    ) -> Self {
        Self {
            config,
            limiter,
            client,
        }
    }

    pub async fn run(
        &self,
        command: &str,
        options: RunOptions,
    ) -> Result<CommandOutcome, ExecError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(ExecError::InvalidCommand("command is empty".to_string()));
        }
        let service = self.service().await?;
        let caller = options.caller_id.as_deref();
        if options.skip_rate_limit {
            info!(caller = caller.unwrap_or("-"), "rate limit skipped");
        } else {
            let remaining = self.limiter.admit(caller).await?.into_result()?;
            info!(
                caller = caller.unwrap_or("-"),
                minute_remaining = remaining.minute,
                hour_remaining = remaining.hour,
                "command admitted"
            );
        }
        let execute = ExecuteOptions {
            file_data: options.file_data,
            max_attempts: options.max_attempts,
        };
        let payload = self
            .client
            .execute(&service.api_url, &service.api_key, command, execute)
            .await
            .map_err(|err| {
                warn!(
                    caller = caller.unwrap_or("-"),
                    code = err.code(),
                    error = %err,
                    "command failed"
                );
                err
            })?;
        normalize(payload)
    }

    /// Keeps waiting on a request submitted earlier, e.g. after a timeout.
    pub async fn resume(
        &self,
        request_id: &str,
        max_attempts: Option<u32>,
    ) -> Result<CommandOutcome, ExecError> {
        let service = self.service().await?;
        let payload = self
            .client
            .await_request(&service.api_url, &service.api_key, request_id, max_attempts)
            .await?;
        normalize(payload)
    }

    /// Runs the probe command against an explicit destination.
    pub async fn test_connection(&self, base_url: &str, api_key: &str) -> CommandOutcome {
        let result = async {
            let service = validate_service(&ServiceConfig::new(base_url, api_key))?;
            let payload = self
                .client
                .execute(
                    &service.api_url,
                    &service.api_key,
                    PROBE_COMMAND,
                    ExecuteOptions::default(),
                )
                .await?;
            normalize(payload)
        }
        .await;
        match result {
            Ok(outcome) => CommandOutcome {
                message: "Connection successful".to_string(),
                ..outcome
            },
            Err(err) => {
                warn!(code = err.code(), error = %err, "connection test failed");
                CommandOutcome::failure(&err)
            }
        }
    }

    /// Current quota for a caller; never consumes any of it.
    pub async fn quota(&self, caller_id: Option<&str>) -> Result<RateStatus, ExecError> {
        self.limiter.status(caller_id).await
    }

    async fn service(&self) -> Result<ServiceConfig, ExecError> {
        let service = self.config.service().await?.ok_or(ExecError::NotConfigured)?;
        validate_service(&service)
    }
}

/// Maps a result payload to an outcome, surfacing body-level failures.
pub fn normalize(payload: Value) -> Result<CommandOutcome, ExecError> {
    if let Some(message) = extract::body_error(&payload) {
        return Err(ExecError::Remote(sanitize::clean_error(&message)));
    }
    Ok(CommandOutcome {
        success: true,
        message: extract::message(&payload).unwrap_or_else(|| DEFAULT_SUCCESS_MESSAGE.to_string()),
        data: extract::result_data(&payload),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticConfig;
    use crate::error::LimitType;
    use crate::store::MemoryStore;
    use crate::testing::ScriptedSender;
    use crate::transport::{RetryPolicy, RetryingTransport};
    use crate::PollPolicy;
    use protocol::config::RateLimitConfig;
    use serde_json::json;
    use system_utils::clock::ManualClock;

    const BASE: &str = "http://vault.local/api/v2";

    fn executor(sender: &Arc<ScriptedSender>, config: StaticConfig) -> CommandExecutor {
        let limiter = RateLimiter::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(1_700_000_000_000)),
            RateLimitConfig::default(),
        );
        let transport = RetryingTransport::new(sender.clone(), RetryPolicy::default());
        let client = AsyncCommandClient::new(transport, PollPolicy::default());
        CommandExecutor::new(Arc::new(config), limiter, client)
    }

    fn configured() -> StaticConfig {
        StaticConfig::configured(BASE, "key")
    }

    fn script_completed(sender: &ScriptedSender, id: &str, result: Value) {
        sender.push_json(202, json!({ "success": true, "request_id": id, "status": "queued" }));
        sender.push_json(200, json!({ "request_id": id, "status": "completed" }));
        sender.push_json(200, result);
    }

    fn run_as(caller: &str) -> RunOptions {
        RunOptions {
            caller_id: Some(caller.to_string()),
            ..RunOptions::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_normalizes_result_envelope() {
        let sender = ScriptedSender::new();
        script_completed(
            &sender,
            "r-1",
            json!({ "status": "success", "message": "2 records", "data": ["a", "b"] }),
        );
        let outcome = executor(&sender, configured())
            .run("ls", run_as("alice"))
            .await
            .expect("outcome");
        assert_eq!(
            outcome,
            CommandOutcome {
                success: true,
                data: json!(["a", "b"]),
                message: "2 records".to_string(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sixth_run_is_rate_limited_before_any_request() {
        let sender = ScriptedSender::new();
        let executor = executor(&sender, configured());
        for index in 0..5 {
            script_completed(&sender, &format!("r-{index}"), json!({ "ok": true }));
            executor.run("ls", run_as("bob")).await.expect("outcome");
        }
        let calls = sender.call_count();
        let err = executor.run("ls", run_as("bob")).await.expect_err("limited");
        assert!(err.is_rate_limited());
        assert_eq!(err.limit_type(), Some(LimitType::Minute));
        assert!(err.retry_after_secs().expect("retry after") > 0);
        assert_eq!(sender.call_count(), calls);

        let quota = executor.quota(Some("bob")).await.expect("quota");
        assert_eq!(quota.minute_used, 5);
        assert_eq!(quota.remaining.minute, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn skip_rate_limit_bypasses_limiter() {
        let sender = ScriptedSender::new();
        let executor = executor(&sender, configured());
        for index in 0..6 {
            script_completed(&sender, &format!("s-{index}"), json!({ "ok": true }));
            let options = RunOptions {
                skip_rate_limit: true,
                ..run_as("system")
            };
            executor.run("sync-down", options).await.expect("outcome");
        }
        let quota = executor.quota(Some("system")).await.expect("quota");
        assert_eq!(quota.minute_used, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_configuration_is_distinct_and_free() {
        let sender = ScriptedSender::new();
        let executor = executor(&sender, StaticConfig::default());
        let err = executor.run("ls", run_as("carol")).await.expect_err("unconfigured");
        assert!(matches!(err, ExecError::NotConfigured));
        assert_eq!(sender.call_count(), 0);
        let quota = executor.quota(Some("carol")).await.expect("quota");
        assert_eq!(quota.minute_used, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_command_is_rejected() {
        let sender = ScriptedSender::new();
        let err = executor(&sender, configured())
            .run("   ", RunOptions::default())
            .await
            .expect_err("empty");
        assert!(matches!(err, ExecError::InvalidCommand(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn body_level_error_is_cleaned_and_redacted() {
        let sender = ScriptedSender::new();
        script_completed(
            &sender,
            "r-err",
            json!({
                "status": "error",
                "error": "Keeper Commander v16\nLogging in...\nError: login failed for token a1B2c3D4e5F6g7H8i9J0k1L2m3N4o5P6q7R8s9T0"
            }),
        );
        let err = executor(&sender, configured())
            .run("ls", run_as("dave"))
            .await
            .expect_err("remote error");
        match err {
            ExecError::Remote(message) => {
                assert_eq!(message, "login failed for token [REDACTED]");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_uses_probe_command() {
        let sender = ScriptedSender::new();
        script_completed(
            &sender,
            "probe",
            json!({ "status": "success", "data": { "device": "x" } }),
        );
        let outcome = executor(&sender, StaticConfig::default())
            .test_connection("http://vault.local/api/v2/", "key")
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.message, "Connection successful");
        assert_eq!(outcome.data, json!({ "device": "x" }));
        let submit = &sender.requests()[0];
        assert_eq!(submit.url, "http://vault.local/api/v2/executecommand-async");
        let body: Value =
            serde_json::from_str(submit.body.as_deref().expect("body")).expect("json");
        assert_eq!(body["command"], PROBE_COMMAND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_reports_failure() {
        let sender = ScriptedSender::new();
        sender.push_json(401, json!({ "error": "invalid api key" }));
        let outcome = executor(&sender, configured())
            .test_connection(BASE, "wrong")
            .await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("401"));
        assert!(outcome.message.contains("invalid api key"));
    }

    #[tokio::test(start_paused = true)]
    async fn resume_polls_existing_request() {
        let sender = ScriptedSender::new();
        sender.push_json(200, json!({ "request_id": "late", "status": "processing" }));
        sender.push_json(200, json!({ "request_id": "late", "status": "completed" }));
        sender.push_json(200, json!({ "data": "done" }));
        let outcome = executor(&sender, configured())
            .resume("late", None)
            .await
            .expect("outcome");
        assert_eq!(outcome.data, json!("done"));
        assert_eq!(sender.count_matching("executecommand-async"), 0);
    }

    #[test]
    fn normalize_passes_bare_payloads_through() {
        let outcome = normalize(json!(["x"])).expect("outcome");
        assert_eq!(outcome.data, json!(["x"]));
        assert_eq!(outcome.message, DEFAULT_SUCCESS_MESSAGE);
    }
}
