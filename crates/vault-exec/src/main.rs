mod cli;
mod config;
mod logging;

use crate::cli::{Args, Command};
use crate::config::{load_exec_config, resolve};
use crate::logging::init_tracing;
use anyhow::Context;
use clap::Parser;
use exec_client::{
    AsyncCommandClient, CommandExecutor, ExecError, JsonFileStore, PollPolicy, RateLimiter,
    ReqwestSender, RetryPolicy, RetryingTransport, RunOptions, StaticConfig,
};
use protocol::config::ExecConfig;
use serde_json::Value;
use std::process::ExitCode;
use std::sync::Arc;
use system_utils::clock::SystemClock;
use system_utils::path::expand_tilde;
use tracing::debug;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let _file_guard = init_tracing(args.log_dir.as_deref(), args.log_to_stderr)?;

    let config = load_exec_config(&args.config)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    let config = resolve(config, args.api_url.clone(), args.api_key.clone())?;
    let executor = build_executor(&config)?;
    debug!(config = %args.config.display(), "executor ready");

    let result = match args.command {
        Command::Run {
            command,
            caller,
            skip_rate_limit,
            file_data,
            max_attempts,
        } => {
            let file_data = file_data
                .map(|raw| serde_json::from_str::<Value>(&raw))
                .transpose()
                .context("--file-data must be valid JSON")?;
            let options = RunOptions {
                caller_id: caller,
                skip_rate_limit,
                file_data,
                max_attempts,
            };
            executor
                .run(&command, options)
                .await
                .and_then(|outcome| to_json(&outcome))
        }
        Command::Test => match config.service.clone() {
            Some(service) => {
                let outcome = executor
                    .test_connection(&service.api_url, &service.api_key)
                    .await;
                to_json(&outcome)
            }
            None => Err(ExecError::NotConfigured),
        },
        Command::Quota { caller } => executor
            .quota(caller.as_deref())
            .await
            .and_then(|status| to_json(&status)),
        Command::Wait {
            request_id,
            max_attempts,
        } => executor
            .resume(&request_id, max_attempts)
            .await
            .and_then(|outcome| to_json(&outcome)),
    };

    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            println!("{}", serde_json::to_string_pretty(&err.payload())?);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn build_executor(config: &ExecConfig) -> anyhow::Result<CommandExecutor> {
    let sender = ReqwestSender::new().context("failed to build HTTP client")?;
    let transport = RetryingTransport::new(Arc::new(sender), RetryPolicy::from(&config.retry));
    let client = AsyncCommandClient::new(transport, PollPolicy::from(&config.poll));
    let store = JsonFileStore::new(expand_tilde(&config.store.path));
    let limiter = RateLimiter::new(
        Arc::new(store),
        Arc::new(SystemClock),
        config.rate_limit,
    );
    Ok(CommandExecutor::new(
        Arc::new(StaticConfig::new(config.service.clone())),
        limiter,
        client,
    ))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, ExecError> {
    serde_json::to_value(value)
        .map_err(|err| ExecError::InvalidResponse(format!("failed to encode output: {err}")))
}
