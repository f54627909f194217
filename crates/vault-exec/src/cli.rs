use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "vault-exec",
    version,
    about = "Run commands on a queue-backed remote command service"
)]
pub(crate) struct Args {
    #[arg(long, default_value = "config/vault-exec.toml")]
    pub(crate) config: PathBuf,
    /// Overrides `service.api_url` from the config file.
    #[arg(long, env = "VAULT_EXEC_API_URL")]
    pub(crate) api_url: Option<String>,
    /// Overrides `service.api_key` from the config file.
    #[arg(long, env = "VAULT_EXEC_API_KEY", hide_env_values = true)]
    pub(crate) api_key: Option<String>,
    /// Also write JSON logs to a daily rolling file in this directory.
    #[arg(long)]
    pub(crate) log_dir: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    pub(crate) log_to_stderr: bool,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Submit a command and wait for its result.
    Run {
        command: String,
        #[arg(long)]
        caller: Option<String>,
        #[arg(long, default_value_t = false)]
        skip_rate_limit: bool,
        /// JSON value sent as `filedata` alongside the command.
        #[arg(long)]
        file_data: Option<String>,
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Check connectivity and credentials with a probe command.
    Test,
    /// Show the remaining rate-limit quota for a caller.
    Quota {
        #[arg(long)]
        caller: Option<String>,
    },
    /// Keep waiting on a previously submitted request.
    Wait {
        request_id: String,
        #[arg(long)]
        max_attempts: Option<u32>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_options() {
        let args = Args::try_parse_from([
            "vault-exec",
            "--api-url",
            "https://svc/api",
            "run",
            "ls -l",
            "--caller",
            "alice",
            "--skip-rate-limit",
        ])
        .expect("parse");
        assert_eq!(args.api_url.as_deref(), Some("https://svc/api"));
        match args.command {
            Command::Run {
                command,
                caller,
                skip_rate_limit,
                ..
            } => {
                assert_eq!(command, "ls -l");
                assert_eq!(caller.as_deref(), Some("alice"));
                assert!(skip_rate_limit);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn wait_requires_request_id() {
        assert!(Args::try_parse_from(["vault-exec", "wait"]).is_err());
    }
}
