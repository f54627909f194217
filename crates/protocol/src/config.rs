use serde::Deserialize;

pub const DEFAULT_PER_MINUTE: u32 = 5;
pub const DEFAULT_PER_HOUR: u32 = 50;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;
pub const DEFAULT_INITIAL_POLL_DELAY_MS: u64 = 500;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_POLL_MULTIPLIER: f64 = 1.5;
pub const DEFAULT_MAX_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 60;
pub const DEFAULT_STORE_PATH: &str = "~/.vault-exec/rate-limits.json";

#[derive(Debug, Default, Deserialize)]
pub struct ExecConfig {
    pub service: Option<ServiceConfig>,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Destination of the remote command service.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ServiceConfig {
    pub api_url: String,
    pub api_key: String,
}

impl ServiceConfig {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let api_url: String = api_url.into();
        Self {
            api_url: api_url.trim().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub per_minute: u32,
    pub per_hour: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: DEFAULT_PER_MINUTE,
            per_hour: DEFAULT_PER_HOUR,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollConfig {
    pub initial_delay_ms: u64,
    pub interval_ms: u64,
    pub multiplier: f64,
    pub max_interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: DEFAULT_INITIAL_POLL_DELAY_MS,
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            multiplier: DEFAULT_POLL_MULTIPLIER,
            max_interval_ms: DEFAULT_MAX_POLL_INTERVAL_MS,
            max_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_STORE_PATH.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: ExecConfig = toml::from_str("").expect("parse");
        assert!(config.service.is_none());
        assert_eq!(config.rate_limit, RateLimitConfig::default());
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.poll.max_attempts, 60);
        assert_eq!(config.store.path, DEFAULT_STORE_PATH);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let input = r#"
[service]
api_url = "https://vault.example.com/api/v2/"
api_key = "k"

[rate_limit]
per_minute = 2

[poll]
max_attempts = 10
"#;
        let config: ExecConfig = toml::from_str(input).expect("parse");
        assert_eq!(config.rate_limit.per_minute, 2);
        assert_eq!(config.rate_limit.per_hour, DEFAULT_PER_HOUR);
        assert_eq!(config.poll.max_attempts, 10);
        assert_eq!(config.poll.interval_ms, DEFAULT_POLL_INTERVAL_MS);
        let service = config.service.expect("service");
        assert_eq!(service.api_url, "https://vault.example.com/api/v2/");
    }

    #[test]
    fn service_config_trims_trailing_slash() {
        let service = ServiceConfig::new(" https://vault.example.com/api/v2/ ", "k");
        assert_eq!(service.api_url, "https://vault.example.com/api/v2");
    }
}
