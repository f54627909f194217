use crate::error::ExecError;
use async_trait::async_trait;
use protocol::config::{ExecConfig, ServiceConfig};

/// Source of the remote service destination.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// `None` when no destination has been configured.
    async fn service(&self) -> Result<Option<ServiceConfig>, ExecError>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticConfig {
    service: Option<ServiceConfig>,
}

impl StaticConfig {
    pub fn new(service: Option<ServiceConfig>) -> Self {
        Self { service }
    }

    pub fn configured(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::new(Some(ServiceConfig::new(api_url, api_key)))
    }
}

#[async_trait]
impl ConfigProvider for StaticConfig {
    async fn service(&self) -> Result<Option<ServiceConfig>, ExecError> {
        Ok(self.service.clone())
    }
}

pub fn validate_service(service: &ServiceConfig) -> Result<ServiceConfig, ExecError> {
    let normalized = ServiceConfig::new(service.api_url.as_str(), service.api_key.trim());
    if normalized.api_url.is_empty() || normalized.api_key.is_empty() {
        return Err(ExecError::NotConfigured);
    }
    if !(normalized.api_url.starts_with("http://") || normalized.api_url.starts_with("https://")) {
        return Err(ExecError::InvalidConfig(format!(
            "api_url must start with http:// or https://, got {}",
            normalized.api_url
        )));
    }
    Ok(normalized)
}

pub fn validate_exec_config(config: &ExecConfig) -> Result<(), ExecError> {
    if config.rate_limit.per_minute == 0 || config.rate_limit.per_hour == 0 {
        return Err(ExecError::InvalidConfig(
            "rate_limit per_minute and per_hour must be greater than zero".to_string(),
        ));
    }
    if config.rate_limit.per_minute > config.rate_limit.per_hour {
        return Err(ExecError::InvalidConfig(
            "rate_limit per_minute cannot exceed per_hour".to_string(),
        ));
    }
    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        return Err(ExecError::InvalidConfig(
            "retry base_delay_ms cannot exceed max_delay_ms".to_string(),
        ));
    }
    let poll = &config.poll;
    if !poll.multiplier.is_finite() || poll.multiplier < 1.0 {
        return Err(ExecError::InvalidConfig(
            "poll multiplier must be at least 1.0".to_string(),
        ));
    }
    if poll.max_attempts == 0 {
        return Err(ExecError::InvalidConfig(
            "poll max_attempts must be greater than zero".to_string(),
        ));
    }
    if poll.interval_ms > poll.max_interval_ms {
        return Err(ExecError::InvalidConfig(
            "poll interval_ms cannot exceed max_interval_ms".to_string(),
        ));
    }
    if let Some(service) = &config.service {
        validate_service(service)?;
    }
    Ok(())
}
