use anyhow::Context;
use exec_client::config::validate_exec_config;
use protocol::config::{ExecConfig, ServiceConfig};
use std::path::Path;

/// Reads the TOML config; a missing file means all defaults.
pub(crate) fn load_exec_config(path: &Path) -> anyhow::Result<ExecConfig> {
    if !path.exists() {
        return Ok(ExecConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(config)
}

/// Applies command-line overrides and validates the result. A service
/// missing its url or key is treated as not configured.
pub(crate) fn resolve(
    mut config: ExecConfig,
    api_url: Option<String>,
    api_key: Option<String>,
) -> anyhow::Result<ExecConfig> {
    if api_url.is_some() || api_key.is_some() {
        let current = config.service.take();
        let url = api_url
            .or_else(|| current.as_ref().map(|service| service.api_url.clone()))
            .unwrap_or_default();
        let key = api_key
            .or_else(|| current.map(|service| service.api_key))
            .unwrap_or_default();
        config.service = Some(ServiceConfig::new(url, key));
    }
    if let Some(service) = &config.service {
        if service.api_url.trim().is_empty() || service.api_key.trim().is_empty() {
            config.service = None;
        }
    }
    validate_exec_config(&config)?;
    Ok(config)
}
