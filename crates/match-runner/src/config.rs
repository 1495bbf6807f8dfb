use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use matchmaking::EngineConfig;
use tracing::info;

/// Load engine configuration: optional TOML file, then `MATCHMAKING_*`
/// environment overrides.
pub fn load_engine_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = EngineConfig::load(path).with_context(|| match path {
        Some(path) => format!("Failed to load config from {}", path.display()),
        None => "Failed to load config from environment".to_string(),
    })?;
    info!(
        endpoint = %config.model.endpoint.base_url,
        model = %config.model.settings.model,
        per_minute = config.rate_limit.per_minute,
        max_concurrent = config.batch.max_concurrent,
        cache = ?config.cache.backend,
        "Engine configuration loaded"
    );
    Ok(config)
}

/// Check if an inference endpoint is reachable (GET `{base_url}/models`).
pub async fn check_endpoint(base_url: &str) -> bool {
    let models_url = format!("{}/models", base_url.trim_end_matches('/'));
    match reqwest::Client::new()
        .get(&models_url)
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}
