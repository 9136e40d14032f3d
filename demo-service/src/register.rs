use anyhow::{Context, Result};
use shared::protocol::REGISTER_PATH;
use shared::types::RegistrationRequest;
use crate::config::Config;

pub fn registration(config: &Config) -> RegistrationRequest {
    RegistrationRequest {
        id: config.service.id.clone(),
        url: config.service.public_url.clone(),
        poll_interval_sec: config.monitor.poll_interval_sec,
        attributes: config.monitor.attributes.clone(),
    }
}

/// Announce this service to the monitor
pub async fn register(client: &reqwest::Client, monitor_url: &str, req: &RegistrationRequest) -> Result<()> {
    let url = format!("{}{}", monitor_url.trim_end_matches('/'), REGISTER_PATH);

    client
        .post(&url)
        .json(req)
        .send()
        .await
        .with_context(|| format!("Failed to reach monitor at {}", url))?
        .error_for_status()
        .with_context(|| format!("Monitor at {} rejected registration", url))?;

    tracing::info!("Registered {} with monitor at {}", req.id, monitor_url);
    Ok(())
}
