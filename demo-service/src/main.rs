mod config;
mod health;
mod register;

use std::sync::Arc;
use anyhow::{Context, Result};
use crate::config::Config;
use crate::health::HealthState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("demo_service=info"))
        )
        .init();

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "demos/svc1.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Starting demo service {}", config.service.id);

    let app = health::router(Arc::new(HealthState::new(&config.service)));

    // Bind before registering so the first poll finds us listening
    let listener = tokio::net::TcpListener::bind(&config.service.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.service.listen))?;

    let client = reqwest::Client::new();
    register::register(&client, &config.monitor.url, &register::registration(&config)).await?;

    tracing::info!("{} listening on {}", config.service.id, config.service.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
            }
        })
        .await
        .context("Server error")?;

    tracing::info!("Shutdown complete");
    Ok(())
}
