mod api;
mod config;
mod directory;
mod poller;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use crate::config::Config;
use crate::directory::ServiceDirectory;
use crate::poller::prober::{HealthProber, ProbePolicy, ReqwestTransport};
use crate::poller::Poller;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("health_monitord=info"))
        )
        .init();

    tracing::info!("Starting health-monitord");

    // Load config, falling back to built-in defaults
    let config = match std::env::args().nth(1) {
        Some(config_path) => {
            let config = Config::load(&config_path)
                .with_context(|| format!("Failed to load config from {}", config_path))?;
            tracing::info!("Loaded config from {}", config_path);
            config
        }
        None => {
            tracing::info!("No config file given, using defaults");
            Config::default()
        }
    };

    let directory = ServiceDirectory::new();

    let transport = ReqwestTransport::new().context("Failed to build HTTP client")?;
    let prober = HealthProber::new(transport, ProbePolicy::from(&config.poller));
    let poller = Poller::new(directory.clone(), prober, &config.poller);

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Spawn poller task
    let poller_cancel = cancel.clone();
    let poller_handle = tokio::spawn(async move {
        poller.run(poller_cancel).await;
    });

    // Build API router
    let app = api::routes::router(api::routes::AppState { directory });

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    // Run server with graceful shutdown
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    // Trigger cancellation
    cancel.cancel();

    // Wait for all tasks to complete
    let _ = tokio::join!(poller_handle, server_handle);

    tracing::info!("Shutdown complete");
    Ok(())
}
