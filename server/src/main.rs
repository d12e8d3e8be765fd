use anyhow::{Context, Result};
use server::{PlaybackServer, ServerConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if exists
    dotenv::dotenv().ok();

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = ServerConfig::from_env().context("Invalid server configuration")?;
    info!(
        "Scene has {} model(s), audio {}",
        config.scene.models.len(),
        config.scene.audio
    );

    let server = PlaybackServer::start(config)
        .await
        .context("Failed to start sync server")?;
    info!("WebSocket endpoint: {}", server.ws_url());

    // Wait for shutdown signal
    info!("Server started. Waiting for shutdown signal (Ctrl+C)...");
    tokio::signal::ctrl_c().await?;

    info!("Received shutdown signal. Shutting down...");
    server.dispose().await.context("Shutdown did not complete")?;

    Ok(())
}
