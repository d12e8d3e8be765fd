use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use common::{Clock, SystemClock};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::config::ServerConfig;
use crate::http_server::create_router;
use crate::sync_server::SyncServer;

/// How long dispose waits for each background task to finish
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A running sync server: listener, heartbeat and shared state.
pub struct PlaybackServer {
    local_addr: SocketAddr,
    sync: Arc<SyncServer>,
    /// Stops the heartbeat loop
    heartbeat_token: CancellationToken,
    /// Stops accepting and closes the listener
    listener_token: CancellationToken,
    heartbeat_handle: JoinHandle<()>,
    listener_handle: JoinHandle<Result<()>>,
}

impl PlaybackServer {
    /// Bind the listener and start serving. A bind failure is returned, not retried.
    pub async fn start(config: ServerConfig) -> Result<Self> {
        Self::start_with_clock(config, Arc::new(SystemClock)).await
    }

    pub async fn start_with_clock(config: ServerConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let ServerConfig {
            heartbeat_interval,
            static_dir,
            scene,
            autoplay,
            ..
        } = config.clone();

        let listener = TcpListener::bind(config.listen_addr())
            .await
            .with_context(|| format!("Failed to bind {}", config.listen_addr()))?;
        let local_addr = listener.local_addr().context("Failed to read bound address")?;

        let sync = Arc::new(SyncServer::new(scene, autoplay, clock));

        info!("Starting heartbeat every {:?}", heartbeat_interval);
        let heartbeat_token = CancellationToken::new();
        let heartbeat_handle = tokio::spawn(run_heartbeat_loop(
            sync.clone(),
            heartbeat_interval,
            heartbeat_token.clone(),
        ));

        info!("Serving static assets from {:?}", static_dir);
        let router = create_router(sync.clone(), &static_dir);
        let listener_token = CancellationToken::new();
        let shutdown = listener_token.clone();
        let listener_handle = tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .context("HTTP server failed")
        });

        info!("Server is listening on {}", local_addr);
        Ok(Self {
            local_addr,
            sync,
            heartbeat_token,
            listener_token,
            heartbeat_handle,
            listener_handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// WebSocket URL clients connect to
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.local_addr)
    }

    /// Base URL scene asset paths are resolved against
    pub fn http_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    pub fn sync(&self) -> &Arc<SyncServer> {
        &self.sync
    }

    /// Stop the heartbeat, force-close every connection, then close the listener.
    /// Consumes the server so it can only run once.
    pub async fn dispose(self) -> Result<()> {
        info!("Shutting down server on {}", self.local_addr);

        self.heartbeat_token.cancel();
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.heartbeat_handle).await {
            Ok(Ok(())) => debug!("Heartbeat loop stopped"),
            Ok(Err(e)) => error!("Heartbeat loop panicked during shutdown: {:?}", e),
            Err(_) => return Err(anyhow!("Heartbeat loop did not stop in time")),
        }

        let closed = self.sync.close_all().await;
        info!("Terminated {} connections", closed);

        self.listener_token.cancel();
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.listener_handle).await {
            Ok(Ok(result)) => result?,
            Ok(Err(e)) => return Err(anyhow!("Listener task panicked: {:?}", e)),
            Err(_) => return Err(anyhow!("Listener did not close in time")),
        }

        info!("Server shut down");
        Ok(())
    }
}

/// Probe every connection each `interval`, terminating the ones that did not answer the last probe
pub async fn run_heartbeat_loop(
    sync: Arc<SyncServer>,
    interval: Duration,
    cancellation_token: CancellationToken,
) {
    // First sweep one full interval after start; connect already probed each newcomer
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancellation_token.cancelled() => {
                info!("Heartbeat shutdown received");
                break;
            }

            _ = ticker.tick() => {
                let terminated = sync.heartbeat().await;
                if terminated.is_empty() {
                    trace!("Heartbeat sweep complete");
                } else {
                    info!(?terminated, "Heartbeat terminated unresponsive clients");
                }
            }
        }
    }
}
