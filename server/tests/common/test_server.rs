use std::time::Duration;

use anyhow::Result;
use server::{PlaybackServer, ServerConfig};
use tokio::time::Instant;

/// A real server bound to an ephemeral localhost port
pub struct TestServer {
    pub server: PlaybackServer,
}

impl TestServer {
    pub async fn start() -> Result<Self> {
        Self::start_with(|_| {}).await
    }

    /// Start with the default test config adjusted by `configure`. Tests start from a paused
    /// timeline unless they turn autoplay back on.
    pub async fn start_with(configure: impl FnOnce(&mut ServerConfig)) -> Result<Self> {
        let _ = tracing_subscriber::fmt::try_init();

        let mut config = ServerConfig {
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
            autoplay: false,
            ..ServerConfig::default()
        };
        configure(&mut config);

        let server = PlaybackServer::start(config).await?;
        Ok(Self { server })
    }

    pub fn ws_url(&self) -> String {
        self.server.ws_url()
    }

    pub async fn connection_count(&self) -> usize {
        self.server.sync().connection_count().await
    }

    /// Poll until the registry holds `expected` connections
    pub async fn wait_for_connections(&self, expected: usize, within: Duration) -> Result<()> {
        let deadline = Instant::now() + within;
        loop {
            let count = self.connection_count().await;
            if count == expected {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(anyhow::anyhow!(
                    "Expected {} connections, still {} after {:?}",
                    expected,
                    count,
                    within
                ));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub async fn shutdown(self) -> Result<()> {
        self.server.dispose().await
    }
}
