use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use common::{DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_SERVER_PORT, SceneData};

/// Configuration for a sync server instance
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind (e.g. "0.0.0.0")
    pub bind_addr: String,
    /// Port for both HTTP and WebSocket. 0 picks a free one.
    pub port: u16,
    /// Interval between liveness probes
    pub heartbeat_interval: Duration,
    /// Directory served over HTTP for scene assets
    pub static_dir: PathBuf,
    /// Scene every client is told to load
    pub scene: SceneData,
    /// Start the timeline when the first client of this server's lifetime connects
    pub autoplay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: DEFAULT_SERVER_PORT,
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            static_dir: PathBuf::from("res"),
            scene: SceneData::default(),
            autoplay: true,
        }
    }
}

impl ServerConfig {
    /// Read `SYNC_*` variables from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = ServerConfig::default();

        if let Some(bind_addr) = lookup("SYNC_BIND_ADDR") {
            config.bind_addr = bind_addr;
        }
        if let Some(port) = lookup("SYNC_PORT") {
            config.port = port
                .trim()
                .parse()
                .with_context(|| format!("SYNC_PORT must be a port number, got '{}'", port))?;
        }
        if let Some(interval) = lookup("SYNC_HEARTBEAT_INTERVAL_MS") {
            let millis: u64 = interval.trim().parse().with_context(|| {
                format!("SYNC_HEARTBEAT_INTERVAL_MS must be milliseconds, got '{}'", interval)
            })?;
            anyhow::ensure!(millis > 0, "SYNC_HEARTBEAT_INTERVAL_MS must be positive");
            config.heartbeat_interval = Duration::from_millis(millis);
        }
        if let Some(static_dir) = lookup("SYNC_STATIC_DIR") {
            config.static_dir = PathBuf::from(static_dir);
        }
        if let Some(scene_file) = lookup("SYNC_SCENE_FILE") {
            config.scene = load_scene(&scene_file)?;
        }
        if let Some(autoplay) = lookup("SYNC_AUTOPLAY") {
            config.autoplay = parse_flag(&autoplay)
                .with_context(|| format!("SYNC_AUTOPLAY must be true or false, got '{}'", autoplay))?;
        }

        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

fn load_scene(path: &str) -> Result<SceneData> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read scene file {}", path))?;
    serde_json::from_str(&json).with_context(|| format!("Failed to parse scene file {}", path))
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
