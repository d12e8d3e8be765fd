pub mod config;
pub mod connection_registry;
pub mod http_server;
pub mod playback_server;
pub mod sync_server;
pub mod ws_server;

pub use config::ServerConfig;
pub use playback_server::PlaybackServer;
pub use sync_server::SyncServer;
