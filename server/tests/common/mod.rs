#![allow(dead_code)]

pub mod test_client;
pub mod test_server;

pub use test_client::{SilentClient, TestClient};
pub use test_server::TestServer;
