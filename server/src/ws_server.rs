use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::sync_server::SyncServer;

/// Outbound frames buffered per connection before broadcasts to it start being skipped
const OUTBOUND_BUFFER: usize = 256;

/// Drive one accepted WebSocket until the peer leaves or the registry terminates it.
pub async fn handle_websocket(
    socket: axum::extract::ws::WebSocket,
    peer_addr: SocketAddr,
    sync: Arc<SyncServer>,
) {
    // Split the WebSocket into send and receive parts using futures_util
    let (mut ws_sink, mut ws_stream) = futures_util::StreamExt::split(socket);

    let (ws_tx, mut ws_rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);
    let terminate = CancellationToken::new();

    let Some(client_id) = sync.connect(ws_tx, terminate.clone()).await else {
        info!("Refusing connection from {} during shutdown", peer_addr);
        return;
    };
    info!(client_id, "WebSocket connection established from {}", peer_addr);

    // Forward queued frames to the socket. Stops as soon as the connection is terminated so a
    // dead peer's socket is dropped rather than flushed.
    let forward_token = terminate.clone();
    let forward_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                biased;
                _ = forward_token.cancelled() => break,
                msg = ws_rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };

            // Convert to Axum WebSocket message
            let axum_msg = match msg {
                Message::Text(text) => axum::extract::ws::Message::Text(text.to_string()),
                Message::Binary(bin) => axum::extract::ws::Message::Binary(bin.to_vec()),
                Message::Ping(data) => axum::extract::ws::Message::Ping(data.to_vec()),
                Message::Pong(data) => axum::extract::ws::Message::Pong(data.to_vec()),
                Message::Close(_) => axum::extract::ws::Message::Close(None),
                _ => continue,
            };

            if let Err(e) = ws_sink.send(axum_msg).await {
                debug!(client_id, "Failed to send message to WebSocket: {}", e);
                forward_token.cancel();
                break;
            }
        }
    });

    loop {
        tokio::select! {
            biased;
            _ = terminate.cancelled() => {
                debug!(client_id, "Connection terminated by server");
                break;
            }

            next = ws_stream.next() => {
                match next {
                    Some(Ok(axum::extract::ws::Message::Text(text))) => {
                        sync.handle_text(client_id, &text).await;
                    }
                    Some(Ok(axum::extract::ws::Message::Pong(_))) => {
                        sync.mark_alive(client_id).await;
                    }
                    Some(Ok(axum::extract::ws::Message::Binary(_))) => {
                        warn!(client_id, "Dropping binary frame, packets are JSON text");
                    }
                    Some(Ok(axum::extract::ws::Message::Ping(_))) => {}
                    Some(Ok(axum::extract::ws::Message::Close(_))) => {
                        info!(client_id, "Client initiated close");
                        break;
                    }
                    Some(Err(e)) => {
                        error!(client_id, "Error receiving message: {}", e);
                        break;
                    }
                    None => {
                        info!(client_id, "WebSocket stream closed");
                        break;
                    }
                }
            }
        }
    }

    sync.disconnect(client_id).await;
    forward_task.abort();
}
