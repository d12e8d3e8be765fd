use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use common::{Packet, ProtocolError};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Frames queued for the socket before sends start failing
const OUTBOUND_BUFFER: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("outbound queue is full")]
    QueueFull,
    #[error("connection closed")]
    Closed,
    #[error("failed to encode packet: {0}")]
    Encode(#[from] ProtocolError),
}

/// Somewhere control packets can be sent. Sends never block and are never retried.
pub trait PacketSink {
    fn send(&self, packet: Packet) -> Result<(), TransportError>;
}

/// Cloneable sending half of a [`TransportLink`]
#[derive(Debug, Clone)]
pub struct LinkSender {
    outbound: mpsc::Sender<Message>,
    connected: Arc<AtomicBool>,
}

impl LinkSender {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl PacketSink for LinkSender {
    fn send(&self, packet: Packet) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let json = packet.encode()?;
        self.outbound
            .try_send(Message::Text(json.into()))
            .map_err(|e| match e {
                TrySendError::Full(_) => TransportError::QueueFull,
                TrySendError::Closed(_) => TransportError::Closed,
            })
    }
}

/// One persistent WebSocket connection to the sync server.
///
/// Outbound frames go through a writer task so sends are synchronous for callers; inbound
/// frames are decoded one at a time, in arrival order, by [`TransportLink::next_packet`].
pub struct TransportLink {
    sender: LinkSender,
    inbound: SplitStream<WsStream>,
    writer: JoinHandle<()>,
}

impl TransportLink {
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url)
            .await
            .with_context(|| format!("Failed to connect to {}", url))?;
        info!("Connected to {}", url);

        let (mut ws_sink, inbound) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);
        let connected = Arc::new(AtomicBool::new(true));

        let writer_connected = connected.clone();
        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = ws_sink.send(msg).await {
                    debug!("Failed to send to server: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            writer_connected.store(false, Ordering::SeqCst);
        });

        Ok(Self {
            sender: LinkSender {
                outbound,
                connected,
            },
            inbound,
            writer,
        })
    }

    pub fn sender(&self) -> LinkSender {
        self.sender.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.sender.is_connected()
    }

    /// Next decodable packet from the server, or `None` once the connection is gone.
    /// Frames that fail to decode are logged and skipped.
    pub async fn next_packet(&mut self) -> Option<Packet> {
        loop {
            match self.inbound.next().await {
                Some(Ok(Message::Text(text))) => match Packet::decode(&text) {
                    Ok(packet) => return Some(packet),
                    Err(e) => warn!("Dropping packet from server: {}", e),
                },
                Some(Ok(Message::Close(frame))) => {
                    info!("Server closed the connection: {:?}", frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Connection error: {}", e);
                    break;
                }
                None => {
                    info!("Connection closed");
                    break;
                }
            }
        }
        self.sender.connected.store(false, Ordering::SeqCst);
        None
    }

    /// Send a close frame and stop accepting sends
    pub async fn close(self) {
        if self.sender.is_connected() {
            let _ = self.sender.outbound.send(Message::Close(None)).await;
        }
        self.sender.connected.store(false, Ordering::SeqCst);
        let _ = self.writer.await;
    }
}
