use anyhow::{Result, anyhow};
use ::common::{ClientId, OnConnectPacket, Packet};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Test client that keeps reading in the background, so it answers every probe
pub struct TestClient {
    writer: SplitSink<WsStream, Message>,
    packets: mpsc::UnboundedReceiver<Packet>,
    reader: JoinHandle<()>,
    pub client_id: ClientId,
    pub on_connect: OnConnectPacket,
}

impl TestClient {
    /// Connect and wait for the greeting
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url).await?;
        let (writer, mut reader) = ws_stream.split();
        let (tx, mut packets) = mpsc::unbounded_channel();

        let reader = tokio::spawn(async move {
            while let Some(Ok(msg)) = reader.next().await {
                if let Message::Text(text) = msg {
                    match Packet::decode(&text) {
                        Ok(packet) => {
                            if tx.send(packet).is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!("Test client got undecodable packet: {}", e),
                    }
                }
            }
        });

        let greeting = tokio::time::timeout(Duration::from_secs(5), packets.recv())
            .await
            .map_err(|_| anyhow!("Timeout waiting for OnConnect"))?;
        let on_connect = match greeting {
            Some(Packet::OnConnect(on_connect)) => on_connect,
            other => return Err(anyhow!("Expected OnConnect first, got {:?}", other)),
        };

        Ok(Self {
            writer,
            packets,
            reader,
            client_id: on_connect.client_id,
            on_connect,
        })
    }

    pub async fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        self.send_text(packet.encode()?).await
    }

    pub async fn send_text(&mut self, text: String) -> Result<()> {
        self.writer.send(Message::Text(text.into())).await?;
        Ok(())
    }

    pub async fn receive_packet(&mut self) -> Result<Packet> {
        match tokio::time::timeout(Duration::from_secs(5), self.packets.recv()).await {
            Ok(Some(packet)) => Ok(packet),
            Ok(None) => Err(anyhow!("Connection closed")),
            Err(_) => Err(anyhow!("Timeout waiting for packet")),
        }
    }

    /// Packet that arrives within `wait`, if any
    pub async fn try_receive_packet(&mut self, wait: Duration) -> Option<Packet> {
        tokio::time::timeout(wait, self.packets.recv()).await.ok().flatten()
    }

    pub async fn disconnect(mut self) -> Result<()> {
        self.writer.close().await?;
        self.reader.abort();
        Ok(())
    }
}

/// Client that reads its greeting and then stops reading, so it never answers a probe
pub struct SilentClient {
    ws: WsStream,
    pub on_connect: OnConnectPacket,
}

impl SilentClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (mut ws, _) = connect_async(url).await?;
        let first = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .map_err(|_| anyhow!("Timeout waiting for OnConnect"))?;
        let on_connect = match first {
            Some(Ok(Message::Text(text))) => match Packet::decode(&text)? {
                Packet::OnConnect(on_connect) => on_connect,
                other => return Err(anyhow!("Expected OnConnect first, got {:?}", other)),
            },
            other => return Err(anyhow!("Expected text frame, got {:?}", other)),
        };
        Ok(Self { ws, on_connect })
    }

    /// Drain whatever the server sent before dropping the socket and return the packets.
    /// Fails if the socket is still open after `within`.
    pub async fn drain_until_closed(mut self, within: Duration) -> Result<Vec<Packet>> {
        tokio::time::timeout(within, async {
            let mut packets = Vec::new();
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(text))) => packets.push(Packet::decode(&text)?),
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return Ok(packets),
                    Some(Ok(_)) => {}
                }
            }
        })
        .await
        .map_err(|_| anyhow!("Socket still open after {:?}", within))?
    }
}
