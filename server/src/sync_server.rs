use std::sync::Arc;

use common::{Clock, ClientId, ControlEvent, OnConnectPacket, Packet, ProtocolError, SceneData, Timeline};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tungstenite::Utf8Bytes;

use crate::connection_registry::ConnectionRegistry;

/// Timeline and registry share one lock. Snapshots, control updates and heartbeat sweeps are
/// mutually exclusive.
struct SyncState {
    timeline: Timeline,
    registry: ConnectionRegistry,
    connections_served: u64,
}

/// The authoritative playback state machine.
pub struct SyncServer {
    state: Mutex<SyncState>,
    scene: SceneData,
    autoplay: bool,
    clock: Arc<dyn Clock>,
}

impl SyncServer {
    pub fn new(scene: SceneData, autoplay: bool, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(SyncState {
                timeline: Timeline::new(),
                registry: ConnectionRegistry::new(),
                connections_served: 0,
            }),
            scene,
            autoplay,
            clock,
        }
    }

    pub fn scene(&self) -> &SceneData {
        &self.scene
    }

    /// Register a new connection, queue its `OnConnect` snapshot, then probe it.
    /// Returns `None` if the server is shutting down.
    pub async fn connect(
        &self,
        sender: mpsc::Sender<Message>,
        terminate: CancellationToken,
    ) -> Option<ClientId> {
        let mut state = self.state.lock().await;
        let client_id = state.registry.connect(sender, terminate)?;

        if self.autoplay && state.connections_served == 0 {
            let now = self.clock.now_ms();
            state.timeline.restart(now);
            info!("First client of this server, timeline started at {}", now);
        }
        state.connections_served += 1;

        let packet = Packet::OnConnect(OnConnectPacket {
            client_id,
            scene_data: self.scene.clone(),
            player_state: state.timeline,
            is_first_client: state.registry.len() == 1,
        });
        match packet.encode() {
            Ok(json) => {
                state.registry.send_to(client_id, Utf8Bytes::from(json));
            }
            Err(e) => error!(client_id, "Failed to serialize OnConnect: {}", e),
        }

        state.registry.probe(client_id);
        Some(client_id)
    }

    pub async fn disconnect(&self, client_id: ClientId) {
        self.state.lock().await.registry.disconnect(client_id);
    }

    pub async fn mark_alive(&self, client_id: ClientId) {
        self.state.lock().await.registry.mark_alive(client_id);
    }

    /// Handle one inbound text frame. Anything that is not a well-formed control packet is
    /// logged and dropped without touching the timeline.
    pub async fn handle_text(&self, client_id: ClientId, text: &str) -> Option<Packet> {
        let event = match decode_control(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(client_id, "Dropping packet: {}", e);
                return None;
            }
        };
        Some(self.apply_control(client_id, event).await)
    }

    /// Apply a control event to the timeline and broadcast its canonical packet to every
    /// connection, the sender included. The mutation stands whatever happens to delivery.
    pub async fn apply_control(&self, client_id: ClientId, event: ControlEvent) -> Packet {
        let canonical = event.to_canonical(client_id);
        let mut state = self.state.lock().await;
        state.timeline.apply(&event);

        match canonical.encode() {
            Ok(json) => {
                let delivered = state.registry.broadcast(&Utf8Bytes::from(json));
                debug!(
                    client_id,
                    "Broadcast {:?} to {}/{} connections",
                    canonical.kind(),
                    delivered,
                    state.registry.len()
                );
            }
            Err(e) => error!(client_id, "Failed to serialize {:?}: {}", canonical.kind(), e),
        }

        canonical
    }

    /// One heartbeat cycle over the registry
    pub async fn heartbeat(&self) -> Vec<ClientId> {
        self.state.lock().await.registry.sweep()
    }

    /// Force-close every connection and refuse new ones
    pub async fn close_all(&self) -> usize {
        self.state.lock().await.registry.close_all()
    }

    pub async fn timeline(&self) -> Timeline {
        self.state.lock().await.timeline
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.registry.len()
    }

    pub async fn client_ids(&self) -> Vec<ClientId> {
        self.state.lock().await.registry.ids()
    }
}

fn decode_control(text: &str) -> Result<ControlEvent, ProtocolError> {
    let packet = Packet::decode(text)?;
    packet
        .as_control()
        .ok_or_else(|| ProtocolError::NotAControl(packet.kind()))
}
