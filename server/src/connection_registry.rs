use std::collections::BTreeMap;

use common::ClientId;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tungstenite::Utf8Bytes;

/// One live WebSocket connection and the identity it was given.
pub struct ClientConnection {
    pub id: ClientId,
    /// Outbound queue drained by the connection's writer task
    sender: mpsc::Sender<Message>,
    /// Cancelling this tears the socket down without a close handshake
    terminate: CancellationToken,
    /// Whether the last liveness probe has been answered
    pub alive: bool,
}

impl ClientConnection {
    fn is_open(&self) -> bool {
        !self.terminate.is_cancelled() && !self.sender.is_closed()
    }

    fn queue(&self, message: Message) -> Result<(), TrySendError<Message>> {
        self.sender.try_send(message)
    }

    /// Mark not-yet-answered and send a ping
    fn probe(&mut self) {
        self.alive = false;
        if let Err(e) = self.queue(Message::Ping(Default::default())) {
            debug!(client_id = self.id, "Failed to queue liveness probe: {}", e);
        }
    }

    fn terminate(&self) {
        self.terminate.cancel();
    }
}

/// Tracks live connections, hands out client ids and reaps peers that stop answering probes.
///
/// Not synchronized on its own: the owner keeps it behind the same lock as the timeline.
pub struct ConnectionRegistry {
    connections: BTreeMap<ClientId, ClientConnection>,
    next_id: ClientId,
    closed: bool,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: BTreeMap::new(),
            next_id: 0,
            closed: false,
        }
    }

    /// Register a connection under the next id. The caller queues its greeting and then calls
    /// [`ConnectionRegistry::probe`] while still holding the lock, so the greeting is always the
    /// first frame on the wire. Returns `None` once the registry has been disposed.
    pub fn connect(
        &mut self,
        sender: mpsc::Sender<Message>,
        terminate: CancellationToken,
    ) -> Option<ClientId> {
        if self.closed {
            terminate.cancel();
            return None;
        }

        let id = self.next_id;
        self.next_id += 1;

        let connection = ClientConnection {
            id,
            sender,
            terminate,
            alive: true,
        };
        self.connections.insert(id, connection);

        info!(client_id = id, "Client connected ({} live)", self.connections.len());
        Some(id)
    }

    /// Remove a connection that closed on its own. Calling this for an id that was already
    /// reaped is a no-op.
    pub fn disconnect(&mut self, id: ClientId) -> bool {
        match self.connections.remove(&id) {
            Some(connection) => {
                connection.terminate();
                info!(client_id = id, "Client disconnected ({} live)", self.connections.len());
                true
            }
            None => false,
        }
    }

    /// Send a liveness probe to one connection and mark it not-yet-answered
    pub fn probe(&mut self, id: ClientId) {
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.probe();
        }
    }

    /// Record a probe answer
    pub fn mark_alive(&mut self, id: ClientId) {
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.alive = true;
        }
    }

    /// One heartbeat cycle: terminate every connection that did not answer the previous probe or
    /// whose outbound queue has closed, and probe the rest. Returns the ids that were terminated.
    pub fn sweep(&mut self) -> Vec<ClientId> {
        let dead: Vec<ClientId> = self
            .connections
            .values()
            .filter(|connection| !connection.alive || !connection.is_open())
            .map(|connection| connection.id)
            .collect();

        for id in &dead {
            if let Some(connection) = self.connections.remove(id) {
                if connection.alive {
                    warn!(client_id = *id, "Client can no longer be written to, terminated");
                } else {
                    warn!(client_id = *id, "Client missed heartbeat, terminated");
                }
                connection.terminate();
            }
        }

        for connection in self.connections.values_mut() {
            connection.probe();
        }

        dead
    }

    /// Queue an already-serialized packet on one connection
    pub fn send_to(&self, id: ClientId, text: Utf8Bytes) -> bool {
        match self.connections.get(&id) {
            Some(connection) if connection.is_open() => match connection.queue(Message::Text(text)) {
                Ok(()) => true,
                Err(e) => {
                    warn!(client_id = id, "Failed to queue packet: {}", e);
                    false
                }
            },
            _ => false,
        }
    }

    /// Queue an already-serialized packet on every open connection. A full or closed queue on one
    /// connection never holds up the others. Returns how many connections accepted it.
    pub fn broadcast(&self, text: &Utf8Bytes) -> usize {
        let mut delivered = 0;
        for connection in self.connections.values() {
            if !connection.is_open() {
                continue;
            }
            match connection.queue(Message::Text(text.clone())) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(client_id = connection.id, "Skipping broadcast: {}", e),
            }
        }
        delivered
    }

    /// Terminate every connection and refuse new ones
    pub fn close_all(&mut self) -> usize {
        self.closed = true;
        let count = self.connections.len();
        for connection in self.connections.values() {
            connection.terminate();
        }
        self.connections.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<ClientId> {
        self.connections.keys().copied().collect()
    }
}
