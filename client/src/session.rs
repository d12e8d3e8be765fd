use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use common::{ClientId, Clock, OnConnectPacket, Packet};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::assets::{AssetLoader, load_scene};
use crate::engine::{ClockEngine, PlaybackEngine};
use crate::reconciler::{EngineCommand, PlaybackReconciler};
use crate::transport::PacketSink;

pub type ObserverId = u64;

/// Fans inbound packets out to the sessions currently observing them.
#[derive(Default)]
pub struct PacketHub {
    observers: Vec<(ObserverId, mpsc::UnboundedSender<Packet>)>,
    next_id: ObserverId,
}

impl PacketHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packets published from now on are queued on the returned receiver until it is dropped
    /// or unsubscribed.
    pub fn subscribe(&mut self) -> (ObserverId, mpsc::UnboundedReceiver<Packet>) {
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.push((id, tx));
        (id, rx)
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer, _)| *observer != id);
        self.observers.len() != before
    }

    pub fn publish(&mut self, packet: &Packet) {
        self.observers
            .retain(|(_, tx)| tx.send(packet.clone()).is_ok());
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

/// Where a session's engine is, as last seen by its task
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlaybackStatus {
    pub client_id: ClientId,
    pub ready: bool,
    pub frame: f64,
    pub playing: bool,
    pub rate: f64,
}

struct ViewerSession {
    client_id: ClientId,
    observer: ObserverId,
    gestures: mpsc::UnboundedSender<EngineCommand>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the one live viewer session and swaps it out when the server greets us again.
pub struct SessionManager<S> {
    hub: PacketHub,
    sink: S,
    loader: Arc<dyn AssetLoader>,
    clock: Arc<dyn Clock>,
    asset_base: String,
    report_interval: Duration,
    status: watch::Sender<PlaybackStatus>,
    current: Option<ViewerSession>,
}

impl<S> SessionManager<S>
where
    S: PacketSink + Clone + Send + 'static,
{
    pub fn new(
        sink: S,
        loader: Arc<dyn AssetLoader>,
        clock: Arc<dyn Clock>,
        asset_base: impl Into<String>,
        report_interval: Duration,
    ) -> Self {
        let (status, _) = watch::channel(PlaybackStatus::default());
        Self {
            hub: PacketHub::new(),
            sink,
            loader,
            clock,
            asset_base: asset_base.into(),
            report_interval,
            status,
            current: None,
        }
    }

    /// Route one packet from the server. `OnConnect` replaces the session first.
    pub async fn handle_packet(&mut self, packet: Packet) {
        if let Packet::OnConnect(on_connect) = &packet {
            self.replace(on_connect.clone()).await;
        }
        self.hub.publish(&packet);
    }

    /// Dispose the current session, then start loading the one described by `on_connect`.
    /// The new session observes packets from this point on and applies them once loaded.
    pub async fn replace(&mut self, on_connect: OnConnectPacket) {
        self.dispose().await;

        let mut scene = on_connect.scene_data.clone();
        scene.resolve_urls(&self.asset_base);

        let (observer, packets) = self.hub.subscribe();
        let (gestures, gesture_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let client_id = on_connect.client_id;
        info!(client_id, "Starting viewer session");

        let task = SessionTask {
            on_connect,
            loader: self.loader.clone(),
            sink: self.sink.clone(),
            clock: self.clock.clone(),
            report_interval: self.report_interval,
            status: self.status.clone(),
            token: token.clone(),
        };
        let handle = tokio::spawn(task.run(scene, packets, gesture_rx));

        self.current = Some(ViewerSession {
            client_id,
            observer,
            gestures,
            token,
            handle,
        });
    }

    /// Release the current session's observer, then stop its task and wait for it.
    pub async fn dispose(&mut self) {
        let Some(session) = self.current.take() else {
            return;
        };
        self.hub.unsubscribe(session.observer);
        session.token.cancel();
        if let Err(e) = session.handle.await {
            error!(client_id = session.client_id, "Session task failed: {:?}", e);
        }
        debug!(client_id = session.client_id, "Viewer session disposed");
    }

    /// Hand a user action to the current session
    pub fn gesture(&self, command: EngineCommand) -> Result<()> {
        let session = self
            .current
            .as_ref()
            .ok_or_else(|| anyhow!("No viewer session yet"))?;
        session
            .gestures
            .send(command)
            .map_err(|_| anyhow!("Viewer session {} has stopped", session.client_id))
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.current.as_ref().map(|session| session.client_id)
    }

    pub fn status(&self) -> watch::Receiver<PlaybackStatus> {
        self.status.subscribe()
    }

    pub fn hub(&self) -> &PacketHub {
        &self.hub
    }
}

struct SessionTask<S> {
    on_connect: OnConnectPacket,
    loader: Arc<dyn AssetLoader>,
    sink: S,
    clock: Arc<dyn Clock>,
    report_interval: Duration,
    status: watch::Sender<PlaybackStatus>,
    token: CancellationToken,
}

impl<S: PacketSink + Send + 'static> SessionTask<S> {
    async fn run(
        self,
        scene: common::SceneData,
        mut packets: mpsc::UnboundedReceiver<Packet>,
        mut gestures: mpsc::UnboundedReceiver<EngineCommand>,
    ) {
        let client_id = self.on_connect.client_id;

        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                debug!(client_id, "Session disposed while loading");
                return;
            }
            loaded = load_scene(self.loader.as_ref(), &scene) => {
                if let Err(e) = loaded {
                    error!(client_id, "Failed to load scene: {:#}", e);
                    return;
                }
            }
        }

        let engine = ClockEngine::new(self.clock.clone(), scene.end_frame);
        let mut reconciler =
            PlaybackReconciler::join(&self.on_connect, engine, self.sink, self.clock.clone());
        publish_status(&self.status, &reconciler);

        let mut report = tokio::time::interval(self.report_interval);
        report.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,

                packet = packets.recv() => match packet {
                    Some(packet) => reconciler.handle_packet(&packet),
                    None => break,
                },

                command = gestures.recv() => match command {
                    Some(command) => reconciler.gesture(command),
                    None => break,
                },

                _ = report.tick() => {
                    let engine = reconciler.engine();
                    info!(
                        client_id,
                        "frame {:.1} {} x{}",
                        engine.current_position(),
                        if engine.is_playing() { "playing" } else { "paused" },
                        engine.rate()
                    );
                }
            }
            publish_status(&self.status, &reconciler);
        }
    }
}

fn publish_status<E: PlaybackEngine, S: PacketSink>(
    status: &watch::Sender<PlaybackStatus>,
    reconciler: &PlaybackReconciler<E, S>,
) {
    let engine = reconciler.engine();
    status.send_replace(PlaybackStatus {
        client_id: reconciler.client_id(),
        ready: true,
        frame: engine.current_position(),
        playing: engine.is_playing(),
        rate: engine.rate(),
    });
}
