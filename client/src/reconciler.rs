use std::sync::Arc;

use common::util::ms_to_frames;
use common::{
    ClientId, Clock, Control, ControlEvent, DRIFT_THRESHOLD_FRAMES, OnConnectPacket, Packet,
};
use tracing::{debug, trace, warn};

use crate::engine::{LocalEvent, PlaybackEngine};
use crate::transport::PacketSink;

/// What to do to the local engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineCommand {
    Play,
    Pause,
    Seek(f64),
    SetRate(f64),
}

/// Who asked for an engine command. Corrections must not go back out to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    Correction,
    Gesture,
}

/// Engine events still expected from our own corrections, per event kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IgnoreCounters {
    pub resume: u32,
    pub pause: u32,
    pub seek: u32,
}

impl IgnoreCounters {
    fn slot(&mut self, event: LocalEvent) -> &mut u32 {
        match event {
            LocalEvent::Play => &mut self.resume,
            LocalEvent::Pause => &mut self.pause,
            LocalEvent::Seek => &mut self.seek,
        }
    }

    fn expect(&mut self, event: LocalEvent) {
        *self.slot(event) += 1;
    }

    /// Consume one expected event. False means the event was not ours.
    fn consume(&mut self, event: LocalEvent) -> bool {
        let slot = self.slot(event);
        if *slot > 0 {
            *slot -= 1;
            true
        } else {
            false
        }
    }

    pub fn is_settled(&self) -> bool {
        *self == Self::default()
    }
}

/// Keeps one local engine in step with the server timeline.
///
/// Canonical packets from other clients are applied as corrections; local engine events that
/// were not caused by a correction are user gestures and go out as control packets.
pub struct PlaybackReconciler<E, S> {
    client_id: ClientId,
    engine: E,
    sink: S,
    clock: Arc<dyn Clock>,
    ignore: IgnoreCounters,
}

impl<E: PlaybackEngine, S: PacketSink> PlaybackReconciler<E, S> {
    /// Bring `engine` to the joined timeline's current position and playing state.
    pub fn join(on_connect: &OnConnectPacket, engine: E, sink: S, clock: Arc<dyn Clock>) -> Self {
        let mut reconciler = Self {
            client_id: on_connect.client_id,
            engine,
            sink,
            clock,
            ignore: IgnoreCounters::default(),
        };

        let state = on_connect.player_state;
        let position = state.position_at(reconciler.clock.now_ms());
        debug!(
            client_id = on_connect.client_id,
            "Joining at frame {:.1} (playing={}, rate={})", position, state.playing, state.playback_rate
        );

        reconciler.perform(EngineCommand::SetRate(state.playback_rate), Cause::Correction);
        reconciler.perform(EngineCommand::Seek(position), Cause::Correction);
        let playing = if state.playing {
            EngineCommand::Play
        } else {
            EngineCommand::Pause
        };
        reconciler.perform(playing, Cause::Correction);
        reconciler.pump();
        reconciler
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn ignore_counters(&self) -> IgnoreCounters {
        self.ignore
    }

    /// Apply one packet from the server. Our own echoes and non-canonical packets are ignored.
    pub fn handle_packet(&mut self, packet: &Packet) {
        let Some((origin, event)) = packet.as_canonical() else {
            return;
        };
        if origin == self.client_id {
            trace!(client_id = self.client_id, "Ignoring echo of {:?}", packet.kind());
            return;
        }

        self.correct_drift(&event);
        match event.control {
            Control::Resume => self.perform(EngineCommand::Play, Cause::Correction),
            Control::Pause => self.perform(EngineCommand::Pause, Cause::Correction),
            Control::Seek => {}
            Control::RateChange { rate } => {
                self.perform(EngineCommand::SetRate(rate), Cause::Correction)
            }
        }
        self.pump();
    }

    /// A user action on this viewer
    pub fn gesture(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::SetRate(rate) => self.request_rate(rate),
            command => {
                self.perform(command, Cause::Gesture);
                self.pump();
            }
        }
    }

    /// Change the local rate and ask the server to change everyone's
    pub fn request_rate(&mut self, rate: f64) {
        self.engine.set_rate(rate);
        let event = ControlEvent::new(
            Control::RateChange { rate },
            self.engine.current_position(),
            self.clock.now_ms(),
        );
        self.send(event.to_request());
    }

    /// Route every pending engine event through the ignore counters
    pub fn pump(&mut self) {
        for event in self.engine.take_events() {
            self.handle_local_event(event);
        }
    }

    /// Swallow the event if a correction caused it, otherwise report it to the server.
    pub fn handle_local_event(&mut self, event: LocalEvent) {
        if self.ignore.consume(event) {
            trace!(client_id = self.client_id, "Suppressed {:?} from correction", event);
            return;
        }

        let control = match event {
            LocalEvent::Play => Control::Resume,
            LocalEvent::Pause => Control::Pause,
            LocalEvent::Seek => Control::Seek,
        };
        let event = ControlEvent::new(control, self.engine.current_position(), self.clock.now_ms());
        self.send(event.to_request());
    }

    /// Run `command` on the engine. A correction first records the event it will fire.
    fn perform(&mut self, command: EngineCommand, cause: Cause) {
        let suppress = cause == Cause::Correction;
        match command {
            EngineCommand::Play => {
                if self.engine.is_playing() {
                    return;
                }
                if suppress {
                    self.ignore.expect(LocalEvent::Play);
                }
                self.engine.play();
            }
            EngineCommand::Pause => {
                if !self.engine.is_playing() {
                    return;
                }
                if suppress {
                    self.ignore.expect(LocalEvent::Pause);
                }
                self.engine.pause();
            }
            EngineCommand::Seek(frame) => {
                if suppress {
                    self.ignore.expect(LocalEvent::Seek);
                }
                self.engine.seek(frame, true);
            }
            EngineCommand::SetRate(rate) => self.engine.set_rate(rate),
        }
    }

    /// Seek to where the sender is now if we are more than the threshold away
    fn correct_drift(&mut self, event: &ControlEvent) {
        let transit_ms = self.clock.now_ms().saturating_sub(event.request_time) as f64;
        let target = event.position + ms_to_frames(transit_ms);
        let local = self.engine.current_position();
        let drift = (local - target).abs();

        if drift > DRIFT_THRESHOLD_FRAMES {
            debug!(
                client_id = self.client_id,
                "Drift {:.1} frames, seeking {:.1} -> {:.1}", drift, local, target
            );
            self.perform(EngineCommand::Seek(target), Cause::Correction);
        }
    }

    fn send(&self, packet: Packet) {
        let kind = packet.kind();
        match self.sink.send(packet) {
            Ok(()) => debug!(client_id = self.client_id, "Sent {:?}", kind),
            Err(e) => warn!(client_id = self.client_id, "Dropping {:?}: {}", kind, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ClockEngine;
    use crate::transport::TransportError;
    use common::{ManualClock, RateChangeNotice, SceneData, SyncNotice, SyncRequest, Timeline};
    use std::sync::Mutex;

    const T: i64 = 1_700_000_000_000;
    const ME: ClientId = 1;
    const PEER: ClientId = 7;

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Vec<Packet>>>);

    impl RecordingSink {
        fn sent(&self) -> Vec<Packet> {
            self.0.lock().unwrap().clone()
        }
    }

    impl PacketSink for RecordingSink {
        fn send(&self, packet: Packet) -> Result<(), TransportError> {
            self.0.lock().unwrap().push(packet);
            Ok(())
        }
    }

    struct Fixture {
        reconciler: PlaybackReconciler<ClockEngine, RecordingSink>,
        sink: RecordingSink,
        clock: ManualClock,
    }

    fn join_with(state: Timeline) -> Fixture {
        let clock = ManualClock::new(T);
        let sink = RecordingSink::default();
        let on_connect = OnConnectPacket {
            client_id: ME,
            scene_data: SceneData::default(),
            player_state: state,
            is_first_client: false,
        };
        let engine = ClockEngine::new(Arc::new(clock.clone()), None);
        let reconciler =
            PlaybackReconciler::join(&on_connect, engine, sink.clone(), Arc::new(clock.clone()));
        Fixture {
            reconciler,
            sink,
            clock,
        }
    }

    fn notice(client_id: ClientId, position: f64, request_time: i64) -> SyncNotice {
        SyncNotice {
            client_id,
            position,
            request_time,
        }
    }

    #[test]
    fn test_join_paused_timeline_seeks_without_sending() {
        let f = join_with(Timeline {
            playing: false,
            paused_position: 240.0,
            anchor_time: T - 8000,
            playback_rate: 1.0,
        });
        assert_eq!(f.reconciler.engine().current_position(), 240.0);
        assert!(!f.reconciler.engine().is_playing());
        assert!(f.sink.sent().is_empty());
        assert!(f.reconciler.ignore_counters().is_settled());
    }

    #[test]
    fn test_join_playing_timeline_extrapolates_from_anchor() {
        let f = join_with(Timeline {
            playing: true,
            paused_position: 0.0,
            anchor_time: T - 10_000,
            playback_rate: 1.0,
        });
        assert_eq!(f.reconciler.engine().current_position(), 300.0);
        assert!(f.reconciler.engine().is_playing());
        assert!(f.sink.sent().is_empty());
        assert!(f.reconciler.ignore_counters().is_settled());
    }

    #[test]
    fn test_peer_resume_corrects_drift_then_plays() {
        let mut f = join_with(Timeline::new());
        f.reconciler.engine_mut().seek(140.0, false);
        f.clock.set(T + 200);

        f.reconciler.handle_packet(&Packet::OnResume(notice(PEER, 150.0, T)));

        let engine = f.reconciler.engine();
        assert!(engine.is_playing());
        assert!((engine.current_position() - 156.0).abs() < 1e-9);
        assert!(f.sink.sent().is_empty());
        assert!(f.reconciler.ignore_counters().is_settled());
    }

    #[test]
    fn test_drift_within_threshold_does_not_seek() {
        let mut f = join_with(Timeline::new());
        f.reconciler.engine_mut().seek(155.0, false);
        f.clock.set(T + 200);

        f.reconciler.handle_packet(&Packet::OnSeek(notice(PEER, 150.0, T)));
        assert_eq!(f.reconciler.engine().current_position(), 155.0);
        assert!(f.sink.sent().is_empty());
    }

    #[test]
    fn test_drift_beyond_threshold_lands_within_it() {
        let mut f = join_with(Timeline::new());
        f.reconciler.engine_mut().seek(10.0, false);

        f.reconciler.handle_packet(&Packet::OnSeek(notice(PEER, 500.0, T)));
        let local = f.reconciler.engine().current_position();
        assert!((local - 500.0).abs() <= DRIFT_THRESHOLD_FRAMES);
        assert!(f.reconciler.ignore_counters().is_settled());
    }

    #[test]
    fn test_own_echo_changes_nothing() {
        let mut f = join_with(Timeline::new());
        f.reconciler.gesture(EngineCommand::Play);
        let sent = f.sink.sent();
        assert_eq!(
            sent,
            vec![Packet::Resume(SyncRequest {
                position: 0.0,
                request_time: T,
            })]
        );

        f.clock.advance(100);
        f.reconciler.handle_packet(&Packet::OnResume(notice(ME, 0.0, T)));
        f.reconciler.handle_packet(&Packet::OnPause(notice(ME, 900.0, T)));

        assert_eq!(f.sink.sent(), sent);
        assert!(f.reconciler.engine().is_playing());
        assert_eq!(f.reconciler.engine().current_position(), 3.0);
    }

    #[test]
    fn test_peer_pause_is_applied_quietly() {
        let mut f = join_with(Timeline {
            playing: true,
            paused_position: 0.0,
            anchor_time: T,
            playback_rate: 1.0,
        });
        f.clock.advance(1000);

        f.reconciler.handle_packet(&Packet::OnPause(notice(PEER, 30.0, T + 1000)));
        assert!(!f.reconciler.engine().is_playing());
        assert_eq!(f.reconciler.engine().current_position(), 30.0);
        assert!(f.sink.sent().is_empty());
    }

    #[test]
    fn test_peer_rate_change_sets_rate_without_feedback() {
        let mut f = join_with(Timeline::new());
        f.reconciler.engine_mut().seek(300.0, false);

        f.reconciler
            .handle_packet(&Packet::OnPlaybackRateChange(RateChangeNotice {
                client_id: PEER,
                position: 300.0,
                request_time: T,
                rate: 1.5,
            }));
        assert_eq!(f.reconciler.engine().rate(), 1.5);
        assert!(f.sink.sent().is_empty());
    }

    #[test]
    fn test_user_gestures_become_control_packets() {
        let mut f = join_with(Timeline::new());
        f.reconciler.gesture(EngineCommand::Seek(90.0));
        f.clock.advance(500);
        f.reconciler.gesture(EngineCommand::SetRate(2.0));

        let sent = f.sink.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[0],
            Packet::Seek(SyncRequest {
                position: 90.0,
                request_time: T,
            })
        );
        assert!(matches!(
            &sent[1],
            Packet::PlaybackRateChange(request) if request.rate == 2.0 && request.request_time == T + 500
        ));
    }

    #[test]
    fn test_correction_then_gesture_of_same_kind_is_sent() {
        let mut f = join_with(Timeline::new());
        f.reconciler.handle_packet(&Packet::OnResume(notice(PEER, 0.0, T)));
        assert!(f.reconciler.engine().is_playing());

        f.reconciler.gesture(EngineCommand::Pause);
        f.reconciler.gesture(EngineCommand::Play);
        let kinds: Vec<_> = f.sink.sent().iter().map(Packet::kind).collect();
        assert_eq!(kinds, vec![common::PacketKind::Pause, common::PacketKind::Resume]);
    }

    #[test]
    fn test_extreme_request_time_does_not_overflow() {
        let mut f = join_with(Timeline::new());
        f.reconciler.handle_packet(&Packet::OnSeek(notice(PEER, 10.0, i64::MIN)));
        assert!(f.reconciler.engine().current_position().is_finite());
        assert!(f.sink.sent().is_empty());
        assert!(f.reconciler.ignore_counters().is_settled());
    }
}
