use std::sync::Arc;

use common::Clock;
use common::util::ms_to_frames;

/// Local notifications a playback engine fires, whether a user or the reconciler caused them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalEvent {
    Play,
    Pause,
    Seek,
}

/// The player the reconciler drives. Positions are in frames.
pub trait PlaybackEngine {
    fn current_position(&self) -> f64;
    fn is_playing(&self) -> bool;
    fn rate(&self) -> f64;
    fn play(&mut self);
    fn pause(&mut self);
    /// Jump to `frame`. A seek event is fired only when `notify` is set.
    fn seek(&mut self, frame: f64, notify: bool);
    /// Change the rate without firing any event
    fn set_rate(&mut self, rate: f64);
    /// Drain the events fired since the last call, oldest first
    fn take_events(&mut self) -> Vec<LocalEvent>;
}

/// Headless engine whose position is extrapolated from wall-clock time.
///
/// Play and pause fire only on an actual state change. Position never runs past `end_frame`.
pub struct ClockEngine {
    clock: Arc<dyn Clock>,
    playing: bool,
    /// Position at `anchor_ms`
    position: f64,
    anchor_ms: i64,
    rate: f64,
    end_frame: Option<f64>,
    events: Vec<LocalEvent>,
}

impl ClockEngine {
    pub fn new(clock: Arc<dyn Clock>, end_frame: Option<f64>) -> Self {
        let anchor_ms = clock.now_ms();
        Self {
            clock,
            playing: false,
            position: 0.0,
            anchor_ms,
            rate: 1.0,
            end_frame,
            events: Vec::new(),
        }
    }

    pub fn end_frame(&self) -> Option<f64> {
        self.end_frame
    }

    fn clamp(&self, frame: f64) -> f64 {
        let frame = frame.max(0.0);
        match self.end_frame {
            Some(end) => frame.min(end),
            None => frame,
        }
    }

    fn reanchor(&mut self, position: f64) {
        self.position = self.clamp(position);
        self.anchor_ms = self.clock.now_ms();
    }
}

impl PlaybackEngine for ClockEngine {
    fn current_position(&self) -> f64 {
        if !self.playing {
            return self.position;
        }
        let elapsed = (self.clock.now_ms() - self.anchor_ms) as f64;
        self.clamp(self.position + ms_to_frames(elapsed) * self.rate)
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn rate(&self) -> f64 {
        self.rate
    }

    fn play(&mut self) {
        if self.playing {
            return;
        }
        self.reanchor(self.position);
        self.playing = true;
        self.events.push(LocalEvent::Play);
    }

    fn pause(&mut self) {
        if !self.playing {
            return;
        }
        let position = self.current_position();
        self.reanchor(position);
        self.playing = false;
        self.events.push(LocalEvent::Pause);
    }

    fn seek(&mut self, frame: f64, notify: bool) {
        self.reanchor(frame);
        if notify {
            self.events.push(LocalEvent::Seek);
        }
    }

    fn set_rate(&mut self, rate: f64) {
        let position = self.current_position();
        self.reanchor(position);
        self.rate = rate;
    }

    fn take_events(&mut self) -> Vec<LocalEvent> {
        std::mem::take(&mut self.events)
    }
}
