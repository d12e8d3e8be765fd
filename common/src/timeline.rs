use log::debug;
use serde::{Deserialize, Serialize};

use crate::util::{frames_to_ms, ms_to_frames};
use crate::{Control, ControlEvent};

/// The shared playback clock.
///
/// `anchor_time` is the wall-clock instant at which frame 0 would have played if the timeline had
/// run at normal speed up to `paused_position`; the instant that corresponds to `paused_position`
/// is therefore `anchor_time + frames_to_ms(paused_position)`. Both fields are only ever written
/// together, by [`Timeline::apply`] and [`Timeline::restart`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeline {
    pub playing: bool,
    pub paused_position: f64,
    pub anchor_time: i64,
    pub playback_rate: f64,
}

impl Default for Timeline {
    fn default() -> Self {
        Timeline {
            playing: false,
            paused_position: 0.0,
            anchor_time: 0,
            playback_rate: 1.0,
        }
    }
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a sequence of control events over a fresh timeline
    pub fn replay<'a>(events: impl IntoIterator<Item = &'a ControlEvent>) -> Self {
        let mut timeline = Timeline::new();
        for event in events {
            timeline.apply(event);
        }
        timeline
    }

    /// Re-anchor at the sender's claimed position and time, then apply the control's own change.
    pub fn apply(&mut self, event: &ControlEvent) {
        self.anchor_time = event
            .request_time
            .saturating_sub(frames_to_ms(event.position).round() as i64);
        self.paused_position = event.position;

        match event.control {
            Control::Resume => self.playing = true,
            Control::Pause => self.playing = false,
            Control::Seek => {}
            Control::RateChange { rate } => self.playback_rate = rate,
        }

        debug!(
            "timeline {:?}: position={} anchor={} playing={} rate={}",
            event.control, self.paused_position, self.anchor_time, self.playing, self.playback_rate
        );
    }

    /// Start playing from frame 0 at `now_ms`
    pub fn restart(&mut self, now_ms: i64) {
        self.paused_position = 0.0;
        self.anchor_time = now_ms;
        self.playing = true;
    }

    /// Wall-clock instant that corresponds to `paused_position`
    pub fn position_time(&self) -> i64 {
        self.anchor_time
            .saturating_add(frames_to_ms(self.paused_position).round() as i64)
    }

    /// Authoritative frame at `now_ms`
    pub fn position_at(&self, now_ms: i64) -> f64 {
        if !self.playing {
            return self.paused_position;
        }
        let elapsed = now_ms.saturating_sub(self.position_time()) as f64;
        self.paused_position + ms_to_frames(elapsed) * self.playback_rate
    }
}
