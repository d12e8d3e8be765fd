use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{ClientId, MAX_PLAYBACK_RATE, MAX_POSITION_FRAMES, MAX_REQUEST_TIME_MS, SceneData, Timeline};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("packet is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("packet has no kind tag")]
    MissingKind,
    #[error("unknown packet kind '{0}'")]
    UnknownKind(String),
    #[error("invalid fields for {kind:?} packet: {source}")]
    InvalidFields {
        kind: PacketKind,
        source: serde_json::Error,
    },
    #[error("{0:?} packets are not accepted from clients")]
    NotAControl(PacketKind),
    #[error("{field} out of range in {kind:?} packet")]
    OutOfRange {
        kind: PacketKind,
        field: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketKind {
    OnConnect,
    Resume,
    Pause,
    Seek,
    PlaybackRateChange,
    OnResume,
    OnPause,
    OnSeek,
    OnPlaybackRateChange,
}

/// Sent once to a newly accepted connection, before anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnConnectPacket {
    pub client_id: ClientId,
    pub scene_data: SceneData,
    pub player_state: Timeline,
    pub is_first_client: bool,
}

/// Body of Resume, Pause and Seek requests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub position: f64,
    pub request_time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateChangeRequest {
    pub position: f64,
    pub request_time: i64,
    pub rate: f64,
}

/// Body of OnResume, OnPause and OnSeek broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncNotice {
    pub client_id: ClientId,
    pub position: f64,
    pub request_time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateChangeNotice {
    pub client_id: ClientId,
    pub position: f64,
    pub request_time: i64,
    pub rate: f64,
}

/// One JSON text frame on the wire. The `kind` field is the discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Packet {
    OnConnect(OnConnectPacket),
    Resume(SyncRequest),
    Pause(SyncRequest),
    Seek(SyncRequest),
    PlaybackRateChange(RateChangeRequest),
    OnResume(SyncNotice),
    OnPause(SyncNotice),
    OnSeek(SyncNotice),
    OnPlaybackRateChange(RateChangeNotice),
}

/// The transport action a control packet asks for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Control {
    Resume,
    Pause,
    Seek,
    RateChange { rate: f64 },
}

/// A control request stripped of its wire framing: what to do, where, and when the sender asked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlEvent {
    pub control: Control,
    pub position: f64,
    pub request_time: i64,
}

impl ControlEvent {
    pub fn new(control: Control, position: f64, request_time: i64) -> Self {
        Self {
            control,
            position,
            request_time,
        }
    }

    /// Reject positions, times and rates no real player produces
    pub fn validate(&self, kind: PacketKind) -> Result<(), ProtocolError> {
        let out_of_range = |field| Err(ProtocolError::OutOfRange { kind, field });
        if !(0.0..=MAX_POSITION_FRAMES).contains(&self.position) {
            return out_of_range("position");
        }
        if !(0..=MAX_REQUEST_TIME_MS).contains(&self.request_time) {
            return out_of_range("requestTime");
        }
        if let Control::RateChange { rate } = self.control {
            if !(rate > 0.0 && rate <= MAX_PLAYBACK_RATE) {
                return out_of_range("rate");
            }
        }
        Ok(())
    }

    /// The client→server packet carrying this event
    pub fn to_request(&self) -> Packet {
        let request = SyncRequest {
            position: self.position,
            request_time: self.request_time,
        };
        match self.control {
            Control::Resume => Packet::Resume(request),
            Control::Pause => Packet::Pause(request),
            Control::Seek => Packet::Seek(request),
            Control::RateChange { rate } => Packet::PlaybackRateChange(RateChangeRequest {
                position: self.position,
                request_time: self.request_time,
                rate,
            }),
        }
    }

    /// The server→all packet announcing this event on behalf of `client_id`
    pub fn to_canonical(&self, client_id: ClientId) -> Packet {
        let notice = SyncNotice {
            client_id,
            position: self.position,
            request_time: self.request_time,
        };
        match self.control {
            Control::Resume => Packet::OnResume(notice),
            Control::Pause => Packet::OnPause(notice),
            Control::Seek => Packet::OnSeek(notice),
            Control::RateChange { rate } => Packet::OnPlaybackRateChange(RateChangeNotice {
                client_id,
                position: self.position,
                request_time: self.request_time,
                rate,
            }),
        }
    }
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::OnConnect(_) => PacketKind::OnConnect,
            Packet::Resume(_) => PacketKind::Resume,
            Packet::Pause(_) => PacketKind::Pause,
            Packet::Seek(_) => PacketKind::Seek,
            Packet::PlaybackRateChange(_) => PacketKind::PlaybackRateChange,
            Packet::OnResume(_) => PacketKind::OnResume,
            Packet::OnPause(_) => PacketKind::OnPause,
            Packet::OnSeek(_) => PacketKind::OnSeek,
            Packet::OnPlaybackRateChange(_) => PacketKind::OnPlaybackRateChange,
        }
    }

    /// Parse one text frame, telling apart bad JSON, unknown kinds, bad fields and control
    /// values out of range.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let tag = value
            .get("kind")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingKind)?;
        let kind: PacketKind = serde_json::from_value(Value::String(tag.to_string()))
            .map_err(|_| ProtocolError::UnknownKind(tag.to_string()))?;
        let packet: Packet = serde_json::from_value(value)
            .map_err(|source| ProtocolError::InvalidFields { kind, source })?;

        let event = packet
            .as_control()
            .or_else(|| packet.as_canonical().map(|(_, event)| event));
        if let Some(event) = event {
            event.validate(kind)?;
        }
        Ok(packet)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// The control event of a client→server packet
    pub fn as_control(&self) -> Option<ControlEvent> {
        let event = match self {
            Packet::Resume(r) => ControlEvent::new(Control::Resume, r.position, r.request_time),
            Packet::Pause(r) => ControlEvent::new(Control::Pause, r.position, r.request_time),
            Packet::Seek(r) => ControlEvent::new(Control::Seek, r.position, r.request_time),
            Packet::PlaybackRateChange(r) => {
                ControlEvent::new(Control::RateChange { rate: r.rate }, r.position, r.request_time)
            }
            _ => return None,
        };
        Some(event)
    }

    /// Originator and control event of a canonical server→all packet
    pub fn as_canonical(&self) -> Option<(ClientId, ControlEvent)> {
        let canonical = match self {
            Packet::OnResume(n) => (n.client_id, ControlEvent::new(Control::Resume, n.position, n.request_time)),
            Packet::OnPause(n) => (n.client_id, ControlEvent::new(Control::Pause, n.position, n.request_time)),
            Packet::OnSeek(n) => (n.client_id, ControlEvent::new(Control::Seek, n.position, n.request_time)),
            Packet::OnPlaybackRateChange(n) => (
                n.client_id,
                ControlEvent::new(Control::RateChange { rate: n.rate }, n.position, n.request_time),
            ),
            _ => return None,
        };
        Some(canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape_uses_kind_tag_and_camel_case() {
        let packet = Packet::OnPlaybackRateChange(RateChangeNotice {
            client_id: 3,
            position: 300.0,
            request_time: 1_700_000_000_000,
            rate: 1.5,
        });
        let value: Value = serde_json::from_str(&packet.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "kind": "OnPlaybackRateChange",
                "clientId": 3,
                "position": 300.0,
                "requestTime": 1_700_000_000_000i64,
                "rate": 1.5
            })
        );
    }

    #[test]
    fn test_decode_control_from_browser_json() {
        let packet = Packet::decode(r#"{"kind":"Resume","position":150,"requestTime":10000}"#).unwrap();
        assert_eq!(
            packet.as_control(),
            Some(ControlEvent::new(Control::Resume, 150.0, 10_000))
        );
        assert!(packet.as_canonical().is_none());
    }

    #[test]
    fn test_decode_errors_are_distinguished() {
        assert!(matches!(Packet::decode("not json"), Err(ProtocolError::Json(_))));
        assert!(matches!(Packet::decode(r#"{"position":1}"#), Err(ProtocolError::MissingKind)));
        assert!(matches!(
            Packet::decode(r#"{"kind":"Rewind","position":1,"requestTime":2}"#),
            Err(ProtocolError::UnknownKind(kind)) if kind == "Rewind"
        ));
        assert!(matches!(
            Packet::decode(r#"{"kind":"Seek","position":"ten"}"#),
            Err(ProtocolError::InvalidFields { kind: PacketKind::Seek, .. })
        ));
    }

    #[test]
    fn test_extreme_values_are_rejected() {
        let extremes = [
            r#"{"kind":"Pause","position":1,"requestTime":-9223372036854775808}"#,
            r#"{"kind":"Seek","position":-1e300,"requestTime":1000}"#,
            r#"{"kind":"Resume","position":1e300,"requestTime":1000}"#,
            r#"{"kind":"PlaybackRateChange","position":1,"requestTime":1000,"rate":0}"#,
            r#"{"kind":"OnSeek","clientId":1,"position":1,"requestTime":9223372036854775807}"#,
        ];
        for text in extremes {
            assert!(
                matches!(Packet::decode(text), Err(ProtocolError::OutOfRange { .. })),
                "accepted {}",
                text
            );
        }
        assert!(matches!(
            Packet::decode(r#"{"kind":"Seek","position":-3,"requestTime":1000}"#),
            Err(ProtocolError::OutOfRange { kind: PacketKind::Seek, field: "position" })
        ));
        assert!(Packet::decode(r#"{"kind":"Seek","position":0,"requestTime":0}"#).is_ok());
    }

    #[test]
    fn test_canonical_keeps_request_time_and_origin() {
        let event = ControlEvent::new(Control::RateChange { rate: 0.5 }, 42.0, 99);
        let canonical = event.to_canonical(7);
        assert_eq!(canonical.kind(), PacketKind::OnPlaybackRateChange);
        assert_eq!(canonical.as_canonical(), Some((7, event)));
        assert_eq!(event.to_request().as_control(), Some(event));
    }
}
