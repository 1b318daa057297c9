//! Relay envelope codec
//!
//! Every frame on the relay channel is a JSON object with a snake_case `type`
//! tag, a numeric `roomId`, an optional recipient `to` and an optional sender.
//! The relay stamps the sender under one of several keys; all of them decode
//! into [`Envelope::from`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::call::session::CallSession;
use crate::error::Result;
use crate::webrtc::signaling::{IceCandidate, SessionDescription};

/// Keys the sender identity may arrive under, in order of precedence
const SENDER_KEYS: [&str; 4] = ["from", "userEmail", "sender", "email"];

/// Presence status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Active,
    Idle,
    Inactive,
}

/// Envelope payload, one variant per message kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    JoinRoom,
    LeaveRoom,
    Presence {
        status: PresenceStatus,
    },
    CallStart,
    CallJoin,
    CallLeave,
    CallEnd,
    /// Ask the relay to rebroadcast the current session
    CallSync,
    /// Full session snapshot, `null` when the room has no call
    CallState {
        #[serde(default)]
        call: Option<CallSession>,
    },
    CallShareStart,
    CallShareStop,
    #[serde(rename = "webrtc_offer")]
    Offer {
        sdp: SessionDescription,
    },
    #[serde(rename = "webrtc_answer")]
    Answer {
        sdp: SessionDescription,
    },
    #[serde(rename = "webrtc_ice")]
    Ice {
        ice: IceCandidate,
    },
}

impl Signal {
    const KINDS: [&'static str; 14] = [
        "join_room",
        "leave_room",
        "presence",
        "call_start",
        "call_join",
        "call_leave",
        "call_end",
        "call_sync",
        "call_state",
        "call_share_start",
        "call_share_stop",
        "webrtc_offer",
        "webrtc_answer",
        "webrtc_ice",
    ];

    /// Wire name of the message kind
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::JoinRoom => "join_room",
            Signal::LeaveRoom => "leave_room",
            Signal::Presence { .. } => "presence",
            Signal::CallStart => "call_start",
            Signal::CallJoin => "call_join",
            Signal::CallLeave => "call_leave",
            Signal::CallEnd => "call_end",
            Signal::CallSync => "call_sync",
            Signal::CallState { .. } => "call_state",
            Signal::CallShareStart => "call_share_start",
            Signal::CallShareStop => "call_share_stop",
            Signal::Offer { .. } => "webrtc_offer",
            Signal::Answer { .. } => "webrtc_answer",
            Signal::Ice { .. } => "webrtc_ice",
        }
    }

    /// Offer, answer or ICE: addressed to one peer and applied per peer
    pub fn is_peer_signal(&self) -> bool {
        matches!(
            self,
            Signal::Offer { .. } | Signal::Answer { .. } | Signal::Ice { .. }
        )
    }
}

/// A relay envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Envelope {
    #[serde(rename = "roomId")]
    pub room_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(flatten)]
    pub signal: Signal,
}

impl Envelope {
    /// Room-scoped envelope
    pub fn room(room_id: i64, signal: Signal) -> Self {
        Self {
            room_id,
            to: None,
            from: None,
            signal,
        }
    }

    /// Envelope addressed to a single peer
    pub fn to_peer(room_id: i64, to: impl Into<String>, signal: Signal) -> Self {
        Self {
            room_id,
            to: Some(to.into()),
            from: None,
            signal,
        }
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Serialize to a text frame
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a text frame
    ///
    /// Returns `Ok(None)` for objects without a known `type`, so new relay
    /// message kinds are ignored rather than treated as errors.
    pub fn decode(text: &str) -> Result<Option<Envelope>> {
        let value: Value = serde_json::from_str(text)?;
        let Some(object) = value.as_object() else {
            return Ok(None);
        };
        let Some(kind) = object.get("type").and_then(Value::as_str) else {
            return Ok(None);
        };
        if !Signal::KINDS.contains(&kind) {
            return Ok(None);
        }

        let room_id = object.get("roomId").and_then(room_id_of).unwrap_or(0);
        let to = object.get("to").and_then(identity_of);
        let from = SENDER_KEYS
            .iter()
            .find_map(|key| object.get(*key).and_then(identity_of));
        let signal = Signal::deserialize(&value)?;

        Ok(Some(Envelope {
            room_id,
            to,
            from,
            signal,
        }))
    }
}

/// Room ids arrive as numbers, occasionally as numeric strings
fn room_id_of(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn identity_of(value: &Value) -> Option<String> {
    value
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_room_message() {
        let env = Envelope::room(
            7,
            Signal::Presence {
                status: PresenceStatus::Active,
            },
        );
        let json: Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "presence");
        assert_eq!(json["roomId"], 7);
        assert_eq!(json["status"], "active");
        assert!(json.get("to").is_none());
    }

    #[test]
    fn test_encode_offer() {
        let env = Envelope::to_peer(
            7,
            "h@x",
            Signal::Offer {
                sdp: SessionDescription::offer("v=0"),
            },
        )
        .with_from("p@x");
        let json: Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "webrtc_offer");
        assert_eq!(json["to"], "h@x");
        assert_eq!(json["from"], "p@x");
        assert_eq!(json["sdp"]["type"], "offer");
        assert_eq!(json["sdp"]["sdp"], "v=0");
    }

    #[test]
    fn test_decode_ice_with_sender_alias() {
        let text = r#"{"type":"webrtc_ice","roomId":7,"to":"h@x","userEmail":"p@x",
            "ice":{"candidate":"candidate:1","sdpMid":"0","sdpMLineIndex":0}}"#;
        let env = Envelope::decode(text).unwrap().unwrap();
        assert_eq!(env.room_id, 7);
        assert_eq!(env.to.as_deref(), Some("h@x"));
        assert_eq!(env.from.as_deref(), Some("p@x"));
        match env.signal {
            Signal::Ice { ice } => assert_eq!(ice.sdp_mid.as_deref(), Some("0")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_sender_precedence() {
        let text = r#"{"type":"call_end","roomId":1,"email":"c@x","sender":"b@x"}"#;
        let env = Envelope::decode(text).unwrap().unwrap();
        assert_eq!(env.from.as_deref(), Some("b@x"));

        let text = r#"{"type":"call_end","roomId":1,"from":"","email":"c@x"}"#;
        let env = Envelope::decode(text).unwrap().unwrap();
        assert_eq!(env.from.as_deref(), Some("c@x"));
    }

    #[test]
    fn test_decode_call_state_null_and_string_room() {
        let env = Envelope::decode(r#"{"type":"call_state","roomId":"7","call":null}"#)
            .unwrap()
            .unwrap();
        assert_eq!(env.room_id, 7);
        assert_eq!(env.signal, Signal::CallState { call: None });
    }

    #[test]
    fn test_unknown_kind_is_ignored() {
        assert!(Envelope::decode(r#"{"type":"message","roomId":7,"body":"hi"}"#)
            .unwrap()
            .is_none());
        assert!(Envelope::decode(r#"{"roomId":7}"#).unwrap().is_none());
        assert!(Envelope::decode("[1,2]").unwrap().is_none());
    }

    #[test]
    fn test_malformed_known_kind_is_error() {
        assert!(Envelope::decode(r#"{"type":"webrtc_offer","roomId":7}"#).is_err());
        assert!(Envelope::decode("not json").is_err());
    }
}
