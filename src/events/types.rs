//! Call event types
//!
//! Defines all event types that can be broadcast through the event bus.

use serde::{Deserialize, Serialize};

use crate::call::router::PeerSnapshot;
use crate::call::session::CallSession;
use crate::call::stage::Stage;
use crate::channel::ChannelState;

/// Call event enumeration
///
/// All events are tagged with their event name for serialization.
/// The `serde(tag = "event", content = "data")` attribute creates a
/// JSON structure like:
/// ```json
/// {
///   "event": "channel.state_changed",
///   "data": { "state": "open" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum CallEvent {
    // ============================================================================
    // Channel Events
    // ============================================================================
    /// Relay channel connection state changed
    #[serde(rename = "channel.state_changed")]
    ChannelStateChanged {
        /// New state
        state: ChannelState,
    },

    // ============================================================================
    // Call Events
    // ============================================================================
    /// A new call session snapshot was applied
    #[serde(rename = "call.session_updated")]
    CallSessionUpdated {
        /// The snapshot, inactive when the relay reported no call
        session: CallSession,
    },

    /// The renderable peer list changed
    #[serde(rename = "call.peers_changed")]
    CallPeersChanged {
        /// One entry per live peer, sorted by identity
        peers: Vec<PeerSnapshot>,
    },

    /// The staged participant changed
    #[serde(rename = "call.stage_changed")]
    CallStageChanged {
        /// Staged participant, None when nothing is staged
        stage: Option<Stage>,
    },

    /// Local screen sharing started or stopped
    #[serde(rename = "call.share_changed")]
    CallShareChanged {
        /// Whether the local side is sharing its screen
        sharing: bool,
    },

    // ============================================================================
    // Media Events
    // ============================================================================
    /// Capture device unavailable or denied (non-fatal)
    #[serde(rename = "media.warning")]
    MediaWarning {
        /// What was being acquired: "user_media" or "display_media"
        source: String,
        /// Human-readable reason
        message: String,
    },

    // ============================================================================
    // WebRTC Events
    // ============================================================================
    /// A negotiation step failed for a peer
    #[serde(rename = "webrtc.negotiation_failed")]
    WebRTCNegotiationFailed {
        /// Remote identity
        peer_id: String,
        /// Step that failed: "offer", "answer", "apply_answer", "ice", "connect"
        step: String,
        /// Error message
        error: String,
    },

    /// A peer connection reported a terminal state and was removed
    #[serde(rename = "webrtc.connection_lost")]
    WebRTCConnectionLost {
        /// Remote identity
        peer_id: String,
        /// Reported state: "disconnected", "failed", "closed"
        state: String,
    },
}

impl CallEvent {
    /// Get the event name (for filtering)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::ChannelStateChanged { .. } => "channel.state_changed",
            Self::CallSessionUpdated { .. } => "call.session_updated",
            Self::CallPeersChanged { .. } => "call.peers_changed",
            Self::CallStageChanged { .. } => "call.stage_changed",
            Self::CallShareChanged { .. } => "call.share_changed",
            Self::MediaWarning { .. } => "media.warning",
            Self::WebRTCNegotiationFailed { .. } => "webrtc.negotiation_failed",
            Self::WebRTCConnectionLost { .. } => "webrtc.connection_lost",
        }
    }

    /// Check if event matches a topic pattern
    ///
    /// Supports wildcards:
    /// - `*` matches all events
    /// - `call.*` matches all call events
    /// - `webrtc.connection_lost` matches exact event
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }

        let event_name = self.event_name();

        if let Some(prefix) = topic.strip_suffix(".*") {
            event_name
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.'))
        } else {
            event_name == topic
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_name() {
        let event = CallEvent::ChannelStateChanged {
            state: ChannelState::Open,
        };
        assert_eq!(event.event_name(), "channel.state_changed");

        let event = CallEvent::WebRTCConnectionLost {
            peer_id: "h@x".to_string(),
            state: "failed".to_string(),
        };
        assert_eq!(event.event_name(), "webrtc.connection_lost");
    }

    #[test]
    fn test_matches_topic() {
        let event = CallEvent::CallShareChanged { sharing: true };

        assert!(event.matches_topic("*"));
        assert!(event.matches_topic("call.*"));
        assert!(event.matches_topic("call.share_changed"));
        assert!(!event.matches_topic("channel.*"));
        assert!(!event.matches_topic("cal.*"));
        assert!(!event.matches_topic("call.stage_changed"));
    }

    #[test]
    fn test_serialization() {
        let event = CallEvent::MediaWarning {
            source: "user_media".to_string(),
            message: "camera denied".to_string(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "media.warning");
        assert_eq!(json["data"]["message"], "camera denied");

        let deserialized: CallEvent = serde_json::from_value(json).unwrap();
        assert!(matches!(deserialized, CallEvent::MediaWarning { .. }));
    }
}
