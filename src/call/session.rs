//! Call session state
//!
//! The relay broadcasts the full session on every change. The local copy is
//! replaced wholesale, never merged, and every replacement bumps a generation
//! counter that asynchronous continuations are checked against.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

/// Call start time as sent by the relay (epoch millis or an RFC 3339 string)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StartedAt {
    Millis(i64),
    Text(String),
}

/// Snapshot of a room's call
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallSession {
    pub active: bool,
    pub room_id: i64,
    pub host: Option<String>,
    #[serde(deserialize_with = "nullable_set")]
    pub participants: BTreeSet<String>,
    pub started_at: Option<StartedAt>,
    pub screen_sharing: bool,
    pub screen_sharer: Option<String>,
}

fn nullable_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let list: Option<Vec<Option<String>>> = Option::deserialize(deserializer)?;
    Ok(list
        .unwrap_or_default()
        .into_iter()
        .flatten()
        .filter(|id| !id.is_empty())
        .collect())
}

impl CallSession {
    /// Inactive session for a room (what a `null` call decodes to)
    pub fn inactive(room_id: i64) -> Self {
        Self {
            room_id,
            ..Default::default()
        }
    }

    /// Participants other than `self_id`
    pub fn others<'a>(&'a self, self_id: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.participants
            .iter()
            .map(String::as_str)
            .filter(move |id| *id != self_id)
    }

    pub fn is_host(&self, id: &str) -> bool {
        self.host.as_deref() == Some(id)
    }

    /// Identity currently sharing its screen, if any
    pub fn sharer(&self) -> Option<&str> {
        if self.screen_sharing {
            self.screen_sharer.as_deref()
        } else {
            None
        }
    }
}

/// Outcome of replacing the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransition {
    /// No active call before, active now
    Started,
    /// Active before and after
    Updated,
    /// Active before, inactive now
    Ended,
    /// Inactive before and after
    Idle,
}

/// Owned session state with a generation counter
#[derive(Debug, Default)]
pub struct SessionState {
    current: CallSession,
    generation: u64,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &CallSession {
        &self.current
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_active(&self) -> bool {
        self.current.active
    }

    /// Replace the session with the latest broadcast
    pub fn replace(&mut self, next: CallSession) -> SessionTransition {
        let was_active = self.current.active;
        let is_active = next.active;
        self.current = next;
        self.generation += 1;

        match (was_active, is_active) {
            (false, true) => SessionTransition::Started,
            (true, true) => SessionTransition::Updated,
            (true, false) => SessionTransition::Ended,
            (false, false) => SessionTransition::Idle,
        }
    }

    /// Forget the session (room left or switched)
    pub fn reset(&mut self, room_id: i64) {
        self.current = CallSession::inactive(room_id);
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_wire_session() {
        let json = r#"{
            "active": true,
            "roomId": 7,
            "host": "h@x",
            "participants": ["h@x", "p@x", "p@x", null, ""],
            "startedAt": 1700000000000,
            "screenSharing": false,
            "screenSharer": null
        }"#;
        let session: CallSession = serde_json::from_str(json).unwrap();

        assert!(session.active);
        assert_eq!(session.room_id, 7);
        assert!(session.is_host("h@x"));
        assert_eq!(session.participants.len(), 2);
        assert_eq!(session.started_at, Some(StartedAt::Millis(1_700_000_000_000)));
        assert_eq!(session.others("p@x").collect::<Vec<_>>(), vec!["h@x"]);
    }

    #[test]
    fn test_missing_or_null_participants_are_empty() {
        let session: CallSession =
            serde_json::from_str(r#"{"active":true,"roomId":1,"host":"h@x"}"#).unwrap();
        assert!(session.participants.is_empty());

        let session: CallSession =
            serde_json::from_str(r#"{"active":true,"roomId":1,"participants":null}"#).unwrap();
        assert!(session.participants.is_empty());
    }

    #[test]
    fn test_started_at_accepts_text() {
        let session: CallSession =
            serde_json::from_str(r#"{"startedAt":"2026-01-02T03:04:05Z"}"#).unwrap();
        assert!(matches!(session.started_at, Some(StartedAt::Text(_))));
    }

    #[test]
    fn test_sharer_requires_flag() {
        let mut session = CallSession {
            screen_sharer: Some("p@x".to_string()),
            ..Default::default()
        };
        assert_eq!(session.sharer(), None);
        session.screen_sharing = true;
        assert_eq!(session.sharer(), Some("p@x"));
    }

    #[test]
    fn test_replace_is_wholesale_and_counted() {
        let mut state = SessionState::new();
        let started = CallSession {
            active: true,
            room_id: 7,
            host: Some("h@x".to_string()),
            participants: ["h@x".to_string()].into_iter().collect(),
            screen_sharing: true,
            screen_sharer: Some("h@x".to_string()),
            ..Default::default()
        };
        assert_eq!(state.replace(started), SessionTransition::Started);
        assert_eq!(state.generation(), 1);

        let updated = CallSession {
            active: true,
            room_id: 7,
            host: Some("h@x".to_string()),
            ..Default::default()
        };
        assert_eq!(state.replace(updated), SessionTransition::Updated);
        assert!(!state.current().screen_sharing);
        assert!(state.current().screen_sharer.is_none());

        assert_eq!(state.replace(CallSession::inactive(7)), SessionTransition::Ended);
        assert_eq!(state.replace(CallSession::inactive(7)), SessionTransition::Idle);
        assert_eq!(state.generation(), 4);
    }
}
