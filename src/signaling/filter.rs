//! Receive-side admission of relay envelopes

use super::envelope::{Envelope, Signal};

/// Why an inbound envelope was dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// No room joined yet
    NoRoom,
    /// Envelope belongs to another room
    RoomMismatch { joined: i64, got: i64 },
    /// Addressed to somebody else
    NotAddressed { to: String },
    /// Our own message reflected back
    Echo,
    /// Offer/answer/ICE without a sender identity
    MissingSender,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::NoRoom => write!(f, "no room joined"),
            DropReason::RoomMismatch { joined, got } => {
                write!(f, "room {} != joined room {}", got, joined)
            }
            DropReason::NotAddressed { to } => write!(f, "addressed to {}", to),
            DropReason::Echo => write!(f, "echo"),
            DropReason::MissingSender => write!(f, "missing sender"),
        }
    }
}

/// Decide whether an inbound envelope is for us
///
/// `call_state` is a relay broadcast and is admitted whatever its sender;
/// every other kind stamped with our own identity is an echo.
pub fn admit(envelope: &Envelope, self_id: &str, room: Option<i64>) -> Result<(), DropReason> {
    let joined = match room {
        Some(id) if id > 0 => id,
        _ => return Err(DropReason::NoRoom),
    };
    if envelope.room_id != joined {
        return Err(DropReason::RoomMismatch {
            joined,
            got: envelope.room_id,
        });
    }

    if let Some(to) = envelope.to.as_deref() {
        if to != self_id {
            return Err(DropReason::NotAddressed { to: to.to_string() });
        }
    }

    if matches!(envelope.signal, Signal::CallState { .. }) {
        return Ok(());
    }

    match envelope.from.as_deref() {
        Some(from) if from == self_id => Err(DropReason::Echo),
        None if envelope.signal.is_peer_signal() => Err(DropReason::MissingSender),
        _ => Ok(()),
    }
}
