//! Stage selection
//!
//! The screen sharer is staged while a share is active, otherwise the host,
//! otherwise nobody. Recomputed from the current session and peer list on
//! every change.

use serde::{Deserialize, Serialize};
use typeshare::typeshare;

use super::router::PeerSnapshot;
use super::session::CallSession;

/// Why a participant is staged
#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageReason {
    ScreenShare,
    Host,
}

/// The staged participant
#[typeshare]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub identity: String,
    pub reason: StageReason,
    /// The local participant is staged (render the local preview)
    pub is_local: bool,
    /// Remote media is available for the staged participant
    pub has_stream: bool,
}

pub fn select_stage(session: &CallSession, peers: &[PeerSnapshot], self_id: &str) -> Option<Stage> {
    if !session.active {
        return None;
    }

    let (identity, reason) = match session.sharer() {
        Some(sharer) => (sharer, StageReason::ScreenShare),
        None => (session.host.as_deref()?, StageReason::Host),
    };

    let is_local = identity == self_id;
    let has_stream = !is_local
        && peers
            .iter()
            .any(|p| p.peer_id == identity && p.has_stream);

    Some(Stage {
        identity: identity.to_string(),
        reason,
        is_local,
        has_stream,
    })
}
