//! Media track router
//!
//! Inbound tracks are merged into the owning peer's [`RemoteStream`]. After
//! every change a sorted, read-only peer list is recomputed and published;
//! that list is all the presentation layer gets to see.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;
use typeshare::typeshare;

use crate::webrtc::media::{RemoteTrack, TrackKind};
use crate::webrtc::peer::PeerConnectionManager;

/// Inbound tracks of one peer
///
/// Exists from the moment the peer entry is created, before any track.
#[derive(Debug, Clone)]
pub struct RemoteStream {
    peer_id: String,
    tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            tracks: Vec::new(),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Add a track unless one with the same id is present
    pub fn add(&mut self, track: RemoteTrack) -> bool {
        if self.tracks.iter().any(|t| t.id == track.id) {
            return false;
        }
        self.tracks.push(track);
        true
    }

    pub fn remove(&mut self, track_id: &str) -> bool {
        let before = self.tracks.len();
        self.tracks.retain(|t| t.id != track_id);
        self.tracks.len() != before
    }

    pub fn tracks(&self) -> &[RemoteTrack] {
        &self.tracks
    }

    pub fn track(&self, kind: TrackKind) -> Option<&RemoteTrack> {
        self.tracks.iter().find(|t| t.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// Track summary for the presentation layer
#[typeshare]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub id: String,
    pub kind: TrackKind,
}

/// One renderable peer
#[typeshare]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSnapshot {
    pub peer_id: String,
    /// At least one inbound track
    pub has_stream: bool,
    #[typeshare(skip)]
    pub track_count: usize,
    pub tracks: Vec<TrackInfo>,
}

impl PeerSnapshot {
    fn of(stream: &RemoteStream) -> Self {
        Self {
            peer_id: stream.peer_id.clone(),
            has_stream: !stream.is_empty(),
            track_count: stream.len(),
            tracks: stream
                .tracks
                .iter()
                .map(|t| TrackInfo {
                    id: t.id.clone(),
                    kind: t.kind,
                })
                .collect(),
        }
    }
}

/// Routes inbound tracks and publishes the peer list
pub struct MediaTrackRouter {
    peers_tx: watch::Sender<Vec<PeerSnapshot>>,
}

impl MediaTrackRouter {
    pub fn new() -> Self {
        let (peers_tx, _) = watch::channel(Vec::new());
        Self { peers_tx }
    }

    /// Merge a track into the peer's stream and republish
    ///
    /// Tracks for peers without an entry are dropped.
    pub fn add_track(&self, manager: &mut PeerConnectionManager, peer_id: &str, track: RemoteTrack) -> bool {
        let added = match manager.remote_stream_mut(peer_id) {
            Some(stream) => stream.add(track),
            None => {
                debug!("Track from {} without a peer entry, ignoring", peer_id);
                return false;
            }
        };
        self.publish(manager);
        added
    }

    /// Remove an ended track and republish
    pub fn remove_track(&self, manager: &mut PeerConnectionManager, peer_id: &str, track_id: &str) -> bool {
        let removed = manager
            .remote_stream_mut(peer_id)
            .is_some_and(|stream| stream.remove(track_id));
        self.publish(manager);
        removed
    }

    /// Recompute the snapshot from the manager's entries
    ///
    /// Returns true if the published list changed.
    pub fn publish(&self, manager: &PeerConnectionManager) -> bool {
        let mut peers: Vec<PeerSnapshot> = manager.remote_streams().map(PeerSnapshot::of).collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));

        self.peers_tx.send_if_modified(|current| {
            if *current == peers {
                false
            } else {
                *current = peers;
                true
            }
        })
    }

    pub fn snapshot(&self) -> Vec<PeerSnapshot> {
        self.peers_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<PeerSnapshot>> {
        self.peers_tx.subscribe()
    }
}

impl Default for MediaTrackRouter {
    fn default() -> Self {
        Self::new()
    }
}
