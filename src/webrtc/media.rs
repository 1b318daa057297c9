//! Media tracks and the media-connection boundary
//!
//! [`MediaConnection`] is the seam between negotiation logic and the real-time
//! media stack. The production implementation lives in [`super::rtc`]; the
//! negotiation code only ever talks to the trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use super::peer::PeerEvent;
use super::signaling::{ConnectionState, IceCandidate, SessionDescription};
use crate::error::Result;

/// Buffered RTP packets per remote track subscriber
const REMOTE_TRACK_CAPACITY: usize = 64;

/// Media kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Capture source of a local track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackSource {
    Camera,
    Microphone,
    Screen,
}

impl TrackSource {
    pub fn kind(self) -> TrackKind {
        match self {
            TrackSource::Microphone => TrackKind::Audio,
            TrackSource::Camera | TrackSource::Screen => TrackKind::Video,
        }
    }

    fn capability(self) -> RTCRtpCodecCapability {
        match self.kind() {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                rtcp_feedback: vec![],
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: "video/VP8".to_string(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
        }
    }
}

/// A locally captured track
///
/// Clones share the underlying RTP track and the ended signal.
#[derive(Clone)]
pub struct LocalTrack {
    pub id: String,
    pub source: TrackSource,
    pub stream_id: String,
    sample: Arc<TrackLocalStaticSample>,
    ended: CancellationToken,
}

impl LocalTrack {
    pub fn new(source: TrackSource, stream_id: impl Into<String>) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let stream_id = stream_id.into();
        let sample = Arc::new(TrackLocalStaticSample::new(
            source.capability(),
            id.clone(),
            stream_id.clone(),
        ));

        Self {
            id,
            source,
            stream_id,
            sample,
            ended: CancellationToken::new(),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.source.kind()
    }

    /// RTP track handed to peer connections; capture writes samples into it
    pub fn rtp_track(&self) -> Arc<TrackLocalStaticSample> {
        self.sample.clone()
    }

    /// Stop capturing. Idempotent.
    pub fn stop(&self) {
        self.ended.cancel();
    }

    pub fn is_ended(&self) -> bool {
        self.ended.is_cancelled()
    }

    /// Fires when the track is stopped, locally or by the capture device
    pub fn ended(&self) -> CancellationToken {
        self.ended.clone()
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("ended", &self.is_ended())
            .finish()
    }
}

/// A set of local tracks acquired together
#[derive(Debug, Clone, Default)]
pub struct LocalStream {
    pub id: String,
    pub tracks: Vec<LocalTrack>,
}

impl LocalStream {
    pub fn new(tracks: Vec<LocalTrack>) -> Self {
        let id = tracks
            .first()
            .map(|t| t.stream_id.clone())
            .unwrap_or_default();
        Self { id, tracks }
    }

    pub fn video_track(&self) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }

    pub fn audio_track(&self) -> Option<&LocalTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Audio)
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// A track received from a peer
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
    pub stream_id: String,
    packets: broadcast::Sender<Arc<Packet>>,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind, stream_id: impl Into<String>) -> Self {
        let (packets, _) = broadcast::channel(REMOTE_TRACK_CAPACITY);
        Self {
            id: id.into(),
            kind,
            stream_id: stream_id.into(),
            packets,
        }
    }

    /// Receive RTP packets of this track
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Packet>> {
        self.packets.subscribe()
    }

    pub(crate) fn publish(&self, packet: Packet) {
        let _ = self.packets.send(Arc::new(packet));
    }
}

impl std::fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("stream_id", &self.stream_id)
            .finish()
    }
}

/// Something the connection reported on its own
#[derive(Debug, Clone)]
pub enum ConnectionSignal {
    /// Locally gathered ICE candidate to trickle to the peer
    IceCandidate(IceCandidate),
    /// Inbound track started
    Track(RemoteTrack),
    /// Inbound track ended
    TrackEnded(String),
    /// Transport state change
    State(ConnectionState),
}

/// Connection signal tagged with the entry it belongs to
#[derive(Debug, Clone)]
pub struct PeerSignal {
    pub peer_id: String,
    pub generation: u64,
    pub signal: ConnectionSignal,
}

/// Where a connection reports its signals
#[derive(Clone)]
pub struct SignalSink {
    peer_id: String,
    generation: u64,
    tx: mpsc::UnboundedSender<PeerEvent>,
}

impl SignalSink {
    pub fn new(peer_id: impl Into<String>, generation: u64, tx: mpsc::UnboundedSender<PeerEvent>) -> Self {
        Self {
            peer_id: peer_id.into(),
            generation,
            tx,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn emit(&self, signal: ConnectionSignal) {
        let _ = self.tx.send(PeerEvent::Signal(PeerSignal {
            peer_id: self.peer_id.clone(),
            generation: self.generation,
            signal,
        }));
    }
}

/// One peer's media connection
///
/// `create_offer` and `create_answer` also install the result as the local
/// description.
#[async_trait]
pub trait MediaConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Kinds that currently have a sender with a track
    async fn sending_kinds(&self) -> Vec<TrackKind>;

    async fn add_track(&self, track: &LocalTrack) -> Result<()>;

    /// Swap the track on the existing sender of the same kind
    ///
    /// Returns `false` when there is no such sender.
    async fn replace_track(&self, track: &LocalTrack) -> Result<bool>;

    /// Request media of `kind` without sending any
    async fn add_receive_only(&self, kind: TrackKind) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Creates media connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    async fn connect(&self, peer_id: &str, signals: SignalSink) -> Result<Arc<dyn MediaConnection>>;
}
