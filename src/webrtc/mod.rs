//! WebRTC peer connections for the call mesh
//!
//! Architecture:
//! ```text
//! PeerConnectionManager
//!   └── PeerEntry (one per remote participant)
//!         ├── negotiation worker ── MediaConnection (RtcConnection)
//!         └── RemoteStream (inbound tracks)
//! ```

pub mod config;
pub mod devices;
pub mod media;
pub mod peer;
pub mod rtc;
pub mod signaling;

pub use config::{TurnServer, WebRtcConfig};
pub use devices::{MediaDevices, StaticMediaDevices};
pub use media::{
    ConnectionFactory, ConnectionSignal, LocalStream, LocalTrack, MediaConnection, PeerSignal,
    RemoteTrack, SignalSink, TrackKind, TrackSource,
};
pub use peer::{
    NegotiationOutcome, NegotiationReport, NegotiationState, PeerConnectionManager, PeerEvent,
};
pub use rtc::RtcConnectionFactory;
pub use signaling::{ConnectionState, IceCandidate, SdpType, SessionDescription};
