//! Media connections backed by the `webrtc` crate

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::config::WebRtcConfig;
use super::media::{
    ConnectionFactory, ConnectionSignal, LocalTrack, MediaConnection, RemoteTrack, SignalSink,
    TrackKind,
};
use super::signaling::{ConnectionState, IceCandidate, SdpType, SessionDescription};
use crate::error::{AppError, Result};

fn codec_type(kind: TrackKind) -> RTPCodecType {
    match kind {
        TrackKind::Audio => RTPCodecType::Audio,
        TrackKind::Video => RTPCodecType::Video,
    }
}

fn track_kind(codec: RTPCodecType) -> Option<TrackKind> {
    match codec {
        RTPCodecType::Audio => Some(TrackKind::Audio),
        RTPCodecType::Video => Some(TrackKind::Video),
        _ => None,
    }
}

/// Builds one `RTCPeerConnection` per peer
pub struct RtcConnectionFactory {
    config: WebRtcConfig,
}

impl RtcConnectionFactory {
    pub fn new(config: WebRtcConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ConnectionFactory for RtcConnectionFactory {
    async fn connect(&self, peer_id: &str, signals: SignalSink) -> Result<Arc<dyn MediaConnection>> {
        let connection = RtcConnection::new(&self.config, peer_id, signals).await?;
        Ok(Arc::new(connection))
    }
}

/// Peer connection wrapper reporting through a [`SignalSink`]
pub struct RtcConnection {
    peer_id: String,
    pc: Arc<RTCPeerConnection>,
}

impl RtcConnection {
    /// Create a new peer connection
    pub async fn new(config: &WebRtcConfig, peer_id: &str, signals: SignalSink) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| AppError::WebRtcError(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: config.ice_servers(),
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to create peer connection: {}", e))
        })?;

        let connection = Self {
            peer_id: peer_id.to_string(),
            pc: Arc::new(pc),
        };
        connection.setup_event_handlers(signals);

        Ok(connection)
    }

    /// Set up peer connection event handlers
    fn setup_event_handlers(&self, signals: SignalSink) {
        // Connection state change handler
        let sink = signals.clone();
        let peer_id = self.peer_id.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let sink = sink.clone();
                let peer_id = peer_id.clone();

                Box::pin(async move {
                    let new_state = match s {
                        RTCPeerConnectionState::New => ConnectionState::New,
                        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                        RTCPeerConnectionState::Connected => ConnectionState::Connected,
                        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                        RTCPeerConnectionState::Failed => ConnectionState::Failed,
                        RTCPeerConnectionState::Closed => ConnectionState::Closed,
                        _ => return,
                    };

                    info!("Peer {} connection state: {}", peer_id, new_state);
                    sink.emit(ConnectionSignal::State(new_state));
                })
            }));

        // ICE candidate handler, trickled to the peer one by one
        let sink = signals.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let sink = sink.clone();

                Box::pin(async move {
                    let Some(c) = candidate else { return };
                    match c.to_json() {
                        Ok(init) => {
                            debug!("ICE candidate for {}: {}", sink.peer_id(), init.candidate);
                            sink.emit(ConnectionSignal::IceCandidate(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                                username_fragment: init.username_fragment,
                            }));
                        }
                        Err(e) => debug!("Unserialisable ICE candidate: {}", e),
                    }
                })
            }));

        // Inbound tracks. The read loop runs in its own task so the handler
        // returns immediately and later tracks still fire.
        let sink = signals;
        self.pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let sink = sink.clone();

            Box::pin(async move {
                let Some(kind) = track_kind(track.kind()) else {
                    return;
                };
                let remote = RemoteTrack::new(track.id(), kind, track.stream_id());
                info!(
                    "Track {} ({}) from {} started",
                    remote.id,
                    kind,
                    sink.peer_id()
                );
                sink.emit(ConnectionSignal::Track(remote.clone()));

                tokio::spawn(async move {
                    loop {
                        match track.read_rtp().await {
                            Ok((packet, _attributes)) => remote.publish(packet),
                            Err(e) => {
                                debug!("Track {} from {} ended: {}", remote.id, sink.peer_id(), e);
                                break;
                            }
                        }
                    }
                    sink.emit(ConnectionSignal::TrackEnded(remote.id.clone()));
                });
            })
        }));
    }

    fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
        let parsed = match desc.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
            SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
            SdpType::Rollback => {
                return Err(AppError::Negotiation("rollback is not supported".to_string()))
            }
        };
        parsed.map_err(|e| AppError::Negotiation(format!("Invalid SDP: {}", e)))
    }
}

#[async_trait]
impl MediaConnection for RtcConnection {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to create offer: {}", e)))?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to set local description: {}", e)))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to create answer: {}", e)))?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to set local description: {}", e)))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = Self::to_rtc(desc)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn sending_kinds(&self) -> Vec<TrackKind> {
        let mut kinds = Vec::new();
        for sender in self.pc.get_senders().await {
            if let Some(track) = sender.track().await {
                if let Some(kind) = track_kind(track.kind()) {
                    kinds.push(kind);
                }
            }
        }
        kinds
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        let rtp_track: Arc<dyn TrackLocal + Send + Sync> = track.rtp_track();
        self.pc
            .add_track(rtp_track)
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to add {} track: {}", track.kind(), e)))?;
        debug!("Added {:?} track to {}", track.source, self.peer_id);
        Ok(())
    }

    async fn replace_track(&self, track: &LocalTrack) -> Result<bool> {
        let wanted = codec_type(track.kind());
        for sender in self.pc.get_senders().await {
            let current = match sender.track().await {
                Some(current) => current,
                None => continue,
            };
            if current.kind() != wanted {
                continue;
            }
            let rtp_track: Arc<dyn TrackLocal + Send + Sync> = track.rtp_track();
            sender
                .replace_track(Some(rtp_track))
                .await
                .map_err(|e| AppError::Negotiation(format!("Failed to replace track: {}", e)))?;
            debug!("Replaced {} sender track for {}", track.kind(), self.peer_id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn add_receive_only(&self, kind: TrackKind) -> Result<()> {
        let init = RTCRtpTransceiverInit {
            direction: RTCRtpTransceiverDirection::Recvonly,
            send_encodings: vec![],
        };
        self.pc
            .add_transceiver_from_kind(codec_type(kind), Some(init))
            .await
            .map_err(|e| AppError::Negotiation(format!("Failed to add {} transceiver: {}", kind, e)))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to close peer connection: {}", e)))
    }
}
