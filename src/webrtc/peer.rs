//! WebRTC peer connection management
//!
//! One [`PeerEntry`] per remote participant. Each entry owns a negotiation
//! worker task that creates the media connection and then executes the
//! entry's commands strictly in the order they were queued, so offer, answer
//! and ICE for one peer are never reordered. Work for different peers runs
//! independently.
//!
//! Everything the worker produces (negotiation reports and connection
//! signals) carries the `(peer, generation)` key of the entry that spawned
//! it. After a teardown the generation no longer matches and late results are
//! discarded.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::media::{
    ConnectionFactory, LocalTrack, MediaConnection, PeerSignal, SignalSink, TrackKind,
};
use super::signaling::{IceCandidate, SdpType, SessionDescription};
use crate::call::router::RemoteStream;
use crate::error::{AppError, ErrorKind, Result};

/// Per-peer negotiation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegotiationState {
    New,
    OfferSent,
    OfferReceived,
    Stable,
    Failed,
}

/// Observations that move the negotiation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationInput {
    /// Local offer created and handed to the relay
    OfferCreated,
    /// Remote offer applied and answer handed to the relay
    AnswerSent,
    /// Remote answer applied
    RemoteAnswerApplied,
    /// Transport reported `connected`
    TransportConnected,
    /// Transport reported `failed`, `closed` or `disconnected`
    TransportLost,
}

impl NegotiationState {
    pub fn transition(self, input: NegotiationInput) -> NegotiationState {
        use NegotiationInput::*;
        use NegotiationState::*;

        match (self, input) {
            (Failed, _) => Failed,
            (_, TransportLost) => Failed,
            (_, OfferCreated) => OfferSent,
            (Stable, AnswerSent) => Stable,
            (_, AnswerSent) => OfferReceived,
            (OfferSent, RemoteAnswerApplied) => Stable,
            (New | OfferReceived, TransportConnected) => Stable,
            (state, _) => state,
        }
    }
}

impl std::fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NegotiationState::New => write!(f, "new"),
            NegotiationState::OfferSent => write!(f, "offer-sent"),
            NegotiationState::OfferReceived => write!(f, "offer-received"),
            NegotiationState::Stable => write!(f, "stable"),
            NegotiationState::Failed => write!(f, "failed"),
        }
    }
}

/// Work queued for one peer's negotiation worker
#[derive(Debug)]
pub enum PeerCommand {
    /// Attach the outgoing tracks (receive-only for missing kinds) and offer
    MakeOffer { outgoing: Vec<LocalTrack> },
    /// Offer again with the current senders
    Renegotiate,
    /// Apply a remote offer, attach the outgoing tracks and answer
    ApplyOffer {
        sdp: SessionDescription,
        outgoing: Vec<LocalTrack>,
    },
    ApplyAnswer { sdp: SessionDescription },
    AddIce { candidate: IceCandidate },
    /// Send outgoing tracks for kinds without a live sender
    AttachTracks { outgoing: Vec<LocalTrack> },
    /// Replace the outgoing video in place, or add it when nothing is sent
    SetOutgoingVideo { track: LocalTrack },
}

/// Negotiation step, for failure reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStep {
    /// Creating the media connection itself
    Connect,
    Offer,
    Answer,
    ApplyAnswer,
    AttachTracks,
    ReplaceTrack,
}

impl std::fmt::Display for NegotiationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NegotiationStep::Connect => write!(f, "connect"),
            NegotiationStep::Offer => write!(f, "offer"),
            NegotiationStep::Answer => write!(f, "answer"),
            NegotiationStep::ApplyAnswer => write!(f, "apply_answer"),
            NegotiationStep::AttachTracks => write!(f, "attach_tracks"),
            NegotiationStep::ReplaceTrack => write!(f, "replace_track"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum NegotiationOutcome {
    /// Offer or answer created and installed locally, ready to send
    LocalDescription(SessionDescription),
    RemoteAnswerApplied,
    Failed {
        step: NegotiationStep,
        kind: ErrorKind,
        error: String,
    },
}

/// Completion reported by a negotiation worker
#[derive(Debug, Clone)]
pub struct NegotiationReport {
    pub peer_id: String,
    pub generation: u64,
    pub outcome: NegotiationOutcome,
}

/// Everything flowing back from per-peer tasks
#[derive(Debug, Clone)]
pub enum PeerEvent {
    Signal(PeerSignal),
    Report(NegotiationReport),
}

/// Command side of a peer's worker
#[derive(Debug, Clone)]
pub struct PeerHandle {
    pub peer_id: String,
    pub generation: u64,
    commands: mpsc::UnboundedSender<PeerCommand>,
}

impl PeerHandle {
    pub fn send(&self, command: PeerCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| {
            AppError::Negotiation(format!("negotiation worker for {} has stopped", self.peer_id))
        })
    }
}

/// Live state for one remote participant
pub struct PeerEntry {
    pub handle: PeerHandle,
    pub remote_stream: RemoteStream,
    pub state: NegotiationState,
    cancel: CancellationToken,
}

/// Owns all peer entries
pub struct PeerConnectionManager {
    self_id: String,
    factory: Arc<dyn ConnectionFactory>,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    peers: HashMap<String, PeerEntry>,
    next_generation: u64,
}

impl PeerConnectionManager {
    /// Create a manager; worker events are delivered on `events_tx`
    pub fn new(
        self_id: impl Into<String>,
        factory: Arc<dyn ConnectionFactory>,
        events_tx: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        Self {
            self_id: self_id.into(),
            factory,
            events_tx,
            peers: HashMap::new(),
            next_generation: 1,
        }
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// Return the peer's entry, creating it (and its worker) if needed
    pub fn ensure(&mut self, peer_id: &str) -> Result<&PeerHandle> {
        if peer_id.is_empty() || peer_id == self.self_id {
            return Err(AppError::SelfConnection(peer_id.to_string()));
        }

        if !self.peers.contains_key(peer_id) {
            let generation = self.next_generation;
            self.next_generation += 1;

            let (commands_tx, commands_rx) = mpsc::unbounded_channel();
            let cancel = CancellationToken::new();
            let worker = NegotiationWorker {
                peer_id: peer_id.to_string(),
                generation,
                factory: self.factory.clone(),
                events: self.events_tx.clone(),
                commands: commands_rx,
                cancel: cancel.clone(),
                receive_only: Vec::new(),
                senders: HashMap::new(),
            };
            tokio::spawn(worker.run());

            info!("Creating peer entry for {} (generation {})", peer_id, generation);
            self.peers.insert(
                peer_id.to_string(),
                PeerEntry {
                    handle: PeerHandle {
                        peer_id: peer_id.to_string(),
                        generation,
                        commands: commands_tx,
                    },
                    remote_stream: RemoteStream::new(peer_id),
                    state: NegotiationState::New,
                    cancel,
                },
            );
        }

        self.peers
            .get(peer_id)
            .map(|entry| &entry.handle)
            .ok_or_else(|| AppError::Negotiation(format!("peer entry for {} missing", peer_id)))
    }

    fn command(&mut self, peer_id: &str, command: PeerCommand) -> Result<()> {
        self.ensure(peer_id)?.send(command)
    }

    /// Start an offer to `peer_id`
    pub fn make_offer(&mut self, peer_id: &str, outgoing: Vec<LocalTrack>) -> Result<()> {
        self.command(peer_id, PeerCommand::MakeOffer { outgoing })
    }

    /// Apply a remote offer and answer it
    ///
    /// With no outgoing tracks the answer is receive-only.
    pub fn handle_offer(
        &mut self,
        from: &str,
        sdp: SessionDescription,
        outgoing: Vec<LocalTrack>,
    ) -> Result<()> {
        if outgoing.is_empty() {
            debug!("Answering {} without local media", from);
        }
        self.command(from, PeerCommand::ApplyOffer { sdp, outgoing })
    }

    /// Apply a remote answer; ignored when there is no entry for `from`
    pub fn handle_answer(&mut self, from: &str, sdp: SessionDescription) -> Result<()> {
        match self.peers.get(from) {
            Some(entry) => entry.handle.send(PeerCommand::ApplyAnswer { sdp }),
            None => {
                info!("Answer from {} without a peer entry, ignoring", from);
                Ok(())
            }
        }
    }

    /// Queue a remote ICE candidate, creating the entry if absent
    pub fn handle_ice(&mut self, from: &str, candidate: IceCandidate) -> Result<()> {
        self.command(from, PeerCommand::AddIce { candidate })
    }

    /// Offer again to every peer
    pub fn renegotiate_all(&self) {
        self.broadcast(|| PeerCommand::Renegotiate);
    }

    /// Attach outgoing tracks on every connection
    pub fn attach_tracks_all(&self, outgoing: &[LocalTrack]) {
        self.broadcast(|| PeerCommand::AttachTracks {
            outgoing: outgoing.to_vec(),
        });
    }

    /// Switch the outgoing video on every connection
    pub fn set_outgoing_video_all(&self, track: &LocalTrack) {
        self.broadcast(|| PeerCommand::SetOutgoingVideo {
            track: track.clone(),
        });
    }

    fn broadcast<F>(&self, command: F)
    where
        F: Fn() -> PeerCommand,
    {
        for entry in self.peers.values() {
            if let Err(e) = entry.handle.send(command()) {
                warn!("{}", e);
            }
        }
    }

    /// Close and forget one peer. Returns whether an entry existed.
    pub fn teardown(&mut self, peer_id: &str) -> bool {
        match self.peers.remove(peer_id) {
            Some(entry) => {
                entry.cancel.cancel();
                info!(
                    "Tearing down peer {} (generation {}, state {})",
                    peer_id, entry.handle.generation, entry.state
                );
                true
            }
            None => false,
        }
    }

    /// Close and forget every peer
    pub fn teardown_all(&mut self) -> usize {
        let count = self.peers.len();
        for (_, entry) in self.peers.drain() {
            entry.cancel.cancel();
        }
        if count > 0 {
            info!("Tore down {} peer connections", count);
        }
        count
    }

    /// Whether `(peer_id, generation)` is the live entry
    pub fn is_current(&self, peer_id: &str, generation: u64) -> bool {
        self.peers
            .get(peer_id)
            .is_some_and(|entry| entry.handle.generation == generation)
    }

    /// Feed an observation into the peer's state machine
    pub fn observe(&mut self, peer_id: &str, input: NegotiationInput) -> Option<NegotiationState> {
        let entry = self.peers.get_mut(peer_id)?;
        let next = entry.state.transition(input);
        if next != entry.state {
            debug!("Peer {} negotiation: {} -> {}", peer_id, entry.state, next);
            entry.state = next;
        }
        Some(next)
    }

    /// Validate a worker report and apply its state transition
    ///
    /// Returns `None` for reports from torn-down entries.
    pub fn accept_report(&mut self, report: NegotiationReport) -> Option<NegotiationReport> {
        if !self.is_current(&report.peer_id, report.generation) {
            debug!(
                "Discarding stale report for {} (generation {})",
                report.peer_id, report.generation
            );
            return None;
        }

        let input = match &report.outcome {
            NegotiationOutcome::LocalDescription(desc) => match desc.sdp_type {
                SdpType::Offer => Some(NegotiationInput::OfferCreated),
                SdpType::Answer => Some(NegotiationInput::AnswerSent),
                _ => None,
            },
            NegotiationOutcome::RemoteAnswerApplied => Some(NegotiationInput::RemoteAnswerApplied),
            NegotiationOutcome::Failed { .. } => None,
        };
        if let Some(input) = input {
            self.observe(&report.peer_id, input);
        }
        Some(report)
    }

    /// Validate a connection signal; `None` when it is stale
    pub fn accept_signal(&self, signal: PeerSignal) -> Option<PeerSignal> {
        if self.is_current(&signal.peer_id, signal.generation) {
            Some(signal)
        } else {
            debug!(
                "Discarding stale signal for {} (generation {})",
                signal.peer_id, signal.generation
            );
            None
        }
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn state(&self, peer_id: &str) -> Option<NegotiationState> {
        self.peers.get(peer_id).map(|entry| entry.state)
    }

    /// Negotiation state of every live entry
    pub fn states(&self) -> BTreeMap<String, NegotiationState> {
        self.peers
            .iter()
            .map(|(peer_id, entry)| (peer_id.clone(), entry.state))
            .collect()
    }

    pub fn generation(&self, peer_id: &str) -> Option<u64> {
        self.peers.get(peer_id).map(|entry| entry.handle.generation)
    }

    pub fn remote_stream(&self, peer_id: &str) -> Option<&RemoteStream> {
        self.peers.get(peer_id).map(|entry| &entry.remote_stream)
    }

    pub fn remote_stream_mut(&mut self, peer_id: &str) -> Option<&mut RemoteStream> {
        self.peers.get_mut(peer_id).map(|entry| &mut entry.remote_stream)
    }

    /// All remote streams, in no particular order
    pub fn remote_streams(&self) -> impl Iterator<Item = &RemoteStream> {
        self.peers.values().map(|entry| &entry.remote_stream)
    }

    pub fn peer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl Drop for PeerConnectionManager {
    fn drop(&mut self) {
        for entry in self.peers.values() {
            entry.cancel.cancel();
        }
    }
}

/// Executes one peer's commands in order
struct NegotiationWorker {
    peer_id: String,
    generation: u64,
    factory: Arc<dyn ConnectionFactory>,
    events: mpsc::UnboundedSender<PeerEvent>,
    commands: mpsc::UnboundedReceiver<PeerCommand>,
    cancel: CancellationToken,
    /// Kinds already requested as receive-only
    receive_only: Vec<TrackKind>,
    /// Track last put on the sender of each kind
    senders: HashMap<TrackKind, LocalTrack>,
}

impl NegotiationWorker {
    async fn run(mut self) {
        let cancel = self.cancel.clone();
        let sink = SignalSink::new(self.peer_id.clone(), self.generation, self.events.clone());

        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = self.factory.connect(&self.peer_id, sink) => result,
        };
        let connection = match connected {
            Ok(connection) => connection,
            Err(e) => {
                let fatal = AppError::ConnectionFatal {
                    peer: self.peer_id.clone(),
                    state: format!("could not connect ({})", e),
                };
                self.fail(NegotiationStep::Connect, fatal);
                return;
            }
        };

        loop {
            let command = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.execute(connection.as_ref(), command) => {}
            }
        }

        if let Err(e) = connection.close().await {
            debug!("Closing connection to {} failed: {}", self.peer_id, e);
        }
        debug!(
            "Negotiation worker for {} (generation {}) stopped",
            self.peer_id, self.generation
        );
    }

    async fn execute(&mut self, conn: &dyn MediaConnection, command: PeerCommand) {
        match command {
            PeerCommand::MakeOffer { outgoing } => {
                if let Err(e) = self.prepare_offer(conn, &outgoing).await {
                    self.fail(NegotiationStep::Offer, e);
                    return;
                }
                self.offer(conn).await;
            }
            PeerCommand::Renegotiate => self.offer(conn).await,
            PeerCommand::ApplyOffer { sdp, outgoing } => {
                let answer: Result<SessionDescription> = async {
                    conn.set_remote_description(sdp).await?;
                    self.attach(conn, &outgoing).await?;
                    conn.create_answer().await
                }
                .await;
                match answer {
                    Ok(answer) => {
                        debug!("Answer ready for {}", self.peer_id);
                        self.report(NegotiationOutcome::LocalDescription(answer));
                    }
                    Err(e) => self.fail(NegotiationStep::Answer, e),
                }
            }
            PeerCommand::ApplyAnswer { sdp } => match conn.set_remote_description(sdp).await {
                Ok(()) => self.report(NegotiationOutcome::RemoteAnswerApplied),
                Err(e) => self.fail(NegotiationStep::ApplyAnswer, e),
            },
            PeerCommand::AddIce { candidate } => {
                if let Err(e) = conn.add_ice_candidate(candidate).await {
                    debug!("Ignoring ICE candidate from {}: {}", self.peer_id, e);
                }
            }
            PeerCommand::AttachTracks { outgoing } => {
                if let Err(e) = self.attach(conn, &outgoing).await {
                    self.fail(NegotiationStep::AttachTracks, e);
                }
            }
            PeerCommand::SetOutgoingVideo { track } => match self.put_track(conn, &track).await {
                Ok(()) => debug!("Outgoing video for {} is now {:?}", self.peer_id, track.source),
                Err(e) => self.fail(NegotiationStep::ReplaceTrack, e),
            },
        }
    }

    /// Attach tracks, and ask for audio and video even when not sending them
    async fn prepare_offer(&mut self, conn: &dyn MediaConnection, outgoing: &[LocalTrack]) -> Result<()> {
        self.attach(conn, outgoing).await?;

        let sending = conn.sending_kinds().await;
        for kind in [TrackKind::Audio, TrackKind::Video] {
            if !sending.contains(&kind) && !self.receive_only.contains(&kind) {
                conn.add_receive_only(kind).await?;
                self.receive_only.push(kind);
            }
        }
        Ok(())
    }

    async fn offer(&mut self, conn: &dyn MediaConnection) {
        match conn.create_offer().await {
            Ok(offer) => {
                debug!("Offer ready for {}", self.peer_id);
                self.report(NegotiationOutcome::LocalDescription(offer));
            }
            Err(e) => self.fail(NegotiationStep::Offer, e),
        }
    }

    /// Send live outgoing tracks for kinds that have no live sender
    ///
    /// A sender whose track was stopped gets the new track in place.
    async fn attach(&mut self, conn: &dyn MediaConnection, outgoing: &[LocalTrack]) -> Result<()> {
        for track in outgoing {
            if track.is_ended() {
                continue;
            }
            match self.senders.get(&track.kind()).map(LocalTrack::is_ended) {
                Some(false) => continue,
                Some(true) => self.put_track(conn, track).await?,
                None => {
                    conn.add_track(track).await?;
                    self.senders.insert(track.kind(), track.clone());
                }
            }
        }
        Ok(())
    }

    /// Replace the sender's track of the same kind, or add one
    async fn put_track(&mut self, conn: &dyn MediaConnection, track: &LocalTrack) -> Result<()> {
        if !conn.replace_track(track).await? {
            conn.add_track(track).await?;
        }
        self.senders.insert(track.kind(), track.clone());
        Ok(())
    }

    fn fail(&self, step: NegotiationStep, error: AppError) {
        warn!("Negotiation step {} with {} failed: {}", step, self.peer_id, error);
        self.report(NegotiationOutcome::Failed {
            step,
            kind: error.kind(),
            error: error.to_string(),
        });
    }

    fn report(&self, outcome: NegotiationOutcome) {
        let _ = self.events.send(PeerEvent::Report(NegotiationReport {
            peer_id: self.peer_id.clone(),
            generation: self.generation,
            outcome,
        }));
    }
}
