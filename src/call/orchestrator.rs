//! Call orchestrator
//!
//! A single task owns every piece of call state: the joined room, the
//! session, the offer guard, the peer manager, the track router and the
//! capture streams. Inputs are multiplexed with `tokio::select!` and each is
//! handled by a synchronous transition function that runs to completion
//! before the next input is looked at:
//!
//! - inbound relay frames
//! - [`CallCommand`]s from [`CallHandle`]s
//! - negotiation reports and connection signals from peer workers
//! - internal completions (media acquisition, screen capture ended)
//! - relay channel state changes
//!
//! Anything slow (device access, SDP work) runs in a spawned task and comes
//! back as an input tagged with the epoch or generation it was started for.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use super::arbitration::{plan_offers, OfferGuard};
use super::router::{MediaTrackRouter, PeerSnapshot};
use super::session::{CallSession, SessionState, SessionTransition};
use super::share::{ScreenShareController, ShareStop};
use super::stage::{select_stage, Stage};
use crate::channel::{ChannelState, EnvelopeSink};
use crate::error::{AppError, ErrorKind, Result};
use crate::events::{CallEvent, EventBus};
use crate::signaling::{admit, Envelope, PresenceStatus, Signal};
use crate::webrtc::devices::MediaDevices;
use crate::webrtc::media::{ConnectionFactory, ConnectionSignal, LocalStream, LocalTrack};
use crate::webrtc::peer::{
    NegotiationInput, NegotiationOutcome, NegotiationReport, NegotiationState, NegotiationStep,
    PeerConnectionManager, PeerEvent,
};
use crate::webrtc::signaling::{ConnectionState, SdpType};

/// User actions
#[derive(Debug)]
pub enum CallCommand {
    JoinRoom(i64),
    LeaveRoom,
    SetPresence(PresenceStatus),
    StartCall,
    JoinCall,
    LeaveCall,
    EndCall,
    SyncCall,
    /// Acquire camera and microphone mid-call
    EnableMedia(oneshot::Sender<Result<()>>),
    DisableMedia,
    StartScreenShare(oneshot::Sender<Result<()>>),
    StopScreenShare,
    Shutdown,
}

/// Read-only view for the presentation layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallView {
    pub room_id: Option<i64>,
    pub session: CallSession,
    pub peers: Vec<PeerSnapshot>,
    /// Negotiation state of every peer entry
    pub negotiation: BTreeMap<String, NegotiationState>,
    pub stage: Option<Stage>,
    /// The local side is sharing its screen
    pub sharing: bool,
    /// Camera or microphone tracks are held
    pub local_media: bool,
}

/// Cloneable front end of a running orchestrator
#[derive(Clone)]
pub struct CallHandle {
    commands: mpsc::UnboundedSender<CallCommand>,
    view: watch::Receiver<CallView>,
}

impl CallHandle {
    fn send(&self, command: CallCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| AppError::ChannelClosed)
    }

    pub fn join_room(&self, room_id: i64) -> Result<()> {
        if room_id <= 0 {
            return Err(AppError::NoRoom);
        }
        self.send(CallCommand::JoinRoom(room_id))
    }

    pub fn leave_room(&self) -> Result<()> {
        self.send(CallCommand::LeaveRoom)
    }

    pub fn set_presence(&self, status: PresenceStatus) -> Result<()> {
        self.send(CallCommand::SetPresence(status))
    }

    pub fn start_call(&self) -> Result<()> {
        self.send(CallCommand::StartCall)
    }

    /// Join the room's call; goes ahead view-only if media is unavailable
    pub fn join_call(&self) -> Result<()> {
        self.send(CallCommand::JoinCall)
    }

    pub fn leave_call(&self) -> Result<()> {
        self.send(CallCommand::LeaveCall)
    }

    pub fn end_call(&self) -> Result<()> {
        self.send(CallCommand::EndCall)
    }

    pub fn sync_call(&self) -> Result<()> {
        self.send(CallCommand::SyncCall)
    }

    /// Acquire camera and microphone and send them to every peer
    pub async fn enable_media(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(CallCommand::EnableMedia(tx))?;
        rx.await.map_err(|_| AppError::Cancelled)?
    }

    pub fn disable_media(&self) -> Result<()> {
        self.send(CallCommand::DisableMedia)
    }

    pub async fn start_screen_share(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(CallCommand::StartScreenShare(tx))?;
        rx.await.map_err(|_| AppError::Cancelled)?
    }

    pub fn stop_screen_share(&self) -> Result<()> {
        self.send(CallCommand::StopScreenShare)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(CallCommand::Shutdown)
    }

    /// Latest view
    pub fn view(&self) -> CallView {
        self.view.borrow().clone()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<CallView> {
        self.view.clone()
    }
}

/// Completions of work spawned by the orchestrator
enum Internal {
    UserMedia {
        epoch: u64,
        result: Result<LocalStream>,
        reply: Option<oneshot::Sender<Result<()>>>,
        then_join: bool,
    },
    DisplayMedia {
        epoch: u64,
        result: Result<LocalStream>,
        reply: oneshot::Sender<Result<()>>,
    },
    ScreenEnded {
        track_id: String,
    },
}

pub struct CallOrchestrator {
    self_id: String,
    sink: Arc<dyn EnvelopeSink>,
    devices: Arc<dyn MediaDevices>,
    events: Arc<EventBus>,

    room: Option<i64>,
    session: SessionState,
    guard: OfferGuard,
    manager: PeerConnectionManager,
    router: MediaTrackRouter,
    share: ScreenShareController,
    /// Bumped by local cleanup; acquisitions started before are discarded
    media_epoch: u64,
    was_open: bool,

    commands_rx: mpsc::UnboundedReceiver<CallCommand>,
    peer_rx: mpsc::UnboundedReceiver<PeerEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    view_tx: watch::Sender<CallView>,
}

impl CallOrchestrator {
    pub fn new(
        self_id: impl Into<String>,
        sink: Arc<dyn EnvelopeSink>,
        factory: Arc<dyn ConnectionFactory>,
        devices: Arc<dyn MediaDevices>,
        events: Arc<EventBus>,
    ) -> (Self, CallHandle) {
        let self_id = self_id.into();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(CallView::default());

        let orchestrator = Self {
            manager: PeerConnectionManager::new(self_id.clone(), factory, peer_tx),
            self_id,
            sink,
            devices,
            events,
            room: None,
            session: SessionState::new(),
            guard: OfferGuard::new(),
            router: MediaTrackRouter::new(),
            share: ScreenShareController::new(),
            media_epoch: 0,
            was_open: false,
            commands_rx,
            peer_rx,
            internal_tx,
            internal_rx,
            view_tx,
        };
        let handle = CallHandle {
            commands: commands_tx,
            view: view_rx,
        };
        (orchestrator, handle)
    }

    /// Process inputs until shutdown or until every handle is dropped
    pub async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<Arc<str>>,
        mut channel_state: watch::Receiver<ChannelState>,
    ) {
        info!("Call orchestrator started for {}", self.self_id);
        let initial = *channel_state.borrow_and_update();
        self.on_channel_state(initial);

        let mut inbound_open = true;
        let mut state_open = true;

        loop {
            tokio::select! {
                command = self.commands_rx.recv() => match command {
                    Some(CallCommand::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
                frame = inbound.recv(), if inbound_open => match frame {
                    Some(frame) => self.on_frame(&frame),
                    None => {
                        debug!("Relay subscription ended");
                        inbound_open = false;
                    }
                },
                Some(event) = self.peer_rx.recv() => self.on_peer_event(event),
                Some(internal) = self.internal_rx.recv() => self.on_internal(internal),
                changed = channel_state.changed(), if state_open => match changed {
                    Ok(()) => {
                        let state = *channel_state.borrow_and_update();
                        self.on_channel_state(state);
                    }
                    Err(_) => state_open = false,
                },
            }
            self.refresh();
        }

        self.cleanup_local();
        self.refresh();
        info!("Call orchestrator stopped");
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    fn send(&self, signal: Signal) -> bool {
        match self.room {
            Some(room) => {
                let envelope = Envelope::room(room, signal).with_from(self.self_id.as_str());
                self.sink.send_envelope(&envelope);
                true
            }
            None => {
                warn!("Not sending {}: no room joined", signal.kind());
                false
            }
        }
    }

    fn send_to(&self, peer_id: &str, signal: Signal) {
        match self.room {
            Some(room) => {
                let envelope =
                    Envelope::to_peer(room, peer_id, signal).with_from(self.self_id.as_str());
                self.sink.send_envelope(&envelope);
            }
            None => debug!("Dropping {} for {}: no room joined", signal.kind(), peer_id),
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    fn on_command(&mut self, command: CallCommand) {
        match command {
            CallCommand::JoinRoom(room_id) => self.join_room(room_id),
            CallCommand::LeaveRoom => self.leave_room(),
            CallCommand::SetPresence(status) => {
                self.send(Signal::Presence { status });
            }
            CallCommand::StartCall => {
                if self.send(Signal::CallStart) {
                    info!("Starting call in room {:?}", self.room);
                }
            }
            CallCommand::JoinCall => {
                if self.share.has_local_media() {
                    self.send_join();
                } else {
                    self.acquire_user_media(None, true);
                }
            }
            CallCommand::LeaveCall => {
                if !self.send(Signal::CallLeave) {
                    warn!("Leaving call without a room, cleaning up locally");
                }
                self.cleanup_local();
            }
            CallCommand::EndCall => {
                if !self.send(Signal::CallEnd) {
                    warn!("Ending call without a room, cleaning up locally");
                }
                self.cleanup_local();
            }
            CallCommand::SyncCall => {
                self.send(Signal::CallSync);
            }
            CallCommand::EnableMedia(reply) => {
                if self.share.has_local_media() {
                    let _ = reply.send(Ok(()));
                } else {
                    self.acquire_user_media(Some(reply), false);
                }
            }
            CallCommand::DisableMedia => {
                if self.share.stop_camera() {
                    info!("Local camera and microphone stopped");
                }
            }
            CallCommand::StartScreenShare(reply) => self.start_screen_share(reply),
            CallCommand::StopScreenShare => self.stop_screen_share(),
            // Handled by the run loop
            CallCommand::Shutdown => {}
        }
    }

    fn join_room(&mut self, room_id: i64) {
        if room_id <= 0 {
            warn!("Ignoring join for invalid room {}", room_id);
            return;
        }
        if let Some(previous) = self.room.filter(|r| *r != room_id) {
            info!("Switching from room {} to room {}", previous, room_id);
            self.cleanup_local();
        }

        self.room = Some(room_id);
        self.session.reset(room_id);
        self.send(Signal::JoinRoom);
        self.send(Signal::Presence {
            status: PresenceStatus::Active,
        });
        self.send(Signal::CallSync);
        info!("Joined room {}", room_id);
    }

    fn leave_room(&mut self) {
        if self.send(Signal::LeaveRoom) {
            info!("Left room {:?}", self.room);
        }
        self.cleanup_local();
        self.room = None;
        self.session.reset(0);
    }

    fn send_join(&self) {
        if self.send(Signal::CallJoin) {
            self.send(Signal::CallSync);
        }
    }

    fn acquire_user_media(&self, reply: Option<oneshot::Sender<Result<()>>>, then_join: bool) {
        let devices = self.devices.clone();
        let tx = self.internal_tx.clone();
        let epoch = self.media_epoch;
        tokio::spawn(async move {
            let result = devices.user_media().await;
            let _ = tx.send(Internal::UserMedia {
                epoch,
                result,
                reply,
                then_join,
            });
        });
    }

    fn start_screen_share(&mut self, reply: oneshot::Sender<Result<()>>) {
        if self.room.is_none() {
            let _ = reply.send(Err(AppError::NoRoom));
            return;
        }
        if self.share.is_sharing() {
            let _ = reply.send(Ok(()));
            return;
        }

        let devices = self.devices.clone();
        let tx = self.internal_tx.clone();
        let epoch = self.media_epoch;
        tokio::spawn(async move {
            let result = devices.display_media().await;
            let _ = tx.send(Internal::DisplayMedia {
                epoch,
                result,
                reply,
            });
        });
    }

    fn stop_screen_share(&mut self) {
        match self.share.end(&self.manager) {
            ShareStop::NotSharing => debug!("Stop requested but no screen share is active"),
            ShareStop::Reverted | ShareStop::ViewOnly => {
                self.send(Signal::CallShareStop);
                self.events
                    .publish(CallEvent::CallShareChanged { sharing: false });
            }
        }
    }

    /// Leave/end/switch cleanup: drop every peer, forget outstanding offers,
    /// stop capture and invalidate pending acquisitions
    fn cleanup_local(&mut self) {
        self.media_epoch += 1;
        self.teardown_call();
    }

    fn teardown_call(&mut self) {
        self.guard.clear();
        self.manager.teardown_all();
        if self.share.is_sharing() {
            self.events
                .publish(CallEvent::CallShareChanged { sharing: false });
        }
        self.share.stop_all();
    }

    // ------------------------------------------------------------------
    // Inbound envelopes
    // ------------------------------------------------------------------

    fn on_frame(&mut self, frame: &str) {
        let envelope = match Envelope::decode(frame) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                trace!("Ignoring envelope of unknown kind");
                return;
            }
            Err(e) => {
                debug!("Dropping malformed envelope: {}", e);
                return;
            }
        };

        if let Err(reason) = admit(&envelope, &self.self_id, self.room) {
            trace!("Dropping {}: {}", envelope.signal.kind(), reason);
            return;
        }

        let Envelope { from, signal, .. } = envelope;
        match signal {
            Signal::CallState { call } => self.on_call_state(call),
            Signal::Offer { sdp } => {
                let Some(from) = from else { return };
                info!("Offer from {}", from);
                let outgoing = self.share.outgoing();
                if let Err(e) = self.manager.handle_offer(&from, sdp, outgoing) {
                    warn!("Cannot handle offer from {}: {}", from, e);
                }
            }
            Signal::Answer { sdp } => {
                let Some(from) = from else { return };
                debug!("Answer from {}", from);
                if let Err(e) = self.manager.handle_answer(&from, sdp) {
                    warn!("Cannot handle answer from {}: {}", from, e);
                }
            }
            Signal::Ice { ice } => {
                let Some(from) = from else { return };
                if let Err(e) = self.manager.handle_ice(&from, ice) {
                    warn!("Cannot handle ICE from {}: {}", from, e);
                }
            }
            other => trace!("Ignoring {} from relay", other.kind()),
        }
    }

    fn on_call_state(&mut self, call: Option<CallSession>) {
        let room = self.room.unwrap_or_default();
        let transition = self
            .session
            .replace(call.unwrap_or_else(|| CallSession::inactive(room)));
        debug!(
            "Call session {:?} (generation {})",
            transition,
            self.session.generation()
        );
        self.events.publish(CallEvent::CallSessionUpdated {
            session: self.session.current().clone(),
        });

        match transition {
            SessionTransition::Started => {
                let host = self.session.current().host.as_deref().unwrap_or("nobody");
                info!("Call started in room {}, hosted by {}", room, host);
            }
            SessionTransition::Updated => {}
            SessionTransition::Ended => {
                info!("Call in room {} ended", room);
                self.teardown_call();
                return;
            }
            SessionTransition::Idle => {
                self.teardown_call();
                return;
            }
        }
        self.sync_peers();
    }

    /// Match peer entries to the session and send the offers this side owes
    fn sync_peers(&mut self) {
        let session = self.session.current().clone();
        let desired: BTreeSet<String> = if session.participants.contains(&self.self_id) {
            session.others(&self.self_id).map(str::to_string).collect()
        } else {
            BTreeSet::new()
        };

        for peer in self.manager.peer_ids() {
            if !desired.contains(&peer) {
                info!("Peer {} left the call", peer);
                self.manager.teardown(&peer);
                self.guard.release(&self.self_id, &peer);
            }
        }
        if desired.is_empty() {
            return;
        }

        for peer in &desired {
            if let Err(e) = self.manager.ensure(peer) {
                warn!("Cannot create peer entry for {}: {}", peer, e);
            }
        }

        let outgoing = self.share.outgoing();
        for peer in plan_offers(&self.self_id, &session, &mut self.guard) {
            info!("Offering to {}", peer);
            if let Err(e) = self.manager.make_offer(&peer, outgoing.clone()) {
                warn!("Offer to {} failed: {}", peer, e);
                self.guard.release(&self.self_id, &peer);
            }
        }
    }

    // ------------------------------------------------------------------
    // Peer events
    // ------------------------------------------------------------------

    fn on_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Report(report) => {
                if let Some(report) = self.manager.accept_report(report) {
                    self.on_report(report);
                }
            }
            PeerEvent::Signal(signal) => {
                let Some(signal) = self.manager.accept_signal(signal) else {
                    return;
                };
                let peer = signal.peer_id;
                match signal.signal {
                    ConnectionSignal::IceCandidate(candidate) => {
                        self.send_to(&peer, Signal::Ice { ice: candidate });
                    }
                    ConnectionSignal::Track(track) => {
                        debug!("Track {} ({}) from {}", track.id, track.kind, peer);
                        self.router.add_track(&mut self.manager, &peer, track);
                    }
                    ConnectionSignal::TrackEnded(track_id) => {
                        self.router.remove_track(&mut self.manager, &peer, &track_id);
                    }
                    ConnectionSignal::State(state) => self.on_connection_state(&peer, state),
                }
            }
        }
    }

    fn on_report(&mut self, report: NegotiationReport) {
        let peer = report.peer_id;
        match report.outcome {
            NegotiationOutcome::LocalDescription(desc) => match desc.sdp_type {
                SdpType::Offer => self.send_to(&peer, Signal::Offer { sdp: desc }),
                SdpType::Answer => self.send_to(&peer, Signal::Answer { sdp: desc }),
                other => debug!("Not sending {:?} description to {}", other, peer),
            },
            NegotiationOutcome::RemoteAnswerApplied => debug!("Answer from {} applied", peer),
            NegotiationOutcome::Failed { step, kind, error } => {
                self.recover(&peer, Some(step), kind);
                self.events.publish(CallEvent::WebRTCNegotiationFailed {
                    peer_id: peer,
                    step: step.to_string(),
                    error,
                });
            }
        }
    }

    fn on_connection_state(&mut self, peer: &str, state: ConnectionState) {
        info!("Peer {} connection state: {}", peer, state);
        if state == ConnectionState::Connected {
            self.manager
                .observe(peer, NegotiationInput::TransportConnected);
        } else if state.is_terminal() {
            self.manager.observe(peer, NegotiationInput::TransportLost);
            let error = AppError::ConnectionFatal {
                peer: peer.to_string(),
                state: state.to_string(),
            };
            warn!("{}", error);
            self.recover(peer, None, error.kind());
            self.events.publish(CallEvent::WebRTCConnectionLost {
                peer_id: peer.to_string(),
                state: state.to_string(),
            });
        }
    }

    /// Apply the recovery policy for a failed peer
    ///
    /// A dead connection is torn down. A failed offer, or an answer that
    /// could not be applied, frees the pair so the next session update
    /// offers again. Anything else keeps the entry as it is.
    fn recover(&mut self, peer: &str, step: Option<NegotiationStep>, kind: ErrorKind) {
        match (kind, step) {
            (ErrorKind::ConnectionFatal, _) => {
                self.manager.teardown(peer);
                self.guard.release(&self.self_id, peer);
            }
            (_, Some(NegotiationStep::Offer | NegotiationStep::ApplyAnswer)) => {
                self.guard.release(&self.self_id, peer);
            }
            (kind, step) => debug!("No recovery for {:?} failure at {:?} with {}", kind, step, peer),
        }
    }

    // ------------------------------------------------------------------
    // Internal completions
    // ------------------------------------------------------------------

    fn on_internal(&mut self, internal: Internal) {
        match internal {
            Internal::UserMedia {
                epoch,
                result,
                reply,
                then_join,
            } => self.on_user_media(epoch, result, reply, then_join),
            Internal::DisplayMedia {
                epoch,
                result,
                reply,
            } => self.on_display_media(epoch, result, reply),
            Internal::ScreenEnded { track_id } => {
                let current = self.share.screen_track().map(|t| t.id.as_str());
                if current == Some(track_id.as_str()) {
                    info!("Screen capture ended outside the app, stopping share");
                    self.stop_screen_share();
                }
            }
        }
    }

    fn on_user_media(
        &mut self,
        epoch: u64,
        result: Result<LocalStream>,
        reply: Option<oneshot::Sender<Result<()>>>,
        then_join: bool,
    ) {
        if epoch != self.media_epoch {
            debug!("Discarding media acquired for a call that was left");
            if let Ok(stream) = result {
                stream.stop();
            }
            if let Some(reply) = reply {
                let _ = reply.send(Err(AppError::Cancelled));
            }
            return;
        }

        let outcome = match result {
            Ok(stream) if self.share.has_local_media() => {
                stream.stop();
                Ok(())
            }
            Ok(stream) => {
                self.share.set_camera(stream);
                if !self.manager.is_empty() {
                    self.manager.attach_tracks_all(&self.share.outgoing());
                    self.manager.renegotiate_all();
                }
                Ok(())
            }
            Err(e) => {
                warn!("Local media unavailable, continuing view-only: {}", e);
                self.events.publish(CallEvent::MediaWarning {
                    source: "user_media".to_string(),
                    message: e.to_string(),
                });
                Err(e)
            }
        };

        if then_join {
            self.send_join();
        }
        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }
    }

    fn on_display_media(
        &mut self,
        epoch: u64,
        result: Result<LocalStream>,
        reply: oneshot::Sender<Result<()>>,
    ) {
        if epoch != self.media_epoch {
            if let Ok(stream) = result {
                stream.stop();
            }
            let _ = reply.send(Err(AppError::Cancelled));
            return;
        }

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Screen capture unavailable: {}", e);
                self.events.publish(CallEvent::MediaWarning {
                    source: "display_media".to_string(),
                    message: e.to_string(),
                });
                let _ = reply.send(Err(e));
                return;
            }
        };

        match self.share.begin(stream, &self.manager) {
            Ok(track) => {
                self.watch_screen(track);
                self.send(Signal::CallShareStart);
                self.events
                    .publish(CallEvent::CallShareChanged { sharing: true });
                let _ = reply.send(Ok(()));
            }
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        }
    }

    fn watch_screen(&self, track: LocalTrack) {
        let tx = self.internal_tx.clone();
        let ended = track.ended();
        tokio::spawn(async move {
            ended.cancelled().await;
            let _ = tx.send(Internal::ScreenEnded { track_id: track.id });
        });
    }

    // ------------------------------------------------------------------
    // Channel
    // ------------------------------------------------------------------

    fn on_channel_state(&mut self, state: ChannelState) {
        self.events.publish(CallEvent::ChannelStateChanged { state });
        if state != ChannelState::Open {
            return;
        }

        if self.was_open && self.room.is_some() {
            info!("Relay connection reopened, resubscribing to room {:?}", self.room);
            self.send(Signal::JoinRoom);
            self.send(Signal::CallSync);
        }
        self.was_open = true;
    }

    // ------------------------------------------------------------------
    // View
    // ------------------------------------------------------------------

    /// Recompute the derived view and publish what changed
    fn refresh(&mut self) {
        self.router.publish(&self.manager);
        let peers = self.router.snapshot();
        let stage = select_stage(self.session.current(), &peers, &self.self_id);
        let next = CallView {
            room_id: self.room,
            session: self.session.current().clone(),
            peers,
            negotiation: self.manager.states(),
            stage,
            sharing: self.share.is_sharing(),
            local_media: self.share.has_local_media(),
        };

        let previous = self.view_tx.borrow().clone();
        if previous == next {
            return;
        }
        if previous.peers != next.peers {
            self.events.publish(CallEvent::CallPeersChanged {
                peers: next.peers.clone(),
            });
        }
        if previous.stage != next.stage {
            self.events.publish(CallEvent::CallStageChanged {
                stage: next.stage.clone(),
            });
        }
        self.view_tx.send_replace(next);
    }
}
