//! In-memory fakes for unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout, Instant};

use crate::channel::{Connector, EnvelopeSink, Link, LinkReader, LinkWriter};
use crate::error::{AppError, Result};
use crate::signaling::Envelope;
use crate::webrtc::devices::MediaDevices;
use crate::webrtc::media::{
    ConnectionFactory, ConnectionSignal, LocalStream, LocalTrack, MediaConnection, SignalSink,
    TrackKind, TrackSource,
};
use crate::webrtc::peer::{NegotiationReport, PeerEvent};
use crate::webrtc::signaling::{IceCandidate, SdpType, SessionDescription};

const WAIT_LIMIT: Duration = Duration::from_secs(2);

/// Poll `condition` until it holds; panics after two seconds
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + WAIT_LIMIT;
    while !condition() {
        if Instant::now() > deadline {
            panic!("condition not met within {:?}", WAIT_LIMIT);
        }
        sleep(Duration::from_millis(5)).await;
    }
}

/// Next negotiation report, skipping connection signals
pub async fn next_report(rx: &mut mpsc::UnboundedReceiver<PeerEvent>) -> NegotiationReport {
    timeout(WAIT_LIMIT, async {
        loop {
            match rx.recv().await {
                Some(PeerEvent::Report(report)) => return report,
                Some(PeerEvent::Signal(_)) => continue,
                None => panic!("peer event channel closed"),
            }
        }
    })
    .await
    .expect("no negotiation report")
}

// ============================================================================
// Relay link
// ============================================================================

type Written = Arc<Mutex<Vec<String>>>;

/// Link writer recording frames, optionally failing after `n` sends
pub struct MockWriter {
    written: Written,
    remaining: Option<usize>,
}

impl MockWriter {
    pub fn new() -> (Self, Written) {
        let written = Written::default();
        (
            Self {
                written: written.clone(),
                remaining: None,
            },
            written,
        )
    }

    pub fn failing_after(n: usize) -> (Self, Written) {
        let (mut writer, written) = Self::new();
        writer.remaining = Some(n);
        (writer, written)
    }
}

#[async_trait]
impl LinkWriter for MockWriter {
    async fn send(&mut self, frame: &str) -> Result<()> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Err(AppError::Transport("mock link broken".to_string()));
            }
            *remaining -= 1;
        }
        self.written.lock().push(frame.to_string());
        Ok(())
    }

    async fn close(&mut self) {}
}

struct MockReader {
    frames: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl LinkReader for MockReader {
    async fn recv(&mut self) -> Option<Result<String>> {
        self.frames.recv().await.map(Ok)
    }
}

#[derive(Default)]
struct ConnectorInner {
    fail_next: AtomicUsize,
    attempts: AtomicUsize,
    tokens: Mutex<Vec<String>>,
    written: Written,
    inbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

/// Connector handing out in-memory links
///
/// Every link writes into one shared log; inbound frames go to the latest
/// link.
#[derive(Clone, Default)]
pub struct MockConnector {
    inner: Arc<ConnectorInner>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` connection attempts
    pub fn fail_next(&self, n: usize) {
        self.inner.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> Vec<String> {
        self.inner.written.lock().clone()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.inner.tokens.lock().clone()
    }

    /// Deliver a frame on the latest link
    pub fn push_inbound(&self, frame: &str) -> bool {
        self.inner
            .inbound
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(frame.to_string()).is_ok())
    }

    /// Simulate the relay closing the latest link
    pub fn drop_link(&self) {
        self.inner.inbound.lock().take();
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, token: &str) -> Result<Link> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        self.inner.tokens.lock().push(token.to_string());

        let failing = self
            .inner
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AppError::Transport("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.inbound.lock() = Some(tx);
        Ok(Link {
            writer: Box::new(MockWriter {
                written: self.inner.written.clone(),
                remaining: None,
            }),
            reader: Box::new(MockReader { frames: rx }),
        })
    }
}

/// Envelope sink recording everything sent
#[derive(Clone, Default)]
pub struct RecordingSink {
    envelopes: Arc<Mutex<Vec<Envelope>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes.lock().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.envelopes.lock().iter().map(|e| e.signal.kind()).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.envelopes
            .lock()
            .iter()
            .filter(|e| e.signal.kind() == kind)
            .count()
    }

    pub fn last(&self, kind: &str) -> Option<Envelope> {
        self.envelopes
            .lock()
            .iter()
            .rev()
            .find(|e| e.signal.kind() == kind)
            .cloned()
    }
}

impl EnvelopeSink for RecordingSink {
    fn send_envelope(&self, envelope: &Envelope) {
        self.envelopes.lock().push(envelope.clone());
    }
}

// ============================================================================
// Media connections
// ============================================================================

/// Media connection recording every operation
pub struct MockConnection {
    peer_id: String,
    sink: SignalSink,
    calls: Mutex<Vec<String>>,
    senders: Mutex<Vec<LocalTrack>>,
    receive_only: Mutex<Vec<TrackKind>>,
    closed: AtomicBool,
    fail_offers: AtomicBool,
    fail_answers: AtomicBool,
    offer_gate: watch::Receiver<bool>,
}

impl MockConnection {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn receive_only(&self) -> Vec<TrackKind> {
        self.receive_only.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn video_senders(&self) -> usize {
        self.senders
            .lock()
            .iter()
            .filter(|t| t.kind() == TrackKind::Video)
            .count()
    }

    /// Id of the track on the video sender
    pub fn current_video(&self) -> Option<String> {
        self.senders
            .lock()
            .iter()
            .find(|t| t.kind() == TrackKind::Video)
            .map(|t| t.id.clone())
    }

    pub fn set_fail_offers(&self, fail: bool) {
        self.fail_offers.store(fail, Ordering::SeqCst);
    }

    /// Make applying remote answers fail
    pub fn set_fail_answers(&self, fail: bool) {
        self.fail_answers.store(fail, Ordering::SeqCst);
    }

    /// Report a signal as the real connection would
    pub fn emit(&self, signal: ConnectionSignal) {
        self.sink.emit(signal);
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

#[async_trait]
impl MediaConnection for MockConnection {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let mut gate = self.offer_gate.clone();
        let _ = gate.wait_for(|open| *open).await;
        if self.fail_offers.load(Ordering::SeqCst) {
            return Err(AppError::Negotiation("mock offer failure".to_string()));
        }
        self.record("offer");
        Ok(SessionDescription::offer(format!("offer for {}", self.peer_id)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record("answer");
        Ok(SessionDescription::answer(format!("answer for {}", self.peer_id)))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let kind = match desc.sdp_type {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
            SdpType::Pranswer => "pranswer",
            SdpType::Rollback => "rollback",
        };
        if desc.sdp_type == SdpType::Answer && self.fail_answers.load(Ordering::SeqCst) {
            return Err(AppError::WebRtcError("mock answer rejected".to_string()));
        }
        self.record(format!("remote:{}", kind));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record(format!("ice:{}", candidate.candidate));
        Ok(())
    }

    async fn sending_kinds(&self) -> Vec<TrackKind> {
        self.senders.lock().iter().map(LocalTrack::kind).collect()
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        self.record(format!("add_track:{}", track.kind()));
        self.senders.lock().push(track.clone());
        Ok(())
    }

    async fn replace_track(&self, track: &LocalTrack) -> Result<bool> {
        let mut senders = self.senders.lock();
        match senders.iter_mut().find(|t| t.kind() == track.kind()) {
            Some(sender) => {
                *sender = track.clone();
                drop(senders);
                self.record(format!("replace_track:{}", track.kind()));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn add_receive_only(&self, kind: TrackKind) -> Result<()> {
        self.record(format!("recvonly:{}", kind));
        self.receive_only.lock().push(kind);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct FactoryInner {
    connections: Mutex<Vec<Arc<MockConnection>>>,
    connects: AtomicUsize,
    fail_connect: Mutex<HashSet<String>>,
    fail_offer: Mutex<HashSet<String>>,
    offer_gate: watch::Sender<bool>,
}

/// Factory producing [`MockConnection`]s
#[derive(Clone)]
pub struct MockConnectionFactory {
    inner: Arc<FactoryInner>,
}

impl MockConnectionFactory {
    pub fn new() -> Self {
        let (offer_gate, _) = watch::channel(true);
        Self {
            inner: Arc::new(FactoryInner {
                connections: Mutex::new(Vec::new()),
                connects: AtomicUsize::new(0),
                fail_connect: Mutex::new(HashSet::new()),
                fail_offer: Mutex::new(HashSet::new()),
                offer_gate,
            }),
        }
    }

    /// Latest connection created for `peer_id`
    pub fn connection(&self, peer_id: &str) -> Option<Arc<MockConnection>> {
        self.inner
            .connections
            .lock()
            .iter()
            .rev()
            .find(|c| c.peer_id == peer_id)
            .cloned()
    }

    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn fail_connect(&self, peer_id: &str) {
        self.inner.fail_connect.lock().insert(peer_id.to_string());
    }

    /// Connections created for `peer_id` from now on fail to offer
    pub fn fail_offer(&self, peer_id: &str) {
        self.inner.fail_offer.lock().insert(peer_id.to_string());
    }

    /// Block offer creation until [`release_offers`](Self::release_offers)
    pub fn hold_offers(&self) {
        self.inner.offer_gate.send_replace(false);
    }

    pub fn release_offers(&self) {
        self.inner.offer_gate.send_replace(true);
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn connect(&self, peer_id: &str, signals: SignalSink) -> Result<Arc<dyn MediaConnection>> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_connect.lock().contains(peer_id) {
            return Err(AppError::WebRtcError("mock connect failure".to_string()));
        }

        let connection = Arc::new(MockConnection {
            peer_id: peer_id.to_string(),
            sink: signals,
            calls: Mutex::new(Vec::new()),
            senders: Mutex::new(Vec::new()),
            receive_only: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            fail_offers: AtomicBool::new(self.inner.fail_offer.lock().contains(peer_id)),
            fail_answers: AtomicBool::new(false),
            offer_gate: self.inner.offer_gate.subscribe(),
        });
        self.inner.connections.lock().push(connection.clone());
        Ok(connection)
    }
}

// ============================================================================
// Devices
// ============================================================================

struct DevicesInner {
    user_available: AtomicBool,
    display_available: AtomicBool,
    gate: watch::Sender<bool>,
    user: Mutex<Vec<LocalStream>>,
    display: Mutex<Vec<LocalStream>>,
}

/// Capture devices handing out fresh streams, recording each one
#[derive(Clone)]
pub struct MockDevices {
    inner: Arc<DevicesInner>,
}

impl MockDevices {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            inner: Arc::new(DevicesInner {
                user_available: AtomicBool::new(true),
                display_available: AtomicBool::new(true),
                gate,
                user: Mutex::new(Vec::new()),
                display: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn deny_user_media(&self) {
        self.inner.user_available.store(false, Ordering::SeqCst);
    }

    pub fn deny_display_media(&self) {
        self.inner.display_available.store(false, Ordering::SeqCst);
    }

    /// Block acquisitions until [`release`](Self::release)
    pub fn hold(&self) {
        self.inner.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.inner.gate.send_replace(true);
    }

    pub fn last_user_media(&self) -> Option<LocalStream> {
        self.inner.user.lock().last().cloned()
    }

    pub fn last_display_media(&self) -> Option<LocalStream> {
        self.inner.display.lock().last().cloned()
    }

    async fn pass_gate(&self) {
        let mut gate = self.inner.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
    }
}

#[async_trait]
impl MediaDevices for MockDevices {
    async fn user_media(&self) -> Result<LocalStream> {
        self.pass_gate().await;
        if !self.inner.user_available.load(Ordering::SeqCst) {
            return Err(AppError::MediaAccess("permission denied".to_string()));
        }
        let stream = LocalStream::new(vec![
            LocalTrack::new(TrackSource::Microphone, "user"),
            LocalTrack::new(TrackSource::Camera, "user"),
        ]);
        self.inner.user.lock().push(stream.clone());
        Ok(stream)
    }

    async fn display_media(&self) -> Result<LocalStream> {
        self.pass_gate().await;
        if !self.inner.display_available.load(Ordering::SeqCst) {
            return Err(AppError::MediaAccess("permission denied".to_string()));
        }
        let stream = LocalStream::new(vec![LocalTrack::new(TrackSource::Screen, "screen")]);
        self.inner.display.lock().push(stream.clone());
        Ok(stream)
    }
}
