//! Resilient relay channel
//!
//! One logical duplex connection to the signaling relay, shared by every
//! consumer. A single driver task owns the connection and the reconnect
//! timer:
//!
//! ```text
//! Disconnected --token available--> Connecting --ok--> Open
//!      ^                                 |              |
//!      +-------- retry interval ---------+--- lost -----+
//!
//! close() from any state --> Closed
//! ```
//!
//! Sending never fails from the caller's point of view: frames are written
//! immediately when open, otherwise queued and flushed in order on the next
//! open, ahead of anything sent later.

pub mod connector;
pub mod credentials;
pub mod queue;

pub use connector::{relay_ws_url, Connector, Link, LinkReader, LinkWriter, WsConnector};
pub use credentials::{CredentialProvider, SharedCredentials, StaticCredentials};
pub use queue::OutboundQueue;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::signaling::Envelope;
use crate::utils::LogThrottler;
use crate::warn_throttled;

/// Channel connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Open,
    /// Closed on purpose, no further retries
    Closed,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelState::Disconnected => write!(f, "disconnected"),
            ChannelState::Connecting => write!(f, "connecting"),
            ChannelState::Open => write!(f, "open"),
            ChannelState::Closed => write!(f, "closed"),
        }
    }
}

/// Anything that accepts outbound envelopes
///
/// Delivery is best-effort and eventual; there is no per-message result.
pub trait EnvelopeSink: Send + Sync + 'static {
    fn send_envelope(&self, envelope: &Envelope);
}

/// Retry timing
#[derive(Debug, Clone, Copy)]
pub struct ChannelOptions {
    /// Delay before reconnecting after a failed attempt or a lost link
    pub reconnect_interval: Duration,
    /// Poll interval while no credential is available
    pub credential_poll: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_millis(500),
            credential_poll: Duration::from_millis(250),
        }
    }
}

impl From<&RelayConfig> for ChannelOptions {
    fn from(config: &RelayConfig) -> Self {
        Self {
            reconnect_interval: Duration::from_millis(config.reconnect_interval_ms.max(1)),
            credential_poll: Duration::from_millis(config.credential_poll_ms.max(1)),
        }
    }
}

type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<Arc<str>>>>>;

/// Handle to the shared relay channel
///
/// Cheap to clone; all clones talk to the same driver task.
#[derive(Clone)]
pub struct ResilientChannel {
    outbound: mpsc::UnboundedSender<String>,
    subscribers: Subscribers,
    state_rx: watch::Receiver<ChannelState>,
    cancel: CancellationToken,
}

impl ResilientChannel {
    /// Start the driver task and return a handle
    pub fn spawn(
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialProvider>,
        options: ChannelOptions,
    ) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);
        let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();

        let driver = Driver {
            connector,
            credentials,
            options,
            queue: OutboundQueue::new(),
            outbound_rx,
            subscribers: subscribers.clone(),
            state_tx,
            cancel: cancel.clone(),
            throttler: LogThrottler::with_secs(10),
            attempts: 0,
        };
        tokio::spawn(driver.run());

        Self {
            outbound,
            subscribers,
            state_rx,
            cancel,
        }
    }

    /// Send a raw text frame
    pub fn send_text(&self, frame: String) {
        if self.outbound.send(frame).is_err() {
            debug!("Relay channel closed, dropping outbound frame");
        }
    }

    /// Send an envelope
    pub fn send(&self, envelope: &Envelope) {
        match envelope.encode() {
            Ok(frame) => self.send_text(frame),
            Err(e) => warn!("Failed to encode {} envelope: {}", envelope.signal.kind(), e),
        }
    }

    /// Receive every inbound frame from now on, in arrival order
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Arc<str>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Subscribe to state changes
    pub fn state_watch(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    /// Close for good: stops retrying and discards queued frames
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl EnvelopeSink for ResilientChannel {
    fn send_envelope(&self, envelope: &Envelope) {
        self.send(envelope);
    }
}

/// How an open link ended
enum LinkEnd {
    Lost,
    Shutdown,
}

struct Driver {
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialProvider>,
    options: ChannelOptions,
    queue: OutboundQueue,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    subscribers: Subscribers,
    state_tx: watch::Sender<ChannelState>,
    cancel: CancellationToken,
    throttler: LogThrottler,
    attempts: u32,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let Some(token) = self.wait_for_token().await else {
                break;
            };

            self.set_state(ChannelState::Connecting);
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.connector.connect(&token) => result,
            };

            match connected {
                Ok(link) => {
                    if self.attempts > 0 {
                        info!("Relay connection restored after {} failed attempts", self.attempts);
                    }
                    self.attempts = 0;
                    self.throttler.clear("relay_connect");
                    self.set_state(ChannelState::Open);

                    if let LinkEnd::Shutdown = self.run_open(link).await {
                        break;
                    }
                }
                Err(e) => {
                    self.attempts += 1;
                    warn_throttled!(
                        self.throttler,
                        "relay_connect",
                        "Relay connect attempt {} failed: {} ({} queued)",
                        self.attempts,
                        e,
                        self.queue.len()
                    );
                }
            }

            self.set_state(ChannelState::Disconnected);
            if !self.idle(self.options.reconnect_interval).await {
                break;
            }
        }

        if !self.queue.is_empty() {
            info!("Relay channel closed, discarding {} queued frames", self.queue.len());
        }
        self.queue.clear();
        self.outbound_rx.close();
        self.set_state(ChannelState::Closed);
    }

    fn set_state(&self, state: ChannelState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("Relay channel state: {} -> {}", previous, state);
        }
    }

    /// Wait until a credential exists, queueing outbound frames meanwhile
    async fn wait_for_token(&mut self) -> Option<String> {
        let mut logged = false;
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            if let Some(token) = self.credentials.token() {
                return Some(token);
            }
            if !logged {
                info!("Waiting for relay credentials");
                logged = true;
            }
            if !self.idle(self.options.credential_poll).await {
                return None;
            }
        }
    }

    /// Sleep while still accepting outbound frames into the queue
    ///
    /// Returns false when the channel is shutting down.
    async fn idle(&mut self, duration: Duration) -> bool {
        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = &mut sleep => return true,
                frame = self.outbound_rx.recv() => match frame {
                    Some(frame) => self.queue.push(frame),
                    None => return false,
                },
            }
        }
    }

    fn drain_outbound(&mut self) {
        while let Ok(frame) = self.outbound_rx.try_recv() {
            self.queue.push(frame);
        }
    }

    async fn flush(&mut self, writer: &mut dyn LinkWriter) -> bool {
        self.drain_outbound();
        match self.queue.flush(writer).await {
            Ok(0) => true,
            Ok(n) => {
                debug!("Flushed {} frames to relay", n);
                true
            }
            Err(e) => {
                warn!("Relay write failed, {} frames kept for retry: {}", self.queue.len(), e);
                false
            }
        }
    }

    async fn run_open(&mut self, link: Link) -> LinkEnd {
        let Link {
            mut writer,
            mut reader,
        } = link;
        info!("Relay channel open");

        if !self.flush(writer.as_mut()).await {
            return LinkEnd::Lost;
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    writer.close().await;
                    return LinkEnd::Shutdown;
                }
                frame = self.outbound_rx.recv() => match frame {
                    Some(frame) => {
                        self.queue.push(frame);
                        if !self.flush(writer.as_mut()).await {
                            return LinkEnd::Lost;
                        }
                    }
                    None => {
                        writer.close().await;
                        return LinkEnd::Shutdown;
                    }
                },
                inbound = reader.recv() => match inbound {
                    Some(Ok(text)) => self.dispatch(text),
                    Some(Err(e)) => {
                        warn!("Relay read failed: {}", e);
                        return LinkEnd::Lost;
                    }
                    None => {
                        info!("Relay connection closed");
                        return LinkEnd::Lost;
                    }
                },
            }
        }
    }

    fn dispatch(&self, text: String) {
        let frame: Arc<str> = Arc::from(text);
        self.subscribers
            .lock()
            .retain(|tx| tx.send(frame.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{wait_until, MockConnector};
    use std::time::Duration;
    use tokio::time::timeout;

    fn fast() -> ChannelOptions {
        ChannelOptions {
            reconnect_interval: Duration::from_millis(20),
            credential_poll: Duration::from_millis(10),
        }
    }

    async fn wait_state(channel: &ResilientChannel, state: ChannelState) {
        let mut rx = channel.state_watch();
        timeout(Duration::from_secs(2), rx.wait_for(|s| *s == state))
            .await
            .expect("state timeout")
            .expect("state channel closed");
    }

    #[tokio::test]
    async fn test_queued_frames_flush_before_new_ones() {
        let connector = MockConnector::new();
        connector.fail_next(2);
        let channel = ResilientChannel::spawn(
            Arc::new(connector.clone()),
            Arc::new(StaticCredentials::new(Some("t".to_string()))),
            fast(),
        );

        channel.send_text("a".to_string());
        channel.send_text("b".to_string());
        wait_state(&channel, ChannelState::Open).await;
        channel.send_text("c".to_string());

        wait_until(|| connector.written().len() == 3).await;
        assert_eq!(connector.written(), vec!["a", "b", "c"]);
        assert_eq!(connector.attempts(), 3);
        assert_eq!(connector.tokens()[0], "t");
    }

    #[tokio::test]
    async fn test_fifo_across_reconnect() {
        let connector = MockConnector::new();
        let channel = ResilientChannel::spawn(
            Arc::new(connector.clone()),
            Arc::new(StaticCredentials::new(Some("t".to_string()))),
            fast(),
        );
        wait_state(&channel, ChannelState::Open).await;
        channel.send_text("1".to_string());
        wait_until(|| connector.written().len() == 1).await;

        connector.fail_next(3);
        connector.drop_link();
        wait_state(&channel, ChannelState::Disconnected).await;
        channel.send_text("2".to_string());
        channel.send_text("3".to_string());

        wait_state(&channel, ChannelState::Open).await;
        channel.send_text("4".to_string());

        wait_until(|| connector.written().len() == 4).await;
        assert_eq!(connector.written(), vec!["1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_waits_for_credential() {
        let connector = MockConnector::new();
        let credentials = SharedCredentials::new();
        let channel = ResilientChannel::spawn(
            Arc::new(connector.clone()),
            Arc::new(credentials.clone()),
            fast(),
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(connector.attempts(), 0);
        assert_eq!(channel.state(), ChannelState::Disconnected);

        credentials.set("late");
        wait_state(&channel, ChannelState::Open).await;
        assert_eq!(connector.tokens(), vec!["late"]);
    }

    #[tokio::test]
    async fn test_inbound_fan_out_in_order() {
        let connector = MockConnector::new();
        let channel = ResilientChannel::spawn(
            Arc::new(connector.clone()),
            Arc::new(StaticCredentials::new(Some("t".to_string()))),
            fast(),
        );
        let mut first = channel.subscribe();
        let mut second = channel.subscribe();
        wait_state(&channel, ChannelState::Open).await;

        assert!(connector.push_inbound("x"));
        assert!(connector.push_inbound("y"));

        for rx in [&mut first, &mut second] {
            let a = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
            let b = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
            assert_eq!((&*a, &*b), ("x", "y"));
        }
    }

    #[tokio::test]
    async fn test_close_clears_queue_and_stops_retrying() {
        let connector = MockConnector::new();
        connector.fail_next(usize::MAX);
        let channel = ResilientChannel::spawn(
            Arc::new(connector.clone()),
            Arc::new(StaticCredentials::new(Some("t".to_string()))),
            fast(),
        );
        channel.send_text("never".to_string());
        wait_until(|| connector.attempts() >= 2).await;

        channel.close();
        wait_state(&channel, ChannelState::Closed).await;
        let attempts = connector.attempts();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(connector.attempts(), attempts);
        assert!(connector.written().is_empty());
        assert!(!channel.is_open());
    }
}
