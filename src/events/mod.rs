//! Call notifications
//!
//! The orchestrator is the only publisher. It reports relay channel state,
//! session snapshots, the renderable peer list, the staged stream, local
//! screen sharing and every peer failure it recovered from. The binary logs
//! them; an embedding UI subscribes instead of polling the call view.

pub mod types;

pub use types::CallEvent;

use tokio::sync::broadcast;
use tracing::trace;

/// Buffered notifications per subscriber
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Fan-out of [`CallEvent`]s
///
/// Every subscriber sees events in publish order. A subscriber more than
/// [`EVENT_CHANNEL_CAPACITY`] events behind gets `Lagged` and should resync
/// from `CallHandle::view`.
///
/// # Example
///
/// ```no_run
/// use meshcall::events::{CallEvent, EventBus};
///
/// let bus = EventBus::new();
/// let mut rx = bus.subscribe();
///
/// bus.publish(CallEvent::CallShareChanged { sharing: true });
///
/// tokio::spawn(async move {
///     while let Ok(event) = rx.recv().await {
///         println!("{}", event.event_name());
///     }
/// });
/// ```
pub struct EventBus {
    tx: broadcast::Sender<CallEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish to current subscribers; dropped when there are none
    pub fn publish(&self, event: CallEvent) {
        if let Err(broadcast::error::SendError(event)) = self.tx.send(event) {
            trace!("No subscribers for {}", event.event_name());
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_share_change_reaches_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(CallEvent::CallShareChanged { sharing: true });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, CallEvent::CallShareChanged { sharing: true }));
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_failures_in_order() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        for step in ["offer", "apply_answer"] {
            bus.publish(CallEvent::WebRTCNegotiationFailed {
                peer_id: "p@x".to_string(),
                step: step.to_string(),
                error: "boom".to_string(),
            });
        }

        for rx in [&mut rx1, &mut rx2] {
            for expected in ["offer", "apply_answer"] {
                match rx.recv().await.unwrap() {
                    CallEvent::WebRTCNegotiationFailed { step, .. } => assert_eq!(step, expected),
                    other => panic!("unexpected {}", other.event_name()),
                }
            }
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(CallEvent::CallShareChanged { sharing: false });
        let mut late = bus.subscribe();
        assert!(late.try_recv().is_err());
    }
}
