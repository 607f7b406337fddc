//! Room event fan-out
//!
//! Membership and lifecycle events are pushed to every currently-connected
//! peer through a broadcast channel. Delivery is best-effort: no retry, no
//! per-recipient acknowledgment, no cross-peer ordering guarantee. A peer
//! whose transport is not open at send time misses the event and reconciles
//! via `getPeers` after it finishes registering.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::error;

use crate::registry::PeerId;

/// Event channel capacity (ring buffer size)
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle events broadcast room-wide
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RoomEvent {
    /// A peer's first media track arrived; its stream can now be pulled
    NewProducer { id: PeerId, username: String },
    /// A peer's transport closed and it was removed from the room
    UserLeft { id: PeerId },
}

/// Broadcast notifier for room events
///
/// Events are serialized once and the resulting frame is shared across all
/// subscribers. Connection tasks subscribe while their WebSocket is open and
/// forward each received frame verbatim.
pub struct Notifier {
    tx: broadcast::Sender<Arc<str>>,
}

impl Notifier {
    /// Create a new notifier
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Broadcast a room event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped —
    /// events are fire-and-forget notifications.
    pub fn broadcast(&self, event: &RoomEvent) {
        match serde_json::to_string(event) {
            Ok(frame) => {
                let _ = self.tx.send(Arc::from(frame.as_str()));
            }
            Err(e) => error!("Failed to serialize room event: {}", e),
        }
    }

    /// Relay a raw frame verbatim to all subscribers.
    ///
    /// Legacy fallback path: frames with an unrecognized type tag are
    /// forwarded room-wide without reserialization.
    pub fn broadcast_raw(&self, frame: &str) {
        let _ = self.tx.send(Arc::from(frame));
    }

    /// Subscribe to future events
    ///
    /// The receiver uses a ring buffer; a subscriber that falls too far
    /// behind gets a `Lagged` error and misses some events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<str>> {
        self.tx.subscribe()
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_subscribe() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();

        let id = PeerId::new();
        notifier.broadcast(&RoomEvent::UserLeft { id });

        let frame = rx.recv().await.unwrap();
        let parsed: RoomEvent = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed, RoomEvent::UserLeft { id });
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let notifier = Notifier::new();
        let mut rx1 = notifier.subscribe();
        let mut rx2 = notifier.subscribe();

        assert_eq!(notifier.subscriber_count(), 2);

        notifier.broadcast(&RoomEvent::NewProducer {
            id: PeerId::new(),
            username: "alice".to_string(),
        });

        let frame1 = rx1.recv().await.unwrap();
        let frame2 = rx2.recv().await.unwrap();
        assert_eq!(frame1, frame2);
        assert!(frame1.contains("newProducer"));
    }

    #[test]
    fn test_no_subscribers() {
        let notifier = Notifier::new();
        assert_eq!(notifier.subscriber_count(), 0);

        // Must not panic with nobody listening
        notifier.broadcast(&RoomEvent::UserLeft { id: PeerId::new() });
    }

    #[tokio::test]
    async fn test_raw_relay_is_verbatim() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();

        let raw = r#"{"type":"legacyPing","data":42}"#;
        notifier.broadcast_raw(raw);

        let frame = rx.recv().await.unwrap();
        assert_eq!(&*frame, raw);
    }
}
