//! Capture lifecycle events and the process-wide bus that carries them.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaptureEvent {
    /// The image for this capture reached the server and its intent was deleted.
    Uploaded { capture_id: String },
    /// The capture was moved to the verified state (demo auto-verification).
    Verified { capture_id: String },
}

impl CaptureEvent {
    pub fn capture_id(&self) -> &str {
        match self {
            CaptureEvent::Uploaded { capture_id } | CaptureEvent::Verified { capture_id } => {
                capture_id
            }
        }
    }
}

/// Cloneable publish/subscribe channel for [`CaptureEvent`]s.
///
/// Publishing never fails the caller: with no subscribers the event is dropped,
/// and slow subscribers observe a lag instead of blocking the publisher.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<CaptureEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: CaptureEvent) {
        match self.sender.send(event) {
            Ok(receivers) => tracing::debug!(receivers, "Capture event published"),
            Err(broadcast::error::SendError(event)) => {
                tracing::trace!(capture_id = %event.capture_id(), "No event subscribers")
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.sender.subscribe()
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
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(CaptureEvent::Uploaded {
            capture_id: "cap_1".into(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.capture_id(), "cap_1");
        assert!(matches!(event, CaptureEvent::Uploaded { .. }));
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.publish(CaptureEvent::Verified {
            capture_id: "cap_1".into(),
        });
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(CaptureEvent::Uploaded {
            capture_id: "cap_1".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "uploaded");
        assert_eq!(json["capture_id"], "cap_1");
    }
}
