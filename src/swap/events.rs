//! Event Bus
//!
//! Publishes swap updates and terminal markers to subscribers over a tokio
//! broadcast channel. The bus is write-only from the nursery's side; nothing
//! downstream can call back into it.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::{SwapStatus, TransactionInfo};

/// Status payload attached to every update
#[derive(Debug, Clone, Serialize)]
pub struct SwapUpdate {
    pub status: SwapStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preimage: Option<String>,
}

impl SwapUpdate {
    pub fn status_only(status: SwapStatus) -> Self {
        Self {
            status,
            transaction: None,
            preimage: None,
        }
    }
}

/// Events emitted by the nursery
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SwapEvent {
    Update {
        id: String,
        #[serde(flatten)]
        update: SwapUpdate,
    },
    Success {
        id: String,
        is_reverse: bool,
    },
    Failure {
        id: String,
        is_reverse: bool,
        reason: String,
    },
}

/// Broadcast fan-out to stream gateways
pub struct EventBus {
    sender: broadcast::Sender<SwapEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SwapEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers. Send errors (no subscribers) are
    /// ignored.
    pub fn publish(&self, event: SwapEvent) {
        let _ = self.sender.send(event);
    }

    pub fn publish_update(&self, id: &str, update: SwapUpdate) {
        self.publish(SwapEvent::Update {
            id: id.to_string(),
            update,
        });
    }

    pub fn publish_success(&self, id: &str, is_reverse: bool) {
        self.publish(SwapEvent::Success {
            id: id.to_string(),
            is_reverse,
        });
    }

    pub fn publish_failure(&self, id: &str, is_reverse: bool, reason: &str) {
        self.publish(SwapEvent::Failure {
            id: id.to_string(),
            is_reverse,
            reason: reason.to_string(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_reaches_all_subscribers() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish_update(
            "abc123",
            SwapUpdate {
                status: SwapStatus::TransactionMempool,
                transaction: Some(TransactionInfo {
                    id: "txid".to_string(),
                    vout: 1,
                    hex: None,
                }),
                preimage: None,
            },
        );

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await.unwrap() {
                SwapEvent::Update { id, update } => {
                    assert_eq!(id, "abc123");
                    assert_eq!(update.status, SwapStatus::TransactionMempool);
                    assert_eq!(update.transaction.unwrap().vout, 1);
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::new(16);
        bus.publish_success("abc123", true);
    }

    #[test]
    fn test_wire_format() {
        let event = SwapEvent::Update {
            id: "abc123".to_string(),
            update: SwapUpdate::status_only(SwapStatus::InvoicePaid),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"invoice.paid\""));
        assert!(json.contains("\"abc123\""));
        assert!(!json.contains("transaction"));
    }
}
