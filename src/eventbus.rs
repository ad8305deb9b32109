//! EventBus (spec.md §4.C)
//!
//! Grounded on the teacher's `runtime::SseEvent` +
//! `tokio::sync::broadcast` pair (`runtime/mod.rs`): one broadcast
//! channel, generalized from "per conversation" to "shared across all
//! projects", with each event additionally carrying the `project_id`
//! so a single bus can serve every subscriber. Delivery is best-effort
//! fan-out — a subscriber that falls behind sees `RecvError::Lagged`
//! rather than slowing the publisher (spec.md §4.C, §5).

use serde_json::Value;
use tokio::sync::broadcast;

/// Closed enum of event kinds the bus carries (spec.md §4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    UserSentMessage,
    ToolUseStarted,
    ToolUseCompleted,
    AssistantResponseCompleted,
    AgentStarted,
    AgentStopped,
    AgentMessage,
    AgentStatus,
    QueueChange,
    AgentWaiting,
    SessionRecovery,
}

#[derive(Debug, Clone)]
pub struct AgentEvent {
    pub project_id: String,
    pub kind: EventKind,
    pub payload: Value,
}

/// Default channel capacity: generous enough that a momentarily slow
/// subscriber (e.g. a WebSocket write in flight) doesn't lag under
/// normal event rates, without buffering unboundedly.
pub const DEFAULT_CAPACITY: usize = 1024;

pub struct EventBus {
    tx: broadcast::Sender<AgentEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Best-effort: if there are no subscribers this
    /// is a no-op (the teacher's `broadcast_tx.send` pattern ignores
    /// the `Err` for the same reason).
    pub fn publish(&self, project_id: impl Into<String>, kind: EventKind, payload: Value) {
        let _ = self.tx.send(AgentEvent {
            project_id: project_id.into(),
            kind,
            payload,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new(8);
        bus.publish("p1", EventKind::AgentStarted, serde_json::json!({}));
    }

    #[tokio::test]
    async fn subscriber_receives_events_for_all_projects() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish("p1", EventKind::AgentStarted, serde_json::json!({"a": 1}));
        bus.publish("p2", EventKind::AgentStopped, serde_json::json!({"b": 2}));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.project_id, "p1");
        assert_eq!(first.kind, EventKind::AgentStarted);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.project_id, "p2");
        assert_eq!(second.kind, EventKind::AgentStopped);
    }

    #[tokio::test]
    async fn slow_subscriber_lags_without_blocking_publisher() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for _ in 0..10 {
            bus.publish("p1", EventKind::AgentStatus, serde_json::json!({}));
        }
        // publisher never blocked; subscriber now observes a lag error
        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Lagged(_))));
    }
}
