//! SubscriptionRouter (spec.md §4.F)
//!
//! Grounded on the teacher's `api::sse::sse_stream`: a per-connection
//! broadcast subscription that replays an "init" snapshot before
//! streaming. Generalized from one SSE stream per conversation to one
//! multiplexed feed per client covering several `project_id`
//! subscriptions (spec.md §6 WebSocket envelope), since a client here
//! subscribes/unsubscribes to many projects over one connection rather
//! than opening one stream per conversation.
//!
//! The snapshot replay itself (spec.md §4.F: "On subscribe the router
//! replays the current agent status snapshot") is driven by the caller
//! (`api::ws`), which has access to `AgentSupervisor::status`; this
//! module only owns the subscribe/unsubscribe set and the filtered
//! event feed, matching spec.md §3 Ownership ("SubscriptionRouter owns
//! per-client membership").

use std::collections::HashSet;

use tokio::sync::broadcast;

use crate::eventbus::{AgentEvent, EventBus};

/// Router over the shared `EventBus`. Cheap to construct per
/// connection — it holds no state itself beyond a reference to the
/// bus; each client's subscription set lives in `ClientSubscription`.
#[derive(Clone)]
pub struct SubscriptionRouter {
    event_bus: std::sync::Arc<EventBus>,
}

impl SubscriptionRouter {
    pub fn new(event_bus: std::sync::Arc<EventBus>) -> Self {
        Self { event_bus }
    }

    /// Open a new per-client subscription. Call this once per accepted
    /// WebSocket connection (spec.md §4.F "On client disconnect the
    /// subscription set is dropped" — dropping the returned value is
    /// sufficient, there is no separate deregistration step).
    pub fn client(&self) -> ClientSubscription {
        ClientSubscription {
            rx: self.event_bus.subscribe(),
            subscribed: HashSet::new(),
        }
    }
}

/// One client's subscribed `projectId` set plus a filtered view of the
/// shared event feed.
pub struct ClientSubscription {
    rx: broadcast::Receiver<AgentEvent>,
    subscribed: HashSet<String>,
}

impl ClientSubscription {
    pub fn subscribe(&mut self, project_id: impl Into<String>) {
        self.subscribed.insert(project_id.into());
    }

    pub fn unsubscribe(&mut self, project_id: &str) {
        self.subscribed.remove(project_id);
    }

    pub fn is_subscribed(&self, project_id: &str) -> bool {
        self.subscribed.contains(project_id)
    }

    /// Next event belonging to a subscribed project. Delivery is in
    /// emission order per project (spec.md §4.F); a lagged receiver
    /// surfaces as `RecvError::Lagged` rather than silently dropping —
    /// callers treat that as "resync by re-subscribing", matching
    /// EventBus's no-backpressure contract (spec.md §4.C, §5).
    pub async fn recv(&mut self) -> Result<AgentEvent, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if self.subscribed.contains(&event.project_id) || event.project_id == "*" {
                return Ok(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventbus::EventKind;

    #[tokio::test]
    async fn unsubscribed_project_events_are_filtered_out() {
        let bus = std::sync::Arc::new(EventBus::new(16));
        let router = SubscriptionRouter::new(bus.clone());
        let mut client = router.client();
        client.subscribe("p1");

        bus.publish("p2", EventKind::AgentStarted, serde_json::json!({}));
        bus.publish("p1", EventKind::AgentStarted, serde_json::json!({}));

        let event = client.recv().await.unwrap();
        assert_eq!(event.project_id, "p1");
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = std::sync::Arc::new(EventBus::new(16));
        let router = SubscriptionRouter::new(bus.clone());
        let mut client = router.client();
        client.subscribe("p1");
        client.unsubscribe("p1");

        bus.publish("p1", EventKind::AgentStarted, serde_json::json!({}));
        bus.publish("p1", EventKind::AgentStopped, serde_json::json!({"crashed": false}));
        client.subscribe("p1");

        let event = client.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::AgentStopped);
    }

    #[tokio::test]
    async fn global_wildcard_events_reach_every_subscriber() {
        let bus = std::sync::Arc::new(EventBus::new(16));
        let router = SubscriptionRouter::new(bus.clone());
        let mut client = router.client();
        client.subscribe("p1");

        bus.publish("*", EventKind::QueueChange, serde_json::json!({"queuedCount": 1}));
        let event = client.recv().await.unwrap();
        assert_eq!(event.project_id, "*");
    }
}
