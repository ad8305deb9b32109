//! HTTP/WebSocket API (spec.md §6).
//!
//! Grounded on the teacher's `api.rs` (`AppState` built once in `main`
//! and threaded through via `State<AppState>` extractors), trimmed to
//! the project/conversation/agent endpoints spec.md §6 names.

mod rest;
mod types;
mod ws;

pub use rest::create_router;

use std::sync::Arc;

use crate::agent::AgentSupervisor;
use crate::config::Config;
use crate::eventbus::EventBus;
use crate::router::SubscriptionRouter;
use crate::store::{ConversationStore, FileProjectStore};

/// Application state shared across handlers (spec.md §3 Ownership:
/// each of these is constructed once in `main` and injected, not
/// reached for through module-level statics — see spec.md §9 "Global
/// singletons").
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub project_store: Arc<FileProjectStore>,
    pub conversation_store: Arc<ConversationStore>,
    pub event_bus: Arc<EventBus>,
    pub supervisor: Arc<AgentSupervisor>,
    pub router: SubscriptionRouter,
}
