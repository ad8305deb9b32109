//! Request/response wire types for the HTTP surface (spec.md §6).
//!
//! Grounded on the teacher's `api/types.rs`: plain `serde`-derived
//! structs named after the endpoint they serve, no shared envelope
//! type beyond what `error::ApiError`'s `IntoResponse` already gives
//! handlers for the failure path.

use serde::{Deserialize, Serialize};

use crate::agent::{AgentMode, AgentStatusSnapshot, GlobalStatus, PermissionMode, QueuedMessage};
use crate::store::SearchHit;

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InteractiveStartRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub permission_mode: Option<PermissionMode>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AutonomousStartRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub permission_mode: Option<PermissionMode>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatusResponse {
    pub status: crate::model::ProjectStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<AgentMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<PermissionMode>,
    pub is_waiting_for_input: bool,
    pub waiting_version: u32,
    pub queued_message_count: usize,
}

impl From<AgentStatusSnapshot> for AgentStatusResponse {
    fn from(s: AgentStatusSnapshot) -> Self {
        Self {
            status: s.status,
            mode: s.mode,
            session_id: s.session_id,
            permission_mode: s.permission_mode,
            is_waiting_for_input: s.is_waiting_for_input,
            waiting_version: s.waiting_version,
            queued_message_count: s.queued_message_count,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub queued: Vec<QueuedMessageResponse>,
}

#[derive(Debug, Serialize)]
pub struct QueuedMessageResponse {
    pub text: String,
    pub images: Vec<String>,
}

impl From<QueuedMessage> for QueuedMessageResponse {
    fn from(q: QueuedMessage) -> Self {
        Self {
            text: q.text,
            images: q.images,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GlobalStatusResponse {
    #[serde(flatten)]
    pub status: GlobalStatus,
}

#[derive(Debug, Deserialize)]
pub struct ConversationsQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ConversationQuery {
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
pub struct RenameConversationRequest {
    pub label: String,
}

#[derive(Debug, Deserialize)]
pub struct SetCurrentConversationRequest {
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub ok: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}
