//! REST handlers (spec.md §6 HTTP/JSON surface).
//!
//! Grounded on the teacher's `api/handlers.rs` (`Router::new().route(...)`
//! wiring, `State(state): State<AppState>` extractors, `Json<T>`
//! request/response bodies), trimmed to the project/conversation/agent
//! endpoints spec.md §6 names. File-browse, git, roadmap, and settings
//! routes are external collaborators (spec.md §1) and are not
//! implemented here.

use std::path::PathBuf;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};

use super::types::{
    AgentStatusResponse, AutonomousStartRequest, ConversationQuery, ConversationsQuery,
    CreateProjectRequest, GlobalStatusResponse, InteractiveStartRequest, QueueResponse,
    QueuedMessageResponse, RenameConversationRequest, SearchQuery, SearchResponse,
    SendMessageRequest, SetCurrentConversationRequest, SuccessResponse,
};
use super::ws::ws_handler;
use super::AppState;
use crate::agent::{AgentMode, StartRequest};
use crate::error::ApiError;
use crate::model::Conversation;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/projects/:id", delete(delete_project))
        .route("/api/projects/:id/agent/start", post(start_autonomous))
        .route(
            "/api/projects/:id/agent/interactive",
            post(start_interactive),
        )
        .route("/api/projects/:id/agent/stop", post(stop_agent))
        .route("/api/projects/:id/agent/send", post(send_message))
        .route("/api/projects/:id/agent/status", get(agent_status))
        .route(
            "/api/projects/:id/agent/queue",
            get(get_queue).delete(clear_queue),
        )
        .route(
            "/api/projects/:id/agent/queue/:index",
            delete(remove_queued_message),
        )
        .route(
            "/api/projects/:id/conversations",
            get(list_conversations),
        )
        .route(
            "/api/projects/:id/conversation",
            get(get_conversation),
        )
        .route(
            "/api/projects/:id/conversation/current",
            put(set_current_conversation),
        )
        .route(
            "/api/projects/:id/conversation/clear",
            post(clear_conversation),
        )
        .route(
            "/api/projects/:id/conversations/:conv_id",
            put(rename_conversation),
        )
        .route(
            "/api/projects/:id/conversations/search",
            get(search_conversations),
        )
        .route("/api/agents/status", get(global_agent_status))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

fn project_conversations_dir(state: &AppState, project_id: &str) -> Result<PathBuf, ApiError> {
    state
        .project_store
        .get(project_id)
        .map(|p| p.conversations_dir())
        .ok_or_else(|| ApiError::NotFound(format!("project not found: {project_id}")))
}

async fn list_projects(State(state): State<AppState>) -> Json<Vec<crate::model::Project>> {
    Json(state.project_store.list())
}

async fn create_project(
    State(state): State<AppState>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<Json<crate::model::Project>, ApiError> {
    let project = state
        .project_store
        .create(req.name, std::path::Path::new(&req.path))?;
    Ok(Json(project))
}

async fn delete_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let _ = state.supervisor.stop(&id).await;
    state.project_store.delete(&id)?;
    Ok(Json(SuccessResponse::ok()))
}

fn project_path(state: &AppState, id: &str) -> Result<PathBuf, ApiError> {
    state
        .project_store
        .get(id)
        .map(|p| p.absolute_path)
        .ok_or_else(|| ApiError::NotFound(format!("project not found: {id}")))
}

async fn start_autonomous(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AutonomousStartRequest>,
) -> Result<Json<AgentStatusResponse>, ApiError> {
    let project_path = project_path(&state, &id)?;
    let request = StartRequest {
        project_path,
        initial_prompt: req.message,
        images: req.images,
        session_id: req.session_id,
        mode: AgentMode::Autonomous,
        permission_mode: req.permission_mode.unwrap_or(crate::agent::PermissionMode::AcceptEdits),
        model_override: None,
    };
    let snapshot = state.supervisor.start(&id, request).await?;
    Ok(Json(snapshot.into()))
}

async fn start_interactive(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<InteractiveStartRequest>,
) -> Result<Json<AgentStatusResponse>, ApiError> {
    let project_path = project_path(&state, &id)?;
    let request = StartRequest {
        project_path,
        initial_prompt: req.message,
        images: req.images,
        session_id: req.session_id,
        mode: AgentMode::Interactive,
        permission_mode: req.permission_mode.unwrap_or(crate::agent::PermissionMode::AcceptEdits),
        model_override: None,
    };
    let snapshot = state.supervisor.start(&id, request).await?;
    Ok(Json(snapshot.into()))
}

async fn stop_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state.supervisor.stop(&id).await?;
    Ok(Json(SuccessResponse::ok()))
}

async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state
        .supervisor
        .send_message(&id, req.message, req.images)
        .await?;
    Ok(Json(SuccessResponse::ok()))
}

async fn agent_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AgentStatusResponse>, ApiError> {
    match state.supervisor.status(&id) {
        Some(snapshot) => Ok(Json(snapshot.into())),
        None => {
            let project = state
                .project_store
                .get(&id)
                .ok_or_else(|| ApiError::NotFound(format!("project not found: {id}")))?;
            Ok(Json(AgentStatusResponse {
                status: project.status,
                mode: None,
                session_id: None,
                permission_mode: None,
                is_waiting_for_input: false,
                waiting_version: 0,
                queued_message_count: 0,
            }))
        }
    }
}

async fn get_queue(State(state): State<AppState>, Path(id): Path<String>) -> Json<QueueResponse> {
    let queued = state
        .supervisor
        .queue(&id)
        .into_iter()
        .map(QueuedMessageResponse::from)
        .collect();
    Json(QueueResponse { queued })
}

async fn remove_queued_message(
    State(state): State<AppState>,
    Path((id, index)): Path<(String, usize)>,
) -> Result<Json<SuccessResponse>, ApiError> {
    if state.supervisor.remove_queued_message(&id, index) {
        Ok(Json(SuccessResponse::ok()))
    } else {
        Err(ApiError::NotFound(format!("no queued message at index {index}")))
    }
}

async fn clear_queue(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<SuccessResponse> {
    state.supervisor.clear_queue(&id);
    Json(SuccessResponse::ok())
}

async fn list_conversations(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<ConversationsQuery>,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let dir = project_conversations_dir(&state, &id)?;
    let conversations = state.conversation_store.get_by_project(&dir, q.limit)?;
    Ok(Json(conversations))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<ConversationQuery>,
) -> Result<Json<Conversation>, ApiError> {
    let dir = project_conversations_dir(&state, &id)?;
    let conversation = state.conversation_store.find_by_id(&dir, &q.conversation_id)?;
    Ok(Json(conversation))
}

async fn set_current_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SetCurrentConversationRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let dir = project_conversations_dir(&state, &id)?;
    // Validates the conversation actually exists before pointing the
    // project at it (spec.md §4.A `findById` not-found semantics).
    state.conversation_store.find_by_id(&dir, &req.conversation_id)?;
    state.project_store.update(&id, |p| {
        p.current_conversation_id = Some(req.conversation_id.clone());
    })?;
    Ok(Json(SuccessResponse::ok()))
}

async fn clear_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<ConversationQuery>,
) -> Result<Json<Conversation>, ApiError> {
    let dir = project_conversations_dir(&state, &id)?;
    let conversation = state.conversation_store.clear_messages(&dir, &q.conversation_id)?;
    Ok(Json(conversation))
}

async fn rename_conversation(
    State(state): State<AppState>,
    Path((id, conv_id)): Path<(String, String)>,
    Json(req): Json<RenameConversationRequest>,
) -> Result<Json<Conversation>, ApiError> {
    let dir = project_conversations_dir(&state, &id)?;
    let conversation = state.conversation_store.rename(&dir, &conv_id, req.label)?;
    Ok(Json(conversation))
}

async fn search_conversations(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, ApiError> {
    let dir = project_conversations_dir(&state, &id)?;
    let hits = state.conversation_store.search(&dir, &q.q)?;
    Ok(Json(SearchResponse { hits }))
}

async fn global_agent_status(State(state): State<AppState>) -> Json<GlobalStatusResponse> {
    Json(GlobalStatusResponse {
        status: state.supervisor.global_status(),
    })
}
