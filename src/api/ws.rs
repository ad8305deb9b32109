//! WebSocket transport (spec.md §6 "WebSocket envelope").
//!
//! Grounded on the teacher's `api::sse::sse_stream` per-connection
//! broadcast loop, adapted from a one-way SSE stream to a duplex
//! WebSocket carrying `{type:"subscribe"|"unsubscribe", projectId}`
//! frames from the client and `{type, projectId, data}` frames to it
//! (spec.md §6), fanned out through `router::SubscriptionRouter`
//! (spec.md §4.F).

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::AppState;
use crate::eventbus::{AgentEvent, EventKind};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Subscribe { #[serde(rename = "projectId")] project_id: String },
    Unsubscribe { #[serde(rename = "projectId")] project_id: String },
}

#[derive(Debug, Serialize)]
struct ServerFrame {
    #[serde(rename = "type")]
    frame_type: &'static str,
    #[serde(rename = "projectId")]
    project_id: String,
    data: Value,
}

/// Coarse wire `type` for a frame (spec.md §6 enumerates
/// `agent_message | agent_status | agent_waiting | queue_change |
/// session_recovery | roadmap_message`); the finer-grained
/// `EventKind` (spec.md §4.C) is carried inside `data.kind` so clients
/// that care can still distinguish e.g. `tool_use_started` from a
/// plain assistant chunk.
fn wire_type(kind: EventKind) -> &'static str {
    match kind {
        EventKind::AgentStatus => "agent_status",
        EventKind::AgentWaiting => "agent_waiting",
        EventKind::QueueChange => "queue_change",
        EventKind::SessionRecovery => "session_recovery",
        EventKind::UserSentMessage
        | EventKind::ToolUseStarted
        | EventKind::ToolUseCompleted
        | EventKind::AssistantResponseCompleted
        | EventKind::AgentStarted
        | EventKind::AgentStopped
        | EventKind::AgentMessage => "agent_message",
    }
}

fn to_server_frame(event: AgentEvent) -> ServerFrame {
    let mut data = event.payload;
    if let Value::Object(ref mut map) = data {
        map.insert("kind".to_string(), Value::String(format!("{:?}", event.kind)));
    }
    ServerFrame {
        frame_type: wire_type(event.kind),
        project_id: event.project_id,
        data,
    }
}

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut client = state.router.client();

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(ClientFrame::Subscribe { project_id }) => {
                                client.subscribe(project_id.clone());
                                if let Some(snapshot) = state.supervisor.status(&project_id) {
                                    let frame = ServerFrame {
                                        frame_type: "agent_status",
                                        project_id,
                                        data: serde_json::to_value(
                                            super::types::AgentStatusResponse::from(snapshot),
                                        )
                                        .unwrap_or(Value::Null),
                                    };
                                    if send_frame(&mut socket, &frame).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Ok(ClientFrame::Unsubscribe { project_id }) => {
                                client.unsubscribe(&project_id);
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "unrecognized websocket client frame");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "websocket receive error");
                        break;
                    }
                }
            }
            event = client.recv() => {
                match event {
                    Ok(event) => {
                        let frame = to_server_frame(event);
                        if send_frame(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).unwrap_or_default();
    socket.send(WsMessage::Text(text)).await
}
