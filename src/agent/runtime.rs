//! AgentRuntime (spec.md §4.D)
//!
//! One instance wraps a single child coding-assistant process for one
//! project for one session. Grounded on the teacher's
//! `runtime::executor` task-per-resource shape (a dedicated reader
//! task over the owned I/O handle, state transitions published
//! through a channel rather than touched from multiple tasks directly)
//! and on the `clawde-io-apps` session runners for the stdin-writer/
//! stdout-reader split over a persistent child.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use super::child::ChildProcess;
use super::envelope::{ChildEnvelope, ChildInputFrame};
use super::prompt::{PlanFileTracker, PromptInterpreter};
use super::read_cache::ReadCache;
use crate::eventbus::{EventBus, EventKind};
use crate::model::{Message, MessageBody};
use crate::store::{ConversationStore, MetadataPatch, StoreError};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("agent is not running")]
    NotRunning,
    #[error("agent is already running")]
    AlreadyRunning,
    #[error("failed to spawn child: {0}")]
    Spawn(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    Interactive,
    Autonomous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    AcceptEdits,
    Plan,
}

#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub text: String,
    pub images: Vec<String>,
}

/// Parameters for starting one child (spec.md §4.D Startup).
pub struct StartParams {
    pub project_path: PathBuf,
    pub project_id: String,
    pub initial_prompt: Option<String>,
    pub images: Vec<String>,
    pub session_id: Option<String>,
    pub mode: AgentMode,
    pub permission_mode: PermissionMode,
    pub model_override: Option<String>,
    pub agent_bin: String,
}

/// Coarse runtime status mirroring the state diagram of spec.md §4.D.
/// `Starting`/`Failed` are transient and observed only through the
/// `Err` return of `AgentRuntime::start`; everything the rest of the
/// system watches flows through this enum.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeStatus {
    Idle,
    Busy,
    WaitingForInput { version: u32 },
    Stopped { crashed: bool, needs_recovery: bool },
}

/// One live session's worth of child-process supervision.
pub struct AgentRuntime {
    pub project_id: String,
    conversation_id: String,
    conversations_dir: PathBuf,
    mode: AgentMode,
    permission_mode: Mutex<PermissionMode>,
    pending_permission_mode: Mutex<Option<PermissionMode>>,
    session_id: Mutex<Option<String>>,
    spawn_command: String,
    started_at: DateTime<Utc>,
    last_activity_at: Mutex<DateTime<Utc>>,

    is_waiting_for_input: AtomicBool,
    waiting_version: AtomicU32,
    queued_user_messages: Mutex<VecDeque<QueuedMessage>>,

    /// Id of the in-progress assistant message for the current turn,
    /// so streamed text chunks extend one `Message` instead of minting
    /// a fresh one each (spec.md §4.D). Cleared when the turn ends
    /// (`ContextUsage` → `Idle`) and when the next turn starts.
    current_assistant_message: Mutex<Option<String>>,

    read_cache: Mutex<ReadCache>,
    plan_tracker: Mutex<PlanFileTracker>,

    child: Arc<dyn ChildProcess>,
    stdin_tx: mpsc::UnboundedSender<String>,
    store: Arc<ConversationStore>,
    event_bus: Arc<EventBus>,

    status_tx: watch::Sender<RuntimeStatus>,
    status_rx: watch::Receiver<RuntimeStatus>,
    cancel: CancellationToken,

    /// Handle to the Supervisor's per-runtime monitor task (spec.md
    /// §4.E), so a mode-switch can abort it before removing this
    /// runtime from the registry — otherwise the monitor's own
    /// crash-watcher would race the switch's own remove-then-respawn
    /// and could hand the freed slot to a queued project.
    monitor_abort: Mutex<Option<AbortHandle>>,
}

impl AgentRuntime {
    /// Spawn the reader/writer tasks around an already-constructed
    /// `ChildProcess` (the supervisor is responsible for the actual OS
    /// spawn, via `SpawnedChild::spawn`, or a `FakeChildProcess` in
    /// tests) and bring the session to `RUNNING_IDLE`.
    pub async fn start(
        params: StartParams,
        child: Arc<dyn ChildProcess>,
        store: Arc<ConversationStore>,
        event_bus: Arc<EventBus>,
        conversations_dir: PathBuf,
    ) -> RuntimeResult<Arc<Self>> {
        let conversation = store.create(&conversations_dir, &params.project_id, None)?;
        let spawn_command = format!(
            "{} (cwd={})",
            params.agent_bin,
            params.project_path.display()
        );

        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
        let (status_tx, status_rx) = watch::channel(RuntimeStatus::Idle);

        let runtime = Arc::new(Self {
            project_id: params.project_id.clone(),
            conversation_id: conversation.id.clone(),
            conversations_dir,
            mode: params.mode,
            permission_mode: Mutex::new(params.permission_mode),
            pending_permission_mode: Mutex::new(None),
            session_id: Mutex::new(params.session_id.clone()),
            spawn_command,
            started_at: Utc::now(),
            last_activity_at: Mutex::new(Utc::now()),
            is_waiting_for_input: AtomicBool::new(false),
            waiting_version: AtomicU32::new(0),
            queued_user_messages: Mutex::new(VecDeque::new()),
            current_assistant_message: Mutex::new(None),
            read_cache: Mutex::new(ReadCache::new()),
            plan_tracker: Mutex::new(PlanFileTracker::default()),
            child: child.clone(),
            stdin_tx,
            store,
            event_bus,
            status_tx,
            status_rx,
            cancel: CancellationToken::new(),
            monitor_abort: Mutex::new(None),
        });

        // Writer task: single serialized path to the child's stdin.
        let writer_child = child.clone();
        let writer_cancel = runtime.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    line = stdin_rx.recv() => {
                        match line {
                            Some(line) => {
                                if let Err(e) = writer_child.write_line(&line).await {
                                    tracing::warn!(error = %e, "failed writing to child stdin");
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        if let Some(prompt) = params.initial_prompt.clone() {
            let msg = Message::new(MessageBody::User {
                text: prompt.clone(),
                images: params.images.clone(),
            });
            runtime.store.add_message(&runtime.conversations_dir, &runtime.conversation_id, msg)?;
            runtime
                .event_bus
                .publish(&runtime.project_id, EventKind::UserSentMessage, json!({"text": prompt}));
            let frame = ChildInputFrame {
                text: prompt,
                images: params.images,
                session_id: params.session_id,
            };
            let line = serde_json::to_string(&frame).expect("input frame always serializes");
            runtime
                .stdin_tx
                .send(line)
                .map_err(|_| RuntimeError::Spawn("stdin channel closed immediately".into()))?;
            runtime.set_status(RuntimeStatus::Busy);
        }

        // Reader task: one line of child stdout at a time, dispatched
        // into the conversation + event bus.
        let reader = runtime.clone();
        tokio::spawn(async move {
            reader.run_reader_loop().await;
        });

        runtime
            .event_bus
            .publish(&runtime.project_id, EventKind::AgentStarted, json!({"conversationId": runtime.conversation_id}));

        Ok(runtime)
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn mode(&self) -> AgentMode {
        self.mode
    }

    pub fn permission_mode(&self) -> PermissionMode {
        *self.permission_mode.lock().unwrap()
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().unwrap().clone()
    }

    pub fn spawn_command(&self) -> &str {
        &self.spawn_command
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_waiting_for_input(&self) -> bool {
        self.is_waiting_for_input.load(Ordering::SeqCst)
    }

    pub fn waiting_version(&self) -> u32 {
        self.waiting_version.load(Ordering::SeqCst)
    }

    pub fn queued_message_count(&self) -> usize {
        self.queued_user_messages.lock().unwrap().len()
    }

    pub fn status(&self) -> RuntimeStatus {
        self.status_rx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<RuntimeStatus> {
        self.status_rx.clone()
    }

    fn is_stopped(&self) -> bool {
        matches!(*self.status_rx.borrow(), RuntimeStatus::Stopped { .. })
    }

    fn set_status(&self, status: RuntimeStatus) {
        let _ = self.status_tx.send(status);
    }

    /// Called once by `AgentSupervisor::spawn_monitor` right after it
    /// spawns this runtime's watcher task.
    pub fn set_monitor_abort(&self, handle: AbortHandle) {
        *self.monitor_abort.lock().unwrap() = Some(handle);
    }

    /// Stop the monitor task without touching the child or the status
    /// channel — used by mode-switch, which handles the `Stopped`
    /// transition itself instead of letting the monitor race it.
    pub fn abort_monitor(&self) {
        if let Some(handle) = self.monitor_abort.lock().unwrap().take() {
            handle.abort();
        }
    }

    fn clear_waiting(&self) {
        self.is_waiting_for_input.store(false, Ordering::SeqCst);
        self.waiting_version.fetch_add(1, Ordering::SeqCst);
    }

    /// Deferred permission-mode switch (spec.md §4.D "Deferred
    /// permission-mode switch"): while the child is mid-operation the
    /// new mode is only recorded; the Supervisor inspects
    /// `take_pending_permission_mode` once `agent_waiting` fires and
    /// drives the actual stop/respawn.
    pub fn request_permission_mode(&self, mode: PermissionMode) {
        if *self.permission_mode.lock().unwrap() == mode {
            return;
        }
        *self.pending_permission_mode.lock().unwrap() = Some(mode);
    }

    pub fn take_pending_permission_mode(&self) -> Option<PermissionMode> {
        self.pending_permission_mode.lock().unwrap().take()
    }

    /// `sendMessage(text, images[])` (spec.md §4.D). Queued while the
    /// child is mid-turn and not currently waiting for a reply;
    /// delivered immediately otherwise — including as the reply to an
    /// open blocking prompt (spec.md §4.G).
    pub async fn send_message(&self, text: String, images: Vec<String>) -> RuntimeResult<()> {
        if self.is_stopped() {
            return Err(RuntimeError::NotRunning);
        }
        let waiting = self.is_waiting_for_input.load(Ordering::SeqCst);
        let busy = matches!(*self.status_rx.borrow(), RuntimeStatus::Busy);
        if busy && !waiting {
            self.queued_user_messages
                .lock()
                .unwrap()
                .push_back(QueuedMessage { text, images });
            self.publish_queue_change();
            return Ok(());
        }
        self.deliver_user_message(text, images)
    }

    /// Enumerate queued slots (REST surface, spec.md §6).
    pub fn queued_messages(&self) -> Vec<QueuedMessage> {
        self.queued_user_messages.lock().unwrap().iter().cloned().collect()
    }

    pub fn remove_queued_message(&self, index: usize) -> bool {
        let mut queue = self.queued_user_messages.lock().unwrap();
        if index < queue.len() {
            queue.remove(index);
            drop(queue);
            self.publish_queue_change();
            true
        } else {
            false
        }
    }

    pub fn clear_queue(&self) {
        self.queued_user_messages.lock().unwrap().clear();
        self.publish_queue_change();
    }

    fn publish_queue_change(&self) {
        self.event_bus.publish(
            &self.project_id,
            EventKind::QueueChange,
            json!({"queuedMessageCount": self.queued_message_count()}),
        );
    }

    fn deliver_user_message(&self, text: String, images: Vec<String>) -> RuntimeResult<()> {
        let message = Message::new(MessageBody::User {
            text: text.clone(),
            images: images.clone(),
        });
        self.store.add_message(&self.conversations_dir, &self.conversation_id, message)?;
        self.event_bus
            .publish(&self.project_id, EventKind::UserSentMessage, json!({"text": text}));
        self.clear_waiting();
        *self.current_assistant_message.lock().unwrap() = None;
        self.set_status(RuntimeStatus::Busy);

        let frame = ChildInputFrame {
            text,
            images,
            session_id: self.session_id(),
        };
        let line = serde_json::to_string(&frame).expect("input frame always serializes");
        self.stdin_tx
            .send(line)
            .map_err(|_| RuntimeError::NotRunning)?;
        Ok(())
    }

    /// Drain one queued message once the child is ready to accept
    /// input again (spec.md §4.D "the runtime drains this queue in
    /// order").
    fn drain_queue_if_idle(&self) {
        if matches!(*self.status_rx.borrow(), RuntimeStatus::Busy) {
            return;
        }
        let next = self.queued_user_messages.lock().unwrap().pop_front();
        if let Some(QueuedMessage { text, images }) = next {
            self.publish_queue_change();
            let _ = self.deliver_user_message(text, images);
        }
    }

    /// SIGTERM → grace → SIGKILL, then STOPPED (spec.md §4.D
    /// Cancellation). Queued messages are dropped. The `agent_stopped`
    /// event itself is published once, by the Supervisor's monitor
    /// task watching this transition (spec.md §4.C one-event-per-
    /// transition contract), not here.
    pub async fn cancel(&self) {
        self.cancel.cancel();
        self.child.terminate(std::time::Duration::from_secs(5)).await;
        self.queued_user_messages.lock().unwrap().clear();
        self.set_status(RuntimeStatus::Stopped {
            crashed: false,
            needs_recovery: false,
        });
    }

    async fn run_reader_loop(self: Arc<Self>) {
        loop {
            let line = tokio::select! {
                _ = self.cancel.cancelled() => break,
                line = self.child.next_line() => line,
            };
            match line {
                Ok(Some(raw)) => self.handle_line(&raw),
                Ok(None) => {
                    self.handle_child_exit();
                    break;
                }
                Err(e) => {
                    tracing::warn!(project_id = %self.project_id, error = %e, "error reading child stdout");
                    self.handle_child_exit();
                    break;
                }
            }
        }
    }

    fn handle_line(&self, raw: &str) {
        *self.last_activity_at.lock().unwrap() = Utc::now();
        let envelope = match ChildEnvelope::parse_line(raw) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(project_id = %self.project_id, error = %e, raw, "unparseable child stdout line");
                return;
            }
        };

        if matches!(*self.status_rx.borrow(), RuntimeStatus::Idle) {
            self.set_status(RuntimeStatus::Busy);
        }

        if let Some(interpreted) = PromptInterpreter::interpret(&envelope, self.plan_tracker.lock().unwrap().current())
        {
            let version = self.waiting_version.fetch_add(1, Ordering::SeqCst) + 1;
            self.is_waiting_for_input.store(true, Ordering::SeqCst);
            self.set_status(RuntimeStatus::WaitingForInput { version });
            if let Err(e) = self.append(interpreted.body) {
                tracing::warn!(project_id = %self.project_id, error = %e, "failed to append prompt message");
            }
            self.event_bus.publish(
                &self.project_id,
                EventKind::AgentWaiting,
                json!({"isWaiting": true, "version": version}),
            );
            let _ = interpreted.blocks_input;
            return;
        }

        match envelope {
            ChildEnvelope::Assistant { text } => {
                let mut current = self.current_assistant_message.lock().unwrap();
                match current.clone() {
                    Some(message_id) => {
                        if let Err(e) = self.store.extend_assistant_message(
                            &self.conversations_dir,
                            &self.conversation_id,
                            &message_id,
                            &text,
                        ) {
                            tracing::warn!(project_id = %self.project_id, error = %e, "failed to extend assistant message");
                        }
                    }
                    None => {
                        let message = Message::new(MessageBody::Assistant { text });
                        let message_id = message.id.clone();
                        match self.store.add_message(&self.conversations_dir, &self.conversation_id, message) {
                            Ok(_) => *current = Some(message_id),
                            Err(e) => {
                                tracing::warn!(project_id = %self.project_id, error = %e, "failed to append assistant message");
                            }
                        }
                    }
                }
            }
            ChildEnvelope::ToolUse { id, name, input } => {
                if name == "Read" {
                    if let Some(path) = input.get("file_path").and_then(|v| v.as_str()) {
                        self.read_cache.lock().unwrap().record(path);
                    }
                } else if name == "Write" || name == "Edit" {
                    if let Some(path) = input.get("file_path").and_then(|v| v.as_str()) {
                        self.plan_tracker.lock().unwrap().note_write(path);
                    }
                }
                if let Err(e) = self.append(MessageBody::ToolUse {
                    tool_id: id.clone(),
                    name: name.clone(),
                    input,
                }) {
                    tracing::warn!(project_id = %self.project_id, error = %e, "failed to append tool_use message");
                }
                self.event_bus.publish(
                    &self.project_id,
                    EventKind::ToolUseStarted,
                    json!({"toolId": id, "name": name}),
                );
            }
            ChildEnvelope::ToolResult {
                tool_use_id,
                status,
                content,
            } => {
                let status = match status {
                    super::envelope::ToolResultStatusWire::Completed => crate::model::ToolResultStatus::Completed,
                    super::envelope::ToolResultStatusWire::Failed => crate::model::ToolResultStatus::Failed,
                };
                if let Err(e) = self.append(MessageBody::ToolResult {
                    tool_id: tool_use_id.clone(),
                    status,
                    result_content: content,
                }) {
                    tracing::warn!(project_id = %self.project_id, error = %e, "failed to append tool_result message");
                }
                self.event_bus.publish(
                    &self.project_id,
                    EventKind::ToolUseCompleted,
                    json!({"toolId": tool_use_id}),
                );
            }
            ChildEnvelope::ContextUsage { used_fraction } => {
                if let Err(e) = self.store.update_metadata(
                    &self.conversations_dir,
                    &self.conversation_id,
                    MetadataPatch {
                        context_usage: Some(used_fraction),
                        session_id: None,
                    },
                ) {
                    tracing::warn!(project_id = %self.project_id, error = %e, "failed to update context usage");
                }
                self.event_bus.publish(
                    &self.project_id,
                    EventKind::AgentStatus,
                    json!({"usedFraction": used_fraction}),
                );
                self.event_bus
                    .publish(&self.project_id, EventKind::AssistantResponseCompleted, json!({}));
                *self.current_assistant_message.lock().unwrap() = None;
                self.set_status(RuntimeStatus::Idle);
                self.drain_queue_if_idle();
            }
            ChildEnvelope::Compaction { summary } => {
                if let Err(e) = self.append(MessageBody::Compaction { summary }) {
                    tracing::warn!(project_id = %self.project_id, error = %e, "failed to append compaction message");
                }
            }
            ChildEnvelope::System { session_id } => {
                if let Some(session_id) = session_id {
                    *self.session_id.lock().unwrap() = Some(session_id.clone());
                    if let Err(e) = self.store.update_metadata(
                        &self.conversations_dir,
                        &self.conversation_id,
                        MetadataPatch {
                            context_usage: None,
                            session_id: Some(session_id),
                        },
                    ) {
                        tracing::warn!(project_id = %self.project_id, error = %e, "failed to persist session id");
                    }
                }
            }
            ChildEnvelope::Prompt { .. } => unreachable!("handled above via PromptInterpreter"),
            ChildEnvelope::Unknown => {
                tracing::debug!(project_id = %self.project_id, raw, "unrecognized envelope, ignoring");
            }
        }
    }

    fn append(&self, body: MessageBody) -> RuntimeResult<()> {
        self.store
            .add_message(&self.conversations_dir, &self.conversation_id, Message::new(body))?;
        Ok(())
    }

    /// spec.md §4.D "Crash & session recovery": pending intent means
    /// either direction of an unfinished exchange at the moment the
    /// child disappears — a blocking prompt the human hasn't answered,
    /// a turn the human is still waiting on (`Busy`), or a queued
    /// follow-up that was never delivered. The decision itself lives
    /// here; acting on it (new conversation + `session_recovery`
    /// event, and the single `agent_stopped` publish) is the
    /// Supervisor's job (spec.md §4.E), which watches `status()`.
    fn handle_child_exit(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        let had_pending_intent = self.is_waiting_for_input.load(Ordering::SeqCst)
            || matches!(*self.status_rx.borrow(), RuntimeStatus::Busy)
            || !self.queued_user_messages.lock().unwrap().is_empty();
        self.set_status(RuntimeStatus::Stopped {
            crashed: true,
            needs_recovery: had_pending_intent,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::child::FakeChildProcess;

    fn harness() -> (Arc<ConversationStore>, Arc<EventBus>, PathBuf, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (
            Arc::new(ConversationStore::new(1000)),
            Arc::new(EventBus::new(64)),
            dir.path().to_path_buf(),
            dir,
        )
    }

    fn params(project_id: &str) -> StartParams {
        StartParams {
            project_path: PathBuf::from("/tmp/project"),
            project_id: project_id.to_string(),
            initial_prompt: Some("hello".into()),
            images: vec![],
            session_id: None,
            mode: AgentMode::Interactive,
            permission_mode: PermissionMode::AcceptEdits,
            model_override: None,
            agent_bin: "claude".into(),
        }
    }

    #[tokio::test]
    async fn initial_prompt_is_appended_then_written_to_stdin() {
        let (store, bus, convs_dir, _tmp) = harness();
        let child = FakeChildProcess::new(vec![]);
        let runtime = AgentRuntime::start(params("p1"), child.clone(), store.clone(), bus, convs_dir.clone())
            .await
            .unwrap();

        let messages = store.get_messages(&convs_dir, runtime.conversation_id(), None).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(matches!(&messages[0].body, MessageBody::User { text, .. } if text == "hello"));

        // give the writer task a tick to drain the channel
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let written = child.written_lines().await;
        assert_eq!(written.len(), 1);
        assert!(written[0].contains("hello"));
    }

    #[tokio::test]
    async fn assistant_chunk_and_context_usage_flow_through() {
        let (store, bus, convs_dir, _tmp) = harness();
        let child = FakeChildProcess::new(vec![
            r#"{"type":"assistant","text":"hi there"}"#.into(),
            r#"{"type":"context_usage","used_fraction":0.2}"#.into(),
        ]);
        let mut start_params = params("p2");
        start_params.initial_prompt = None;
        let runtime = AgentRuntime::start(start_params, child, store.clone(), bus, convs_dir.clone())
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        let messages = store.get_messages(&convs_dir, runtime.conversation_id(), None).unwrap();
        assert!(messages
            .iter()
            .any(|m| matches!(&m.body, MessageBody::Assistant { text } if text == "hi there")));
        assert_eq!(runtime.status(), RuntimeStatus::Idle);
    }

    #[tokio::test]
    async fn assistant_chunks_extend_one_message_per_turn() {
        let (store, bus, convs_dir, _tmp) = harness();
        let child = FakeChildProcess::new(vec![
            r#"{"type":"assistant","text":"hi "}"#.into(),
            r#"{"type":"assistant","text":"there"}"#.into(),
            r#"{"type":"context_usage","used_fraction":0.2}"#.into(),
        ]);
        let mut start_params = params("p2b");
        start_params.initial_prompt = None;
        let runtime = AgentRuntime::start(start_params, child, store.clone(), bus, convs_dir.clone())
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        let messages = store.get_messages(&convs_dir, runtime.conversation_id(), None).unwrap();
        let assistant_messages: Vec<_> = messages
            .iter()
            .filter(|m| matches!(m.body, MessageBody::Assistant { .. }))
            .collect();
        assert_eq!(assistant_messages.len(), 1, "chunks of one turn must extend a single message");
        assert!(matches!(&assistant_messages[0].body, MessageBody::Assistant { text } if text == "hi there"));
    }

    #[tokio::test]
    async fn permission_prompt_sets_waiting_and_blocks_queue_draining() {
        let (store, bus, convs_dir, _tmp) = harness();
        let child = FakeChildProcess::new(vec![
            r#"{"type":"prompt","prompt_type":"permission","tool":"Bash","action":"run `rm -rf /tmp/x`"}"#.into(),
        ]);
        let mut start_params = params("p3");
        start_params.initial_prompt = None;
        let runtime = AgentRuntime::start(start_params, child, store, bus, convs_dir)
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(runtime.is_waiting_for_input());
        assert!(matches!(runtime.status(), RuntimeStatus::WaitingForInput { .. }));
    }

    #[tokio::test]
    async fn send_message_while_busy_is_queued_then_drained_on_idle() {
        let (store, bus, convs_dir, _tmp) = harness();
        let child = FakeChildProcess::new(vec![]);
        let mut start_params = params("p4");
        start_params.initial_prompt = None;
        let runtime = AgentRuntime::start(start_params, child.clone(), store, bus, convs_dir)
            .await
            .unwrap();

        // Force busy without using up the idle->busy auto-transition.
        child.push_stdout(r#"{"type":"assistant","text":"working"}"#);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(runtime.status(), RuntimeStatus::Busy);

        runtime.send_message("follow up".into(), vec![]).await.unwrap();
        assert_eq!(runtime.queued_message_count(), 1);

        child.push_stdout(r#"{"type":"context_usage","used_fraction":0.1}"#);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(runtime.queued_message_count(), 0);
    }

    #[tokio::test]
    async fn child_exit_with_no_pending_intent_is_not_flagged_for_recovery() {
        let (store, bus, convs_dir, _tmp) = harness();
        let child = FakeChildProcess::new(vec![]);
        let mut start_params = params("p5");
        start_params.initial_prompt = None;
        let runtime = AgentRuntime::start(start_params, child.clone(), store, bus, convs_dir)
            .await
            .unwrap();

        child.terminate(std::time::Duration::from_millis(1)).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        match runtime.status() {
            RuntimeStatus::Stopped { crashed, needs_recovery } => {
                assert!(crashed);
                assert!(!needs_recovery);
            }
            other => panic!("expected Stopped, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_terminates_and_drops_queue() {
        let (store, bus, convs_dir, _tmp) = harness();
        let child = FakeChildProcess::new(vec![]);
        let mut start_params = params("p6");
        start_params.initial_prompt = None;
        let runtime = AgentRuntime::start(start_params, child.clone(), store, bus, convs_dir)
            .await
            .unwrap();

        runtime.cancel().await;
        assert!(child.is_terminated());
        assert!(matches!(runtime.status(), RuntimeStatus::Stopped { crashed: false, .. }));
    }
}
