//! AgentSupervisor (spec.md §4.E)
//!
//! Owns the `projectId → AgentRuntime` table and the FIFO waiting
//! queue, enforces `maxConcurrent`, and drives crash / mode-switch /
//! shutdown orchestration. Grounded on the teacher's `runtime::mod`
//! registry (`HashMap` of handles guarded by a single lock, "control
//! loop" comment) generalized from one conversation to one runtime per
//! project.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use super::child::{ChildProcess, SpawnedChild};
use super::runtime::{AgentMode, AgentRuntime, PermissionMode, RuntimeError, RuntimeResult, RuntimeStatus};
use crate::config::Config;
use crate::eventbus::{EventBus, EventKind};
use crate::model::ProjectStatus;
use crate::store::{ConversationStore, FileProjectStore};

/// Abstracts "turn a start request into a live `ChildProcess`" so
/// tests can substitute a `FakeChildProcess` fleet instead of spawning
/// real OS processes (mirrors the teacher's `runtime::traits` split of
/// interface from implementation).
#[async_trait]
pub trait ChildSpawner: Send + Sync {
    async fn spawn(
        &self,
        project_path: &std::path::Path,
        agent_bin: &str,
    ) -> RuntimeResult<Arc<dyn ChildProcess>>;
}

pub struct ProcessChildSpawner;

#[async_trait]
impl ChildSpawner for ProcessChildSpawner {
    async fn spawn(
        &self,
        project_path: &std::path::Path,
        agent_bin: &str,
    ) -> RuntimeResult<Arc<dyn ChildProcess>> {
        let child = SpawnedChild::spawn(agent_bin, &[], project_path, &[])
            .map_err(|e| RuntimeError::Spawn(e.to_string()))?;
        Ok(Arc::new(child))
    }
}

/// What a caller supplies to start or mode-switch a project's agent
/// (spec.md §4.D Startup parameters, minus the pieces the runtime
/// derives itself).
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub project_path: PathBuf,
    pub initial_prompt: Option<String>,
    pub images: Vec<String>,
    pub session_id: Option<String>,
    pub mode: AgentMode,
    pub permission_mode: PermissionMode,
    pub model_override: Option<String>,
}

/// `WaitingSlot` (spec.md §3): a queued start request, FIFO by
/// enqueue time.
struct WaitingSlot {
    project_id: String,
    enqueued_at: DateTime<Utc>,
    request: StartRequest,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatusSnapshot {
    pub status: ProjectStatus,
    pub mode: Option<AgentMode>,
    pub session_id: Option<String>,
    pub permission_mode: Option<PermissionMode>,
    pub is_waiting_for_input: bool,
    pub waiting_version: u32,
    pub queued_message_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStatus {
    pub running_count: usize,
    pub max_concurrent: usize,
    pub queued_count: usize,
    pub queued_projects: Vec<String>,
}

struct SupervisorState {
    runtimes: HashMap<String, Arc<AgentRuntime>>,
    waiting: VecDeque<WaitingSlot>,
}

pub struct AgentSupervisor {
    config: Config,
    project_store: Arc<FileProjectStore>,
    conversation_store: Arc<ConversationStore>,
    event_bus: Arc<EventBus>,
    spawner: Arc<dyn ChildSpawner>,
    state: Mutex<SupervisorState>,
}

impl AgentSupervisor {
    pub fn new(
        config: Config,
        project_store: Arc<FileProjectStore>,
        conversation_store: Arc<ConversationStore>,
        event_bus: Arc<EventBus>,
        spawner: Arc<dyn ChildSpawner>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            project_store,
            conversation_store,
            event_bus,
            spawner,
            state: Mutex::new(SupervisorState {
                runtimes: HashMap::new(),
                waiting: VecDeque::new(),
            }),
        })
    }

    fn running_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state
            .runtimes
            .values()
            .filter(|r| !matches!(r.status(), RuntimeStatus::Stopped { .. }))
            .count()
    }

    /// `start()` (spec.md §4.E Admission + Duplicate start).
    pub async fn start(self: &Arc<Self>, project_id: &str, request: StartRequest) -> RuntimeResult<AgentStatusSnapshot> {
        let existing = {
            let state = self.state.lock().unwrap();
            state.runtimes.get(project_id).cloned()
        };

        if let Some(runtime) = existing {
            if !matches!(runtime.status(), RuntimeStatus::Stopped { .. }) {
                if runtime.mode() == request.mode && runtime.permission_mode() == request.permission_mode {
                    return Ok(self.snapshot_of(&runtime));
                }
                // Deferred permission-mode switch (spec.md §4.D): while the
                // child is mid-turn, record the request and let the
                // monitor task drive the actual stop/respawn once the
                // child next reports `agent_waiting`.
                if runtime.mode() == request.mode
                    && matches!(runtime.status(), RuntimeStatus::Busy)
                {
                    runtime.request_permission_mode(request.permission_mode);
                    return Ok(self.snapshot_of(&runtime));
                }
                return self.mode_switch(project_id, runtime, request).await;
            }
        }

        self.admit_or_queue(project_id, request).await
    }

    async fn admit_or_queue(self: &Arc<Self>, project_id: &str, request: StartRequest) -> RuntimeResult<AgentStatusSnapshot> {
        let should_admit = {
            let mut state = self.state.lock().unwrap();
            state.runtimes.retain(|_, r| !matches!(r.status(), RuntimeStatus::Stopped { .. }));
            if state.runtimes.len() < self.config.max_concurrent {
                true
            } else {
                state.waiting.push_back(WaitingSlot {
                    project_id: project_id.to_string(),
                    enqueued_at: Utc::now(),
                    request,
                });
                false
            }
        };

        if !should_admit {
            let _ = self.project_store.set_status(project_id, ProjectStatus::Queued);
            self.publish_queue_change();
            return Ok(AgentStatusSnapshot {
                status: ProjectStatus::Queued,
                mode: None,
                session_id: None,
                permission_mode: None,
                is_waiting_for_input: false,
                waiting_version: 0,
                queued_message_count: 0,
            });
        }

        self.spawn_and_register(project_id, request).await
    }

    async fn spawn_and_register(self: &Arc<Self>, project_id: &str, request: StartRequest) -> RuntimeResult<AgentStatusSnapshot> {
        let child = self.spawner.spawn(&request.project_path, &self.config.agent_bin).await?;
        let params = super::runtime::StartParams {
            project_path: request.project_path.clone(),
            project_id: project_id.to_string(),
            initial_prompt: request.initial_prompt.clone(),
            images: request.images.clone(),
            session_id: request.session_id.clone(),
            mode: request.mode,
            permission_mode: request.permission_mode,
            model_override: request.model_override.clone(),
            agent_bin: self.config.agent_bin.clone(),
        };

        let conversations_dir = self
            .project_store
            .get(project_id)
            .map(|p| p.conversations_dir())
            .unwrap_or_else(|| request.project_path.join(".agent-supervisor").join("conversations"));

        let runtime = AgentRuntime::start(
            params,
            child,
            self.conversation_store.clone(),
            self.event_bus.clone(),
            conversations_dir,
        )
        .await?;

        {
            let mut state = self.state.lock().unwrap();
            state.runtimes.insert(project_id.to_string(), runtime.clone());
        }
        let _ = self.project_store.update(project_id, |p| {
            p.status = ProjectStatus::Running;
            p.current_conversation_id = Some(runtime.conversation_id().to_string());
        });

        self.spawn_monitor(project_id.to_string(), runtime.clone());
        Ok(self.snapshot_of(&runtime))
    }

    /// Spawn-a-task-per-runtime crash/exit watcher (spec.md §4.E Crash
    /// handling + Admission "when a runtime terminates, dequeue the
    /// head of the waiting FIFO").
    fn spawn_monitor(self: &Arc<Self>, project_id: String, runtime: Arc<AgentRuntime>) {
        let supervisor = self.clone();
        let watched_runtime = runtime.clone();
        let handle = tokio::spawn(async move {
            let mut status_rx = runtime.watch_status();
            loop {
                if status_rx.changed().await.is_err() {
                    break;
                }
                match status_rx.borrow().clone() {
                    RuntimeStatus::WaitingForInput { .. } => {
                        let _ = supervisor.apply_pending_permission_mode(&project_id).await;
                    }
                    RuntimeStatus::Stopped { crashed, needs_recovery } => {
                        supervisor.on_runtime_stopped(&project_id, crashed, needs_recovery).await;
                        break;
                    }
                    _ => {}
                }
            }
        });
        watched_runtime.set_monitor_abort(handle.abort_handle());
    }

    async fn on_runtime_stopped(self: &Arc<Self>, project_id: &str, crashed: bool, needs_recovery: bool) {
        let _ = self.project_store.set_status(project_id, ProjectStatus::Stopped);
        self.event_bus
            .publish(project_id, EventKind::AgentStopped, json!({"crashed": crashed}));

        if crashed && needs_recovery {
            if let Ok(new_conversation) = self
                .conversation_store
                .create(&self.conversations_dir_for(project_id), project_id, None)
            {
                self.event_bus.publish(
                    project_id,
                    EventKind::SessionRecovery,
                    json!({"newConversationId": new_conversation.id, "reason": "child_exited"}),
                );
                let _ = self.project_store.update(project_id, |p| {
                    p.current_conversation_id = Some(new_conversation.id.clone());
                });
            }
        }

        self.dequeue_next().await;
    }

    fn conversations_dir_for(&self, project_id: &str) -> PathBuf {
        self.project_store
            .get(project_id)
            .map(|p| p.conversations_dir())
            .unwrap_or_else(|| self.config.data_dir.join(project_id).join("conversations"))
    }

    async fn dequeue_next(self: &Arc<Self>) {
        let next = {
            let mut state = self.state.lock().unwrap();
            state.waiting.pop_front()
        };
        if let Some(slot) = next {
            self.publish_queue_change();
            let _ = self.admit_or_queue(&slot.project_id, slot.request).await;
        }
    }

    /// Mode-switch (spec.md §4.E "Duplicate start" + §4.D "Deferred
    /// permission-mode switch"): stop the current child, wait the
    /// configured delay, then respawn carrying the same `sessionId`.
    ///
    /// The old runtime's monitor task is aborted *before* it is
    /// cancelled, so this function — not the monitor — is the one that
    /// publishes the resulting `agent_stopped` and removes the runtime
    /// from the registry. Otherwise the monitor would independently
    /// observe the same `Stopped` transition and call `dequeue_next`,
    /// which could hand this project's about-to-be-reclaimed slot to a
    /// queued project and push concurrency past `maxConcurrent`.
    async fn mode_switch(
        self: &Arc<Self>,
        project_id: &str,
        runtime: Arc<AgentRuntime>,
        mut request: StartRequest,
    ) -> RuntimeResult<AgentStatusSnapshot> {
        let session_id = runtime.session_id();
        runtime.abort_monitor();
        runtime.cancel().await;
        self.event_bus
            .publish(project_id, EventKind::AgentStopped, json!({"crashed": false}));
        {
            let mut state = self.state.lock().unwrap();
            state.runtimes.remove(project_id);
        }
        tokio::time::sleep(self.config.mode_switch_delay).await;
        request.session_id = session_id;
        self.spawn_and_register(project_id, request).await
    }

    /// Drive a pending permission-mode switch once the runtime reports
    /// waiting-for-input (spec.md §4.D, S3). Call this from the event
    /// consumer whenever an `agent_waiting` event for `project_id` is
    /// observed.
    pub async fn apply_pending_permission_mode(self: &Arc<Self>, project_id: &str) -> RuntimeResult<()> {
        let runtime = {
            let state = self.state.lock().unwrap();
            state.runtimes.get(project_id).cloned()
        };
        let Some(runtime) = runtime else {
            return Err(RuntimeError::NotRunning);
        };
        let Some(new_mode) = runtime.take_pending_permission_mode() else {
            return Ok(());
        };
        let project_path = self
            .project_store
            .get(project_id)
            .map(|p| p.absolute_path)
            .ok_or(RuntimeError::NotRunning)?;
        let request = StartRequest {
            project_path,
            initial_prompt: None,
            images: vec![],
            session_id: runtime.session_id(),
            mode: runtime.mode(),
            permission_mode: new_mode,
            model_override: None,
        };
        self.mode_switch(project_id, runtime, request).await?;
        Ok(())
    }

    pub async fn stop(self: &Arc<Self>, project_id: &str) -> RuntimeResult<()> {
        let runtime = {
            let mut state = self.state.lock().unwrap();
            if let Some(pos) = state.waiting.iter().position(|s| s.project_id == project_id) {
                state.waiting.remove(pos);
                None
            } else {
                state.runtimes.remove(project_id)
            }
        };
        let _ = self.project_store.set_status(project_id, ProjectStatus::Stopped);
        match runtime {
            Some(runtime) => {
                runtime.cancel().await;
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub async fn send_message(&self, project_id: &str, text: String, images: Vec<String>) -> RuntimeResult<()> {
        let runtime = {
            let state = self.state.lock().unwrap();
            state.runtimes.get(project_id).cloned()
        };
        match runtime {
            Some(runtime) => runtime.send_message(text, images).await,
            None => Err(RuntimeError::NotRunning),
        }
    }

    pub fn status(&self, project_id: &str) -> Option<AgentStatusSnapshot> {
        let state = self.state.lock().unwrap();
        state.runtimes.get(project_id).map(|r| self.snapshot_of(r))
    }

    pub fn queue(&self, project_id: &str) -> Vec<super::runtime::QueuedMessage> {
        let state = self.state.lock().unwrap();
        state
            .runtimes
            .get(project_id)
            .map(|r| r.queued_messages())
            .unwrap_or_default()
    }

    pub fn remove_queued_message(&self, project_id: &str, index: usize) -> bool {
        let state = self.state.lock().unwrap();
        state
            .runtimes
            .get(project_id)
            .map(|r| r.remove_queued_message(index))
            .unwrap_or(false)
    }

    pub fn clear_queue(&self, project_id: &str) {
        let state = self.state.lock().unwrap();
        if let Some(r) = state.runtimes.get(project_id) {
            r.clear_queue();
        }
    }

    fn snapshot_of(&self, runtime: &Arc<AgentRuntime>) -> AgentStatusSnapshot {
        let status = match runtime.status() {
            RuntimeStatus::Stopped { .. } => ProjectStatus::Stopped,
            _ => ProjectStatus::Running,
        };
        AgentStatusSnapshot {
            status,
            mode: Some(runtime.mode()),
            session_id: runtime.session_id(),
            permission_mode: Some(runtime.permission_mode()),
            is_waiting_for_input: runtime.is_waiting_for_input(),
            waiting_version: runtime.waiting_version(),
            queued_message_count: runtime.queued_message_count(),
        }
    }

    pub fn global_status(&self) -> GlobalStatus {
        let state = self.state.lock().unwrap();
        let running_count = state
            .runtimes
            .values()
            .filter(|r| !matches!(r.status(), RuntimeStatus::Stopped { .. }))
            .count();
        GlobalStatus {
            running_count,
            max_concurrent: self.config.max_concurrent,
            queued_count: state.waiting.len(),
            queued_projects: state.waiting.iter().map(|s| s.project_id.clone()).collect(),
        }
    }

    fn publish_queue_change(&self) {
        let global = self.global_status();
        self.event_bus.publish(
            "*",
            EventKind::QueueChange,
            json!({"queuedCount": global.queued_count, "runningCount": global.running_count}),
        );
    }

    /// `shutdown()` (spec.md §4.E): cancel every runtime, then flush
    /// the conversation store, then return.
    pub async fn shutdown(&self) {
        let runtimes: Vec<Arc<AgentRuntime>> = {
            let mut state = self.state.lock().unwrap();
            state.waiting.clear();
            state.runtimes.drain().map(|(_, r)| r).collect()
        };
        for runtime in runtimes {
            runtime.cancel().await;
        }
        self.conversation_store.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::child::FakeChildProcess;
    use std::time::Duration;

    struct FakeSpawner {
        children: Mutex<VecDeque<Arc<dyn ChildProcess>>>,
    }

    #[async_trait]
    impl ChildSpawner for FakeSpawner {
        async fn spawn(&self, _project_path: &std::path::Path, _agent_bin: &str) -> RuntimeResult<Arc<dyn ChildProcess>> {
            Ok(self
                .children
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| FakeChildProcess::new(vec![])))
        }
    }

    fn test_config() -> Config {
        Config {
            data_dir: std::env::temp_dir(),
            port: 0,
            max_concurrent: 1,
            agent_bin: "claude".into(),
            mode_switch_delay: Duration::from_millis(5),
        }
    }

    fn request() -> StartRequest {
        StartRequest {
            project_path: PathBuf::from("/tmp/proj"),
            initial_prompt: None,
            images: vec![],
            session_id: None,
            mode: AgentMode::Interactive,
            permission_mode: PermissionMode::AcceptEdits,
            model_override: None,
        }
    }

    fn supervisor_with(
        children: Vec<Arc<dyn ChildProcess>>,
        max_concurrent: usize,
    ) -> (Arc<AgentSupervisor>, tempfile::TempDir) {
        let global = tempfile::tempdir().unwrap();
        let project_store = Arc::new(FileProjectStore::open(global.path()).unwrap());
        let conversation_store = Arc::new(ConversationStore::new(1000));
        let event_bus = Arc::new(EventBus::new(64));
        let spawner = Arc::new(FakeSpawner {
            children: Mutex::new(children.into()),
        });
        let mut config = test_config();
        config.max_concurrent = max_concurrent;
        (
            AgentSupervisor::new(config, project_store, conversation_store, event_bus, spawner),
            global,
        )
    }

    #[tokio::test]
    async fn second_start_while_at_capacity_is_queued() {
        let supervisor = supervisor_with(
            vec![FakeChildProcess::new(vec![]), FakeChildProcess::new(vec![])],
            1,
        );
        let snap1 = supervisor.start("p1", request()).await.unwrap();
        assert_eq!(snap1.status, ProjectStatus::Running);

        let snap2 = supervisor.start("p2", request()).await.unwrap();
        assert_eq!(snap2.status, ProjectStatus::Queued);

        let global = supervisor.global_status();
        assert_eq!(global.running_count, 1);
        assert_eq!(global.queued_count, 1);
    }

    #[tokio::test]
    async fn stopping_frees_a_slot_for_the_queued_project() {
        let supervisor = supervisor_with(
            vec![FakeChildProcess::new(vec![]), FakeChildProcess::new(vec![])],
            1,
        );
        supervisor.start("p1", request()).await.unwrap();
        supervisor.start("p2", request()).await.unwrap();

        supervisor.stop("p1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let global = supervisor.global_status();
        assert_eq!(global.running_count, 1);
        assert_eq!(global.queued_count, 0);
        assert_eq!(supervisor.status("p2").unwrap().status, ProjectStatus::Running);
    }

    #[tokio::test]
    async fn duplicate_start_same_mode_is_a_no_op() {
        let supervisor = supervisor_with(vec![FakeChildProcess::new(vec![])], 3);
        let first = supervisor.start("p1", request()).await.unwrap();
        let second = supervisor.start("p1", request()).await.unwrap();
        assert_eq!(first.status, second.status);
        assert_eq!(supervisor.global_status().running_count, 1);
    }
}
