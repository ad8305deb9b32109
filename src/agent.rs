//! Agent subsystem: one child coding-assistant process per running
//! project (spec.md §4.D AgentRuntime), the admission/FIFO/crash
//! orchestration around it (§4.E AgentSupervisor), the child-prompt
//! classifier (§4.G PromptInterpreter), and the small supporting
//! pieces (stdout envelope schema, read-cache) those two lean on.

mod child;
mod envelope;
mod prompt;
mod read_cache;
mod runtime;
mod supervisor;

pub use child::{ChildProcess, FakeChildProcess, SpawnedChild};
pub use envelope::{ChildEnvelope, ChildInputFrame, PromptType, ToolResultStatusWire};
pub use prompt::{InterpretedPrompt, PlanFileTracker, PromptInterpreter};
pub use read_cache::ReadCache;
pub use runtime::{
    AgentMode, AgentRuntime, PermissionMode, QueuedMessage, RuntimeError, RuntimeResult,
    RuntimeStatus, StartParams,
};
pub use supervisor::{
    AgentStatusSnapshot, AgentSupervisor, ChildSpawner, GlobalStatus, ProcessChildSpawner,
    StartRequest,
};
