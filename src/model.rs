//! Core data model (spec.md §3)

mod conversation;
mod message;
mod project;

pub use conversation::{Conversation, ConversationMetadata, DEFAULT_MAX_MESSAGES};
pub use message::{Message, MessageBody, PlanModeAction, ToolResultStatus};
pub use project::{derive_project_id, PermissionOverrides, Project, ProjectStatus};
