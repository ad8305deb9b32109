//! Durable stores: `ConversationStore` (§4.A) and `ProjectStore` (§4.B).
//!
//! Each store "exclusively owns disk files and [its own] write lock"
//! (spec.md §3 Ownership) and is handed a filesystem path by its
//! caller rather than reaching into the other store — `ConversationStore`
//! never looks a project up itself; `PROJECT_NOT_FOUND` (spec.md §4.A
//! failure modes) is raised by the caller (the supervisor / API layer)
//! before it ever calls into `ConversationStore`.

mod atomic;
mod conversation;
mod project;

pub use atomic::{read_json, write_json_atomic};
pub use conversation::{ConversationStore, MetadataPatch, SearchHit};
pub use project::FileProjectStore;

use thiserror::Error;

/// Lower-level store failures. Handlers convert these into
/// `ApiError` via `From` (see `error.rs`); callers on the
/// recovery path for corrupted files never see this type escape
/// (spec.md §7 propagation policy).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
