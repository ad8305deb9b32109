//! Project registry types (spec.md §3, §4.B)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Lifecycle status of a project's agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Stopped,
    Queued,
    Running,
    Error,
}

impl Default for ProjectStatus {
    fn default() -> Self {
        ProjectStatus::Stopped
    }
}

/// Permission-gating overrides a project may carry between sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionOverrides {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

/// A registered project: one working directory supervised by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub absolute_path: PathBuf,
    pub status: ProjectStatus,
    #[serde(default)]
    pub current_conversation_id: Option<String>,
    #[serde(default)]
    pub last_context_usage: Option<f64>,
    #[serde(default)]
    pub permission_overrides: Option<PermissionOverrides>,
    #[serde(default)]
    pub model_override: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>, absolute_path: PathBuf) -> Self {
        let now = Utc::now();
        let id = derive_project_id(&absolute_path);
        Self {
            id,
            name: name.into(),
            absolute_path,
            status: ProjectStatus::Stopped,
            current_conversation_id: None,
            last_context_usage: None,
            permission_overrides: None,
            model_override: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Directory (relative to `absolute_path`) this server keeps its own
    /// state under, per spec.md §6 persisted-state layout.
    pub fn data_dir_name() -> &'static str {
        ".agent-supervisor"
    }

    pub fn data_dir(&self) -> PathBuf {
        self.absolute_path.join(Self::data_dir_name())
    }

    pub fn conversations_dir(&self) -> PathBuf {
        self.data_dir().join("conversations")
    }

    pub fn status_file(&self) -> PathBuf {
        self.data_dir().join("status.json")
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Deterministic id derivation from an absolute path (spec.md §3):
/// non-alphanumerics become `_`.
pub fn derive_project_id(path: &Path) -> String {
    path.to_string_lossy()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_derivation_is_deterministic_and_safe() {
        let a = derive_project_id(Path::new("/home/dev/my project!"));
        let b = derive_project_id(Path::new("/home/dev/my project!"));
        assert_eq!(a, b);
        assert_eq!(a, "_home_dev_my_project_");
    }

    #[test]
    fn distinct_paths_yield_distinct_ids() {
        let a = derive_project_id(Path::new("/a/b"));
        let b = derive_project_id(Path::new("/a_b"));
        // Not a strict invariant of the scheme, but these two happen to collide
        // under the substitution rule — document the known limitation instead
        // of asserting a false guarantee.
        assert_eq!(a, b);
    }
}
