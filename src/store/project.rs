//! ProjectStore (spec.md §4.B)
//!
//! Grounded on the teacher's `db::Database` CRUD-handle shape
//! (`Arc<Mutex<_>>`-guarded registry, thiserror-driven not-found
//! errors), rebuilt around an index file plus one `status.json` per
//! project instead of a `rusqlite::Connection`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use super::atomic::{read_json, write_json_atomic};
use super::{StoreError, StoreResult};
use crate::model::{derive_project_id, Project, ProjectStatus};

/// One entry in the global project index (`<globalDataDir>/projects/index.json`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct IndexEntry {
    id: String,
    absolute_path: PathBuf,
}

/// Thread-safe, file-backed project registry.
///
/// Single-writer from the HTTP layer (spec.md §4.B): the in-memory map
/// is guarded by a plain `RwLock` rather than a per-key lock, since the
/// spec does not require per-project write serialization the way
/// `ConversationStore` does.
#[derive(Clone)]
pub struct FileProjectStore {
    global_data_dir: PathBuf,
    projects: Arc<RwLock<HashMap<String, Project>>>,
}

impl FileProjectStore {
    /// Open (creating if absent) the registry rooted at `global_data_dir`,
    /// loading the index and each project's `status.json`.
    pub fn open(global_data_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let global_data_dir = global_data_dir.into();
        std::fs::create_dir_all(&global_data_dir)?;
        let store = Self {
            global_data_dir,
            projects: Arc::new(RwLock::new(HashMap::new())),
        };
        store.reload()?;
        Ok(store)
    }

    fn index_path(&self) -> PathBuf {
        self.global_data_dir.join("projects").join("index.json")
    }

    fn reload(&self) -> StoreResult<()> {
        let index_path = self.index_path();
        let entries: Vec<IndexEntry> = if index_path.exists() {
            match read_json(&index_path) {
                Ok(v) => v,
                Err(_) => {
                    tracing::warn!(path = %index_path.display(), "corrupted project index, starting empty");
                    let _ = std::fs::remove_file(&index_path);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let mut loaded = HashMap::new();
        for entry in entries {
            let status_path = entry.absolute_path.join(Project::data_dir_name()).join("status.json");
            match read_json::<Project>(&status_path) {
                Ok(project) => {
                    loaded.insert(entry.id, project);
                }
                Err(_) => {
                    tracing::warn!(id = %entry.id, "project status.json missing or corrupted, skipping");
                }
            }
        }
        *self.projects.write().unwrap() = loaded;
        Ok(())
    }

    fn persist_index(&self, projects: &HashMap<String, Project>) -> StoreResult<()> {
        let entries: Vec<IndexEntry> = projects
            .values()
            .map(|p| IndexEntry {
                id: p.id.clone(),
                absolute_path: p.absolute_path.clone(),
            })
            .collect();
        write_json_atomic(&self.index_path(), &entries)
    }

    fn persist_status(&self, project: &Project) -> StoreResult<()> {
        write_json_atomic(&project.status_file(), project)
    }

    pub fn create(&self, name: impl Into<String>, absolute_path: &Path) -> StoreResult<Project> {
        let absolute_path = absolute_path.to_path_buf();
        let id = derive_project_id(&absolute_path);
        {
            let projects = self.projects.read().unwrap();
            if projects.contains_key(&id) {
                return Err(StoreError::Conflict(format!(
                    "project already registered: {id}"
                )));
            }
        }
        let project = Project::new(name, absolute_path);
        self.persist_status(&project)?;
        {
            let mut projects = self.projects.write().unwrap();
            projects.insert(project.id.clone(), project.clone());
            self.persist_index(&projects)?;
        }
        Ok(project)
    }

    pub fn get(&self, id: &str) -> Option<Project> {
        self.projects.read().unwrap().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Project> {
        let mut v: Vec<Project> = self.projects.read().unwrap().values().cloned().collect();
        v.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        v
    }

    /// Apply `f` to the project and persist the result atomically.
    pub fn update<F>(&self, id: &str, f: F) -> StoreResult<Project>
    where
        F: FnOnce(&mut Project),
    {
        let mut projects = self.projects.write().unwrap();
        let project = projects
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        f(project);
        project.touch();
        self.persist_status(project)?;
        Ok(project.clone())
    }

    pub fn set_status(&self, id: &str, status: ProjectStatus) -> StoreResult<Project> {
        self.update(id, |p| p.status = status)
    }

    pub fn delete(&self, id: &str) -> StoreResult<()> {
        let mut projects = self.projects.write().unwrap();
        let project = projects
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let _ = std::fs::remove_dir_all(project.data_dir());
        self.persist_index(&projects)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_persists_status_and_index_then_reloads() {
        let global = tempfile::tempdir().unwrap();
        let proj_dir = tempfile::tempdir().unwrap();
        let store = FileProjectStore::open(global.path()).unwrap();
        let created = store.create("demo", proj_dir.path()).unwrap();

        let reopened = FileProjectStore::open(global.path()).unwrap();
        let fetched = reopened.get(&created.id).expect("project reloaded");
        assert_eq!(fetched.absolute_path, proj_dir.path());
    }

    #[test]
    fn duplicate_path_is_conflict() {
        let global = tempfile::tempdir().unwrap();
        let proj_dir = tempfile::tempdir().unwrap();
        let store = FileProjectStore::open(global.path()).unwrap();
        store.create("demo", proj_dir.path()).unwrap();
        let err = store.create("demo-2", proj_dir.path()).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn delete_removes_data_dir() {
        let global = tempfile::tempdir().unwrap();
        let proj_dir = tempfile::tempdir().unwrap();
        let store = FileProjectStore::open(global.path()).unwrap();
        let created = store.create("demo", proj_dir.path()).unwrap();
        assert!(created.data_dir().exists());
        store.delete(&created.id).unwrap();
        assert!(!created.data_dir().exists());
        assert!(store.get(&created.id).is_none());
    }
}
