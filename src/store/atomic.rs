//! Crash-safe JSON writes: serialize → write `<path>.tmp` → fsync →
//! rename over target (spec.md §4.A, §9: "do not fall back to
//! truncating overwrites").

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use super::StoreError;

/// Atomically write `value` as pretty JSON to `path`.
///
/// The temp file lives alongside `path` (same filesystem, so the
/// final `rename` is atomic) and is fsync'd before the rename so a
/// crash mid-write can never leave `path` holding partial bytes: a
/// reader always observes either the old contents or the fully
/// written new ones (spec.md §8 property 9).
pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = tmp_path_for(path);
    let bytes = serde_json::to_vec_pretty(value)?;
    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(&bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

/// Read and deserialize JSON from `path`. A parse failure is treated
/// by callers as the "corrupted file" recovery path (spec.md §4.A,
/// §7): the caller removes the file and proceeds as if it never
/// existed.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let bytes = fs::read(path)?;
    let value = serde_json::from_slice(&bytes)?;
    Ok(value)
}
