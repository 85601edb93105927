//! Stateless checkpoint store over a configurable root directory.
//! Default root: `~/.config/weiboloader/`.

pub mod lock;

pub use lock::TargetLock;

use crate::error::CheckpointError;
use crate::model::{CursorState, StampsMap, CURSOR_STATE_VERSION};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<(), CheckpointError> {
        fs::create_dir_all(&self.root).map_err(|source| CheckpointError::Io {
            path: self.root.clone(),
            source,
        })
    }

    fn cursor_path(&self, target_key: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_key(target_key)))
    }

    /// Reads `{target_key}.json`. On malformed JSON or a version/options-hash
    /// mismatch, the file is discarded and `None` is returned with a
    /// warning, so the caller restarts from the beginning.
    pub fn load(&self, target_key: &str, options_hash: &str) -> Option<CursorState> {
        let path = self.cursor_path(target_key);
        let contents = fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<CursorState>(&contents) {
            Ok(state) if state.version == CURSOR_STATE_VERSION && state.options_hash == options_hash => {
                Some(state)
            }
            Ok(_) => {
                tracing::warn!(target_key, "checkpoint version/options mismatch, discarding");
                let _ = fs::remove_file(&path);
                None
            }
            Err(err) => {
                tracing::warn!(target_key, %err, "checkpoint is corrupt, discarding");
                let _ = fs::remove_file(&path);
                None
            }
        }
    }

    /// Atomic write: tmp file, fsync, rename over the destination. A crash
    /// between write and rename leaves the prior state intact.
    pub fn save(&self, target_key: &str, state: &CursorState) -> Result<(), CheckpointError> {
        self.ensure_root()?;
        let path = self.cursor_path(target_key);
        atomic_write_json(&path, state)
    }
}

/// Loads the stamps map from `path`. Absent or malformed files are treated
/// as an empty map.
pub fn load_stamps(path: &Path) -> StampsMap {
    match fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
        Err(_) => StampsMap::default(),
    }
}

/// Atomically rewrites the stamps file.
pub fn save_stamps(path: &Path, stamps: &StampsMap) -> Result<(), CheckpointError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| CheckpointError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    atomic_write_json(path, stamps)
}

fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), CheckpointError> {
    let tmp_path = path.with_extension("tmp");
    let json = serde_json::to_vec_pretty(value).expect("value is always serializable");

    let mut file = fs::File::create(&tmp_path).map_err(|source| CheckpointError::Io {
        path: tmp_path.clone(),
        source,
    })?;
    file.write_all(&json).map_err(|source| CheckpointError::Io {
        path: tmp_path.clone(),
        source,
    })?;
    file.sync_all().map_err(|source| CheckpointError::Io {
        path: tmp_path.clone(),
        source,
    })?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(|source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::cst;
    use chrono::TimeZone;

    fn sample_state(hash: &str) -> CursorState {
        CursorState {
            version: CURSOR_STATE_VERSION,
            cursor: Some("abc".into()),
            page: 2,
            seen_mids: vec!["1".into(), "2".into()],
            options_hash: hash.to_string(),
            timestamp: cst().with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().to_path_buf());
        let state = sample_state("h1");
        store.save("user:1", &state).unwrap();
        let loaded = store.load("user:1", "h1").unwrap();
        assert_eq!(loaded.cursor, state.cursor);
        assert_eq!(loaded.seen_mids, state.seen_mids);
    }

    #[test]
    fn options_hash_mismatch_discards() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().to_path_buf());
        store.save("user:1", &sample_state("h1")).unwrap();
        assert!(store.load("user:1", "h2").is_none());
        assert!(!dir.path().join("user_1.json").exists());
    }

    #[test]
    fn corrupt_json_discards() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().to_path_buf());
        store.ensure_root().unwrap();
        fs::write(dir.path().join("user_1.json"), "{not json").unwrap();
        assert!(store.load("user:1", "h1").is_none());
    }

    #[test]
    fn absent_checkpoint_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().to_path_buf());
        assert!(store.load("user:1", "h1").is_none());
    }

    #[test]
    fn stamps_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stamps.json");
        let mut stamps = StampsMap::default();
        stamps.insert("user:1".into(), cst().with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
        save_stamps(&path, &stamps).unwrap();
        let loaded = load_stamps(&path);
        assert_eq!(loaded.get("user:1"), stamps.get("user:1"));
    }
}
