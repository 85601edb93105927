//! Per-target exclusive lock files.
//!
//! Advisory and exclusive: a contended target fails fast rather than
//! waiting, preventing two instances from racing the same checkpoint.

use crate::error::CheckpointError;
use fs4::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// RAII guard: the lock is released (and the file removed) on every exit
/// path, including panics, via `Drop`.
pub struct TargetLock {
    path: PathBuf,
    file: File,
}

impl TargetLock {
    /// Acquires the exclusive lock for `target_key` under `root`. Fails
    /// immediately (no waiting) if another process holds it.
    pub fn acquire(root: &Path, target_key: &str) -> Result<Self, CheckpointError> {
        let path = root.join(format!("{}.lock", sanitize_key(target_key)));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| CheckpointError::Io {
                path: path.clone(),
                source,
            })?;

        file.try_lock_exclusive().map_err(|_| CheckpointError::Locked {
            target_key: target_key.to_string(),
        })?;

        Ok(Self { path, file })
    }
}

impl Drop for TargetLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        let _ = std::fs::remove_file(&self.path);
    }
}

fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contended_lock_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let _first = TargetLock::acquire(dir.path(), "user:1").unwrap();
        let second = TargetLock::acquire(dir.path(), "user:1");
        assert!(matches!(second, Err(CheckpointError::Locked { .. })));
    }

    #[test]
    fn lock_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _lock = TargetLock::acquire(dir.path(), "user:2").unwrap();
            assert!(dir.path().join("user_2.lock").exists());
        }
        assert!(!dir.path().join("user_2.lock").exists());
    }
}
