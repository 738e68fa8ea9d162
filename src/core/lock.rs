/// Lock files
///
/// Two unrelated kinds share this module: the template revision lock that
/// versions a project's copied templates, and the exclusive run lock taken
/// for the duration of a backup or restore. The run lock is an RAII guard;
/// release happens on drop, which covers normal return, error unwind, and
/// the signal-race path in main.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StackError;

/// Comparison of the persisted template revision against a fresh fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    /// No lock present; first assembly for this project.
    Initial,
    /// Lock matches the fetched revision.
    UpToDate,
    /// Lock differs from the fetched revision; acting on it requires --force.
    Stale { current: String },
}

pub struct TemplateLock {
    path: PathBuf,
}

impl TemplateLock {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Currently pinned revision, if any.
    pub fn current(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let revision = content.trim().to_string();
        Ok(if revision.is_empty() { None } else { Some(revision) })
    }

    /// Compare against a freshly resolved revision.
    pub fn check(&self, resolved_revision: &str) -> Result<LockState> {
        match self.current()? {
            None => Ok(LockState::Initial),
            Some(current) if current == resolved_revision => Ok(LockState::UpToDate),
            Some(current) => Ok(LockState::Stale { current }),
        }
    }

    /// Pin a revision. Only called after all copies and merges succeeded.
    pub fn write(&self, revision: &str) -> Result<()> {
        fs::write(&self.path, format!("{}\n", revision))
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

/// Exclusive marker file for a backup/restore run. Holding an instance
/// means holding the lock; dropping it removes the file. There is no TTL:
/// a lock left behind by a crashed process blocks runs until removed by
/// hand.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Take the lock, failing with `LockHeld` if another run owns it.
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                use std::io::Write;
                let _ = writeln!(file, "pid={}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StackError::LockHeld(path).into())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to create lock at {}", path.display())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_lock_states() {
        let dir = tempfile::tempdir().unwrap();
        let lock = TemplateLock::new(dir.path().join(".template-lock"));

        assert_eq!(lock.check("abc123").unwrap(), LockState::Initial);

        lock.write("abc123").unwrap();
        assert_eq!(lock.check("abc123").unwrap(), LockState::UpToDate);

        assert_eq!(
            lock.check("def456").unwrap(),
            LockState::Stale {
                current: "abc123".to_string()
            }
        );
    }

    #[test]
    fn test_run_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".stackctl.lock");

        let held = RunLock::acquire(&path).unwrap();
        let second = RunLock::acquire(&path);
        assert!(matches!(
            second.unwrap_err().downcast_ref::<StackError>(),
            Some(StackError::LockHeld(_))
        ));

        drop(held);
        assert!(!path.exists());

        // Released lock can be re-acquired
        let _again = RunLock::acquire(&path).unwrap();
    }

    #[test]
    fn test_run_lock_released_on_unwind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".stackctl.lock");

        let result = std::panic::catch_unwind(|| {
            let _guard = RunLock::acquire(&path).unwrap();
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(!path.exists());
    }
}
