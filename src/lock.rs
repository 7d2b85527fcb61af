//! Keeps two feedsync processes from writing the same data directory.

use anyhow::{Context, Result};
use feedsync_core::{FeedSyncError, FeedSyncResult, RunLock};
use fs2::FileExt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "feedsync.lock";
const DAEMON_LOCK_FILE: &str = "daemon.lock";

/// Released when dropped
pub struct LockGuard {
    _file: File,
}

/// `Ok(None)` when another process holds `name` in `data_dir`.
fn try_lock(data_dir: &Path, name: &str) -> io::Result<Option<LockGuard>> {
    fs::create_dir_all(data_dir)?;
    let file = File::create(data_dir.join(name))?;

    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(LockGuard { _file: file })),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
        Err(e) => Err(e),
    }
}

fn busy(data_dir: &Path, name: &str, what: &str) -> anyhow::Error {
    anyhow::anyhow!(
        "{what} is using {}.\n\
        If you believe this is an error, remove: {}",
        data_dir.display(),
        data_dir.join(name).display()
    )
}

/// Acquire the data directory lock, failing if another process holds it
pub fn acquire(data_dir: &Path) -> Result<LockGuard> {
    try_lock(data_dir, LOCK_FILE)
        .with_context(|| format!("Failed to lock {}", data_dir.display()))?
        .ok_or_else(|| busy(data_dir, LOCK_FILE, "Another feedsync process"))
}

/// Held for the daemon's lifetime so only one daemon serves a data directory.
/// CLI commands don't take it.
pub fn acquire_daemon(data_dir: &Path) -> Result<LockGuard> {
    try_lock(data_dir, DAEMON_LOCK_FILE)
        .with_context(|| format!("Failed to lock {}", data_dir.display()))?
        .ok_or_else(|| busy(data_dir, DAEMON_LOCK_FILE, "Another feedsync daemon"))
}

/// The data directory lock, taken by the daemon for one run at a time.
pub struct DataDirLock {
    dir: PathBuf,
}

impl DataDirLock {
    pub fn new(dir: PathBuf) -> Self {
        DataDirLock { dir }
    }
}

impl RunLock for DataDirLock {
    fn try_acquire(&self) -> FeedSyncResult<Option<Box<dyn Send>>> {
        let guard = try_lock(&self.dir, LOCK_FILE).map_err(|e| {
            FeedSyncError::Storage(format!("Failed to lock {}: {e}", self.dir.display()))
        })?;
        Ok(guard.map(|guard| Box::new(guard) as Box<dyn Send>))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_lock_fails_until_first_is_dropped() {
        let dir = tempfile::TempDir::new().unwrap();

        let first = acquire(dir.path()).unwrap();
        assert!(acquire(dir.path()).is_err());

        drop(first);
        assert!(acquire(dir.path()).is_ok());
    }

    #[test]
    fn test_run_lock_shares_the_command_lock() {
        let dir = tempfile::TempDir::new().unwrap();
        let run_lock = DataDirLock::new(dir.path().to_path_buf());

        // A running daemon doesn't keep commands out between runs
        let _daemon = acquire_daemon(dir.path()).unwrap();
        let held = run_lock.try_acquire().unwrap().expect("lock should be free");
        assert!(acquire(dir.path()).is_err());
        drop(held);

        let command = acquire(dir.path()).unwrap();
        assert!(run_lock.try_acquire().unwrap().is_none());
        drop(command);
        assert!(run_lock.try_acquire().unwrap().is_some());
    }

    #[test]
    fn test_only_one_daemon_per_data_dir() {
        let dir = tempfile::TempDir::new().unwrap();

        let _first = acquire_daemon(dir.path()).unwrap();
        assert!(acquire_daemon(dir.path()).is_err());
        assert!(acquire(dir.path()).is_ok());
    }
}
