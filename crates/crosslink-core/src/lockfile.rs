//! Scoped cross-process lock files.
//!
//! Advisory fs2 locks serialize audit-log appends and per-ticket apply
//! operations across independent invocations. The lock is released on every
//! exit path because the guard unlocks on drop.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::{CrosslinkError, Result};

/// Interval between lock attempts while waiting.
const RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// An exclusively held lock file, released when dropped.
#[derive(Debug)]
pub struct ScopedLock {
    file: File,
    path: PathBuf,
}

impl ScopedLock {
    /// Acquire the lock at `path`, waiting up to `wait` for a holder to
    /// release it. Fails with `LockBusy` when the deadline passes.
    pub fn acquire(path: &Path, wait: Duration) -> Result<Self> {
        let file = Self::open(path)?;
        let deadline = Instant::now() + wait;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    })
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(CrosslinkError::LockBusy {
                            resource: path.display().to_string(),
                        });
                    }
                    std::thread::sleep(RETRY_INTERVAL);
                }
                Err(err) => return Err(CrosslinkError::io_with_path(err, path)),
            }
        }
    }

    /// Acquire the lock without waiting; `None` if another holder has it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let file = Self::open(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                file,
                path: path.to_path_buf(),
            })),
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(CrosslinkError::io_with_path(err, path)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(path: &Path) -> Result<File> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CrosslinkError::io_with_path(e, parent.to_path_buf()))?;
        }
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| CrosslinkError::io_with_path(e, path))
    }
}

impl Drop for ScopedLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("test.lock");

        let lock = ScopedLock::acquire(&path, Duration::from_millis(100)).unwrap();
        assert_eq!(lock.path(), path.as_path());
        drop(lock);

        // Released: a second acquire succeeds immediately.
        let again = ScopedLock::try_acquire(&path).unwrap();
        assert!(again.is_some());
    }

    #[test]
    fn test_contended_try_acquire_returns_none() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("contended.lock");

        let _held = ScopedLock::acquire(&path, Duration::from_millis(100)).unwrap();
        let second = ScopedLock::try_acquire(&path).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn test_contended_acquire_times_out() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("busy.lock");

        let _held = ScopedLock::acquire(&path, Duration::from_millis(100)).unwrap();
        let result = ScopedLock::acquire(&path, Duration::from_millis(80));
        assert!(matches!(result, Err(CrosslinkError::LockBusy { .. })));
    }

    #[test]
    fn test_creates_parent_dirs() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("dir").join("x.lock");
        let lock = ScopedLock::try_acquire(&path).unwrap();
        assert!(lock.is_some());
    }
}
