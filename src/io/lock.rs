//! Cooperative advisory lock for one instance directory.
//!
//! A lock is an exclusive-create file holding the owner PID. Exclusion is
//! advisory: every obliviate process that mutates instance state must acquire
//! it, while read-only commands rely on the atomic task rewrite instead.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Ceiling for lock acquisition before giving up.
pub const LOCK_WAIT_MAX: Duration = Duration::from_secs(15);
/// Poll interval while the lock file exists.
pub const LOCK_WAIT_STEP: Duration = Duration::from_millis(150);

/// Acquisition gave up after [`LOCK_WAIT_MAX`].
///
/// Typed so the loop can tell a contended lock from other I/O failures.
#[derive(Debug)]
pub struct LockTimeoutError {
    pub path: PathBuf,
}

impl std::fmt::Display for LockTimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timed out waiting for lock {}", self.path.display())
    }
}

impl std::error::Error for LockTimeoutError {}

/// Held instance lock. Released on [`InstanceLock::release`] or drop.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    released: bool,
}

impl InstanceLock {
    /// Acquire the lock, polling every [`LOCK_WAIT_STEP`] up to [`LOCK_WAIT_MAX`].
    pub fn acquire(path: &Path) -> Result<Self> {
        let start = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    // Owner PID is informational, for humans inspecting a
                    // stuck lock by hand.
                    let _ = writeln!(file, "{}", std::process::id());
                    debug!(path = %path.display(), "lock acquired");
                    return Ok(Self {
                        path: path.to_path_buf(),
                        released: false,
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if start.elapsed() > LOCK_WAIT_MAX {
                        warn!(path = %path.display(), "lock acquisition timed out");
                        return Err(LockTimeoutError {
                            path: path.to_path_buf(),
                        }
                        .into());
                    }
                    std::thread::sleep(LOCK_WAIT_STEP);
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("create lock file {}", path.display()));
                }
            }
        }
    }

    /// Unlink the lock file. Idempotent; a second call is a no-op.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("remove lock file {}", self.path.display()))
            }
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_creates_lock_file_with_pid() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".tasks.lock");

        let lock = InstanceLock::acquire(&path).expect("acquire");
        let contents = fs::read_to_string(&path).expect("read lock");
        assert_eq!(contents.trim(), std::process::id().to_string());
        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn release_is_idempotent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".tasks.lock");

        let mut lock = InstanceLock::acquire(&path).expect("acquire");
        lock.release().expect("release");
        lock.release().expect("release again");
        assert!(!path.exists());
    }

    #[test]
    fn reacquire_succeeds_after_release() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".tasks.lock");

        drop(InstanceLock::acquire(&path).expect("first"));
        drop(InstanceLock::acquire(&path).expect("second"));
    }

    /// A waiter polls until the holder releases, then takes the lock.
    ///
    /// The 15 s timeout ceiling is not exercised here (too slow for unit
    /// tests); only the polling path is.
    #[test]
    fn contended_lock_waits_for_holder() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".tasks.lock");

        let holder = InstanceLock::acquire(&path).expect("holder");
        let holder = std::sync::Mutex::new(Some(holder));

        std::thread::scope(|scope| {
            scope.spawn(|| {
                std::thread::sleep(Duration::from_millis(400));
                if let Some(mut lock) = holder.lock().unwrap().take() {
                    lock.release().expect("release holder");
                }
            });
            let waited = InstanceLock::acquire(&path).expect("acquire after wait");
            drop(waited);
        });
        assert!(!path.exists());
    }
}
