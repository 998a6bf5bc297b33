//! Apply lock: at most one executor per repository.
//!
//! The lock is a JSON file (`apply.lock` in the state directory) holding the
//! owner's PID and acquisition time. The file contents are informational;
//! ownership is an exclusive `flock` on the open file.
//!
//! ## Race safety
//!
//! `acquire()` opens (or creates) the lockfile and takes `LOCK_EX | LOCK_NB`.
//! The kernel grants it to exactly one open file, so a holder that is still
//! writing its PID, or whose file is empty, is never mistaken for a stale
//! lock. After locking, the open file is compared with what the path names
//! now: a holder may have unlinked it on release in between, in which case
//! the lock is on an orphaned inode and the acquire starts over.
//!
//! ## Stale lockfile recovery
//!
//! A process that dies (crash, SIGKILL) drops its `flock` with its file
//! descriptors, so its leftover record is taken over. The recorded PID is
//! checked for liveness; where `flock` is unavailable a live PID still
//! counts as the holder.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, ShuffleError};

pub const LOCK_FILE_NAME: &str = "apply.lock";

/// Attempts before giving up when the lockfile keeps being replaced.
const MAX_ACQUIRE_ATTEMPTS: u32 = 3;

/// Contents of the lockfile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyLock {
    pub pid: u32,
    pub acquired_at: String,
}

/// Result of one lock attempt.
enum AcquireResult {
    Acquired(File),
    /// Another open file holds the lock.
    Held(ApplyLock),
    /// The path was unlinked or replaced while we locked it; retry.
    Replaced,
}

impl ApplyLock {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            acquired_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    /// Placeholder for a holder that has not written its record yet.
    fn unknown() -> Self {
        Self {
            pid: 0,
            acquired_at: "unknown".into(),
        }
    }

    /// Take the lock at `path`.
    ///
    /// The returned guard removes the file and releases the lock when
    /// dropped.
    pub fn acquire(path: &Path) -> Result<LockGuard> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let me = Self::current();
        for attempt in 1..=MAX_ACQUIRE_ATTEMPTS {
            match Self::try_lock(path)? {
                AcquireResult::Acquired(mut file) => {
                    if let Some(previous) = Self::read_from(&file) {
                        if previous.pid != me.pid {
                            let alive = previous.is_alive();
                            if alive && !cfg!(unix) {
                                return Err(ShuffleError::LockContention {
                                    pid: previous.pid,
                                    acquired_at: previous.acquired_at,
                                });
                            }
                            info!(pid = previous.pid, alive, "reclaiming stale apply lock");
                        }
                    }
                    let json = serde_json::to_string_pretty(&me)?;
                    file.set_len(0)?;
                    file.rewind()?;
                    file.write_all(json.as_bytes())?;
                    file.sync_all()?;
                    debug!(pid = me.pid, path = %path.display(), "apply lock acquired");
                    return Ok(LockGuard {
                        path: path.to_path_buf(),
                        _file: file,
                    });
                }
                AcquireResult::Held(existing) => {
                    return Err(ShuffleError::LockContention {
                        pid: existing.pid,
                        acquired_at: existing.acquired_at,
                    });
                }
                AcquireResult::Replaced => {
                    info!(attempt, "apply lock file replaced while locking, retrying");
                }
            }
        }
        Err(ShuffleError::Io(std::io::Error::new(
            std::io::ErrorKind::WouldBlock,
            format!(
                "failed to acquire {} after {MAX_ACQUIRE_ATTEMPTS} attempts",
                path.display()
            ),
        )))
    }

    fn try_lock(path: &Path) -> Result<AcquireResult> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        if !try_flock_exclusive(&file)? {
            return Ok(AcquireResult::Held(Self::read_from(&file).unwrap_or_else(Self::unknown)));
        }
        if !still_linked(&file, path)? {
            return Ok(AcquireResult::Replaced);
        }
        Ok(AcquireResult::Acquired(file))
    }

    fn read_from(mut file: &File) -> Option<Self> {
        let mut content = String::new();
        file.read_to_string(&mut content).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Read the lockfile. Returns `None` if missing or unparseable. Says
    /// nothing about whether the lock is held; see [`ApplyLock::holder`].
    pub fn read(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// The current holder, if someone holds the lock. Never modifies the
    /// file; used by dry runs and `status`.
    #[cfg(not(unix))]
    pub fn holder(path: &Path) -> Option<Self> {
        Self::read(path).filter(ApplyLock::is_alive)
    }

    /// The current holder, if someone holds the lock. Never modifies the
    /// file; used by dry runs and `status`.
    #[cfg(unix)]
    pub fn holder(path: &Path) -> Option<Self> {
        let file = OpenOptions::new().read(true).open(path).ok()?;
        match try_flock_exclusive(&file) {
            // Nobody holds it; closing `file` releases our test lock.
            Ok(true) => None,
            Ok(false) => Some(Self::read_from(&file).unwrap_or_else(Self::unknown)),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "cannot inspect apply lock");
                None
            }
        }
    }

    pub fn is_alive(&self) -> bool {
        pid_alive(self.pid)
    }
}

// ---------------------------------------------------------------------------
// LockGuard
// ---------------------------------------------------------------------------

/// Held for the duration of an apply run.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    /// Keeps the `flock` alive; closing it releases the lock.
    _file: File,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Unlink while still holding the lock; waiters notice the unlinked
        // inode and start over.
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "apply lock released"),
            Err(e) => warn!(error = %e, "failed to remove apply lock"),
        }
    }
}

/// Check if a process with the given PID is alive.
#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    if pid == 0 {
        return false;
    }
    // SAFETY: kill with signal 0 checks existence without sending a signal.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    // EPERM: the process exists but belongs to someone else.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    true
}

/// Try to take an exclusive `flock` without blocking. `Ok(false)` means
/// another open file holds it.
#[cfg(unix)]
fn try_flock_exclusive(file: &File) -> std::io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the fd is owned by `file` and valid for this call.
    if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        return Ok(false);
    }
    Err(err)
}

#[cfg(not(unix))]
fn try_flock_exclusive(_file: &File) -> std::io::Result<bool> {
    Ok(true)
}

/// Whether `path` still names the inode `file` has open.
#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> std::io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match std::fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> std::io::Result<bool> {
    Ok(path.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_pid_is_alive() {
        assert!(pid_alive(std::process::id()));
    }

    #[test]
    fn bogus_pid_is_dead() {
        // PID 4_000_000 is extremely unlikely to exist.
        assert!(!pid_alive(4_000_000));
        assert!(!pid_alive(0));
    }

    #[test]
    fn acquire_writes_and_guard_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join(LOCK_FILE_NAME);
        {
            let guard = ApplyLock::acquire(&path).unwrap();
            let lock = ApplyLock::read(guard.path()).unwrap();
            assert_eq!(lock.pid, std::process::id());
            assert_eq!(ApplyLock::holder(&path).map(|l| l.pid), Some(std::process::id()));
        }
        assert!(!path.exists());
        assert!(ApplyLock::holder(&path).is_none());
    }

    #[test]
    fn live_holder_causes_contention() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        let _guard = ApplyLock::acquire(&path).unwrap();
        let err = ApplyLock::acquire(&path).unwrap_err();
        assert!(matches!(err, ShuffleError::LockContention { pid, .. } if pid == std::process::id()));
    }

    #[test]
    fn leftover_file_of_dead_holder_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        let stale = ApplyLock {
            pid: 4_000_000,
            acquired_at: "2020-01-01T00:00:00Z".into(),
        };
        std::fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();
        assert!(ApplyLock::holder(&path).is_none());

        let guard = ApplyLock::acquire(&path).unwrap();
        assert_eq!(ApplyLock::read(guard.path()).unwrap().pid, std::process::id());
    }

    #[test]
    fn longer_leftover_record_is_fully_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        std::fs::write(&path, format!("{{\"pid\": 4000000, \"acquired_at\": \"{}\"}}", "x".repeat(512))).unwrap();

        let guard = ApplyLock::acquire(&path).unwrap();
        let content = std::fs::read_to_string(guard.path()).unwrap();
        let lock: ApplyLock = serde_json::from_str(&content).unwrap();
        assert_eq!(lock.pid, std::process::id());
    }

    #[test]
    fn unlocked_garbage_file_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        std::fs::write(&path, "not json").unwrap();
        assert!(ApplyLock::acquire(&path).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn holder_that_has_not_written_yet_still_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        // A holder that locked the file but has not written its record.
        let holder = File::create(&path).unwrap();
        assert!(try_flock_exclusive(&holder).unwrap());

        let err = ApplyLock::acquire(&path).unwrap_err();
        assert!(matches!(err, ShuffleError::LockContention { pid: 0, .. }));
        assert_eq!(ApplyLock::holder(&path), Some(ApplyLock::unknown()));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");

        drop(holder);
        assert!(ApplyLock::acquire(&path).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn unlinked_lockfile_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_FILE_NAME);
        let file = File::create(&path).unwrap();
        assert!(still_linked(&file, &path).unwrap());
        std::fs::remove_file(&path).unwrap();
        assert!(!still_linked(&file, &path).unwrap());
        std::fs::write(&path, "").unwrap();
        assert!(!still_linked(&file, &path).unwrap());
    }
}
