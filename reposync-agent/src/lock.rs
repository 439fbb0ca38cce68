//! Cross-process run lock.
//!
//! The lock file holds the decimal PID of its owner and nothing else.
//! Ownership is arbitrated by a non-blocking exclusive `flock(2)` on the file,
//! so acquisition is a single atomic step and a crashed owner releases it
//! automatically. The recorded PID is still checked for liveness so that a
//! holder which does not take the advisory lock (an older shell-based sync
//! script) is respected, and so that leftovers of a crashed run are reported
//! as stale.
//!
//! ## Protocol
//!
//! 1. Open or create the file without truncating it.
//! 2. `flock(LOCK_EX | LOCK_NB)`; `EWOULDBLOCK` means a live owner.
//! 3. Confirm the locked inode is still the one at the path (a releasing
//!    owner unlinks the file before unlocking); retry otherwise.
//! 4. Read the recorded PID. Alive and not ours: contended. Dead: stale,
//!    reclaim.
//! 5. Truncate and write our PID.
//!
//! Dropping the [`LockHandle`] unlinks the file, then releases the flock.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::Serialize;

use crate::error::{io_err, AgentError};

const MAX_ATTEMPTS: usize = 5;

/// Exclusive ownership of the sync operation for one working copy.
#[derive(Debug)]
pub struct LockHandle {
    path: PathBuf,
    owner_pid: u32,
    _flock: Flock<File>,
}

/// Result of an acquisition attempt.
#[derive(Debug)]
pub enum LockAcquisition {
    Acquired(LockHandle),
    /// Another live process owns the lock.
    Held { owner_pid: Option<u32> },
}

/// Read-only view of a lock file, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LockState {
    Free,
    Held { pid: Option<u32> },
    Stale { pid: Option<u32> },
}

impl LockHandle {
    /// Try to take the lock at `path` for the current process.
    pub fn acquire(path: &Path) -> Result<LockAcquisition, AgentError> {
        acquire_as(path, std::process::id())
    }

    pub fn owner_pid(&self) -> u32 {
        self.owner_pid
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "lock released"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(
                path = %self.path.display(),
                error = %err,
                "could not remove lock file",
            ),
        }
    }
}

fn acquire_as(path: &Path, pid: u32) -> Result<LockAcquisition, AgentError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
    }

    for _ in 0..MAX_ATTEMPTS {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| io_err(path, e))?;

        let mut locked = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(locked) => locked,
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
                return Ok(LockAcquisition::Held {
                    owner_pid: read_pid(path),
                });
            }
            Err((_, errno)) => return Err(io_err(path, std::io::Error::from(errno))),
        };

        if !is_same_file(&locked, path)? {
            tracing::debug!(path = %path.display(), "lock file replaced during acquire, retrying");
            continue;
        }

        match read_pid_from(&mut locked).map_err(|e| io_err(path, e))? {
            Some(recorded) if recorded != pid && is_process_alive(recorded) => {
                return Ok(LockAcquisition::Held {
                    owner_pid: Some(recorded),
                });
            }
            Some(recorded) if recorded != pid => {
                tracing::warn!(
                    path = %path.display(),
                    stale_pid = recorded,
                    "removing stale lock left by a dead process",
                );
            }
            _ => {}
        }

        write_pid(&mut locked, pid).map_err(|e| io_err(path, e))?;
        tracing::debug!(path = %path.display(), pid, "lock acquired");
        return Ok(LockAcquisition::Acquired(LockHandle {
            path: path.to_path_buf(),
            owner_pid: pid,
            _flock: locked,
        }));
    }

    Err(AgentError::LockRace {
        path: path.to_path_buf(),
    })
}

/// Inspect `path` without keeping it.
pub fn inspect(path: &Path) -> Result<LockState, AgentError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(LockState::Free),
        Err(err) => return Err(io_err(path, err)),
    };

    let recorded = read_pid(path);
    match Flock::lock(file, FlockArg::LockSharedNonblock) {
        Err((_, errno)) if errno == Errno::EWOULDBLOCK => Ok(LockState::Held { pid: recorded }),
        Err((_, errno)) => Err(io_err(path, std::io::Error::from(errno))),
        Ok(_released_on_drop) => match recorded {
            Some(pid) if is_process_alive(pid) => Ok(LockState::Held { pid: Some(pid) }),
            pid => Ok(LockState::Stale { pid }),
        },
    }
}

/// Whether a process with `pid` currently exists.
///
/// Uses signal 0: `ESRCH` means gone, `EPERM` means it exists under another
/// user. PID 0 and values outside `pid_t` are never alive.
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(_) => true,
    }
}

/// Read the PID recorded in `path`, if any.
pub fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok().and_then(|s| parse_pid(&s))
}

/// Record `pid` in `path`, replacing its contents.
pub fn write_pid_file(path: &Path, pid: u32) -> Result<(), AgentError> {
    fs::write(path, format!("{pid}\n")).map_err(|e| io_err(path, e))
}

fn parse_pid(contents: &str) -> Option<u32> {
    contents.trim().parse().ok()
}

fn read_pid_from(file: &mut File) -> std::io::Result<Option<u32>> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_string(&mut contents)?;
    Ok(parse_pid(&contents))
}

fn write_pid(file: &mut File, pid: u32) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{pid}")?;
    file.sync_all()
}

fn is_same_file(file: &File, path: &Path) -> Result<bool, AgentError> {
    let held = file.metadata().map_err(|e| io_err(path, e))?;
    match fs::metadata(path) {
        Ok(current) => Ok(current.ino() == held.ino() && current.dev() == held.dev()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_err(path, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Far above any default `pid_max`, still a valid `pid_t`.
    const DEAD_PID: u32 = 999_999_999;

    fn acquired(result: LockAcquisition) -> LockHandle {
        match result {
            LockAcquisition::Acquired(handle) => handle,
            LockAcquisition::Held { owner_pid } => panic!("lock unexpectedly held by {owner_pid:?}"),
        }
    }

    #[test]
    fn acquire_writes_pid_and_drop_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("waf-sync.lock");

        let handle = acquired(LockHandle::acquire(&path).unwrap());
        assert_eq!(handle.owner_pid(), std::process::id());
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            format!("{}\n", std::process::id())
        );

        drop(handle);
        assert!(!path.exists(), "lock file must be removed on drop");
    }

    #[test]
    fn second_acquire_is_contended_while_first_is_live() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("podman-sync.lock");

        let first = acquired(LockHandle::acquire(&path).unwrap());
        match LockHandle::acquire(&path).unwrap() {
            LockAcquisition::Held { owner_pid } => {
                assert_eq!(owner_pid, Some(std::process::id()));
            }
            LockAcquisition::Acquired(_) => panic!("two live handles for one lock file"),
        }
        assert!(path.exists(), "contender must not remove the owner's lock");

        drop(first);
        let _again = acquired(LockHandle::acquire(&path).unwrap());
    }

    #[test]
    fn stale_pid_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("waf-sync.lock");
        fs::write(&path, format!("{DEAD_PID}\n")).unwrap();
        assert_eq!(inspect(&path).unwrap(), LockState::Stale { pid: Some(DEAD_PID) });

        let handle = acquired(LockHandle::acquire(&path).unwrap());
        assert_eq!(read_pid(&path), Some(std::process::id()));
        drop(handle);
        assert!(!path.exists());
    }

    #[test]
    fn garbage_contents_are_treated_as_stale() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("waf-sync.lock");
        fs::write(&path, "not a pid").unwrap();

        let _handle = acquired(LockHandle::acquire(&path).unwrap());
        assert_eq!(read_pid(&path), Some(std::process::id()));
    }

    #[test]
    fn live_pid_without_flock_is_respected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("legacy.lock");
        let parent = std::os::unix::process::parent_id();
        fs::write(&path, format!("{parent}\n")).unwrap();

        match LockHandle::acquire(&path).unwrap() {
            LockAcquisition::Held { owner_pid } => assert_eq!(owner_pid, Some(parent)),
            LockAcquisition::Acquired(_) => panic!("must not steal a live owner's lock"),
        }
        assert_eq!(read_pid(&path), Some(parent), "lock contents untouched");
    }

    #[test]
    fn inspect_reports_each_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.lock");
        assert_eq!(inspect(&path).unwrap(), LockState::Free);

        let handle = acquired(LockHandle::acquire(&path).unwrap());
        assert_eq!(
            inspect(&path).unwrap(),
            LockState::Held {
                pid: Some(std::process::id())
            }
        );
        drop(handle);
        assert_eq!(inspect(&path).unwrap(), LockState::Free);
    }

    #[test]
    fn creates_missing_lock_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run").join("nested").join("a.lock");
        let _handle = acquired(LockHandle::acquire(&path).unwrap());
        assert!(path.exists());
    }

    #[test]
    fn liveness_check() {
        assert!(is_process_alive(std::process::id()));
        assert!(!is_process_alive(DEAD_PID));
        assert!(!is_process_alive(0));
        assert!(!is_process_alive(u32::MAX));
    }
}
