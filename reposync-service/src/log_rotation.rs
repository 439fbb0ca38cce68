//! Size-based rotation for the sync log.
//!
//! `sync.log` is rotated once it reaches 10 MiB, keeping at most 5 copies:
//!   sync.log → sync.log.1 → sync.log.2 → … → sync.log.5
//!
//! Rotation runs at process start, before the log file is opened for
//! appending, and is skipped while another run holds the lock: that run is
//! still appending to `sync.log`.

use std::fs;
use std::io;
use std::path::Path;

use reposync_agent::lock::{inspect, LockState};

use crate::error::{io_err, ServiceError};
use crate::paths::rotated_log_path;

pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;
pub const MAX_ROTATED_FILES: usize = 5;

/// Rotate `log_path` if it is at least `max_bytes` long.
///
/// Returns `true` if rotation happened. A missing log is not an error.
pub fn rotate_if_needed(log_path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes || max_files == 0 {
        return Ok(false);
    }

    remove_if_present(&rotated_log_path(log_path, max_files))?;
    for n in (1..max_files).rev() {
        rename_if_present(
            &rotated_log_path(log_path, n),
            &rotated_log_path(log_path, n + 1),
        )?;
    }
    // A concurrent run may have rotated first.
    rename_if_present(log_path, &rotated_log_path(log_path, 1))?;
    Ok(true)
}

/// Rotate with the default limits, unless `lock_path` is held.
pub fn rotate_sync_log(log_path: &Path, lock_path: &Path) -> Result<bool, ServiceError> {
    rotate_unless_locked(log_path, lock_path, MAX_LOG_BYTES, MAX_ROTATED_FILES)
}

/// [`rotate_if_needed`], skipped when a live run owns `lock_path`.
pub fn rotate_unless_locked(
    log_path: &Path,
    lock_path: &Path,
    max_bytes: u64,
    max_files: usize,
) -> Result<bool, ServiceError> {
    if let LockState::Held { pid } = inspect(lock_path)? {
        tracing::debug!(?pid, "lock held, leaving sync log in place");
        return Ok(false);
    }
    rotate_if_needed(log_path, max_bytes, max_files).map_err(|e| io_err(log_path, e))
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

fn rename_if_present(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
