//! Tracing setup.
//!
//! Every line goes to the append-only `sync.log` with an RFC 3339 timestamp.
//! When the process runs on a terminal the same events are echoed to stdout.
//! `RUST_LOG` overrides the default `info` filter.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use reposync_core::SyncConfig;

use crate::error::{io_err, ServiceError};
use crate::log_rotation::rotate_sync_log;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Open `log_path` for appending, creating its directory first.
pub fn open_log(log_path: &Path) -> Result<File, ServiceError> {
    if let Some(dir) = log_path.parent() {
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| io_err(log_path, e))
}

/// Install the global subscriber: the config's `log_path`, plus stdout when
/// `interactive`.
///
/// Rotates the log first if it has grown past the size limit and no other
/// run holds the lock.
pub fn init(config: &SyncConfig, interactive: bool) -> Result<(), ServiceError> {
    let log_path = config.log_path.as_path();
    let rotation = rotate_sync_log(log_path, &config.lock_path);
    let file = open_log(log_path)?;

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file));
    let stdout_layer = interactive.then(|| fmt::layer().with_target(false));

    tracing_subscriber::registry()
        .with(env_filter())
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| ServiceError::Logging(e.to_string()))?;

    match rotation {
        Ok(true) => tracing::info!(path = %log_path.display(), "log file rotated"),
        Ok(false) => {}
        Err(err) => tracing::warn!(path = %log_path.display(), error = %err, "log rotation failed"),
    }
    Ok(())
}

/// Fallback subscriber on stderr, for when the log file is unusable or no
/// configuration could be loaded.
pub fn init_stderr() {
    let _ = fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// The last `lines` lines of `log_path`.
pub fn tail(log_path: &Path, lines: usize) -> Result<Vec<String>, ServiceError> {
    let file = File::open(log_path).map_err(|e| io_err(log_path, e))?;
    let mut buf = std::collections::VecDeque::with_capacity(lines);
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| io_err(log_path, e))?;
        if buf.len() == lines {
            buf.pop_front();
        }
        if lines > 0 {
            buf.push_back(line);
        }
    }
    Ok(buf.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_log_creates_directory_and_appends() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("logs").join("sync.log");
        fs::create_dir_all(log.parent().unwrap()).unwrap();
        fs::write(&log, "first\n").unwrap();

        use std::io::Write;
        let mut f = open_log(&log).unwrap();
        writeln!(f, "second").unwrap();
        assert_eq!(fs::read_to_string(&log).unwrap(), "first\nsecond\n");

        let nested = dir.path().join("a").join("b").join("sync.log");
        open_log(&nested).unwrap();
        assert!(nested.exists());
    }

    #[test]
    fn tail_returns_last_lines() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("sync.log");
        fs::write(&log, "1\n2\n3\n4\n").unwrap();
        assert_eq!(tail(&log, 2).unwrap(), ["3", "4"]);
        assert_eq!(tail(&log, 10).unwrap(), ["1", "2", "3", "4"]);
        assert!(tail(&log, 0).unwrap().is_empty());
    }

    #[test]
    fn tail_of_missing_log_names_path() {
        let dir = TempDir::new().unwrap();
        let err = tail(&dir.path().join("nope.log"), 5).unwrap_err();
        assert!(err.to_string().contains("nope.log"));
    }
}
