use std::path::{Path, PathBuf};

pub use reposync_core::DEFAULT_CONFIG_PATH;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "REPOSYNC_CONFIG";

pub const DEFAULT_UNIT_DIR: &str = "/etc/systemd/system";
pub const DEFAULT_BINARY: &str = "/usr/local/bin/reposync";

pub fn unit_path(unit_dir: &Path, file_name: &str) -> PathBuf {
    unit_dir.join(file_name)
}

/// The running executable, or [`DEFAULT_BINARY`] if it cannot be determined.
pub fn current_binary() -> PathBuf {
    std::env::current_exe().unwrap_or_else(|_| PathBuf::from(DEFAULT_BINARY))
}

/// `sync.log.<n>`
pub fn rotated_log_path(log_path: &Path, n: usize) -> PathBuf {
    let name = log_path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sync.log".to_owned());
    log_path.with_file_name(format!("{name}.{n}"))
}
