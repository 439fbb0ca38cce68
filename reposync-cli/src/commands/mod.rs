pub mod config;
pub mod logs;
pub mod run;
pub mod status;
pub mod units;

use std::path::Path;

use anyhow::{Context, Result};
use reposync_core::SyncConfig;

pub(crate) fn load_config(path: &Path) -> Result<SyncConfig> {
    reposync_core::load_at(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

/// Single-threaded runtime: a run is strictly sequential.
pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}
