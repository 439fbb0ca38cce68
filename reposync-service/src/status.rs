//! Read-only status report. Never fetches, never takes the lock.

use std::fmt;
use std::path::PathBuf;

use reposync_agent::lock::{inspect as inspect_lock, LockState};
use reposync_agent::GitBackend;
use reposync_core::SyncConfig;
use serde::Serialize;

use crate::error::ServiceError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub project: String,
    pub target_branch: String,
    pub working_copy: PathBuf,
    pub cloned: bool,
    pub current_branch: Option<String>,
    pub head: Option<String>,
    /// Set when the working copy exists but git could not read it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_error: Option<String>,
    pub lock_path: PathBuf,
    pub lock: LockState,
    pub no_deploy_marker: PathBuf,
    pub emergency_mode: bool,
    pub log_path: PathBuf,
}

impl StatusReport {
    pub fn to_json(&self) -> Result<String, ServiceError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Gather the current state of `config`'s working copy, lock and marker.
pub async fn inspect<G>(config: &SyncConfig, git: &G) -> Result<StatusReport, ServiceError>
where
    G: GitBackend + ?Sized,
{
    let lock = inspect_lock(&config.lock_path)?;
    let cloned = git.is_cloned().await;

    let (mut current_branch, mut head, mut git_error) = (None, None, None);
    if cloned {
        match git.current_branch().await {
            Ok(branch) => current_branch = branch,
            Err(err) => git_error = Some(err.to_string()),
        }
        match git.rev_parse("HEAD").await {
            Ok(commit) => head = Some(commit.0),
            Err(err) => {
                git_error.get_or_insert_with(|| err.to_string());
            }
        }
    }

    Ok(StatusReport {
        project: config.project.to_string(),
        target_branch: config.target_branch.to_string(),
        working_copy: config.working_copy.clone(),
        cloned,
        current_branch,
        head,
        git_error,
        lock_path: config.lock_path.clone(),
        lock,
        no_deploy_marker: config.no_deploy_marker.clone(),
        emergency_mode: config.no_deploy_marker.exists(),
        log_path: config.log_path.clone(),
    })
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "project:        {}", self.project)?;
        writeln!(f, "target branch:  {}", self.target_branch)?;
        writeln!(f, "working copy:   {}", self.working_copy.display())?;
        if self.cloned {
            writeln!(
                f,
                "current branch: {}",
                self.current_branch.as_deref().unwrap_or("(detached)")
            )?;
            writeln!(f, "HEAD:           {}", self.head.as_deref().unwrap_or("(unknown)"))?;
        } else {
            writeln!(f, "current branch: (not cloned)")?;
        }
        if let Some(err) = &self.git_error {
            writeln!(f, "git error:      {err}")?;
        }
        let lock = match &self.lock {
            LockState::Free => "free".to_owned(),
            LockState::Held { pid: Some(pid) } => format!("held by pid {pid}"),
            LockState::Held { pid: None } => "held".to_owned(),
            LockState::Stale { pid: Some(pid) } => format!("stale (pid {pid} is gone)"),
            LockState::Stale { pid: None } => "stale".to_owned(),
        };
        writeln!(f, "lock:           {lock} ({})", self.lock_path.display())?;
        writeln!(
            f,
            "emergency mode: {}",
            if self.emergency_mode {
                "on, trigger suppressed"
            } else {
                "off"
            }
        )?;
        write!(f, "log:            {}", self.log_path.display())
    }
}
