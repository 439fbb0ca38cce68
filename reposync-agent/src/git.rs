//! Version-control seam.
//!
//! [`GitBackend`] is what the state machine talks to; [`GitCli`] drives the
//! `git` binary. Every invocation:
//!
//! - trusts the working copy for this call only (`-c safe.directory=<wc>`),
//!   so a working copy created by another user never fails with "dubious
//!   ownership" and the global git config is left alone;
//! - authenticates with the configured deploy key and never prompts;
//! - runs under the configured timeout and is killed if it overruns.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reposync_core::{BranchName, CommitHash, SyncConfig};
use tokio::process::Command;

use crate::error::{io_err, AgentError};
use crate::process::{run_checked, run_with_timeout, ProcessError};

/// Operations the sync state machine needs from version control.
#[async_trait]
pub trait GitBackend: Send + Sync {
    /// Whether the working copy holds a repository at all.
    async fn is_cloned(&self) -> bool;

    /// Clone `branch` of the remote into the (absent or empty) working copy.
    async fn clone_branch(&self, branch: &BranchName) -> Result<(), AgentError>;

    /// Checked-out branch; `None` on a detached HEAD.
    async fn current_branch(&self) -> Result<Option<String>, AgentError>;

    /// Update `origin/<branch>` from the remote.
    async fn fetch(&self, branch: &BranchName) -> Result<(), AgentError>;

    /// Create or reset local `branch` at `origin/<branch>` and check it out.
    async fn checkout_tracking(&self, branch: &BranchName) -> Result<(), AgentError>;

    /// `reset --hard <rev>`.
    async fn reset_hard(&self, rev: &str) -> Result<(), AgentError>;

    /// Resolve `rev` to a commit.
    async fn rev_parse(&self, rev: &str) -> Result<CommitHash, AgentError>;

    /// `pull --ff-only origin <branch>`.
    async fn pull_ff_only(&self, branch: &BranchName) -> Result<(), AgentError>;
}

/// [`GitBackend`] over the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    working_copy: PathBuf,
    repository_url: String,
    ssh_identity: PathBuf,
    timeout: Duration,
}

impl GitCli {
    pub fn new(
        working_copy: impl Into<PathBuf>,
        repository_url: impl Into<String>,
        ssh_identity: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            working_copy: working_copy.into(),
            repository_url: repository_url.into(),
            ssh_identity: ssh_identity.into(),
            timeout,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            &config.working_copy,
            &config.repository_url,
            &config.ssh_identity,
            config.git_timeout(),
        )
    }

    /// Value for `GIT_SSH_COMMAND`.
    pub fn ssh_command(&self) -> String {
        format!(
            "ssh -i {} -o IdentitiesOnly=yes -o BatchMode=yes \
             -o StrictHostKeyChecking=accept-new -o LogLevel=ERROR",
            shell_quote(&self.ssh_identity.to_string_lossy())
        )
    }

    /// A `git` command with transport and trust settings applied, not yet
    /// pointed at any directory.
    fn base_command(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.arg("-c")
            .arg(format!("safe.directory={}", self.working_copy.display()))
            .env("GIT_SSH_COMMAND", self.ssh_command())
            .env("GIT_TERMINAL_PROMPT", "0");
        cmd
    }

    /// A `git -C <working copy>` command.
    fn command(&self) -> Command {
        let mut cmd = self.base_command();
        cmd.arg("-C").arg(&self.working_copy);
        cmd
    }

    async fn git(&self, op: &'static str, args: &[&str]) -> Result<String, AgentError> {
        let mut cmd = self.command();
        cmd.args(args);
        tracing::debug!(op, ?args, "git");
        let out = run_checked(&mut cmd, self.timeout)
            .await
            .map_err(|source| AgentError::Git { op, source })?;
        Ok(out.stdout_trimmed().to_owned())
    }
}

#[async_trait]
impl GitBackend for GitCli {
    async fn is_cloned(&self) -> bool {
        self.working_copy.join(".git").exists()
    }

    async fn clone_branch(&self, branch: &BranchName) -> Result<(), AgentError> {
        if let Some(parent) = self.working_copy.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let mut cmd = self.base_command();
        cmd.args(["clone", "--branch", branch.as_str(), "--"])
            .arg(&self.repository_url)
            .arg(&self.working_copy);
        run_checked(&mut cmd, self.timeout)
            .await
            .map_err(|source| AgentError::Git { op: "clone", source })?;
        Ok(())
    }

    async fn current_branch(&self) -> Result<Option<String>, AgentError> {
        let mut cmd = self.command();
        cmd.args(["symbolic-ref", "--quiet", "--short", "HEAD"]);
        let out = run_with_timeout(&mut cmd, self.timeout)
            .await
            .map_err(|source| AgentError::Git {
                op: "symbolic-ref",
                source,
            })?;
        match out.status.code() {
            Some(0) => Ok(Some(out.stdout_trimmed().to_owned()).filter(|b| !b.is_empty())),
            // `--quiet` exits 1 without output when HEAD is detached.
            Some(1) if out.stderr.trim().is_empty() => Ok(None),
            _ => Err(AgentError::Git {
                op: "symbolic-ref",
                source: ProcessError::Failed {
                    program: "git".to_owned(),
                    status: out.status,
                    stderr: out.stderr.trim().to_owned(),
                },
            }),
        }
    }

    async fn fetch(&self, branch: &BranchName) -> Result<(), AgentError> {
        let refspec = format!("+refs/heads/{branch}:refs/remotes/origin/{branch}");
        self.git("fetch", &["fetch", "origin", &refspec])
            .await
            .map(drop)
    }

    async fn checkout_tracking(&self, branch: &BranchName) -> Result<(), AgentError> {
        let remote = branch.remote_ref();
        self.git("checkout", &["checkout", "--force", "-B", branch.as_str(), &remote])
            .await
            .map(drop)
    }

    async fn reset_hard(&self, rev: &str) -> Result<(), AgentError> {
        self.git("reset", &["reset", "--hard", "--quiet", rev])
            .await
            .map(drop)
    }

    async fn rev_parse(&self, rev: &str) -> Result<CommitHash, AgentError> {
        let spec = format!("{rev}^{{commit}}");
        let out = self
            .git("rev-parse", &["rev-parse", "--verify", "--quiet", &spec])
            .await?;
        Ok(CommitHash(out))
    }

    async fn pull_ff_only(&self, branch: &BranchName) -> Result<(), AgentError> {
        self.git("pull", &["pull", "--ff-only", "origin", branch.as_str()])
            .await
            .map(drop)
    }
}

/// Quote `s` for `sh` if it contains anything beyond a conservative set.
fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+' | ':' | '@'));
    if plain {
        s.to_owned()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}
