//! External process execution with a hard timeout.
//!
//! Every child is spawned with `kill_on_drop(true)` and stdin closed, so a hung
//! transport or a dropped run future never leaves a process blocking the next
//! scheduler tick.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

/// Captured result of a finished child.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Trimmed stdout.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Why an external process did not produce a usable result.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("could not start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` did not finish within {}s", timeout.as_secs())]
    Timeout { program: String, timeout: Duration },

    #[error("`{program}` exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// Run `cmd` to completion, killing it if it outlives `timeout`.
///
/// A non-zero exit is *not* an error here; see [`run_checked`].
pub async fn run_with_timeout(
    cmd: &mut Command,
    timeout: Duration,
) -> Result<CommandOutput, ProcessError> {
    let program = program_name(cmd);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;

    // On timeout the `wait_with_output` future is dropped, which drops the
    // child and kills it.
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(CommandOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
        Ok(Err(source)) => Err(ProcessError::Spawn { program, source }),
        Err(_) => Err(ProcessError::Timeout { program, timeout }),
    }
}

/// Like [`run_with_timeout`] but a non-zero exit becomes
/// [`ProcessError::Failed`] carrying trimmed stderr.
pub async fn run_checked(
    cmd: &mut Command,
    timeout: Duration,
) -> Result<CommandOutput, ProcessError> {
    let output = run_with_timeout(cmd, timeout).await?;
    if output.success() {
        return Ok(output);
    }
    Err(ProcessError::Failed {
        program: program_name(cmd),
        status: output.status,
        stderr: output.stderr.trim().to_string(),
    })
}

fn program_name(cmd: &Command) -> String {
    cmd.as_std().get_program().to_string_lossy().into_owned()
}
