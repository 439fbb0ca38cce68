//! Downstream appliers.
//!
//! An applier is started once per successful sync and is never waited on
//! beyond a bounded start window: the sync has already succeeded, so the
//! worst a slow or broken applier can do is turn the outcome into
//! `SyncedTriggerFailed`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use reposync_core::{SyncConfig, TriggerSpec};
use tokio::process::Command;
use tokio::time::Instant;

use crate::error::{io_err, AgentError};
use crate::lock::{is_process_alive, read_pid, write_pid_file};
use crate::process::{run_checked, run_with_timeout};

/// Timeout for read-only `systemctl` queries.
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Upper bound on how long a spawned command is watched for an early exit.
const COMMAND_GRACE: Duration = Duration::from_secs(2);

/// What happened when the applier was asked to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerResult {
    Started,
    AlreadyRunning,
    /// No applier is configured; the sync is the whole job.
    NotConfigured,
    Failed(String),
}

/// The configured applier.
#[derive(Debug, Clone)]
pub enum Applier {
    Systemd(SystemdApplier),
    Command(CommandApplier),
    None,
}

impl Applier {
    pub fn from_config(config: &SyncConfig) -> Self {
        match &config.profile.trigger {
            TriggerSpec::SystemdUnit {
                unit,
                start_timeout_secs,
            } => Applier::Systemd(SystemdApplier::new(
                unit.clone(),
                Duration::from_secs(*start_timeout_secs),
            )),
            TriggerSpec::Command {
                program,
                args,
                start_timeout_secs,
            } => Applier::Command(CommandApplier {
                program: program.clone(),
                args: args.clone(),
                start_timeout: Duration::from_secs(*start_timeout_secs),
                pid_file: apply_pid_path(&config.lock_path),
            }),
            TriggerSpec::None => Applier::None,
        }
    }

    pub async fn is_running(&self) -> Result<bool, AgentError> {
        match self {
            Applier::Systemd(s) => s.is_running().await,
            Applier::Command(c) => Ok(c.is_running()),
            Applier::None => Ok(false),
        }
    }

    pub async fn start(&self, working_copy: &Path) -> TriggerResult {
        match self {
            Applier::Systemd(s) => s.start().await,
            Applier::Command(c) => c.start(working_copy).await,
            Applier::None => TriggerResult::NotConfigured,
        }
    }
}

/// `<lock path>.apply.pid`
pub fn apply_pid_path(lock_path: &Path) -> PathBuf {
    let mut name = lock_path.as_os_str().to_owned();
    name.push(".apply.pid");
    PathBuf::from(name)
}

// ---------------------------------------------------------------------------
// systemd unit
// ---------------------------------------------------------------------------

/// Starts a systemd unit without blocking on its completion.
#[derive(Debug, Clone)]
pub struct SystemdApplier {
    unit: String,
    start_timeout: Duration,
    systemctl: PathBuf,
    poll_interval: Duration,
}

/// The subset of `systemctl show` the applier looks at.
#[derive(Debug, Default, PartialEq, Eq)]
struct UnitSnapshot {
    active_state: String,
    result: String,
    invocation_id: String,
}

impl SystemdApplier {
    pub fn new(unit: impl Into<String>, start_timeout: Duration) -> Self {
        Self {
            unit: unit.into(),
            start_timeout,
            systemctl: PathBuf::from("systemctl"),
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Use a different `systemctl` executable.
    pub fn with_systemctl(mut self, systemctl: impl Into<PathBuf>) -> Self {
        self.systemctl = systemctl.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// `systemctl is-active --quiet <unit>`: exit 0 means running.
    pub async fn is_running(&self) -> Result<bool, AgentError> {
        let mut cmd = Command::new(&self.systemctl);
        cmd.args(["is-active", "--quiet", &self.unit]);
        let out = run_with_timeout(&mut cmd, QUERY_TIMEOUT).await?;
        Ok(out.success())
    }

    /// Queue a start job and wait, up to the start timeout, for evidence that
    /// the unit picked it up.
    pub async fn start(&self) -> TriggerResult {
        let deadline = Instant::now() + self.start_timeout;
        let before = match self.snapshot().await {
            Ok(s) => s,
            Err(err) => return TriggerResult::Failed(err.to_string()),
        };

        let mut cmd = Command::new(&self.systemctl);
        cmd.args(["start", "--no-block", &self.unit]);
        if let Err(err) = run_checked(&mut cmd, self.start_timeout).await {
            return TriggerResult::Failed(err.to_string());
        }
        tracing::debug!(unit = %self.unit, "start job queued");

        loop {
            match self.snapshot().await {
                Ok(now) => match now.active_state.as_str() {
                    "active" | "activating" | "reloading" => return TriggerResult::Started,
                    _ if now.invocation_id == before.invocation_id => {}
                    "failed" => {
                        return TriggerResult::Failed(format!(
                            "{} failed (result: {})",
                            self.unit, now.result
                        ))
                    }
                    // A fast oneshot may finish between two polls.
                    "inactive" | "deactivating" if now.result == "success" => {
                        return TriggerResult::Started
                    }
                    _ => {}
                },
                Err(err) => tracing::debug!(unit = %self.unit, error = %err, "unit state query failed"),
            }

            if Instant::now() + self.poll_interval > deadline {
                return TriggerResult::Failed(format!(
                    "{} did not start within {}s",
                    self.unit,
                    self.start_timeout.as_secs()
                ));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn snapshot(&self) -> Result<UnitSnapshot, AgentError> {
        let mut cmd = Command::new(&self.systemctl);
        cmd.args([
            "show",
            "--property=ActiveState,Result,InvocationID",
            &self.unit,
        ]);
        let out = run_checked(&mut cmd, QUERY_TIMEOUT).await?;
        Ok(parse_show(&out.stdout))
    }
}

fn parse_show(stdout: &str) -> UnitSnapshot {
    let mut snap = UnitSnapshot::default();
    for line in stdout.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().to_owned();
        match key.trim() {
            "ActiveState" => snap.active_state = value,
            "Result" => snap.result = value,
            "InvocationID" => snap.invocation_id = value,
            _ => {}
        }
    }
    snap
}

// ---------------------------------------------------------------------------
// Detached command
// ---------------------------------------------------------------------------

/// Spawns a program inside the working copy and lets it run on its own.
#[derive(Debug, Clone)]
pub struct CommandApplier {
    pub program: String,
    pub args: Vec<String>,
    pub start_timeout: Duration,
    /// Records the PID of the last started applier.
    pub pid_file: PathBuf,
}

impl CommandApplier {
    /// Whether the last started applier is still alive. A PID file left by
    /// one that has exited is removed so the PID cannot be mistaken for a
    /// later, unrelated process.
    pub fn is_running(&self) -> bool {
        match read_pid(&self.pid_file) {
            Some(pid) if is_process_alive(pid) => true,
            _ => {
                self.clear_pid_file();
                false
            }
        }
    }

    fn clear_pid_file(&self) {
        match fs::remove_file(&self.pid_file) {
            Ok(()) => tracing::debug!(path = %self.pid_file.display(), "applier pid file cleared"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(
                path = %self.pid_file.display(),
                error = %err,
                "could not remove applier pid file",
            ),
        }
    }

    pub async fn start(&self, working_copy: &Path) -> TriggerResult {
        match self.spawn(working_copy).await {
            Ok(result) => result,
            Err(err) => TriggerResult::Failed(err.to_string()),
        }
    }

    async fn spawn(&self, working_copy: &Path) -> Result<TriggerResult, AgentError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(working_copy)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            // Own process group: a signal aimed at the agent must not reach it.
            .process_group(0);

        let mut child = cmd.spawn().map_err(|e| io_err(&self.program, e))?;
        let Some(pid) = child.id() else {
            return Ok(TriggerResult::Failed(format!("{} exited immediately", self.program)));
        };
        write_pid_file(&self.pid_file, pid)?;
        tracing::debug!(program = %self.program, pid, "applier spawned");

        let grace = self.start_timeout.min(COMMAND_GRACE);
        let status = match tokio::time::timeout(grace, child.wait()).await {
            // Still running: it started, leave it be.
            Err(_) => return Ok(TriggerResult::Started),
            Ok(status) => status.map_err(|e| io_err(&self.program, e))?,
        };

        // Exited and reaped within the window.
        self.clear_pid_file();
        if status.success() {
            Ok(TriggerResult::Started)
        } else {
            Ok(TriggerResult::Failed(format!(
                "{} exited with {status}",
                self.program
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// A `systemctl` stand-in driven by files in `dir`:
    /// `running` makes `is-active` succeed, `state` is printed by `show`,
    /// `start` records the start request and, if `start_state` exists,
    /// copies it to `state`.
    fn fake_systemctl(dir: &Path) -> PathBuf {
        let script = dir.join("systemctl");
        let body = format!(
            r#"#!/bin/sh
d='{dir}'
case "$1" in
  is-active) [ -f "$d/running" ] ;;
  show) cat "$d/state" 2>/dev/null || printf 'ActiveState=inactive\nResult=success\nInvocationID=\n' ;;
  start) echo "$@" >> "$d/starts"; [ -f "$d/start_fails" ] && exit 5; [ -f "$d/start_state" ] && cp "$d/start_state" "$d/state"; exit 0 ;;
  *) exit 2 ;;
esac
"#,
            dir = dir.display()
        );
        fs::write(&script, body).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    fn applier(dir: &Path, timeout: Duration) -> SystemdApplier {
        SystemdApplier::new("waf-ansible.service", timeout)
            .with_systemctl(fake_systemctl(dir))
            .with_poll_interval(Duration::from_millis(20))
    }

    #[test]
    fn parses_show_output() {
        let snap = parse_show("ActiveState=activating\nResult=success\nInvocationID=abc\n");
        assert_eq!(snap.active_state, "activating");
        assert_eq!(snap.result, "success");
        assert_eq!(snap.invocation_id, "abc");
    }

    #[test]
    fn pid_file_sits_next_to_lock() {
        assert_eq!(
            apply_pid_path(Path::new("/var/run/waf-sync.lock")),
            PathBuf::from("/var/run/waf-sync.lock.apply.pid")
        );
    }

    #[tokio::test]
    async fn is_active_exit_code_decides_running() {
        let dir = TempDir::new().unwrap();
        let unit = applier(dir.path(), Duration::from_secs(1));
        assert!(!unit.is_running().await.unwrap());
        fs::write(dir.path().join("running"), "").unwrap();
        assert!(unit.is_running().await.unwrap());
    }

    #[tokio::test]
    async fn unit_becoming_active_counts_as_started() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("start_state"),
            "ActiveState=activating\nResult=success\nInvocationID=new\n",
        )
        .unwrap();
        let unit = applier(dir.path(), Duration::from_secs(2));

        assert_eq!(unit.start().await, TriggerResult::Started);
        let starts = fs::read_to_string(dir.path().join("starts")).unwrap();
        assert_eq!(starts.trim(), "start --no-block waf-ansible.service");
    }

    #[tokio::test]
    async fn finished_oneshot_with_new_invocation_counts_as_started() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("start_state"),
            "ActiveState=inactive\nResult=success\nInvocationID=second\n",
        )
        .unwrap();
        let unit = applier(dir.path(), Duration::from_secs(2));
        assert_eq!(unit.start().await, TriggerResult::Started);
    }

    #[tokio::test]
    async fn unit_that_never_starts_times_out() {
        let dir = TempDir::new().unwrap();
        let unit = applier(dir.path(), Duration::from_millis(200));
        match unit.start().await {
            TriggerResult::Failed(reason) => assert!(reason.contains("did not start"), "{reason}"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_unit_is_reported() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("start_state"),
            "ActiveState=failed\nResult=exit-code\nInvocationID=x\n",
        )
        .unwrap();
        let unit = applier(dir.path(), Duration::from_secs(2));
        match unit.start().await {
            TriggerResult::Failed(reason) => assert!(reason.contains("exit-code"), "{reason}"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_start_job_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("start_fails"), "").unwrap();
        let unit = applier(dir.path(), Duration::from_secs(1));
        assert!(matches!(unit.start().await, TriggerResult::Failed(_)));
    }

    fn command(dir: &Path, script: &str) -> CommandApplier {
        CommandApplier {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            start_timeout: Duration::from_secs(1),
            pid_file: dir.join("apply.pid"),
        }
    }

    #[tokio::test]
    async fn command_runs_in_working_copy() {
        let dir = TempDir::new().unwrap();
        let apply = command(dir.path(), "pwd > ran");
        assert_eq!(apply.start(dir.path()).await, TriggerResult::Started);
        let ran = fs::read_to_string(dir.path().join("ran")).unwrap();
        assert_eq!(
            Path::new(ran.trim()).canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
        assert!(!apply.pid_file.exists(), "finished applier leaves no pid file");
    }

    #[tokio::test]
    async fn dead_applier_pid_is_cleared() {
        let dir = TempDir::new().unwrap();
        let apply = command(dir.path(), "true");
        fs::write(&apply.pid_file, "999999999\n").unwrap();

        assert!(!apply.is_running());
        assert!(!apply.pid_file.exists());
        assert!(!apply.is_running());
    }

    #[tokio::test]
    async fn command_failing_early_is_reported() {
        let dir = TempDir::new().unwrap();
        let apply = command(dir.path(), "exit 4");
        assert!(matches!(apply.start(dir.path()).await, TriggerResult::Failed(_)));
    }

    #[tokio::test]
    async fn long_running_command_is_started_and_running() {
        let dir = TempDir::new().unwrap();
        let mut apply = command(dir.path(), "sleep 5");
        apply.start_timeout = Duration::from_millis(100);
        assert_eq!(apply.start(dir.path()).await, TriggerResult::Started);
        assert!(apply.is_running());

        if let Some(pid) = read_pid(&apply.pid_file) {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid as i32),
                nix::sys::signal::Signal::SIGKILL,
            );
        }
    }

    #[tokio::test]
    async fn missing_program_fails_to_start() {
        let dir = TempDir::new().unwrap();
        let apply = CommandApplier {
            program: "reposync-no-such-applier".into(),
            args: vec![],
            start_timeout: Duration::from_secs(1),
            pid_file: dir.path().join("apply.pid"),
        };
        assert!(matches!(apply.start(dir.path()).await, TriggerResult::Failed(_)));
        assert!(!apply.is_running());
    }
}
