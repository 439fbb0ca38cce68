//! End-to-end runs of the `reposync` binary against temp configs and a local
//! bare repository.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use assert_cmd::prelude::*;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn reposync() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("reposync"));
    cmd.env_remove("REPOSYNC_CONFIG").env("RUST_LOG", "info");
    cmd
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args([
            "-c",
            "user.name=reposync",
            "-c",
            "user.email=reposync@example.invalid",
            "-c",
            "commit.gpgsign=false",
            "-c",
            "init.defaultBranch=main",
        ])
        .arg("-C")
        .arg(dir)
        .args(args)
        .status()
        .expect("run git");
    assert!(status.success(), "git {args:?} failed");
}

/// A bare origin holding one commit with a valid WAF layout.
fn origin(root: &Path) -> PathBuf {
    let origin = root.join("origin.git");
    let seed = root.join("seed");
    fs::create_dir_all(&origin).unwrap();
    fs::create_dir_all(seed.join("scripts")).unwrap();
    git(&origin, &["init", "--bare", "--quiet"]);
    git(&seed, &["init", "--quiet"]);
    fs::write(seed.join("site.yml"), "- hosts: all\n").unwrap();
    fs::write(seed.join("scripts/apply.sh"), "#!/bin/sh\n").unwrap();
    git(&seed, &["add", "--all"]);
    git(&seed, &["commit", "--quiet", "-m", "initial"]);
    git(&seed, &["push", "--quiet", origin.to_str().unwrap(), "HEAD:refs/heads/main"]);
    origin
}

/// Write a config rooted in `root` and return its path.
fn write_config(root: &Path, repository_url: &str) -> PathBuf {
    let install = root.join("install");
    let yaml = format!(
        "project: waf\n\
         repository_url: {repository_url}\n\
         install_directory: {install}\n\
         ssh_directory: {root}/ssh\n\
         lock_directory: {root}/run\n\
         no_deploy_marker: {root}/NO_DEPLOY\n\
         git_timeout_secs: 30\n\
         preset: waf\n\
         profile:\n  trigger:\n    kind: none\n",
        install = install.display(),
        root = root.display(),
    );
    let path = root.join("config.yaml");
    fs::write(&path, yaml).unwrap();
    path
}

// ---------------------------------------------------------------------------
// config / status / units
// ---------------------------------------------------------------------------

#[test]
fn config_prints_resolved_paths() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "git@github.com:acme/waf-config.git");

    reposync()
        .arg("config")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(contains("working_copy:"))
        .stdout(contains("install/repo"))
        .stdout(contains("waf-sync.lock"));
}

#[test]
fn missing_config_fails() {
    let dir = TempDir::new().unwrap();
    reposync()
        .args(["status", "--config"])
        .arg(dir.path().join("absent.yaml"))
        .assert()
        .failure()
        .stderr(contains("config not found"));
}

#[test]
fn status_json_before_first_run() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "git@github.com:acme/waf-config.git");

    let output = reposync()
        .args(["status", "--json"])
        .env("REPOSYNC_CONFIG", &config)
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["project"], "waf");
    assert_eq!(report["cloned"], false);
    assert_eq!(report["lock"]["state"], "free");
    assert_eq!(report["emergency_mode"], false);
}

#[test]
fn units_print_renders_timer_and_service() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "git@github.com:acme/waf-config.git");

    reposync()
        .args(["units", "print", "--interval", "15", "--binary", "/usr/local/bin/reposync"])
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(contains("# waf-sync.service"))
        .stdout(contains("# waf-sync.timer"))
        .stdout(contains("OnUnitActiveSec=15min"))
        .stdout(contains("ExecStart=/usr/local/bin/reposync run --config"));
}

#[test]
fn units_print_rejects_zero_interval() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "git@github.com:acme/waf-config.git");

    reposync()
        .args(["units", "print", "--interval", "0"])
        .arg("--config")
        .arg(&config)
        .assert()
        .failure();
}

// ---------------------------------------------------------------------------
// run / logs
// ---------------------------------------------------------------------------

#[test]
fn run_clones_then_reports_no_changes() {
    let dir = TempDir::new().unwrap();
    let origin = origin(dir.path());
    let config = write_config(dir.path(), origin.to_str().unwrap());

    // No subcommand means `run`.
    reposync().env("REPOSYNC_CONFIG", &config).assert().success();
    assert!(dir.path().join("install/repo/site.yml").exists());
    assert!(!dir.path().join("run/waf-sync.lock").exists());

    reposync()
        .args(["run", "--verbose", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(contains("no changes detected"));

    reposync()
        .args(["logs", "--lines", "50", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(contains("working copy cloned"))
        .stdout(contains("no changes detected"));
}

#[test]
fn run_with_unreachable_remote_exits_nonzero() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nowhere.git");
    let config = write_config(dir.path(), missing.to_str().unwrap());

    reposync()
        .args(["run", "--config"])
        .arg(&config)
        .assert()
        .code(1);

    let log = fs::read_to_string(dir.path().join("install/logs/sync.log")).unwrap();
    assert!(predicate::str::contains("clone failed").eval(&log), "log was: {log}");
}

#[test]
fn run_without_config_exits_nonzero() {
    let dir = TempDir::new().unwrap();
    reposync()
        .args(["run", "--config"])
        .arg(dir.path().join("absent.yaml"))
        .assert()
        .failure()
        .stderr(contains("sync not started"));
}

/// Poll `cond` for up to ten seconds.
fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(20));
    }
}

#[test]
fn sigterm_during_run_releases_the_lock() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "git@github.com:acme/waf-config.git");

    // A `git` that never returns, like a clone stuck on a dead remote.
    let bin = dir.path().join("bin");
    fs::create_dir_all(&bin).unwrap();
    let fake_git = bin.join("git");
    fs::write(&fake_git, "#!/bin/sh\nexec sleep 30\n").unwrap();
    fs::set_permissions(&fake_git, fs::Permissions::from_mode(0o755)).unwrap();
    let path = format!(
        "{}:{}",
        bin.display(),
        std::env::var("PATH").unwrap_or_default()
    );

    let mut child = reposync()
        .args(["run", "--config"])
        .arg(&config)
        .env("PATH", path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let lock = dir.path().join("run/waf-sync.lock");
    wait_for("the run to take the lock", || lock.exists());
    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).unwrap();

    let mut status: Option<ExitStatus> = None;
    wait_for("the run to exit", || {
        status = child.try_wait().unwrap();
        status.is_some()
    });
    assert_eq!(status.and_then(|s| s.code()), Some(1));
    assert!(!lock.exists(), "lock released on SIGTERM");

    let log = fs::read_to_string(dir.path().join("install/logs/sync.log")).unwrap();
    assert!(
        predicate::str::contains("interrupted by signal").eval(&log),
        "log was: {log}"
    );
}
