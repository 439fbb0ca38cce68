//! Domain types for reposync.
//!
//! All path fields use `PathBuf`. Everything that crosses the config boundary
//! is serializable via serde.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{de, Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Name of a deployment (e.g. `waf`, `podman`). Used for lock, unit and log naming.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectName(pub String);

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ProjectName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProjectName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A git branch name. Pathed names (`feat/new-thing`) are valid as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// Validate `name` against the subset of `git check-ref-format` rules
    /// that matter for a branch passed on the command line.
    pub fn parse(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("branch name is empty")
        } else if name.chars().any(char::is_whitespace) {
            Some("branch name contains whitespace")
        } else if name.starts_with('-') {
            Some("branch name starts with '-'")
        } else if name.starts_with('/') || name.ends_with('/') || name.contains("//") {
            Some("branch name has an empty path component")
        } else if name.contains("..") {
            Some("branch name contains '..'")
        } else if name.ends_with(".lock") || name.ends_with('.') {
            Some("branch name ends with '.lock' or '.'")
        } else if name
            .chars()
            .any(|c| matches!(c, '~' | '^' | ':' | '?' | '*' | '[' | '\\') || c.is_control())
        {
            Some("branch name contains a character git forbids in refs")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(ConfigError::InvalidBranch { name, reason }),
            None => Ok(Self(name)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Remote-tracking ref for this branch, e.g. `origin/feat/x`.
    pub fn remote_ref(&self) -> String {
        format!("origin/{}", self.0)
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Accepts any scalar: YAML and environment layers type `2024` or `true`
/// before it gets here, and both are valid branch names.
impl<'de> Deserialize<'de> for BranchName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BranchVisitor;

        impl de::Visitor<'_> for BranchVisitor {
            type Value = BranchName;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a branch name")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<BranchName, E> {
                BranchName::parse(v).map_err(E::custom)
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<BranchName, E> {
                BranchName::parse(v).map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<BranchName, E> {
                self.visit_string(v.to_string())
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<BranchName, E> {
                self.visit_string(v.to_string())
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<BranchName, E> {
                self.visit_string(v.to_string())
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<BranchName, E> {
                self.visit_string(v.to_string())
            }

            fn visit_char<E: de::Error>(self, v: char) -> Result<BranchName, E> {
                self.visit_string(v.to_string())
            }
        }

        deserializer.deserialize_any(BranchVisitor)
    }
}

impl From<BranchName> for String {
    fn from(b: BranchName) -> Self {
        b.0
    }
}

impl Default for BranchName {
    fn default() -> Self {
        Self("main".to_owned())
    }
}

/// A full commit object id as printed by `git rev-parse`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitHash(pub String);

impl CommitHash {
    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for CommitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for CommitHash {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// How the working copy is moved onto the fetched remote tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStrategy {
    /// `git reset --hard origin/<branch>`.
    #[default]
    Reset,
    /// `git pull --ff-only origin <branch>`.
    FastForward,
}

/// The downstream applier invoked after a successful sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// Start a systemd unit and wait for it to become active.
    SystemdUnit {
        unit: String,
        #[serde(default = "default_start_timeout_secs")]
        start_timeout_secs: u64,
    },
    /// Spawn a program inside the working copy.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_start_timeout_secs")]
        start_timeout_secs: u64,
    },
    /// Sync only.
    #[default]
    None,
}

impl TriggerSpec {
    pub fn start_timeout_secs(&self) -> Option<u64> {
        match self {
            TriggerSpec::SystemdUnit {
                start_timeout_secs, ..
            }
            | TriggerSpec::Command {
                start_timeout_secs, ..
            } => Some(*start_timeout_secs),
            TriggerSpec::None => None,
        }
    }
}

fn default_start_timeout_secs() -> u64 {
    60
}

/// Fully resolved per-deployment profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSpec {
    /// File name of the private key under the SSH directory.
    pub ssh_identity_name: String,
    /// File name of the lock under the lock directory.
    pub lock_file_name: String,
    /// Paths, relative to the working copy, that must exist after a sync.
    #[serde(default)]
    pub required_paths: Vec<PathBuf>,
    /// Paths whose absence is only worth a warning.
    #[serde(default)]
    pub optional_paths: Vec<PathBuf>,
    /// Glob patterns, relative to the working copy, that get the executable bit.
    #[serde(default)]
    pub executable_paths: Vec<String>,
    #[serde(default)]
    pub trigger: TriggerSpec,
}

/// Profile fields as they appear in the config file. Every field is optional
/// so that a preset can supply the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProfileOverrides {
    pub ssh_identity_name: Option<String>,
    pub lock_file_name: Option<String>,
    pub required_paths: Option<Vec<PathBuf>>,
    pub optional_paths: Option<Vec<PathBuf>>,
    pub executable_paths: Option<Vec<String>>,
    pub trigger: Option<TriggerSpec>,
}

/// Built-in profiles for the two reference workloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// WAF configured by an Ansible playbook.
    Waf,
    /// Podman container host configured by a deploy script.
    Podman,
}

impl Preset {
    /// Profile defaults for this preset. The lock file name is derived from
    /// the project name.
    pub fn profile(self, project: &ProjectName) -> ProfileSpec {
        let lock_file_name = default_lock_file_name(project);
        match self {
            Preset::Waf => ProfileSpec {
                ssh_identity_name: "waf_deploy_key".to_owned(),
                lock_file_name,
                required_paths: vec![PathBuf::from("site.yml")],
                optional_paths: vec![
                    PathBuf::from("inventory"),
                    PathBuf::from("group_vars"),
                    PathBuf::from("roles"),
                ],
                executable_paths: vec!["scripts/*.sh".to_owned()],
                trigger: TriggerSpec::SystemdUnit {
                    unit: "waf-ansible.service".to_owned(),
                    start_timeout_secs: default_start_timeout_secs(),
                },
            },
            Preset::Podman => ProfileSpec {
                ssh_identity_name: "podman_deploy_key".to_owned(),
                lock_file_name,
                required_paths: vec![PathBuf::from("deploy.sh")],
                optional_paths: vec![PathBuf::from("containers"), PathBuf::from("compose")],
                executable_paths: vec!["deploy.sh".to_owned(), "scripts/*.sh".to_owned()],
                trigger: TriggerSpec::SystemdUnit {
                    unit: "podman-deploy.service".to_owned(),
                    start_timeout_secs: default_start_timeout_secs(),
                },
            },
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Preset::Waf => write!(f, "waf"),
            Preset::Podman => write!(f, "podman"),
        }
    }
}

/// `<project>-sync.lock`
pub fn default_lock_file_name(project: &ProjectName) -> String {
    format!("{project}-sync.lock")
}

impl ProfileOverrides {
    /// Layer these overrides on top of `base`.
    pub fn apply(self, mut base: ProfileSpec) -> ProfileSpec {
        if let Some(v) = self.ssh_identity_name {
            base.ssh_identity_name = v;
        }
        if let Some(v) = self.lock_file_name {
            base.lock_file_name = v;
        }
        if let Some(v) = self.required_paths {
            base.required_paths = v;
        }
        if let Some(v) = self.optional_paths {
            base.optional_paths = v;
        }
        if let Some(v) = self.executable_paths {
            base.executable_paths = v;
        }
        if let Some(v) = self.trigger {
            base.trigger = v;
        }
        base
    }
}

// ---------------------------------------------------------------------------
// Run state and outcome
// ---------------------------------------------------------------------------

/// Snapshot of the working copy taken during one run. Never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct RepositoryState {
    /// `None` on a detached HEAD.
    pub current_branch: Option<String>,
    pub local_commit: Option<CommitHash>,
    pub remote_commit: Option<CommitHash>,
}

impl RepositoryState {
    pub fn is_up_to_date(&self) -> bool {
        matches!(
            (&self.local_commit, &self.remote_commit),
            (Some(local), Some(remote)) if local == remote
        )
    }
}

/// Why a sync run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("lock file error: {0}")]
    LockIo(String),

    #[error("clone failed: {0}")]
    Clone(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("checkout failed: {0}")]
    Checkout(String),

    #[error("pull failed: {0}")]
    Pull(String),

    #[error("could not resolve revision: {0}")]
    RevParse(String),

    #[error("required paths missing from working copy: {}", display_paths(.0))]
    MissingLayout(Vec<PathBuf>),

    #[error("could not normalise permissions: {0}")]
    Permissions(String),

    #[error("run interrupted by signal")]
    Interrupted,
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Why the downstream trigger was deliberately not fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// The emergency override marker exists.
    NoDeployMarker { marker: PathBuf },
    /// The applier is already running.
    AlreadyRunning,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoDeployMarker { marker } => {
                write!(f, "emergency mode: {} present", marker.display())
            }
            SkipReason::AlreadyRunning => write!(f, "applier already running"),
        }
    }
}

/// Result of one sync run. Consumed for logging and the exit code only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Another live process owns the lock; nothing was touched.
    LockContended { owner_pid: Option<u32> },
    /// Local and remote agree and the branch is correct.
    NoChangesDetected,
    /// Working copy updated and the applier started.
    SyncedAndTriggered,
    /// Working copy updated; the trigger was suppressed on purpose.
    SyncedTriggerSkipped { reason: SkipReason },
    /// Working copy updated; starting the applier failed or timed out.
    SyncedTriggerFailed { reason: String },
    /// The run failed; the scheduler should see a failure.
    SyncFailed { reason: FailureReason },
}

impl SyncOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, SyncOutcome::SyncFailed { .. })
    }

    /// Process exit code: non-zero only for [`SyncOutcome::SyncFailed`].
    pub fn exit_code(&self) -> u8 {
        if self.is_failure() {
            1
        } else {
            0
        }
    }

    pub fn failed(reason: FailureReason) -> Self {
        SyncOutcome::SyncFailed { reason }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::LockContended {
                owner_pid: Some(pid),
            } => write!(f, "skipped: lock held by pid {pid}"),
            SyncOutcome::LockContended { owner_pid: None } => {
                write!(f, "skipped: lock held by another process")
            }
            SyncOutcome::NoChangesDetected => write!(f, "no changes detected"),
            SyncOutcome::SyncedAndTriggered => write!(f, "synced and triggered"),
            SyncOutcome::SyncedTriggerSkipped { reason } => {
                write!(f, "synced, trigger skipped ({reason})")
            }
            SyncOutcome::SyncedTriggerFailed { reason } => {
                write!(f, "synced, trigger failed ({reason})")
            }
            SyncOutcome::SyncFailed { reason } => write!(f, "sync failed: {reason}"),
        }
    }
}

/// Join `rel` onto `root` unless it is already absolute.
pub fn resolve_under(root: &Path, rel: &Path) -> PathBuf {
    if rel.is_absolute() {
        rel.to_path_buf()
    } else {
        root.join(rel)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
