//! Layered configuration.
//!
//! # Sources (lowest to highest precedence)
//!
//! 1. serde defaults on [`ConfigFile`]
//! 2. the YAML file (default [`DEFAULT_CONFIG_PATH`])
//! 3. `REPOSYNC_*` environment variables, `__` separating nested keys
//!    (`REPOSYNC_PROFILE__LOCK_FILE_NAME=...`)
//!
//! The merged [`ConfigFile`] is then resolved into an immutable
//! [`SyncConfig`] with every path made absolute.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{
    default_lock_file_name, resolve_under, BranchName, Preset, ProfileOverrides, ProfileSpec,
    ProjectName, TriggerSpec, UpdateStrategy,
};

/// Well-known config location read by the agent when invoked with no arguments.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/reposync/config.yaml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "REPOSYNC_";

const DEFAULT_SSH_DIRECTORY: &str = "/root/.ssh";
const DEFAULT_LOCK_DIRECTORY: &str = "/var/run";
const NO_DEPLOY_MARKER: &str = "NO_DEPLOY";
const BRANCH_KEY: &str = "target_branch";

// ---------------------------------------------------------------------------
// 1. File shape
// ---------------------------------------------------------------------------

/// Configuration as written on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub project: ProjectName,
    pub repository_url: String,
    #[serde(default)]
    pub target_branch: BranchName,
    pub install_directory: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_user: Option<String>,
    #[serde(default = "default_ssh_directory")]
    pub ssh_directory: PathBuf,
    #[serde(default = "default_lock_directory")]
    pub lock_directory: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_deploy_marker: Option<PathBuf>,
    #[serde(default)]
    pub update_strategy: UpdateStrategy,
    #[serde(default = "default_git_timeout_secs")]
    pub git_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<Preset>,
    #[serde(default)]
    pub profile: ProfileOverrides,
}

fn default_ssh_directory() -> PathBuf {
    PathBuf::from(DEFAULT_SSH_DIRECTORY)
}

fn default_lock_directory() -> PathBuf {
    PathBuf::from(DEFAULT_LOCK_DIRECTORY)
}

fn default_git_timeout_secs() -> u64 {
    120
}

// ---------------------------------------------------------------------------
// 2. Resolved shape
// ---------------------------------------------------------------------------

/// Immutable per-run configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncConfig {
    pub project: ProjectName,
    pub repository_url: String,
    pub target_branch: BranchName,
    pub install_directory: PathBuf,
    /// `<install_directory>/repo`
    pub working_copy: PathBuf,
    pub ssh_identity: PathBuf,
    /// `<install_directory>/logs/sync.log`
    pub log_path: PathBuf,
    pub lock_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub management_user: Option<String>,
    pub no_deploy_marker: PathBuf,
    pub update_strategy: UpdateStrategy,
    pub git_timeout_secs: u64,
    pub profile: ProfileSpec,
}

impl SyncConfig {
    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs)
    }

    /// Directory holding `sync.log` and its rotated copies.
    pub fn logs_dir(&self) -> PathBuf {
        logs_dir(&self.install_directory)
    }

    /// Render the effective configuration for display.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

pub fn working_copy_path(install_directory: &Path) -> PathBuf {
    install_directory.join("repo")
}

pub fn logs_dir(install_directory: &Path) -> PathBuf {
    install_directory.join("logs")
}

pub fn log_path(install_directory: &Path) -> PathBuf {
    logs_dir(install_directory).join("sync.log")
}

// ---------------------------------------------------------------------------
// 3. Load
// ---------------------------------------------------------------------------

/// Build the layered figment for the config file at `path`.
pub fn figment_at(path: &Path) -> Figment {
    let figment = Figment::new()
        .merge(Yaml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__").ignore(&[BRANCH_KEY]));

    // Taken verbatim: the env provider would turn `1.10` into a float.
    match Env::var(&format!("{ENV_PREFIX}TARGET_BRANCH")) {
        Some(branch) => figment.merge(Serialized::default(BRANCH_KEY, branch)),
        None => figment,
    }
}

/// Load and resolve the config at `path`.
///
/// Returns `ConfigError::ConfigNotFound` if the file is absent,
/// `ConfigError::Extract` (with path) if it does not fit [`ConfigFile`].
pub fn load_at(path: &Path) -> Result<SyncConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }
    load_from(figment_at(path), path)
}

/// Extract and resolve from an already-layered figment. `origin` is used for
/// error context only.
pub fn load_from(figment: Figment, origin: &Path) -> Result<SyncConfig, ConfigError> {
    let file: ConfigFile = figment.extract().map_err(|e| ConfigError::Extract {
        path: origin.to_path_buf(),
        source: Box::new(e),
    })?;
    file.resolve()
}

// ---------------------------------------------------------------------------
// 4. Resolve
// ---------------------------------------------------------------------------

impl ConfigFile {
    /// Validate and turn the file shape into a [`SyncConfig`].
    pub fn resolve(self) -> Result<SyncConfig, ConfigError> {
        validate_project(&self.project)?;

        if self.repository_url.trim().is_empty() {
            return Err(ConfigError::EmptyRepositoryUrl);
        }
        if !self.install_directory.is_absolute() {
            return Err(ConfigError::RelativeInstallDirectory {
                path: self.install_directory,
            });
        }
        if self.git_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout {
                field: "git_timeout_secs",
            });
        }

        let profile = resolve_profile(&self.project, self.preset, self.profile)?;
        if profile.trigger.start_timeout_secs() == Some(0) {
            return Err(ConfigError::ZeroTimeout {
                field: "profile.trigger.start_timeout_secs",
            });
        }

        let install = self.install_directory;
        let ssh_identity = resolve_under(&self.ssh_directory, Path::new(&profile.ssh_identity_name));
        let lock_path = resolve_under(&self.lock_directory, Path::new(&profile.lock_file_name));
        let no_deploy_marker = match self.no_deploy_marker {
            Some(marker) => resolve_under(&install, &marker),
            None => install.join(NO_DEPLOY_MARKER),
        };

        Ok(SyncConfig {
            project: self.project,
            repository_url: self.repository_url,
            target_branch: self.target_branch,
            working_copy: working_copy_path(&install),
            log_path: log_path(&install),
            install_directory: install,
            ssh_identity,
            lock_path,
            management_user: self.management_user.filter(|u| !u.trim().is_empty()),
            no_deploy_marker,
            update_strategy: self.update_strategy,
            git_timeout_secs: self.git_timeout_secs,
            profile,
        })
    }
}

fn validate_project(project: &ProjectName) -> Result<(), ConfigError> {
    let name = project.0.as_str();
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.chars().any(char::is_whitespace);
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidProject(name.to_owned()))
    }
}

fn resolve_profile(
    project: &ProjectName,
    preset: Option<Preset>,
    overrides: ProfileOverrides,
) -> Result<ProfileSpec, ConfigError> {
    let base = match (preset, overrides.ssh_identity_name.as_deref()) {
        (Some(preset), _) => preset.profile(project),
        (None, Some(identity)) => ProfileSpec {
            ssh_identity_name: identity.to_owned(),
            lock_file_name: default_lock_file_name(project),
            required_paths: Vec::new(),
            optional_paths: Vec::new(),
            executable_paths: Vec::new(),
            trigger: TriggerSpec::None,
        },
        (None, None) => return Err(ConfigError::MissingProfile),
    };
    Ok(overrides.apply(base))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
