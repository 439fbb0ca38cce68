//! Error types for reposync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading or resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file did not exist at the expected path.
    #[error("config not found at {path}")]
    ConfigNotFound { path: PathBuf },

    /// YAML or environment layer could not be merged into the config shape.
    #[error("failed to load config from {path}: {source}")]
    Extract {
        path: PathBuf,
        #[source]
        source: Box<figment::Error>,
    },

    /// YAML serialization error (printing the effective config).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid branch name '{name}': {reason}")]
    InvalidBranch { name: String, reason: &'static str },

    #[error("repository_url must not be empty")]
    EmptyRepositoryUrl,

    #[error("project name must be a non-empty single path component, got '{0}'")]
    InvalidProject(String),

    #[error("install_directory must be absolute, got {path}")]
    RelativeInstallDirectory { path: PathBuf },

    /// Neither `preset` nor `profile.ssh_identity_name` was given.
    #[error("no profile configured; set `preset` or `profile.ssh_identity_name`")]
    MissingProfile,

    #[error("{field} must be greater than zero")]
    ZeroTimeout { field: &'static str },
}
