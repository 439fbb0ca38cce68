//! Shared vocabulary of the reposync workspace.
//!
//! - [`types`]: newtypes, profile specs and run outcomes
//! - [`config`]: layered loading and resolution into [`SyncConfig`]
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{load_at, ConfigFile, SyncConfig, DEFAULT_CONFIG_PATH};
pub use error::ConfigError;
pub use types::{
    BranchName, CommitHash, FailureReason, Preset, ProfileOverrides, ProfileSpec, ProjectName,
    RepositoryState, SkipReason, SyncOutcome, TriggerSpec, UpdateStrategy,
};
