//! Error types for reposync-agent.

use std::path::PathBuf;

use thiserror::Error;

use crate::process::ProcessError;

/// All errors that can arise inside a sync run.
///
/// The agent turns these into a
/// [`FailureReason`](reposync_core::FailureReason) at the step where they
/// happen; they never escape [`run`](crate::run).
#[derive(Debug, Error)]
pub enum AgentError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A git invocation failed.
    #[error("git {op}: {source}")]
    Git {
        op: &'static str,
        #[source]
        source: ProcessError,
    },

    /// Any other external process failed.
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("invalid glob pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// The lock file kept being replaced underneath us.
    #[error("could not settle lock file {path} after repeated attempts")]
    LockRace { path: PathBuf },
}

/// Convenience constructor for [`AgentError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> AgentError {
    AgentError::Io {
        path: path.into(),
        source,
    }
}
