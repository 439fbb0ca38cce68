//! Error types for reposync-units.

use thiserror::Error;

/// All errors that can arise from unit rendering.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Tera template engine error.
    #[error("template engine error: {0}")]
    Tera(#[from] tera::Error),

    #[error("timer interval must be at least one minute")]
    ZeroInterval,

    /// A path that ends up on the `ExecStart=` line must be absolute.
    #[error("{what} must be an absolute path, got {path}")]
    RelativePath { what: &'static str, path: String },
}
