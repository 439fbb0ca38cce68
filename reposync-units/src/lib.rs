//! # reposync-units
//!
//! Renders the systemd service/timer pair that runs the sync agent on a
//! schedule. Templates are embedded at compile time.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use reposync_units::{Renderer, UnitContext};
//! # fn demo(config: &reposync_core::SyncConfig) -> Result<(), reposync_units::RenderError> {
//! let ctx = UnitContext::from_config(
//!     config,
//!     "/usr/local/bin/reposync".as_ref(),
//!     "/etc/reposync/config.yaml".as_ref(),
//!     5,
//! )?;
//! for unit in Renderer::new()?.render_all(&ctx)? {
//!     println!("{}:\n{}", unit.file_name, unit.content);
//! }
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod engine;
pub mod error;

pub use context::{UnitContext, DEFAULT_INTERVAL_MINUTES};
pub use engine::{RenderedUnit, Renderer, UnitKind};
pub use error::RenderError;
