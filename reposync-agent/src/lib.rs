//! # reposync-agent
//!
//! The check → sync → trigger cycle.
//!
//! Call [`run`] once per scheduler tick. It takes the lock, compares the
//! working copy against the remote branch, updates and validates it when they
//! differ, fires the downstream applier, and returns a
//! [`SyncOutcome`](reposync_core::SyncOutcome).

pub mod agent;
pub mod error;
pub mod git;
pub mod layout;
pub mod lock;
pub mod process;
pub mod profile;
pub mod trigger;

pub use agent::run;
pub use error::AgentError;
pub use git::{GitBackend, GitCli};
pub use layout::LayoutReport;
pub use lock::{LockAcquisition, LockHandle, LockState};
pub use profile::{ConfiguredProfile, ProjectProfile};
pub use trigger::{Applier, TriggerResult};
