//! Host integration around the sync agent: well-known paths, logging, log
//! rotation, systemd unit installation and the status report.

mod error;
pub mod logging;
pub mod log_rotation;
pub mod paths;
pub mod status;
pub mod systemd;

pub use error::ServiceError;
pub use status::{inspect as inspect_status, StatusReport};
pub use systemd::{install as install_units, uninstall as uninstall_units, Systemctl};
