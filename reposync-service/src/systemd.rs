//! Installing the service/timer pair into systemd.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use reposync_units::RenderedUnit;
use reposync_units::UnitKind;

use crate::error::{io_err, ServiceError};
use crate::paths::unit_path;

/// Thin wrapper over the `systemctl` executable.
#[derive(Debug, Clone)]
pub struct Systemctl {
    program: PathBuf,
}

impl Default for Systemctl {
    fn default() -> Self {
        Self {
            program: PathBuf::from("systemctl"),
        }
    }
}

impl Systemctl {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: &[&str], ignore_failure: bool) -> Result<(), ServiceError> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| io_err(&self.program, e))?;

        if output.status.success() || ignore_failure {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(ServiceError::Systemd(format!(
            "systemctl {} failed (status {}): {}",
            args.join(" "),
            output.status,
            stderr
        )))
    }
}

/// Write `units` into `unit_dir`. Returns the written paths.
pub fn write_units(unit_dir: &Path, units: &[RenderedUnit]) -> Result<Vec<PathBuf>, ServiceError> {
    fs::create_dir_all(unit_dir).map_err(|e| io_err(unit_dir, e))?;
    let mut written = Vec::with_capacity(units.len());
    for unit in units {
        let path = unit_path(unit_dir, &unit.file_name);
        fs::write(&path, &unit.content).map_err(|e| io_err(&path, e))?;
        written.push(path);
    }
    Ok(written)
}

/// Write the units, reload systemd and enable the timer immediately.
pub fn install(
    unit_dir: &Path,
    units: &[RenderedUnit],
    systemctl: &Systemctl,
) -> Result<Vec<PathBuf>, ServiceError> {
    ensure_linux()?;

    let timer = units
        .iter()
        .find(|u| u.kind == UnitKind::Timer)
        .ok_or_else(|| ServiceError::Systemd("no timer unit to enable".to_string()))?;

    let written = write_units(unit_dir, units)?;
    systemctl.run(&["daemon-reload"], false)?;
    systemctl.run(&["enable", "--now", &timer.file_name], false)?;
    tracing::info!(timer = %timer.file_name, "sync timer enabled");
    Ok(written)
}

/// Stop and disable the timer, remove both unit files and reload systemd.
///
/// Returns the removed paths. Units that are not installed are skipped.
pub fn uninstall(
    unit_dir: &Path,
    service_name: &str,
    timer_name: &str,
    systemctl: &Systemctl,
) -> Result<Vec<PathBuf>, ServiceError> {
    ensure_linux()?;

    let timer_path = unit_path(unit_dir, timer_name);
    if timer_path.exists() {
        systemctl.run(&["disable", "--now", timer_name], true)?;
    }

    let mut removed = Vec::new();
    for name in [timer_name, service_name] {
        let path = unit_path(unit_dir, name);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
            removed.push(path);
        }
    }
    if !removed.is_empty() {
        systemctl.run(&["daemon-reload"], false)?;
    }
    Ok(removed)
}

#[cfg(target_os = "linux")]
fn ensure_linux() -> Result<(), ServiceError> {
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn ensure_linux() -> Result<(), ServiceError> {
    Err(ServiceError::Systemd(
        "systemd management is only supported on Linux".to_string(),
    ))
}
