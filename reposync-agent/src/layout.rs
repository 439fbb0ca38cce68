//! Working-copy layout checks and permission normalisation.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{io_err, AgentError};

/// Which configured paths are absent from the working copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LayoutReport {
    pub required_missing: Vec<PathBuf>,
    pub optional_missing: Vec<PathBuf>,
}

impl LayoutReport {
    /// `true` when nothing required is missing.
    pub fn is_valid(&self) -> bool {
        self.required_missing.is_empty()
    }
}

/// Check `required` and `optional` (relative to `working_copy`) for existence.
pub fn check_layout(working_copy: &Path, required: &[PathBuf], optional: &[PathBuf]) -> LayoutReport {
    let missing = |paths: &[PathBuf]| -> Vec<PathBuf> {
        paths
            .iter()
            .filter(|p| !working_copy.join(p).exists())
            .cloned()
            .collect()
    };
    LayoutReport {
        required_missing: missing(required),
        optional_missing: missing(optional),
    }
}

/// Add the executable bits to every regular file under `working_copy` matched
/// by one of `patterns`. Patterns that match nothing are ignored.
///
/// Returns the number of files whose mode changed.
pub fn normalize_permissions(working_copy: &Path, patterns: &[String]) -> Result<usize, AgentError> {
    let root = glob::Pattern::escape(&working_copy.to_string_lossy());
    let mut changed = 0;

    for pattern in patterns {
        let full = format!("{root}/{}", pattern.trim_start_matches('/'));
        let entries = glob::glob(&full).map_err(|source| AgentError::Pattern {
            pattern: pattern.clone(),
            source,
        })?;

        for entry in entries {
            let path = entry.map_err(|e| {
                let path = e.path().to_path_buf();
                io_err(path, e.into_error())
            })?;
            if make_executable(&path)? {
                changed += 1;
            }
        }
    }

    if changed > 0 {
        tracing::debug!(changed, "executable bits restored");
    }
    Ok(changed)
}

fn make_executable(path: &Path) -> Result<bool, AgentError> {
    let meta = fs::symlink_metadata(path).map_err(|e| io_err(path, e))?;
    if !meta.file_type().is_file() {
        return Ok(false);
    }
    let mut perms = meta.permissions();
    let mode = perms.mode();
    if mode & 0o111 == 0o111 {
        return Ok(false);
    }
    perms.set_mode(mode | 0o111);
    fs::set_permissions(path, perms).map_err(|e| io_err(path, e))?;
    Ok(true)
}
