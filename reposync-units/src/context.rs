//! Template context: the serializable payload handed to Tera.

use std::path::Path;

use reposync_core::SyncConfig;
use serde::Serialize;

use crate::error::RenderError;

pub const DEFAULT_INTERVAL_MINUTES: u64 = 5;
const ON_BOOT_MINUTES: u64 = 2;
const RANDOMIZED_DELAY_SECS: u64 = 30;
/// Slack on top of the worst-case run time.
const TIMEOUT_MARGIN_SECS: u64 = 60;
/// Sequential git invocations on the longest path through a run.
const GIT_CALLS_PER_RUN: u64 = 5;

/// Everything the service and timer templates reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitContext {
    pub project: String,
    /// `<project>-sync.service`
    pub service_name: String,
    /// `<project>-sync.timer`
    pub timer_name: String,
    /// Fully quoted `ExecStart=` value.
    pub exec_start: String,
    pub timeout_start_secs: u64,
    pub interval_minutes: u64,
    pub on_boot_minutes: u64,
    pub randomized_delay_secs: u64,
}

impl UnitContext {
    /// Build the context for `config`, run as `<binary> run --config <config_path>`
    /// every `interval_minutes`.
    pub fn from_config(
        config: &SyncConfig,
        binary: &Path,
        config_path: &Path,
        interval_minutes: u64,
    ) -> Result<Self, RenderError> {
        if interval_minutes == 0 {
            return Err(RenderError::ZeroInterval);
        }
        let binary = absolute("binary", binary)?;
        let config_path = absolute("config path", config_path)?;

        let trigger_secs = config.profile.trigger.start_timeout_secs().unwrap_or(0);
        let project = config.project.to_string();

        Ok(Self {
            service_name: service_name(&project),
            timer_name: timer_name(&project),
            exec_start: format!(
                "{} run --config {}",
                systemd_quote(&binary),
                systemd_quote(&config_path)
            ),
            timeout_start_secs: config.git_timeout_secs * GIT_CALLS_PER_RUN
                + trigger_secs
                + TIMEOUT_MARGIN_SECS,
            interval_minutes,
            on_boot_minutes: ON_BOOT_MINUTES,
            randomized_delay_secs: RANDOMIZED_DELAY_SECS,
            project,
        })
    }
}

pub fn service_name(project: &str) -> String {
    format!("{project}-sync.service")
}

pub fn timer_name(project: &str) -> String {
    format!("{project}-sync.timer")
}

fn absolute(what: &'static str, path: &Path) -> Result<String, RenderError> {
    let s = path.to_string_lossy().into_owned();
    if path.is_absolute() {
        Ok(s)
    } else {
        Err(RenderError::RelativePath { what, path: s })
    }
}

/// Quote one `ExecStart=` word. `%` and `$` are always doubled since systemd
/// expands specifiers and variables inside quotes too.
fn systemd_quote(word: &str) -> String {
    let escaped = word.replace('%', "%%").replace('$', "$$");
    let needs_quotes = escaped
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\' | ';'));
    if !needs_quotes {
        return escaped;
    }
    format!("\"{}\"", escaped.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/usr/local/bin/reposync", "/usr/local/bin/reposync")]
    #[case("/opt/my tools/reposync", "\"/opt/my tools/reposync\"")]
    #[case("/etc/re%posync.yaml", "/etc/re%%posync.yaml")]
    #[case("/srv/$HOME/reposync", "/srv/$$HOME/reposync")]
    #[case("/srv/a b/${X}.yaml", "\"/srv/a b/$${X}.yaml\"")]
    #[case(r#"/odd"name"#, r#""/odd\"name""#)]
    fn quotes_exec_words(#[case] word: &str, #[case] expected: &str) {
        assert_eq!(systemd_quote(word), expected);
    }

    #[test]
    fn unit_names_follow_project() {
        assert_eq!(service_name("waf"), "waf-sync.service");
        assert_eq!(timer_name("podman"), "podman-sync.timer");
    }
}
