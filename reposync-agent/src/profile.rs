//! Per-deployment strategy.
//!
//! Everything that differs between the WAF host and the Podman host lives
//! behind [`ProjectProfile`]; the state machine in [`crate::agent`] never
//! looks at a preset name.

use std::path::Path;

use async_trait::async_trait;
use reposync_core::{ProfileSpec, SyncConfig};

use crate::error::AgentError;
use crate::layout::{check_layout, LayoutReport};
use crate::trigger::{Applier, TriggerResult};

/// Capabilities a deployment supplies to the sync agent.
#[async_trait]
pub trait ProjectProfile: Send + Sync {
    /// Private key file name under the SSH directory.
    fn ssh_identity_name(&self) -> &str;

    /// Lock file name under the lock directory.
    fn lock_file_name(&self) -> &str;

    /// Globs, relative to the working copy, whose matches must be executable.
    fn executable_patterns(&self) -> &[String];

    fn validate_layout(&self, working_copy: &Path) -> LayoutReport;

    /// Whether the downstream applier is currently running.
    async fn is_apply_running(&self) -> Result<bool, AgentError>;

    /// Start the downstream applier with a bounded wait.
    async fn trigger_apply(&self, working_copy: &Path) -> TriggerResult;
}

/// [`ProjectProfile`] built from the resolved configuration.
#[derive(Debug, Clone)]
pub struct ConfiguredProfile {
    spec: ProfileSpec,
    applier: Applier,
}

impl ConfiguredProfile {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            spec: config.profile.clone(),
            applier: Applier::from_config(config),
        }
    }

    pub fn with_applier(mut self, applier: Applier) -> Self {
        self.applier = applier;
        self
    }

    pub fn spec(&self) -> &ProfileSpec {
        &self.spec
    }

    pub fn applier(&self) -> &Applier {
        &self.applier
    }
}

#[async_trait]
impl ProjectProfile for ConfiguredProfile {
    fn ssh_identity_name(&self) -> &str {
        &self.spec.ssh_identity_name
    }

    fn lock_file_name(&self) -> &str {
        &self.spec.lock_file_name
    }

    fn executable_patterns(&self) -> &[String] {
        &self.spec.executable_paths
    }

    fn validate_layout(&self, working_copy: &Path) -> LayoutReport {
        check_layout(
            working_copy,
            &self.spec.required_paths,
            &self.spec.optional_paths,
        )
    }

    async fn is_apply_running(&self) -> Result<bool, AgentError> {
        self.applier.is_running().await
    }

    async fn trigger_apply(&self, working_copy: &Path) -> TriggerResult {
        self.applier.start(working_copy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reposync_core::{ConfigFile, Preset};
    use std::path::PathBuf;

    fn config(preset: Preset, project: &str) -> SyncConfig {
        let yaml = format!(
            "project: {project}\nrepository_url: git@h:o/r.git\ninstall_directory: /opt/{project}\npreset: {preset}\n"
        );
        serde_yaml::from_str::<ConfigFile>(&yaml)
            .unwrap()
            .resolve()
            .unwrap()
    }

    #[test]
    fn waf_preset_profile() {
        let profile = ConfiguredProfile::from_config(&config(Preset::Waf, "waf"));
        assert_eq!(profile.ssh_identity_name(), "waf_deploy_key");
        assert_eq!(profile.lock_file_name(), "waf-sync.lock");
        assert_eq!(profile.executable_patterns(), ["scripts/*.sh".to_owned()]);
        match profile.applier() {
            Applier::Systemd(unit) => assert_eq!(unit.unit(), "waf-ansible.service"),
            other => panic!("unexpected applier {other:?}"),
        }
    }

    #[test]
    fn podman_preset_profile_checks_deploy_script() {
        let profile = ConfiguredProfile::from_config(&config(Preset::Podman, "podman"));
        let dir = tempfile::TempDir::new().unwrap();
        let report = profile.validate_layout(dir.path());
        assert_eq!(report.required_missing, vec![PathBuf::from("deploy.sh")]);
        assert_eq!(
            report.optional_missing,
            vec![PathBuf::from("containers"), PathBuf::from("compose")]
        );
    }

    #[tokio::test]
    async fn no_applier_is_never_running() {
        let profile = ConfiguredProfile::from_config(&config(Preset::Waf, "waf"))
            .with_applier(Applier::None);
        assert!(!profile.is_apply_running().await.unwrap());
        assert_eq!(
            profile.trigger_apply(Path::new("/nonexistent")).await,
            TriggerResult::NotConfigured
        );
    }
}
