use std::io::IsTerminal;
use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;
use reposync_agent::{ConfiguredProfile, GitCli};
use reposync_core::{FailureReason, SyncConfig, SyncOutcome};
use reposync_service::logging;
use tokio::signal::unix::{signal, SignalKind};

use super::{load_config, runtime};

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Echo log lines to stdout even when it is not a terminal.
    #[arg(long, short)]
    pub verbose: bool,
}

impl RunArgs {
    pub fn run(self, config_path: &Path) -> Result<ExitCode> {
        let config = match load_config(config_path) {
            Ok(config) => config,
            Err(err) => {
                logging::init_stderr();
                tracing::error!(error = %format!("{err:#}"), "sync not started");
                return Ok(ExitCode::FAILURE);
            }
        };

        let interactive = self.verbose || std::io::stdout().is_terminal();
        if let Err(err) = logging::init(&config, interactive) {
            logging::init_stderr();
            tracing::warn!(error = %err, "sync log unavailable, logging to stderr");
        }

        let outcome = runtime()?.block_on(run_until_signal(&config));
        Ok(ExitCode::from(outcome.exit_code()))
    }
}

/// Run one cycle, abandoning it on SIGINT or SIGTERM.
///
/// Dropping the cycle future releases the lock and kills any git child.
async fn run_until_signal(config: &SyncConfig) -> SyncOutcome {
    let git = GitCli::from_config(config);
    let profile = ConfiguredProfile::from_config(config);

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(err) => {
            tracing::warn!(error = %err, "could not install SIGTERM handler");
            None
        }
    };
    let terminated = async {
        match sigterm.as_mut() {
            Some(stream) => {
                stream.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        outcome = reposync_agent::run(config, &git, &profile) => outcome,
        _ = tokio::signal::ctrl_c() => interrupted(config, "SIGINT"),
        _ = terminated => interrupted(config, "SIGTERM"),
    }
}

fn interrupted(config: &SyncConfig, name: &str) -> SyncOutcome {
    let outcome = SyncOutcome::failed(FailureReason::Interrupted);
    tracing::error!(project = %config.project, signal = name, %outcome, "sync finished");
    outcome
}
