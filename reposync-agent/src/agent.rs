//! One check → sync → trigger cycle.
//!
//! ```text
//! lock ─► detect ─┬─ up to date ───────────────────────────────► NoChangesDetected
//!                 ├─ behind ──────── update ─┐
//!                 ├─ branch switch ──────────┼─► permissions ─► layout ─► trigger
//!                 └─ not cloned ──── clone ──┘
//! ```
//!
//! Every failure is turned into a [`SyncOutcome`] at the step where it
//! happens; nothing escapes [`run`]. The lock handle lives for the whole call
//! and is released on every return path, including the future being dropped.

use reposync_core::{
    BranchName, FailureReason, RepositoryState, SkipReason, SyncConfig, SyncOutcome,
    UpdateStrategy,
};

use crate::git::GitBackend;
use crate::layout::normalize_permissions;
use crate::lock::{LockAcquisition, LockHandle};
use crate::profile::ProjectProfile;
use crate::trigger::TriggerResult;

/// What detection found.
#[derive(Debug)]
enum Detection {
    UpToDate(RepositoryState),
    Behind(RepositoryState),
    BranchSwitched { from: Option<String> },
    Cloned,
}

/// Perform one sync cycle for `config`.
pub async fn run<G, P>(config: &SyncConfig, git: &G, profile: &P) -> SyncOutcome
where
    G: GitBackend + ?Sized,
    P: ProjectProfile + ?Sized,
{
    let lock = match LockHandle::acquire(&config.lock_path) {
        Ok(LockAcquisition::Acquired(handle)) => handle,
        Ok(LockAcquisition::Held { owner_pid }) => {
            let outcome = SyncOutcome::LockContended { owner_pid };
            log_outcome(config, &outcome);
            return outcome;
        }
        Err(err) => {
            let outcome = SyncOutcome::failed(FailureReason::LockIo(err.to_string()));
            log_outcome(config, &outcome);
            return outcome;
        }
    };

    tracing::info!(
        project = %config.project,
        branch = %config.target_branch,
        working_copy = %config.working_copy.display(),
        lock = profile.lock_file_name(),
        pid = lock.owner_pid(),
        "sync started",
    );

    let outcome = match sync_and_trigger(config, git, profile).await {
        Ok(outcome) => outcome,
        Err(reason) => SyncOutcome::failed(reason),
    };
    log_outcome(config, &outcome);
    outcome
}

async fn sync_and_trigger<G, P>(
    config: &SyncConfig,
    git: &G,
    profile: &P,
) -> Result<SyncOutcome, FailureReason>
where
    G: GitBackend + ?Sized,
    P: ProjectProfile + ?Sized,
{
    let branch = &config.target_branch;

    match detect(git, branch).await? {
        Detection::UpToDate(state) => {
            tracing::info!(
                commit = state.local_commit.as_ref().map(|c| c.short()).unwrap_or_default(),
                "working copy is up to date",
            );
            return Ok(SyncOutcome::NoChangesDetected);
        }
        Detection::Behind(state) => {
            update(git, branch, config.update_strategy).await?;
            tracing::info!(
                from = state.local_commit.as_ref().map(|c| c.short()).unwrap_or_default(),
                to = state.remote_commit.as_ref().map(|c| c.short()).unwrap_or_default(),
                strategy = ?config.update_strategy,
                "working copy updated",
            );
        }
        Detection::BranchSwitched { from } => {
            tracing::info!(
                from = from.as_deref().unwrap_or("(detached)"),
                to = %branch,
                "switched working copy to target branch",
            );
        }
        Detection::Cloned => {
            tracing::info!(branch = %branch, "working copy cloned");
        }
    }

    normalize_permissions(&config.working_copy, profile.executable_patterns())
        .map_err(|e| FailureReason::Permissions(e.to_string()))?;

    let report = profile.validate_layout(&config.working_copy);
    for path in &report.optional_missing {
        tracing::warn!(path = %path.display(), "optional path missing from working copy");
    }
    if !report.is_valid() {
        return Err(FailureReason::MissingLayout(report.required_missing));
    }

    Ok(trigger(config, profile).await)
}

async fn detect<G>(git: &G, branch: &BranchName) -> Result<Detection, FailureReason>
where
    G: GitBackend + ?Sized,
{
    if !git.is_cloned().await {
        tracing::info!(branch = %branch, "no working copy, cloning");
        git.clone_branch(branch)
            .await
            .map_err(|e| FailureReason::Clone(e.to_string()))?;
        return Ok(Detection::Cloned);
    }

    let current = git
        .current_branch()
        .await
        .map_err(|e| FailureReason::RevParse(e.to_string()))?;

    if current.as_deref() != Some(branch.as_str()) {
        // A branch migration always resyncs, whatever the commits say.
        git.fetch(branch)
            .await
            .map_err(|e| FailureReason::Fetch(e.to_string()))?;
        git.checkout_tracking(branch)
            .await
            .map_err(|e| FailureReason::Checkout(e.to_string()))?;
        git.reset_hard(&branch.remote_ref())
            .await
            .map_err(|e| FailureReason::Checkout(e.to_string()))?;
        return Ok(Detection::BranchSwitched { from: current });
    }

    git.fetch(branch)
        .await
        .map_err(|e| FailureReason::Fetch(e.to_string()))?;

    // An unborn HEAD (e.g. a clone killed mid-way) differs from any remote
    // tip; the update step repairs it.
    let local = match git.rev_parse("HEAD").await {
        Ok(local) => Some(local),
        Err(err) => {
            tracing::warn!(error = %err, "local HEAD does not resolve, resyncing from remote");
            None
        }
    };
    let remote = git
        .rev_parse(&branch.remote_ref())
        .await
        .map_err(|e| FailureReason::RevParse(e.to_string()))?;

    let state = RepositoryState {
        current_branch: current,
        local_commit: local,
        remote_commit: Some(remote),
    };
    if state.is_up_to_date() {
        Ok(Detection::UpToDate(state))
    } else {
        Ok(Detection::Behind(state))
    }
}

async fn update<G>(git: &G, branch: &BranchName, strategy: UpdateStrategy) -> Result<(), FailureReason>
where
    G: GitBackend + ?Sized,
{
    let result = match strategy {
        UpdateStrategy::Reset => git.reset_hard(&branch.remote_ref()).await,
        UpdateStrategy::FastForward => git.pull_ff_only(branch).await,
    };
    result.map_err(|e| FailureReason::Pull(e.to_string()))
}

async fn trigger<P>(config: &SyncConfig, profile: &P) -> SyncOutcome
where
    P: ProjectProfile + ?Sized,
{
    if config.no_deploy_marker.exists() {
        tracing::warn!(
            marker = %config.no_deploy_marker.display(),
            "emergency mode: override marker present, trigger suppressed",
        );
        return SyncOutcome::SyncedTriggerSkipped {
            reason: SkipReason::NoDeployMarker {
                marker: config.no_deploy_marker.clone(),
            },
        };
    }

    match profile.is_apply_running().await {
        Ok(true) => {
            tracing::info!("applier already running, not triggering again");
            return SyncOutcome::SyncedTriggerSkipped {
                reason: SkipReason::AlreadyRunning,
            };
        }
        Ok(false) => {}
        Err(err) => tracing::warn!(
            error = %err,
            "could not tell whether the applier is running; assuming it is not",
        ),
    }

    match profile.trigger_apply(&config.working_copy).await {
        TriggerResult::Started => {
            tracing::info!("applier started");
            SyncOutcome::SyncedAndTriggered
        }
        TriggerResult::NotConfigured => SyncOutcome::SyncedAndTriggered,
        TriggerResult::AlreadyRunning => SyncOutcome::SyncedTriggerSkipped {
            reason: SkipReason::AlreadyRunning,
        },
        TriggerResult::Failed(reason) => SyncOutcome::SyncedTriggerFailed { reason },
    }
}

fn log_outcome(config: &SyncConfig, outcome: &SyncOutcome) {
    let project = &config.project;
    match outcome {
        SyncOutcome::SyncFailed { .. } => tracing::error!(%project, %outcome, "sync finished"),
        SyncOutcome::SyncedTriggerFailed { .. } => {
            tracing::warn!(%project, %outcome, "sync finished")
        }
        _ => tracing::info!(%project, %outcome, "sync finished"),
    }
}
