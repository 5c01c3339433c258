//! Stage status aggregation.
//!
//! A stage's status is a pure function of its top-level executions'
//! statuses and its success policy. [`resolve_stage_status`] is that
//! function; [`recompute_stage`] loads the inputs and persists the result
//! with writes guarded on the status just read, so concurrent callers
//! converge on the status the current executions imply.

use chrono::Utc;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::models::execution::ExecutionStatus;
use crate::models::stage::{Stage, StageStatus, SuccessPolicy};
use crate::persistence::elapsed_ms;
use crate::persistence::stage_repo::StageCompletion;
use crate::persistence::Store;
use crate::{AppError, Result};

/// Recorded when policy `all` sees anything other than full completion.
pub const ALL_POLICY_FAILURE: &str = "one or more agents failed";
/// Recorded when policy `any` sees no completed agent.
pub const ANY_POLICY_FAILURE: &str = "all agents failed";
/// Recorded when every agent timed out.
pub const ALL_TIMED_OUT: &str = "all agents timed out";
/// Recorded when every agent was cancelled.
pub const ALL_CANCELLED: &str = "all agents cancelled";

/// Outcome of aggregating a stage's top-level execution statuses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageResolution {
    /// No executions exist yet; the stage must stay as it is.
    NoExecutions,
    /// At least one execution is still `pending` or `active`.
    Running {
        /// Whether any execution is `active`.
        any_active: bool,
    },
    /// Every execution is terminal.
    Finished {
        /// Terminal stage status.
        status: StageStatus,
        /// Error recorded for non-completed outcomes.
        error_message: Option<String>,
    },
}

/// Aggregate top-level execution statuses under `policy`.
///
/// Callers resolve an unset policy first with [`Stage::effective_policy`].
#[must_use]
pub fn resolve_stage_status(
    policy: SuccessPolicy,
    statuses: &[ExecutionStatus],
) -> StageResolution {
    if statuses.is_empty() {
        return StageResolution::NoExecutions;
    }

    let unfinished = statuses.iter().any(|s| !s.is_terminal());
    if unfinished {
        return StageResolution::Running {
            any_active: statuses.contains(&ExecutionStatus::Active),
        };
    }

    let all = |wanted: ExecutionStatus| statuses.iter().all(|s| *s == wanted);
    let all_completed = all(ExecutionStatus::Completed);
    let all_timed_out = all(ExecutionStatus::TimedOut);
    let all_cancelled = all(ExecutionStatus::Cancelled);
    let any_completed = statuses.contains(&ExecutionStatus::Completed);

    let succeeded = match policy {
        SuccessPolicy::All => all_completed,
        SuccessPolicy::Any => any_completed,
    };

    let (status, error_message) = if succeeded {
        (StageStatus::Completed, None)
    } else if all_timed_out {
        (StageStatus::TimedOut, Some(ALL_TIMED_OUT))
    } else if all_cancelled {
        (StageStatus::Cancelled, Some(ALL_CANCELLED))
    } else {
        let message = match policy {
            SuccessPolicy::All => ALL_POLICY_FAILURE,
            SuccessPolicy::Any => ANY_POLICY_FAILURE,
        };
        (StageStatus::Failed, Some(message))
    };

    StageResolution::Finished {
        status,
        error_message: error_message.map(str::to_owned),
    }
}

/// Write needed to bring a stored stage in line with its resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StageChange {
    Activate,
    Reopen(StageStatus),
    Finalize {
        status: StageStatus,
        error_message: Option<String>,
    },
}

/// Attempts before giving up on a stage that keeps changing underneath.
const MAX_RECOMPUTE_ATTEMPTS: usize = 8;

fn plan_change(stage: &Stage, resolution: StageResolution) -> Option<StageChange> {
    match resolution {
        StageResolution::NoExecutions => None,
        StageResolution::Running { any_active } if stage.status.is_terminal() => {
            let status = if any_active {
                StageStatus::Active
            } else {
                StageStatus::Pending
            };
            Some(StageChange::Reopen(status))
        }
        StageResolution::Running { any_active } => {
            (any_active && stage.status == StageStatus::Pending).then_some(StageChange::Activate)
        }
        StageResolution::Finished {
            status,
            error_message,
        } => (stage.status != status || stage.error_message != error_message)
            .then_some(StageChange::Finalize {
                status,
                error_message,
            }),
    }
}

/// Recompute and persist a stage's status from its top-level executions.
///
/// The stored status follows the current executions: a stage finalized
/// before a later execution appeared, or before one changed outcome, is
/// reopened or re-finalized. Every write is guarded on the status read just
/// before it; a caller that loses a race re-reads and tries again, so
/// concurrent callers converge. Returns the stage as stored after the call.
///
/// # Errors
///
/// Returns `AppError::NotFound` for an unknown stage, `AppError::Db` or
/// `AppError::Timeout` on store failure.
pub async fn recompute_stage(store: &Store, stage_id: &str) -> Result<Stage> {
    async {
        for _ in 0..MAX_RECOMPUTE_ATTEMPTS {
            let stage = load_stage(store, stage_id).await?;
            let statuses = store.executions.top_level_statuses(stage_id).await?;
            let resolution = resolve_stage_status(stage.effective_policy(), &statuses);

            let Some(change) = plan_change(&stage, resolution) else {
                debug!(status = stage.status.as_str(), "stage up to date");
                return Ok(stage);
            };
            if apply_change(store, &stage, change).await? == 1 {
                return load_stage(store, stage_id).await;
            }
            debug!("stage changed concurrently; re-reading");
        }

        warn!("stage still changing after retries; returning latest");
        load_stage(store, stage_id).await
    }
    .instrument(info_span!("recompute_stage", stage_id))
    .await
}

async fn apply_change(store: &Store, stage: &Stage, change: StageChange) -> Result<u64> {
    let now = Utc::now();
    let rows = match change {
        StageChange::Activate => {
            let rows = store.stages.mark_active(&stage.id, now).await?;
            if rows == 1 {
                info!("stage active");
            }
            rows
        }
        StageChange::Reopen(status) => {
            let rows = store
                .stages
                .reopen(&stage.id, stage.status, status, now)
                .await?;
            if rows == 1 {
                info!(
                    from = stage.status.as_str(),
                    to = status.as_str(),
                    "stage reopened"
                );
            }
            rows
        }
        StageChange::Finalize {
            status,
            error_message,
        } => {
            let completion = StageCompletion {
                status,
                completed_at: now,
                duration_ms: stage.started_at.map(|started| elapsed_ms(started, now)),
                error_message,
            };
            let rows = store
                .stages
                .finalize(&stage.id, stage.status, &completion)
                .await?;
            if rows == 1 {
                info!(status = status.as_str(), "stage finalized");
            }
            rows
        }
    };
    Ok(rows)
}

async fn load_stage(store: &Store, stage_id: &str) -> Result<Stage> {
    store
        .stages
        .get_by_id(stage_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("stage {stage_id}")))
}
