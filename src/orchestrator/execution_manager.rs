//! Stage and agent-execution creation and status transitions.
//!
//! Within one session only the owning worker creates stages and executions;
//! that ownership is a caller convention keyed by `session.pod_id` and is not
//! re-checked here.

use chrono::Utc;
use tracing::{info, info_span, Instrument};

use crate::models::execution::{AgentExecution, ExecutionStatus, NewAgentExecution};
use crate::models::stage::{NewStage, Stage};
use crate::persistence::Store;
use crate::{AppError, Result};

use super::stage_aggregator::recompute_stage;

/// Create a `pending` stage for an existing session.
///
/// # Errors
///
/// Returns `AppError::Validation` for malformed input, `AppError::NotFound`
/// for an unknown session, `AppError::AlreadyExists` when the stage index is
/// taken, `AppError::Db` or `AppError::Timeout` on store failure.
pub async fn create_stage(store: &Store, new_stage: NewStage) -> Result<Stage> {
    new_stage.validate()?;
    if store.sessions.status_of(&new_stage.session_id).await?.is_none() {
        return Err(AppError::NotFound(format!(
            "session {}",
            new_stage.session_id
        )));
    }

    let stage = store.stages.create(&new_stage.into_stage()).await?;
    info!(
        session_id = %stage.session_id,
        stage_id = %stage.id,
        stage_index = stage.stage_index,
        stage_name = %stage.stage_name,
        "stage created"
    );
    Ok(stage)
}

/// Create a `pending` agent execution, top-level or sub-agent.
///
/// A sub-agent's parent must exist in the same stage. Index numbering is
/// independent per `(stage, parent)`. A new top-level execution is an input
/// of its stage's status, so the stage is recomputed; a stage already
/// finalized without it is reopened.
///
/// # Errors
///
/// Returns `AppError::Validation` for malformed input or a parent in another
/// stage, `AppError::NotFound` for an unknown stage, `AppError::AlreadyExists`
/// when the agent index is taken, `AppError::Db` or `AppError::Timeout` on
/// store failure.
pub async fn create_agent_execution(
    store: &Store,
    new_execution: NewAgentExecution,
) -> Result<AgentExecution> {
    new_execution.validate()?;

    let stage = store
        .stages
        .get_by_id(&new_execution.stage_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("stage {}", new_execution.stage_id)))?;
    if stage.session_id != new_execution.session_id {
        return Err(AppError::validation(
            "session_id",
            "does not own the referenced stage",
        ));
    }

    if let Some(parent_id) = new_execution.parent_execution_id.as_deref() {
        let parent = store.executions.get_by_id(parent_id).await?;
        match parent {
            Some(parent) if parent.stage_id == stage.id => {}
            Some(_) => {
                return Err(AppError::validation(
                    "parent_execution_id",
                    "parent belongs to a different stage",
                ));
            }
            None => {
                return Err(AppError::validation(
                    "parent_execution_id",
                    format!("unknown parent execution {parent_id}"),
                ));
            }
        }
    }

    let execution = store
        .executions
        .create(&new_execution.into_execution())
        .await?;
    info!(
        stage_id = %execution.stage_id,
        execution_id = %execution.id,
        agent_name = %execution.agent_name,
        agent_index = execution.agent_index,
        parent_execution_id = execution.parent_execution_id.as_deref(),
        "agent execution created"
    );
    if !execution.is_sub_agent() {
        recompute_stage(store, &execution.stage_id).await?;
    }
    Ok(execution)
}

/// Record an execution status transition.
///
/// Callers follow this with [`recompute_stage`] (or use
/// [`transition_execution`]) so the stage reflects the change.
///
/// # Errors
///
/// Returns `AppError::NotFound` for an unknown execution, `AppError::Db` or
/// `AppError::Timeout` on store failure.
pub async fn set_execution_status(
    store: &Store,
    execution_id: &str,
    status: ExecutionStatus,
    error_message: Option<&str>,
) -> Result<AgentExecution> {
    let execution = store
        .executions
        .set_status(execution_id, status, error_message, Utc::now())
        .await?
        .ok_or_else(|| AppError::NotFound(format!("agent execution {execution_id}")))?;
    info!(
        execution_id,
        status = status.as_str(),
        sub_agent = execution.is_sub_agent(),
        "agent execution status updated"
    );
    Ok(execution)
}

/// Record an execution status transition and recompute its stage.
///
/// # Errors
///
/// Propagates failures from [`set_execution_status`] and [`recompute_stage`].
pub async fn transition_execution(
    store: &Store,
    execution_id: &str,
    status: ExecutionStatus,
    error_message: Option<&str>,
) -> Result<(AgentExecution, Stage)> {
    async {
        let execution = set_execution_status(store, execution_id, status, error_message).await?;
        let stage = recompute_stage(store, &execution.stage_id).await?;
        Ok((execution, stage))
    }
    .instrument(info_span!("transition_execution", execution_id))
    .await
}

/// Delete an execution together with its whole sub-agent subtree.
///
/// Removing a top-level execution recomputes its stage from the ones left.
///
/// # Errors
///
/// Returns `AppError::NotFound` for an unknown execution, `AppError::Db` or
/// `AppError::Timeout` on store failure.
pub async fn delete_execution(store: &Store, execution_id: &str) -> Result<()> {
    let not_found = || AppError::NotFound(format!("agent execution {execution_id}"));
    let execution = store
        .executions
        .get_by_id(execution_id)
        .await?
        .ok_or_else(not_found)?;
    if store.executions.delete(execution_id).await? == 0 {
        return Err(not_found());
    }
    info!(execution_id, "agent execution deleted");
    if !execution.is_sub_agent() {
        recompute_stage(store, &execution.stage_id).await?;
    }
    Ok(())
}
