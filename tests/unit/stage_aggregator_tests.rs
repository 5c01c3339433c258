//! Truth table for stage status aggregation.

use alertflow::models::execution::ExecutionStatus as S;
use alertflow::models::stage::{NewStage, StageStatus, SuccessPolicy};
use alertflow::orchestrator::stage_aggregator::{
    resolve_stage_status, StageResolution, ALL_CANCELLED, ALL_POLICY_FAILURE, ALL_TIMED_OUT,
    ANY_POLICY_FAILURE,
};

fn finished(status: StageStatus, error: Option<&str>) -> StageResolution {
    StageResolution::Finished {
        status,
        error_message: error.map(str::to_owned),
    }
}

#[test]
fn no_executions_leaves_stage_alone() {
    assert_eq!(
        resolve_stage_status(SuccessPolicy::All, &[]),
        StageResolution::NoExecutions
    );
    assert_eq!(resolve_stage_status(SuccessPolicy::default(), &[]), StageResolution::NoExecutions);
}

#[test]
fn any_pending_execution_keeps_stage_running() {
    assert_eq!(
        resolve_stage_status(SuccessPolicy::default(), &[S::Completed, S::Pending]),
        StageResolution::Running { any_active: false }
    );
}

#[test]
fn active_execution_is_reported() {
    assert_eq!(
        resolve_stage_status(SuccessPolicy::All, &[S::Failed, S::Active]),
        StageResolution::Running { any_active: true }
    );
}

#[test]
fn all_policy_completes_only_when_every_agent_completes() {
    assert_eq!(
        resolve_stage_status(SuccessPolicy::All, &[S::Completed, S::Completed]),
        finished(StageStatus::Completed, None)
    );
    assert_eq!(
        resolve_stage_status(SuccessPolicy::All, &[S::Completed, S::Failed]),
        finished(StageStatus::Failed, Some(ALL_POLICY_FAILURE))
    );
}

#[test]
fn any_policy_completes_with_one_success() {
    assert_eq!(
        resolve_stage_status(SuccessPolicy::Any, &[S::Failed, S::Completed, S::TimedOut]),
        finished(StageStatus::Completed, None)
    );
    assert_eq!(
        resolve_stage_status(SuccessPolicy::Any, &[S::Failed, S::Failed]),
        finished(StageStatus::Failed, Some(ANY_POLICY_FAILURE))
    );
}

#[test]
fn missing_policy_behaves_as_any() {
    let stage = NewStage::single("s-1", "triage", 0).into_stage();
    assert!(stage.success_policy.is_none());

    let statuses = [S::Failed, S::Completed];
    assert_eq!(
        resolve_stage_status(stage.effective_policy(), &statuses),
        resolve_stage_status(SuccessPolicy::Any, &statuses)
    );
}

#[test]
fn uniform_timeout_and_cancel_win_over_policy_failure() {
    for policy in [SuccessPolicy::All, SuccessPolicy::Any] {
        assert_eq!(
            resolve_stage_status(policy, &[S::TimedOut, S::TimedOut]),
            finished(StageStatus::TimedOut, Some(ALL_TIMED_OUT))
        );
        assert_eq!(
            resolve_stage_status(policy, &[S::Cancelled]),
            finished(StageStatus::Cancelled, Some(ALL_CANCELLED))
        );
    }
}

#[test]
fn mixed_timeout_and_cancel_is_a_failure() {
    assert_eq!(
        resolve_stage_status(SuccessPolicy::All, &[S::TimedOut, S::Cancelled]),
        finished(StageStatus::Failed, Some(ALL_POLICY_FAILURE))
    );
    assert_eq!(
        resolve_stage_status(SuccessPolicy::default(), &[S::TimedOut, S::Cancelled]),
        finished(StageStatus::Failed, Some(ANY_POLICY_FAILURE))
    );
}
