//! Timestamp bookkeeping on `ExecutionRepo::set_status`.

use std::sync::Arc;

use alertflow::models::execution::{AgentExecution, ExecutionStatus, NewAgentExecution};
use alertflow::models::session::NewSession;
use alertflow::models::stage::NewStage;
use alertflow::persistence::{db, Store};
use alertflow::AppError;
use chrono::{Duration, SubsecRound, Utc};

async fn store_with_stage() -> (Store, String, String) {
    let db = db::connect_memory().await.expect("db");
    let store = Store::new(Arc::new(db));
    let session = store
        .sessions
        .create(&NewSession::new("kube", "chain", "{}").into_session(Utc::now()))
        .await
        .expect("session");
    let stage = store
        .stages
        .create(&NewStage::single(&session.id, "triage", 0).into_stage())
        .await
        .expect("stage");
    (store, session.id, stage.id)
}

async fn insert(store: &Store, new: NewAgentExecution) -> AgentExecution {
    store
        .executions
        .create(&new.into_execution())
        .await
        .expect("create execution")
}

#[tokio::test]
async fn started_and_completed_are_set_once() {
    let (store, session_id, stage_id) = store_with_stage().await;
    let exec = insert(
        &store,
        NewAgentExecution::top_level(&stage_id, &session_id, "agent", 1, "openai"),
    )
    .await;

    let t0 = Utc::now().trunc_subsecs(6);
    let active = store
        .executions
        .set_status(&exec.id, ExecutionStatus::Active, None, t0)
        .await
        .expect("update")
        .expect("exists");
    assert_eq!(active.started_at, Some(t0));
    assert!(active.completed_at.is_none());

    let t1 = t0 + Duration::seconds(2);
    let again = store
        .executions
        .set_status(&exec.id, ExecutionStatus::Active, None, t1)
        .await
        .expect("update")
        .expect("exists");
    assert_eq!(again.started_at, Some(t0), "started_at is never overwritten");

    let t2 = t0 + Duration::milliseconds(1_500);
    let done = store
        .executions
        .set_status(&exec.id, ExecutionStatus::Completed, None, t2)
        .await
        .expect("update")
        .expect("exists");
    assert_eq!(done.completed_at, Some(t2));
    assert_eq!(done.duration_ms, Some(1_500));

    let t3 = t0 + Duration::seconds(10);
    let failed = store
        .executions
        .set_status(&exec.id, ExecutionStatus::Failed, Some("late failure"), t3)
        .await
        .expect("update")
        .expect("exists");
    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert_eq!(failed.completed_at, Some(t2), "completed_at is never overwritten");
    assert_eq!(failed.duration_ms, Some(1_500));
    assert_eq!(failed.error_message.as_deref(), Some("late failure"));
}

#[tokio::test]
async fn never_started_execution_has_no_duration() {
    let (store, session_id, stage_id) = store_with_stage().await;
    let exec = insert(
        &store,
        NewAgentExecution::top_level(&stage_id, &session_id, "agent", 1, "openai"),
    )
    .await;

    let cancelled = store
        .executions
        .set_status(&exec.id, ExecutionStatus::Cancelled, None, Utc::now())
        .await
        .expect("update")
        .expect("exists");
    assert!(cancelled.completed_at.is_some());
    assert!(cancelled.started_at.is_none());
    assert!(cancelled.duration_ms.is_none());
}

#[tokio::test]
async fn unknown_execution_returns_none() {
    let (store, _, _) = store_with_stage().await;
    let result = store
        .executions
        .set_status("missing", ExecutionStatus::Active, None, Utc::now())
        .await
        .expect("update");
    assert!(result.is_none());
}

#[tokio::test]
async fn top_level_listing_ignores_sub_agents() {
    let (store, session_id, stage_id) = store_with_stage().await;
    let orchestrator = insert(
        &store,
        NewAgentExecution::top_level(&stage_id, &session_id, "orchestrator", 1, "openai"),
    )
    .await;
    insert(
        &store,
        NewAgentExecution::top_level(&stage_id, &session_id, "second", 2, "openai"),
    )
    .await;
    insert(
        &store,
        NewAgentExecution::sub_agent(&orchestrator, "reader", 1, "read logs"),
    )
    .await;

    let top = store.executions.list_top_level(&stage_id).await.expect("list");
    assert_eq!(
        top.iter().map(|e| e.agent_index).collect::<Vec<_>>(),
        vec![1, 2]
    );
    assert_eq!(
        store.executions.top_level_statuses(&stage_id).await.expect("statuses").len(),
        2
    );
    assert_eq!(
        store
            .executions
            .list_sub_agents(&orchestrator.id)
            .await
            .expect("subs")
            .len(),
        1
    );
}

#[tokio::test]
async fn duplicate_top_level_index_is_rejected() {
    let (store, session_id, stage_id) = store_with_stage().await;
    insert(
        &store,
        NewAgentExecution::top_level(&stage_id, &session_id, "a", 1, "openai"),
    )
    .await;
    let err = store
        .executions
        .create(
            &NewAgentExecution::top_level(&stage_id, &session_id, "b", 1, "openai")
                .into_execution(),
        )
        .await
        .expect_err("duplicate index");
    assert!(matches!(err, AppError::AlreadyExists(_)), "got {err}");
}
