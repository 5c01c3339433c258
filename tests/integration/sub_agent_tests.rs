//! Sub-agent hierarchy: index scoping, parent validation and cascade delete.

use alertflow::models::execution::NewAgentExecution;
use alertflow::models::session::SessionStatus;
use alertflow::orchestrator::execution_manager::{create_agent_execution, delete_execution};
use alertflow::AppError;
use chrono::Duration;

use super::test_helpers::{memory_store, seed_session, stage, sub_agent, top_level};

#[tokio::test]
async fn indices_are_scoped_per_parent() {
    let store = memory_store().await;
    seed_session(&store, "s-1", SessionStatus::InProgress, Duration::zero()).await;
    let st = stage(&store, "s-1", 0).await;

    let first = top_level(&store, &st, 1).await;
    let second = top_level(&store, &st, 2).await;
    sub_agent(&store, &first, 1).await;
    sub_agent(&store, &first, 2).await;
    sub_agent(&store, &second, 1).await;

    assert_eq!(store.executions.list_top_level(&st.id).await.expect("top").len(), 2);
    let children = store.executions.list_sub_agents(&first.id).await.expect("subs");
    assert_eq!(
        children.iter().map(|c| c.agent_index).collect::<Vec<_>>(),
        vec![1, 2]
    );
    assert!(children.iter().all(|c| c.task.is_some()));
}

#[tokio::test]
async fn duplicate_sub_agent_index_is_rejected() {
    let store = memory_store().await;
    seed_session(&store, "s-1", SessionStatus::InProgress, Duration::zero()).await;
    let st = stage(&store, "s-1", 0).await;
    let parent = top_level(&store, &st, 1).await;
    sub_agent(&store, &parent, 1).await;

    let err = create_agent_execution(
        &store,
        NewAgentExecution::sub_agent(&parent, "another", 1, "other task"),
    )
    .await
    .expect_err("duplicate");
    assert!(matches!(err, AppError::AlreadyExists(_)), "got {err}");
}

#[tokio::test]
async fn parent_must_live_in_same_stage() {
    let store = memory_store().await;
    seed_session(&store, "s-1", SessionStatus::InProgress, Duration::zero()).await;
    let first_stage = stage(&store, "s-1", 0).await;
    let second_stage = stage(&store, "s-1", 1).await;
    let parent = top_level(&store, &first_stage, 1).await;

    let mut misplaced = NewAgentExecution::sub_agent(&parent, "reader", 1, "read");
    misplaced.stage_id.clone_from(&second_stage.id);
    let err = create_agent_execution(&store, misplaced)
        .await
        .expect_err("cross-stage parent");
    assert!(
        matches!(err, AppError::Validation { ref field, .. } if field == "parent_execution_id")
    );

    let mut orphan = NewAgentExecution::sub_agent(&parent, "reader", 1, "read");
    orphan.parent_execution_id = Some("ghost".into());
    let err = create_agent_execution(&store, orphan)
        .await
        .expect_err("unknown parent");
    assert!(
        matches!(err, AppError::Validation { ref field, .. } if field == "parent_execution_id")
    );
}

#[tokio::test]
async fn nested_sub_agents_are_allowed() {
    let store = memory_store().await;
    seed_session(&store, "s-1", SessionStatus::InProgress, Duration::zero()).await;
    let st = stage(&store, "s-1", 0).await;
    let root = top_level(&store, &st, 1).await;
    let child = sub_agent(&store, &root, 1).await;
    let grandchild = sub_agent(&store, &child, 1).await;

    assert_eq!(grandchild.parent_execution_id.as_deref(), Some(child.id.as_str()));
    assert_eq!(grandchild.stage_id, st.id);
}

#[tokio::test]
async fn delete_removes_whole_subtree() {
    let store = memory_store().await;
    seed_session(&store, "s-1", SessionStatus::InProgress, Duration::zero()).await;
    let st = stage(&store, "s-1", 0).await;
    let root = top_level(&store, &st, 1).await;
    let sibling = top_level(&store, &st, 2).await;
    let child = sub_agent(&store, &root, 1).await;
    let grandchild = sub_agent(&store, &child, 1).await;
    let cousin = sub_agent(&store, &sibling, 1).await;

    delete_execution(&store, &root.id).await.expect("delete");

    for gone in [&root.id, &child.id, &grandchild.id] {
        assert!(
            store.executions.get_by_id(gone).await.expect("get").is_none(),
            "{gone} should be cascaded away"
        );
    }
    for kept in [&sibling.id, &cousin.id] {
        assert!(store.executions.get_by_id(kept).await.expect("get").is_some());
    }

    let err = delete_execution(&store, &root.id).await.expect_err("already gone");
    assert!(matches!(err, AppError::NotFound(_)));
}
