//! Cooperative cancellation: the guard on `request_cancel` and how the
//! owning worker observes it.

use alertflow::models::session::{SessionOutcome, SessionStatus};
use alertflow::orchestrator::session_manager::{heartbeat, request_cancel, set_terminal};
use alertflow::AppError;
use chrono::Duration;

use super::test_helpers::{memory_store, seed_session};

#[tokio::test]
async fn only_in_progress_sessions_are_cancellable() {
    let store = memory_store().await;

    for status in SessionStatus::ALL {
        let id = format!("s-{}", status.as_str());
        seed_session(&store, &id, status, Duration::zero()).await;

        let result = request_cancel(&store, &id).await;
        let stored = store.sessions.status_of(&id).await.expect("status").expect("exists");

        if status == SessionStatus::InProgress {
            result.expect("cancel in_progress");
            assert_eq!(stored, SessionStatus::Cancelling);
        } else {
            let err = result.expect_err("not cancellable");
            assert!(
                matches!(err, AppError::NotCancellable(_)),
                "{status:?} should be not cancellable, got {err}"
            );
            assert_eq!(stored, status, "rejected cancel leaves status unchanged");
        }
    }
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let store = memory_store().await;
    let err = request_cancel(&store, "ghost").await.expect_err("missing");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn second_cancel_is_rejected() {
    let store = memory_store().await;
    seed_session(&store, "s-1", SessionStatus::InProgress, Duration::zero()).await;

    request_cancel(&store, "s-1").await.expect("first cancel");
    let err = request_cancel(&store, "s-1").await.expect_err("already cancelling");
    assert!(matches!(err, AppError::NotCancellable(_)));
}

#[tokio::test]
async fn worker_observes_cancel_and_finishes_cancelled() {
    let store = memory_store().await;
    seed_session(&store, "s-1", SessionStatus::InProgress, Duration::zero()).await;

    assert_eq!(
        heartbeat(&store, "s-1").await.expect("heartbeat"),
        SessionStatus::InProgress
    );
    request_cancel(&store, "s-1").await.expect("cancel");
    assert_eq!(
        heartbeat(&store, "s-1").await.expect("heartbeat"),
        SessionStatus::Cancelling
    );

    let finished = set_terminal(
        &store,
        "s-1",
        &SessionOutcome::status(SessionStatus::Cancelled),
    )
    .await
    .expect("terminal");
    assert_eq!(finished.status, SessionStatus::Cancelled);
    assert!(finished.completed_at.is_some());
}
