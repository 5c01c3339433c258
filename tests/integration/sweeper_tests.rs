//! Sweeper start/stop lifecycle and manual trigger.

use std::time::Duration as StdDuration;

use alertflow::lifecycle::TaskPhase;
use alertflow::models::session::SessionStatus;
use alertflow::orchestrator::session_manager::get_session;
use alertflow::persistence::retention::{RetentionPolicy, SweepReport, Sweeper};
use chrono::Duration;
use serde_json::json;

use super::test_helpers::{memory_store, now, seed_session};

fn policy(interval: StdDuration) -> RetentionPolicy {
    RetentionPolicy {
        session_retention_days: 30,
        event_ttl: StdDuration::from_secs(60),
        interval,
    }
}

#[tokio::test]
async fn run_once_reports_counts() {
    let store = memory_store().await;
    seed_session(&store, "old", SessionStatus::Completed, Duration::days(45)).await;
    seed_session(&store, "new", SessionStatus::Completed, Duration::days(2)).await;
    store
        .events
        .insert(None, "global", &json!({}), now() - Duration::minutes(5))
        .await
        .expect("event");

    let sweeper = Sweeper::new(&store, policy(StdDuration::from_secs(3_600)));
    assert_eq!(
        sweeper.run_once().await.expect("sweep"),
        SweepReport {
            sessions_soft_deleted: 1,
            events_deleted: 1,
        }
    );
    assert_eq!(
        sweeper.run_once().await.expect("sweep"),
        SweepReport::default(),
        "second pass finds nothing"
    );
}

#[tokio::test]
async fn started_sweeper_runs_immediately_and_stops_cleanly() {
    let store = memory_store().await;
    seed_session(&store, "old", SessionStatus::Failed, Duration::days(45)).await;

    let sweeper = Sweeper::new(&store, policy(StdDuration::from_secs(3_600)));
    assert_eq!(sweeper.phase(), TaskPhase::Idle);
    assert!(sweeper.start());
    assert!(!sweeper.start(), "already running");
    assert_eq!(sweeper.phase(), TaskPhase::Running);

    let swept = tokio::time::timeout(StdDuration::from_secs(5), async {
        loop {
            if get_session(&store, "old").await.expect("get").is_deleted() {
                break;
            }
            tokio::task::yield_now().await;
        }
    })
    .await;
    assert!(swept.is_ok(), "first pass runs without waiting an interval");

    sweeper.stop().await;
    assert_eq!(sweeper.phase(), TaskPhase::Idle);

    assert!(sweeper.start(), "restart after stop");
    sweeper.stop().await;
    assert_eq!(sweeper.phase(), TaskPhase::Idle);
}

#[tokio::test]
async fn stop_on_idle_sweeper_is_noop() {
    let store = memory_store().await;
    let sweeper = Sweeper::new(&store, policy(StdDuration::from_millis(10)));
    sweeper.stop().await;
    assert_eq!(sweeper.phase(), TaskPhase::Idle);
}
