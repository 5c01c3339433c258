//! `alertflow-ctl` against a file database.

use std::path::Path;

use alertflow::models::session::SessionStatus;
use alertflow::orchestrator::session_manager::get_session;
use chrono::Duration;
use serde_json::Value;

use super::test_helpers::{file_store, seed_session};

async fn ctl(database: &Path, args: &[&str]) -> std::process::Output {
    tokio::process::Command::new(env!("CARGO_BIN_EXE_alertflow-ctl"))
        .arg("--database")
        .arg(database)
        .args(args)
        .output()
        .await
        .expect("run alertflow-ctl")
}

#[tokio::test]
async fn orphans_fail_reports_the_sessions_it_recovered() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = file_store(dir.path()).await;
    seed_session(&store, "silent-a", SessionStatus::InProgress, Duration::minutes(10)).await;
    seed_session(&store, "silent-b", SessionStatus::InProgress, Duration::minutes(30)).await;
    seed_session(&store, "fresh", SessionStatus::InProgress, Duration::seconds(5)).await;

    let output = ctl(
        &dir.path().join("alertflow.db"),
        &["orphans", "--timeout-seconds", "300", "--action", "fail"],
    )
    .await;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let report: Value = serde_json::from_slice(&output.stdout).expect("json output");
    let mut listed: Vec<&str> = report["sessions"]
        .as_array()
        .expect("sessions")
        .iter()
        .filter_map(|s| s["id"].as_str())
        .collect();
    listed.sort_unstable();
    assert_eq!(listed, vec!["silent-a", "silent-b"]);
    assert_eq!(report["scan"]["detected"], 2);
    assert_eq!(report["scan"]["recovered"], 2);

    for id in ["silent-a", "silent-b"] {
        let session = get_session(&store, id).await.expect("get");
        assert_eq!(session.status, SessionStatus::TimedOut, "{id}");
    }
    assert_eq!(
        get_session(&store, "fresh").await.expect("get").status,
        SessionStatus::InProgress
    );
}

#[tokio::test]
async fn out_of_range_ages_fail_cleanly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let database = dir.path().join("alertflow.db");
    file_store(dir.path()).await;

    let output = ctl(&database, &["orphans", "--timeout-seconds", "10000000000000"]).await;
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("timeout"));

    let output = ctl(&database, &["sweep", "--retention-days", "4294967295"]).await;
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("retention_days"));
}
