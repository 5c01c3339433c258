use std::time::Duration;

use alertflow::config::{GlobalConfig, OrphanAction, MAX_PERIOD_SECONDS, MAX_RETENTION_DAYS};
use alertflow::persistence::retention::RetentionPolicy;
use alertflow::AppError;

fn full_toml() -> &'static str {
    r#"
database_path = "/var/lib/alertflow/sessions.db"
pod_id = "worker-a"

[timeouts]
status_update_ms = 2000
bulk_ms = 10000

[retention]
session_retention_days = 90
event_ttl_seconds = 600
cleanup_interval_seconds = 300

[orphans]
timeout_seconds = 120
check_interval_seconds = 15
action = "requeue"
"#
}

#[test]
fn full_config_parses_every_section() {
    let config = GlobalConfig::from_toml_str(full_toml()).expect("valid config");

    assert_eq!(config.pod_id(), "worker-a");
    assert_eq!(config.timeouts.status_update(), Duration::from_secs(2));
    assert_eq!(config.timeouts.bulk(), Duration::from_secs(10));
    assert_eq!(config.retention.session_retention_days, 90);
    assert_eq!(config.event_ttl(), Duration::from_secs(600));
    assert_eq!(config.cleanup_interval(), Duration::from_secs(300));
    assert_eq!(config.orphan_timeout(), Duration::from_secs(120));
    assert_eq!(config.orphan_check_interval(), Duration::from_secs(15));
    assert_eq!(config.orphans.action, OrphanAction::Requeue);
}

#[test]
fn minimal_config_uses_defaults() {
    let config = GlobalConfig::from_toml_str(r#"database_path = "alertflow.db""#)
        .expect("valid config");

    assert_eq!(config.timeouts.status_update_ms, 5_000);
    assert_eq!(config.timeouts.bulk_ms, 30_000);
    assert_eq!(config.retention.session_retention_days, 365);
    assert_eq!(config.event_ttl(), Duration::from_secs(3_600));
    assert_eq!(config.cleanup_interval(), Duration::from_secs(43_200));
    assert_eq!(config.orphan_timeout(), Duration::from_secs(300));
    assert_eq!(config.orphans.action, OrphanAction::Report);
}

#[test]
fn missing_pod_id_is_generated_with_suffix() {
    let a = GlobalConfig::from_toml_str(r#"database_path = "a.db""#).expect("config");
    let b = GlobalConfig::from_toml_str(r#"database_path = "a.db""#).expect("config");

    assert!(!a.pod_id().is_empty());
    assert_ne!(a.pod_id(), b.pod_id(), "generated ids must be unique");
    let suffix = a.pod_id().rsplit('-').next().expect("suffix");
    assert_eq!(suffix.len(), 8);
}

#[test]
fn zero_retention_days_is_rejected() {
    let raw = r#"
database_path = "a.db"
[retention]
session_retention_days = 0
"#;
    let err = GlobalConfig::from_toml_str(raw).expect_err("zero retention");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn blank_pod_id_is_rejected() {
    let raw = r#"
database_path = "a.db"
pod_id = "  "
"#;
    assert!(GlobalConfig::from_toml_str(raw).is_err());
}

#[test]
fn zero_timeouts_are_rejected() {
    let raw = r#"
database_path = "a.db"
[timeouts]
status_update_ms = 0
"#;
    assert!(GlobalConfig::from_toml_str(raw).is_err());

    let raw = r#"
database_path = "a.db"
[orphans]
check_interval_seconds = 0
"#;
    assert!(GlobalConfig::from_toml_str(raw).is_err());
}

#[test]
fn unknown_orphan_action_is_a_config_error() {
    let raw = r#"
database_path = "a.db"
[orphans]
action = "explode"
"#;
    let err = GlobalConfig::from_toml_str(raw).expect_err("bad action");
    assert!(err.to_string().starts_with("config:"));
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, full_toml()).expect("write config");

    let config = GlobalConfig::load_from_path(&path).expect("load");
    assert_eq!(config.pod_id(), "worker-a");

    let missing = GlobalConfig::load_from_path(dir.path().join("nope.toml"));
    assert!(matches!(missing, Err(AppError::Config(_))));
}

#[test]
fn periods_past_the_upper_bound_are_rejected() {
    let raw = r#"
database_path = "a.db"
[retention]
session_retention_days = 4294967295
"#;
    let err = GlobalConfig::from_toml_str(raw).expect_err("huge retention");
    assert!(err.to_string().contains("session_retention_days"));

    let raw = r#"
database_path = "a.db"
[orphans]
timeout_seconds = 10000000000000
"#;
    let err = GlobalConfig::from_toml_str(raw).expect_err("huge timeout");
    assert!(err.to_string().contains("orphans.timeout_seconds"));

    let raw = format!(
        r#"
database_path = "a.db"
[retention]
session_retention_days = {MAX_RETENTION_DAYS}
event_ttl_seconds = {MAX_PERIOD_SECONDS}
"#
    );
    GlobalConfig::from_toml_str(&raw).expect("bounds are inclusive");
}

#[test]
fn retention_policy_follows_config() {
    let config = GlobalConfig::from_toml_str(full_toml()).expect("valid config");
    let policy = RetentionPolicy::from_config(&config);

    assert_eq!(policy.session_retention_days, 90);
    assert_eq!(policy.event_ttl, Duration::from_secs(600));
    assert_eq!(policy.interval, Duration::from_secs(300));
}
