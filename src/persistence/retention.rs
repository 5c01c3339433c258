//! Retention sweep: soft-deletes old sessions and hard-deletes expired
//! event rows.
//!
//! Both sweeps are single conditioned statements, so any number of pods may
//! run them concurrently; a repeat pass over the same rows affects nothing.

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use crate::config::GlobalConfig;
use crate::lifecycle::{PeriodicTask, TaskPhase};
use crate::{AppError, Result};

use super::event_repo::EventRepo;
use super::session_repo::SessionRepo;
use super::{cutoff, cutoff_std, Store};

/// Parameters for one sweep pass and the loop cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Age in days past which sessions are soft-deleted.
    pub session_retention_days: u32,
    /// Age past which event rows are hard-deleted.
    pub event_ttl: Duration,
    /// Delay between passes.
    pub interval: Duration,
}

impl RetentionPolicy {
    /// Build from parsed configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            session_retention_days: config.retention.session_retention_days,
            event_ttl: config.event_ttl(),
            interval: config.cleanup_interval(),
        }
    }
}

/// Row counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Sessions newly soft-deleted.
    pub sessions_soft_deleted: u64,
    /// Event rows hard-deleted.
    pub events_deleted: u64,
}

/// Soft-delete sessions completed more than `retention_days` ago, and
/// `pending` sessions submitted that long ago and never claimed.
///
/// Returns the number of sessions newly marked; zero is a normal outcome.
///
/// # Errors
///
/// Returns `AppError::Validation` when `retention_days` is zero or reaches
/// past the representable date range, `AppError::Db` or `AppError::Timeout`
/// on store failure.
pub async fn soft_delete_old_sessions(sessions: &SessionRepo, retention_days: u32) -> Result<u64> {
    if retention_days == 0 {
        return Err(AppError::validation(
            "retention_days",
            "must be greater than zero",
        ));
    }
    let now = Utc::now();
    let age = TimeDelta::try_days(i64::from(retention_days))
        .ok_or_else(|| AppError::validation("retention_days", "out of range"))?;
    let before = cutoff(now, age, "retention_days")?;
    let count = sessions.soft_delete_older_than(before, now).await?;
    if count > 0 {
        info!(count, retention_days, "soft-deleted old sessions");
    }
    Ok(count)
}

/// Hard-delete event rows older than `ttl`.
///
/// # Errors
///
/// Returns `AppError::Validation` for an out-of-range `ttl`, `AppError::Db`
/// or `AppError::Timeout` on store failure.
pub async fn cleanup_orphaned_events(events: &EventRepo, ttl: Duration) -> Result<u64> {
    let count = events.purge(cutoff_std(Utc::now(), ttl, "ttl")?).await?;
    if count > 0 {
        info!(count, "deleted expired events");
    }
    Ok(count)
}

/// Run both sweeps once. The event sweep runs even when the session sweep
/// fails; the first error is returned afterwards.
///
/// # Errors
///
/// Returns the first failure of either sweep.
pub async fn sweep_once(
    sessions: &SessionRepo,
    events: &EventRepo,
    policy: &RetentionPolicy,
) -> Result<SweepReport> {
    let soft_deleted = soft_delete_old_sessions(sessions, policy.session_retention_days).await;
    let events_deleted = cleanup_orphaned_events(events, policy.event_ttl).await;
    Ok(SweepReport {
        sessions_soft_deleted: soft_deleted?,
        events_deleted: events_deleted?,
    })
}

/// Spawn the retention loop.
///
/// The first pass runs immediately, then one per `policy.interval` until
/// `cancel` fires. A pass in flight when `cancel` fires runs to completion
/// before the task exits.
#[must_use]
pub fn spawn_retention_task(
    sessions: SessionRepo,
    events: EventRepo,
    policy: RetentionPolicy,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            let mut interval =
                tokio::time::interval(policy.interval.max(Duration::from_millis(1)));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("retention task shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        match sweep_once(&sessions, &events, &policy).await {
                            Ok(report) => info!(
                                sessions = report.sessions_soft_deleted,
                                events = report.events_deleted,
                                "retention sweep completed"
                            ),
                            Err(err) => error!(
                                %err,
                                retryable = err.is_retryable(),
                                "retention sweep failed"
                            ),
                        }
                    }
                }
            }
        }
        .instrument(info_span!("retention_sweeper")),
    )
}

/// Retention loop with an explicit start/stop lifecycle.
pub struct Sweeper {
    sessions: SessionRepo,
    events: EventRepo,
    policy: RetentionPolicy,
    task: PeriodicTask,
}

impl Sweeper {
    /// Create an idle sweeper over `store`.
    #[must_use]
    pub fn new(store: &Store, policy: RetentionPolicy) -> Self {
        Self {
            sessions: store.sessions.clone(),
            events: store.events.clone(),
            policy,
            task: PeriodicTask::new("retention_sweeper"),
        }
    }

    /// Start the loop; returns `false` if it was already running.
    pub fn start(&self) -> bool {
        let sessions = self.sessions.clone();
        let events = self.events.clone();
        let policy = self.policy;
        self.task
            .start(move |cancel| spawn_retention_task(sessions, events, policy, cancel))
    }

    /// Signal shutdown and wait for any in-flight pass to finish.
    pub async fn stop(&self) {
        self.task.stop().await;
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> TaskPhase {
        self.task.phase()
    }

    /// Run one pass on the caller's task, independent of the loop.
    ///
    /// # Errors
    ///
    /// Returns the first failure of either sweep.
    pub async fn run_once(&self) -> Result<SweepReport> {
        sweep_once(&self.sessions, &self.events, &self.policy).await
    }
}
