//! Persistence layer modules.
//!
//! Every mutation is a single statement guarded by a predicate on the
//! expected current state; zero rows affected is returned to the caller as
//! data, never raised from here as an error.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};

use crate::config::TimeoutConfig;
use crate::{AppError, Result};

pub mod db;
pub mod event_repo;
pub mod execution_repo;
pub mod retention;
pub mod schema;
pub mod session_repo;
pub mod stage_repo;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;

use self::db::Database;
use self::event_repo::EventRepo;
use self::execution_repo::ExecutionRepo;
use self::session_repo::SessionRepo;
use self::stage_repo::StageRepo;

/// Bundle of every repository over one pool.
#[derive(Clone)]
pub struct Store {
    /// Session rows.
    pub sessions: SessionRepo,
    /// Stage rows.
    pub stages: StageRepo,
    /// Agent execution rows.
    pub executions: ExecutionRepo,
    /// Ephemeral event rows.
    pub events: EventRepo,
}

impl Store {
    /// Build all repositories with default write deadlines.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_timeouts(db, TimeoutConfig::default())
    }

    /// Build all repositories with explicit write deadlines.
    #[must_use]
    pub fn with_timeouts(db: Arc<Database>, timeouts: TimeoutConfig) -> Self {
        Self {
            sessions: SessionRepo::with_timeouts(Arc::clone(&db), timeouts.clone()),
            stages: StageRepo::with_timeouts(Arc::clone(&db), timeouts.clone()),
            executions: ExecutionRepo::with_timeouts(Arc::clone(&db), timeouts.clone()),
            events: EventRepo::with_timeouts(db, timeouts),
        }
    }
}

/// Fixed-width RFC 3339 form so text comparison matches time order.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(field: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {field}: {e}")))
}

pub(crate) fn parse_opt_ts(field: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|value| parse_ts(field, value)).transpose()
}

/// Run `fut` under `limit`, mapping expiry to `AppError::Timeout`.
///
/// A timed-out write has an unknown outcome; callers may retry because all
/// writes are conditioned or idempotent.
pub(crate) async fn bounded<T, F>(limit: Duration, op: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, fut).await.unwrap_or_else(|_| {
        Err(AppError::Timeout(format!(
            "{op} exceeded {}ms",
            limit.as_millis()
        )))
    })
}

/// `now - age`, or `AppError::Validation` on `field` when the result falls
/// outside the representable date range.
pub(crate) fn cutoff(now: DateTime<Utc>, age: TimeDelta, field: &str) -> Result<DateTime<Utc>> {
    now.checked_sub_signed(age).ok_or_else(|| AppError::validation(field, "out of range"))
}

/// [`cutoff`] for a `std` duration.
pub(crate) fn cutoff_std(now: DateTime<Utc>, age: Duration, field: &str) -> Result<DateTime<Utc>> {
    let age = TimeDelta::from_std(age).map_err(|_| AppError::validation(field, "out of range"))?;
    cutoff(now, age, field)
}

/// Milliseconds between two instants, clamped at zero.
pub(crate) fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_milliseconds().max(0)
}
