//! Stage repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::TimeoutConfig;
use crate::models::stage::{ParallelType, Stage, StageStatus, SuccessPolicy};
use crate::Result;

use super::db::Database;
use super::{bounded, format_ts, parse_opt_ts};

/// Repository wrapper around `SQLite` for stage records.
#[derive(Clone)]
pub struct StageRepo {
    db: Arc<Database>,
    timeouts: TimeoutConfig,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct StageRow {
    id: String,
    session_id: String,
    stage_name: String,
    stage_index: i64,
    expected_agent_count: i64,
    parallel_type: Option<String>,
    success_policy: Option<String>,
    status: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    duration_ms: Option<i64>,
    error_message: Option<String>,
    chat_id: Option<String>,
    chat_user_message_id: Option<String>,
}

impl StageRow {
    fn into_stage(self) -> Result<Stage> {
        Ok(Stage {
            parallel_type: self
                .parallel_type
                .as_deref()
                .map(ParallelType::parse)
                .transpose()?,
            success_policy: self
                .success_policy
                .as_deref()
                .map(SuccessPolicy::parse)
                .transpose()?,
            status: StageStatus::parse(&self.status)?,
            started_at: parse_opt_ts("started_at", self.started_at.as_deref())?,
            completed_at: parse_opt_ts("completed_at", self.completed_at.as_deref())?,
            id: self.id,
            session_id: self.session_id,
            stage_name: self.stage_name,
            stage_index: self.stage_index,
            expected_agent_count: self.expected_agent_count,
            duration_ms: self.duration_ms,
            error_message: self.error_message,
            chat_id: self.chat_id,
            chat_user_message_id: self.chat_user_message_id,
        })
    }
}

/// Final values written when a stage reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCompletion {
    /// Terminal status.
    pub status: StageStatus,
    /// Completion instant.
    pub completed_at: DateTime<Utc>,
    /// Elapsed time since activation, when the stage was ever active.
    pub duration_ms: Option<i64>,
    /// Failure description.
    pub error_message: Option<String>,
}

impl StageRepo {
    /// Create a new repository instance with default write deadlines.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_timeouts(db, TimeoutConfig::default())
    }

    /// Create a new repository instance with explicit write deadlines.
    #[must_use]
    pub fn with_timeouts(db: Arc<Database>, timeouts: TimeoutConfig) -> Self {
        Self { db, timeouts }
    }

    /// Insert a new stage record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AlreadyExists` when the session already has a stage
    /// at this index, `AppError::Db` or `AppError::Timeout` on store failure.
    pub async fn create(&self, stage: &Stage) -> Result<Stage> {
        bounded(self.timeouts.status_update(), "create stage", async {
            sqlx::query(
                "INSERT INTO stage (id, session_id, stage_name, stage_index, expected_agent_count,
                 parallel_type, success_policy, status, started_at, completed_at, duration_ms,
                 error_message, chat_id, chat_user_message_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )
            .bind(&stage.id)
            .bind(&stage.session_id)
            .bind(&stage.stage_name)
            .bind(stage.stage_index)
            .bind(stage.expected_agent_count)
            .bind(stage.parallel_type.map(ParallelType::as_str))
            .bind(stage.success_policy.map(SuccessPolicy::as_str))
            .bind(stage.status.as_str())
            .bind(stage.started_at.map(format_ts))
            .bind(stage.completed_at.map(format_ts))
            .bind(stage.duration_ms)
            .bind(&stage.error_message)
            .bind(&stage.chat_id)
            .bind(&stage.chat_user_message_id)
            .execute(self.db.as_ref())
            .await?;
            Ok(())
        })
        .await?;

        Ok(stage.clone())
    }

    /// Retrieve a stage by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Stage>> {
        let row: Option<StageRow> = sqlx::query_as("SELECT * FROM stage WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(StageRow::into_stage).transpose()
    }

    /// All stages of a session in chain order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_session(&self, session_id: &str) -> Result<Vec<Stage>> {
        let rows: Vec<StageRow> = sqlx::query_as(
            "SELECT * FROM stage WHERE session_id = ?1 ORDER BY stage_index ASC",
        )
        .bind(session_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(StageRow::into_stage).collect()
    }

    /// Move a `pending` stage to `active`, stamping `started_at` once.
    ///
    /// Returns the number of rows modified; zero means another caller already
    /// moved it out of `pending`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Timeout` on store failure.
    pub async fn mark_active(&self, id: &str, now: DateTime<Utc>) -> Result<u64> {
        let now_s = format_ts(now);
        bounded(self.timeouts.status_update(), "activate stage", async {
            let result = sqlx::query(
                "UPDATE stage SET status = 'active', started_at = COALESCE(started_at, ?1)
                 WHERE id = ?2 AND status = 'pending'",
            )
            .bind(&now_s)
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    /// Write a terminal status, provided the stage is still in `observed`.
    ///
    /// Returns the number of rows modified; zero means a concurrent recompute
    /// changed the stage since it was read.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Timeout` on store failure.
    pub async fn finalize(
        &self,
        id: &str,
        observed: StageStatus,
        completion: &StageCompletion,
    ) -> Result<u64> {
        bounded(self.timeouts.status_update(), "finalize stage", async {
            let result = sqlx::query(
                "UPDATE stage
                 SET status = ?1, completed_at = ?2, duration_ms = ?3, error_message = ?4
                 WHERE id = ?5 AND status = ?6",
            )
            .bind(completion.status.as_str())
            .bind(format_ts(completion.completed_at))
            .bind(completion.duration_ms)
            .bind(&completion.error_message)
            .bind(id)
            .bind(observed.as_str())
            .execute(self.db.as_ref())
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    /// Move a terminal stage back to `pending` or `active`, clearing its
    /// completion fields, provided it is still in `observed`.
    ///
    /// `started_at` is kept, and stamped with `now` if reopening to `active`
    /// a stage that never had one.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Timeout` on store failure.
    pub async fn reopen(
        &self,
        id: &str,
        observed: StageStatus,
        status: StageStatus,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let started_at = (status == StageStatus::Active).then(|| format_ts(now));
        bounded(self.timeouts.status_update(), "reopen stage", async {
            let result = sqlx::query(
                "UPDATE stage
                 SET status = ?1, started_at = COALESCE(started_at, ?2),
                     completed_at = NULL, duration_ms = NULL, error_message = NULL
                 WHERE id = ?3 AND status = ?4",
            )
            .bind(status.as_str())
            .bind(started_at)
            .bind(id)
            .bind(observed.as_str())
            .execute(self.db.as_ref())
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }
}
