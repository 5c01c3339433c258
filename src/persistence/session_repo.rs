//! Session repository for `SQLite` persistence.
//!
//! Claim, heartbeat, cancel and terminal writes are single `UPDATE`
//! statements whose `WHERE` clause re-checks the expected status. The
//! returned row count tells the caller whether it won.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::{OrphanAction, TimeoutConfig};
use crate::models::session::{Session, SessionOutcome, SessionStatus};
use crate::Result;

use super::db::Database;
use super::{bounded, format_ts, parse_opt_ts, parse_ts};

/// Error message recorded on sessions failed by orphan recovery.
pub const ORPHAN_ERROR_MESSAGE: &str = "orphaned: worker stopped heartbeating";

/// Repository wrapper around `SQLite` for session records.
#[derive(Clone)]
pub struct SessionRepo {
    db: Arc<Database>,
    timeouts: TimeoutConfig,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    alert_data: String,
    alert_type: String,
    chain_id: String,
    status: String,
    author: Option<String>,
    pod_id: Option<String>,
    created_at: String,
    started_at: Option<String>,
    last_interaction_at: Option<String>,
    completed_at: Option<String>,
    current_stage_index: Option<i64>,
    current_stage_id: Option<String>,
    deleted_at: Option<String>,
    final_analysis: Option<String>,
    executive_summary: Option<String>,
    error_message: Option<String>,
}

impl SessionRow {
    fn into_session(self) -> Result<Session> {
        Ok(Session {
            status: SessionStatus::parse(&self.status)?,
            created_at: parse_ts("created_at", &self.created_at)?,
            started_at: parse_opt_ts("started_at", self.started_at.as_deref())?,
            last_interaction_at: parse_opt_ts(
                "last_interaction_at",
                self.last_interaction_at.as_deref(),
            )?,
            completed_at: parse_opt_ts("completed_at", self.completed_at.as_deref())?,
            deleted_at: parse_opt_ts("deleted_at", self.deleted_at.as_deref())?,
            id: self.id,
            alert_data: self.alert_data,
            alert_type: self.alert_type,
            chain_id: self.chain_id,
            author: self.author,
            pod_id: self.pod_id,
            current_stage_index: self.current_stage_index,
            current_stage_id: self.current_stage_id,
            final_analysis: self.final_analysis,
            executive_summary: self.executive_summary,
            error_message: self.error_message,
        })
    }
}

impl SessionRepo {
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

    /// Insert a session row as given.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AlreadyExists` on a duplicate id, `AppError::Db`
    /// or `AppError::Timeout` on store failure.
    pub async fn create(&self, session: &Session) -> Result<Session> {
        bounded(self.timeouts.status_update(), "create session", async {
            sqlx::query(
                "INSERT INTO session (id, alert_data, alert_type, chain_id, status, author,
                 pod_id, created_at, started_at, last_interaction_at, completed_at,
                 current_stage_index, current_stage_id, deleted_at, final_analysis,
                 executive_summary, error_message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            )
            .bind(&session.id)
            .bind(&session.alert_data)
            .bind(&session.alert_type)
            .bind(&session.chain_id)
            .bind(session.status.as_str())
            .bind(&session.author)
            .bind(&session.pod_id)
            .bind(format_ts(session.created_at))
            .bind(session.started_at.map(format_ts))
            .bind(session.last_interaction_at.map(format_ts))
            .bind(session.completed_at.map(format_ts))
            .bind(session.current_stage_index)
            .bind(&session.current_stage_id)
            .bind(session.deleted_at.map(format_ts))
            .bind(&session.final_analysis)
            .bind(&session.executive_summary)
            .bind(&session.error_message)
            .execute(self.db.as_ref())
            .await?;
            Ok(())
        })
        .await?;

        Ok(session.clone())
    }

    /// Retrieve a session by identifier, including soft-deleted rows.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM session WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(SessionRow::into_session).transpose()
    }

    /// Current status of a session, or `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn status_of(&self, id: &str) -> Result<Option<SessionStatus>> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM session WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        status.as_deref().map(SessionStatus::parse).transpose()
    }

    /// List non-deleted sessions, newest first, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self, status: Option<SessionStatus>, limit: u32) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT * FROM session
             WHERE deleted_at IS NULL AND (?1 IS NULL OR status = ?1)
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )
        .bind(status.map(SessionStatus::as_str))
        .bind(i64::from(limit))
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Identifier of the oldest claimable session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Timeout` on store failure.
    pub async fn oldest_pending_id(&self) -> Result<Option<String>> {
        bounded(self.timeouts.bulk(), "select pending session", async {
            let id: Option<String> = sqlx::query_scalar(
                "SELECT id FROM session
                 WHERE status = 'pending' AND deleted_at IS NULL
                 ORDER BY created_at ASC, id ASC
                 LIMIT 1",
            )
            .fetch_optional(self.db.as_ref())
            .await?;
            Ok(id)
        })
        .await
    }

    /// Move `id` from `pending` to `in_progress` for `worker_id`.
    ///
    /// Returns the number of rows modified: `1` when this caller won the
    /// claim, `0` when another worker got there first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Timeout` on store failure.
    pub async fn try_claim(&self, id: &str, worker_id: &str, now: DateTime<Utc>) -> Result<u64> {
        let now_s = format_ts(now);
        bounded(self.timeouts.bulk(), "claim session", async {
            let result = sqlx::query(
                "UPDATE session
                 SET status = 'in_progress', pod_id = ?1, started_at = ?2, last_interaction_at = ?2
                 WHERE id = ?3 AND status = 'pending' AND deleted_at IS NULL",
            )
            .bind(worker_id)
            .bind(&now_s)
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    /// Refresh `last_interaction_at` on a live session.
    ///
    /// Returns the session's status after the write, or `None` when no live
    /// session matched (terminal, pending or missing).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Timeout` on store failure.
    pub async fn touch(&self, id: &str, now: DateTime<Utc>) -> Result<Option<SessionStatus>> {
        let now_s = format_ts(now);
        let status: Option<String> = bounded(self.timeouts.status_update(), "heartbeat", async {
            let status = sqlx::query_scalar(
                "UPDATE session SET last_interaction_at = ?1
                 WHERE id = ?2 AND status IN ('in_progress', 'cancelling')
                 RETURNING status",
            )
            .bind(&now_s)
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;
            Ok(status)
        })
        .await?;

        status.as_deref().map(SessionStatus::parse).transpose()
    }

    /// Record the stage cursor on an `in_progress` session.
    ///
    /// Returns the number of rows modified.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Timeout` on store failure.
    pub async fn update_progress(
        &self,
        id: &str,
        stage_index: i64,
        stage_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let now_s = format_ts(now);
        bounded(self.timeouts.status_update(), "update session progress", async {
            let result = sqlx::query(
                "UPDATE session
                 SET current_stage_index = ?1, current_stage_id = ?2, last_interaction_at = ?3
                 WHERE id = ?4 AND status = 'in_progress'",
            )
            .bind(stage_index)
            .bind(stage_id)
            .bind(&now_s)
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    /// Write a terminal outcome on a live (`in_progress` or `cancelling`) session.
    ///
    /// Returns the number of rows modified.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Timeout` on store failure.
    pub async fn set_terminal(
        &self,
        id: &str,
        outcome: &SessionOutcome,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let now_s = format_ts(now);
        bounded(self.timeouts.status_update(), "set session terminal", async {
            let result = sqlx::query(
                "UPDATE session
                 SET status = ?1, completed_at = ?2, last_interaction_at = ?2,
                     final_analysis = COALESCE(?3, final_analysis),
                     executive_summary = COALESCE(?4, executive_summary),
                     error_message = COALESCE(?5, error_message)
                 WHERE id = ?6 AND status IN ('in_progress', 'cancelling')",
            )
            .bind(outcome.status.as_str())
            .bind(&now_s)
            .bind(&outcome.final_analysis)
            .bind(&outcome.executive_summary)
            .bind(&outcome.error_message)
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    /// Flip an `in_progress` session to `cancelling`.
    ///
    /// Returns the number of rows modified; zero is ambiguous between a
    /// missing session and a non-cancellable one.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Timeout` on store failure.
    pub async fn mark_cancelling(&self, id: &str) -> Result<u64> {
        bounded(self.timeouts.status_update(), "request cancel", async {
            let result = sqlx::query(
                "UPDATE session SET status = 'cancelling'
                 WHERE id = ?1 AND status = 'in_progress'",
            )
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    /// `in_progress` sessions whose last heartbeat is older than `cutoff`.
    ///
    /// A claimed session always carries `last_interaction_at`; rows missing it
    /// fall back to `started_at`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn find_stale_in_progress(&self, cutoff: DateTime<Utc>) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT * FROM session
             WHERE status = 'in_progress' AND deleted_at IS NULL
               AND COALESCE(last_interaction_at, started_at, created_at) < ?1
             ORDER BY last_interaction_at ASC",
        )
        .bind(format_ts(cutoff))
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Apply an orphan remediation, conditioned on the session being exactly
    /// as observed (same owner, same last heartbeat, still `in_progress`).
    ///
    /// Returns `true` when the row was modified. [`OrphanAction::Report`]
    /// never writes.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Timeout` on store failure.
    pub async fn recover_orphan(
        &self,
        observed: &Session,
        action: OrphanAction,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let now_s = format_ts(now);
        let last_seen = observed.last_interaction_at.map(format_ts);
        let query = match action {
            OrphanAction::Report => return Ok(false),
            OrphanAction::Fail => sqlx::query(
                "UPDATE session
                 SET status = 'timed_out', completed_at = ?1, error_message = ?2
                 WHERE id = ?3 AND status = 'in_progress'
                   AND pod_id IS ?4 AND last_interaction_at IS ?5",
            )
            .bind(now_s)
            .bind(ORPHAN_ERROR_MESSAGE),
            OrphanAction::Requeue => sqlx::query(
                "UPDATE session
                 SET status = 'pending', pod_id = NULL, started_at = NULL,
                     last_interaction_at = NULL, current_stage_index = NULL,
                     current_stage_id = NULL
                 WHERE id = ?1 AND status = 'in_progress'
                   AND pod_id IS ?2 AND last_interaction_at IS ?3",
            ),
        };

        bounded(self.timeouts.status_update(), "recover orphan", async {
            let result = query
                .bind(&observed.id)
                .bind(&observed.pod_id)
                .bind(last_seen)
                .execute(self.db.as_ref())
                .await?;
            Ok(result.rows_affected() == 1)
        })
        .await
    }

    /// Soft-delete sessions completed before `cutoff`, plus never-claimed
    /// `pending` sessions submitted before it.
    ///
    /// Already-deleted rows are untouched, so repeated runs report zero.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Timeout` on store failure.
    pub async fn soft_delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let cutoff_s = format_ts(cutoff);
        let now_s = format_ts(now);
        bounded(self.timeouts.bulk(), "soft delete sessions", async {
            let result = sqlx::query(
                "UPDATE session SET deleted_at = ?1
                 WHERE deleted_at IS NULL
                   AND ((completed_at IS NOT NULL AND completed_at < ?2)
                        OR (status = 'pending' AND created_at < ?2))",
            )
            .bind(&now_s)
            .bind(&cutoff_s)
            .execute(self.db.as_ref())
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }
}
