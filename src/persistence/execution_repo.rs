//! Agent execution repository for `SQLite` persistence.
//!
//! Top-level and sub-agent rows share one table. Stage aggregation reads
//! only rows with `parent_execution_id IS NULL`; the filter lives in the
//! query itself, so sub-agent rows never reach the aggregator.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::TimeoutConfig;
use crate::models::execution::{AgentExecution, ExecutionStatus};
use crate::Result;

use super::db::Database;
use super::{bounded, format_ts, parse_opt_ts};

/// Repository wrapper around `SQLite` for agent execution records.
#[derive(Clone)]
pub struct ExecutionRepo {
    db: Arc<Database>,
    timeouts: TimeoutConfig,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct ExecutionRow {
    id: String,
    stage_id: String,
    session_id: String,
    agent_name: String,
    agent_index: i64,
    parent_execution_id: Option<String>,
    task: Option<String>,
    llm_backend: String,
    llm_provider: Option<String>,
    status: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    duration_ms: Option<i64>,
    error_message: Option<String>,
}

impl ExecutionRow {
    fn into_execution(self) -> Result<AgentExecution> {
        Ok(AgentExecution {
            status: ExecutionStatus::parse(&self.status)?,
            started_at: parse_opt_ts("started_at", self.started_at.as_deref())?,
            completed_at: parse_opt_ts("completed_at", self.completed_at.as_deref())?,
            id: self.id,
            stage_id: self.stage_id,
            session_id: self.session_id,
            agent_name: self.agent_name,
            agent_index: self.agent_index,
            parent_execution_id: self.parent_execution_id,
            task: self.task,
            llm_backend: self.llm_backend,
            llm_provider: self.llm_provider,
            duration_ms: self.duration_ms,
            error_message: self.error_message,
        })
    }
}

impl ExecutionRepo {
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

    /// Insert a new execution record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AlreadyExists` when the agent index is taken within
    /// its `(stage, parent)` scope, `AppError::Db` or `AppError::Timeout` on
    /// store failure.
    pub async fn create(&self, execution: &AgentExecution) -> Result<AgentExecution> {
        bounded(self.timeouts.status_update(), "create agent execution", async {
            sqlx::query(
                "INSERT INTO agent_execution (id, stage_id, session_id, agent_name, agent_index,
                 parent_execution_id, task, llm_backend, llm_provider, status, started_at,
                 completed_at, duration_ms, error_message)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )
            .bind(&execution.id)
            .bind(&execution.stage_id)
            .bind(&execution.session_id)
            .bind(&execution.agent_name)
            .bind(execution.agent_index)
            .bind(&execution.parent_execution_id)
            .bind(&execution.task)
            .bind(&execution.llm_backend)
            .bind(&execution.llm_provider)
            .bind(execution.status.as_str())
            .bind(execution.started_at.map(format_ts))
            .bind(execution.completed_at.map(format_ts))
            .bind(execution.duration_ms)
            .bind(&execution.error_message)
            .execute(self.db.as_ref())
            .await?;
            Ok(())
        })
        .await?;

        Ok(execution.clone())
    }

    /// Retrieve an execution by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<AgentExecution>> {
        let row: Option<ExecutionRow> =
            sqlx::query_as("SELECT * FROM agent_execution WHERE id = ?1")
                .bind(id)
                .fetch_optional(self.db.as_ref())
                .await?;

        row.map(ExecutionRow::into_execution).transpose()
    }

    /// Top-level executions of a stage, by agent index.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_top_level(&self, stage_id: &str) -> Result<Vec<AgentExecution>> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(
            "SELECT * FROM agent_execution
             WHERE stage_id = ?1 AND parent_execution_id IS NULL
             ORDER BY agent_index ASC",
        )
        .bind(stage_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(ExecutionRow::into_execution).collect()
    }

    /// Statuses of a stage's top-level executions, the sole aggregation input.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn top_level_statuses(&self, stage_id: &str) -> Result<Vec<ExecutionStatus>> {
        let statuses: Vec<String> = sqlx::query_scalar(
            "SELECT status FROM agent_execution
             WHERE stage_id = ?1 AND parent_execution_id IS NULL
             ORDER BY agent_index ASC",
        )
        .bind(stage_id)
        .fetch_all(self.db.as_ref())
        .await?;

        statuses
            .iter()
            .map(|status| ExecutionStatus::parse(status))
            .collect()
    }

    /// Direct sub-agents of `parent_id`, by agent index.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_sub_agents(&self, parent_id: &str) -> Result<Vec<AgentExecution>> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(
            "SELECT * FROM agent_execution
             WHERE parent_execution_id = ?1
             ORDER BY agent_index ASC",
        )
        .bind(parent_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(ExecutionRow::into_execution).collect()
    }

    /// Set an execution's status.
    ///
    /// `started_at` is stamped only on the first entry into `active`;
    /// `completed_at` and `duration_ms` only on the first entry into a
    /// terminal status. `duration_ms` stays unset for executions that never
    /// started. All `SET` expressions read the pre-update row, so the whole
    /// transition is one atomic statement.
    ///
    /// Returns the updated row, or `None` when the id does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Timeout` on store failure.
    pub async fn set_status(
        &self,
        id: &str,
        status: ExecutionStatus,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<AgentExecution>> {
        let now_s = format_ts(now);
        let terminal = status.is_terminal();
        let row: Option<ExecutionRow> =
            bounded(self.timeouts.status_update(), "set execution status", async {
                let row = sqlx::query_as(
                    "UPDATE agent_execution SET
                        status = ?1,
                        error_message = COALESCE(?2, error_message),
                        started_at = CASE
                            WHEN started_at IS NULL AND ?1 = 'active' THEN ?3
                            ELSE started_at END,
                        completed_at = CASE
                            WHEN completed_at IS NULL AND ?4 THEN ?3
                            ELSE completed_at END,
                        duration_ms = CASE
                            WHEN completed_at IS NULL AND ?4 AND started_at IS NOT NULL
                            THEN CAST(ROUND((julianday(?3) - julianday(started_at)) * 86400000.0) AS INTEGER)
                            ELSE duration_ms END
                     WHERE id = ?5
                     RETURNING *",
                )
                .bind(status.as_str())
                .bind(error_message)
                .bind(&now_s)
                .bind(terminal)
                .bind(id)
                .fetch_optional(self.db.as_ref())
                .await?;
                Ok(row)
            })
            .await?;

        row.map(ExecutionRow::into_execution).transpose()
    }

    /// Hard-delete an execution; its sub-agent subtree goes with it through
    /// the `ON DELETE CASCADE` parent reference.
    ///
    /// Returns the number of rows deleted directly (cascaded rows excluded).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Timeout` on store failure.
    pub async fn delete(&self, id: &str) -> Result<u64> {
        bounded(self.timeouts.status_update(), "delete agent execution", async {
            let result = sqlx::query("DELETE FROM agent_execution WHERE id = ?1")
                .bind(id)
                .execute(self.db.as_ref())
                .await?;
            Ok(result.rows_affected())
        })
        .await
    }
}
