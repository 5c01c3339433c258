//! `SQLite` schema bootstrap logic.
//!
//! All definitions use `IF NOT EXISTS`, so every pod may run the bootstrap on
//! startup against the same file.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table and index definitions.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS session (
    id                  TEXT PRIMARY KEY NOT NULL,
    alert_data          TEXT NOT NULL,
    alert_type          TEXT NOT NULL,
    chain_id            TEXT NOT NULL,
    status              TEXT NOT NULL CHECK(status IN ('pending','in_progress','cancelling','completed','failed','cancelled','timed_out')),
    author              TEXT,
    pod_id              TEXT,
    created_at          TEXT NOT NULL,
    started_at          TEXT,
    last_interaction_at TEXT,
    completed_at        TEXT,
    current_stage_index INTEGER,
    current_stage_id    TEXT,
    deleted_at          TEXT,
    final_analysis      TEXT,
    executive_summary   TEXT,
    error_message       TEXT
);

CREATE TABLE IF NOT EXISTS stage (
    id                   TEXT PRIMARY KEY NOT NULL,
    session_id           TEXT NOT NULL REFERENCES session(id) ON DELETE CASCADE,
    stage_name           TEXT NOT NULL,
    stage_index          INTEGER NOT NULL,
    expected_agent_count INTEGER NOT NULL,
    parallel_type        TEXT CHECK(parallel_type IS NULL OR parallel_type IN ('multi_agent','replica')),
    success_policy       TEXT CHECK(success_policy IS NULL OR success_policy IN ('all','any')),
    status               TEXT NOT NULL CHECK(status IN ('pending','active','completed','failed','cancelled','timed_out')),
    started_at           TEXT,
    completed_at         TEXT,
    duration_ms          INTEGER,
    error_message        TEXT,
    chat_id              TEXT,
    chat_user_message_id TEXT,
    UNIQUE(session_id, stage_index)
);

CREATE TABLE IF NOT EXISTS agent_execution (
    id                  TEXT PRIMARY KEY NOT NULL,
    stage_id            TEXT NOT NULL REFERENCES stage(id) ON DELETE CASCADE,
    session_id          TEXT NOT NULL REFERENCES session(id) ON DELETE CASCADE,
    agent_name          TEXT NOT NULL,
    agent_index         INTEGER NOT NULL,
    parent_execution_id TEXT REFERENCES agent_execution(id) ON DELETE CASCADE,
    task                TEXT,
    llm_backend         TEXT NOT NULL,
    llm_provider        TEXT,
    status              TEXT NOT NULL CHECK(status IN ('pending','active','completed','failed','cancelled','timed_out')),
    started_at          TEXT,
    completed_at        TEXT,
    duration_ms         INTEGER,
    error_message       TEXT
);

CREATE TABLE IF NOT EXISTS event (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id  TEXT,
    channel     TEXT NOT NULL,
    payload     TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_session_status_created ON session(status, created_at);
CREATE INDEX IF NOT EXISTS idx_session_last_interaction ON session(status, last_interaction_at);
CREATE INDEX IF NOT EXISTS idx_session_completed ON session(completed_at);
CREATE INDEX IF NOT EXISTS idx_stage_session ON stage(session_id);
CREATE INDEX IF NOT EXISTS idx_execution_stage ON agent_execution(stage_id);
CREATE INDEX IF NOT EXISTS idx_execution_parent ON agent_execution(parent_execution_id);
CREATE UNIQUE INDEX IF NOT EXISTS uq_execution_top_level_index
    ON agent_execution(stage_id, agent_index) WHERE parent_execution_id IS NULL;
CREATE UNIQUE INDEX IF NOT EXISTS uq_execution_sub_agent_index
    ON agent_execution(parent_execution_id, agent_index) WHERE parent_execution_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_event_created ON event(created_at);
CREATE INDEX IF NOT EXISTS idx_event_session ON event(session_id);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
