//! Event row repository for `SQLite` persistence.
//!
//! Event rows are a transient pub/sub log written alongside state changes
//! for downstream fan-out; expired rows are hard-deleted.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::TimeoutConfig;
use crate::models::event::Event;
use crate::{AppError, Result};

use super::db::Database;
use super::{bounded, format_ts, parse_ts};

/// Repository for event records.
#[derive(Clone)]
pub struct EventRepo {
    db: Arc<Database>,
    timeouts: TimeoutConfig,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    session_id: Option<String>,
    channel: String,
    payload: String,
    created_at: String,
}

impl EventRow {
    fn into_event(self) -> Result<Event> {
        let payload = serde_json::from_str(&self.payload)
            .map_err(|e| AppError::Db(format!("invalid event payload: {e}")))?;
        Ok(Event {
            id: self.id,
            session_id: self.session_id,
            channel: self.channel,
            payload,
            created_at: parse_ts("created_at", &self.created_at)?,
        })
    }
}

impl EventRepo {
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

    /// Append an event stamped `created_at`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for a blank channel, `AppError::Db` or
    /// `AppError::Timeout` on store failure.
    pub async fn insert(
        &self,
        session_id: Option<&str>,
        channel: &str,
        payload: &serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Result<Event> {
        if channel.trim().is_empty() {
            return Err(AppError::validation("channel", "is required"));
        }
        let payload_s = serde_json::to_string(payload)
            .map_err(|e| AppError::Db(format!("serialize event payload: {e}")))?;
        let created_s = format_ts(created_at);

        let id: i64 = bounded(self.timeouts.status_update(), "insert event", async {
            let id = sqlx::query_scalar(
                "INSERT INTO event (session_id, channel, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 RETURNING id",
            )
            .bind(session_id)
            .bind(channel)
            .bind(&payload_s)
            .bind(&created_s)
            .fetch_one(self.db.as_ref())
            .await?;
            Ok(id)
        })
        .await?;

        Ok(Event {
            id,
            session_id: session_id.map(str::to_owned),
            channel: channel.to_owned(),
            payload: payload.clone(),
            created_at,
        })
    }

    /// Events for a session in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_session(&self, session_id: &str) -> Result<Vec<Event>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT id, session_id, channel, payload, created_at
             FROM event WHERE session_id = ?1 ORDER BY id ASC",
        )
        .bind(session_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(EventRow::into_event).collect()
    }

    /// Hard-delete events created before `before`.
    ///
    /// Returns the number of rows deleted.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` or `AppError::Timeout` on store failure.
    pub async fn purge(&self, before: DateTime<Utc>) -> Result<u64> {
        let before_str = format_ts(before);
        bounded(self.timeouts.bulk(), "purge events", async {
            let result = sqlx::query("DELETE FROM event WHERE created_at < ?1")
                .bind(&before_str)
                .execute(self.db.as_ref())
                .await?;
            Ok(result.rows_affected())
        })
        .await
    }
}
