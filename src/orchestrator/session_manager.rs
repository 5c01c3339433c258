//! Session lifecycle: submit, heartbeat, progress, terminal outcome, cancel
//! and orphan handling.
//!
//! Every write goes through a guarded repository statement. When a guard
//! rejects the write, the current status is read back to tell "missing"
//! apart from "wrong state".

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::OrphanAction;
use crate::models::event::Event;
use crate::models::session::{NewSession, Session, SessionOutcome, SessionStatus};
use crate::persistence::{cutoff_std, Store};
use crate::{AppError, Result};

/// Submit a new alert as a `pending` session.
///
/// # Errors
///
/// Returns `AppError::Validation` for malformed input,
/// `AppError::AlreadyExists` when a caller-supplied id is taken,
/// `AppError::Db` or `AppError::Timeout` on store failure.
pub async fn submit_session(store: &Store, new_session: NewSession) -> Result<Session> {
    new_session.validate()?;
    let session = store
        .sessions
        .create(&new_session.into_session(Utc::now()))
        .await?;
    info!(
        session_id = %session.id,
        alert_type = %session.alert_type,
        chain_id = %session.chain_id,
        "session submitted"
    );
    Ok(session)
}

/// Load a session, including soft-deleted ones.
///
/// # Errors
///
/// Returns `AppError::NotFound` for an unknown id, `AppError::Db` on store
/// failure.
pub async fn get_session(store: &Store, session_id: &str) -> Result<Session> {
    store
        .sessions
        .get_by_id(session_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))
}

/// Record liveness for a session the caller is processing.
///
/// Returns the current status so the worker can notice `cancelling`.
/// A session that is no longer live is reported as its current status
/// without writing.
///
/// # Errors
///
/// Returns `AppError::NotFound` for an unknown id, `AppError::Db` or
/// `AppError::Timeout` on store failure.
pub async fn heartbeat(store: &Store, session_id: &str) -> Result<SessionStatus> {
    if let Some(status) = store.sessions.touch(session_id, Utc::now()).await? {
        return Ok(status);
    }
    store
        .sessions
        .status_of(session_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))
}

/// Move the stage cursor of an `in_progress` session.
///
/// # Errors
///
/// Returns `AppError::NotFound` for an unknown id,
/// `AppError::InvalidTransition` when the session is not `in_progress`,
/// `AppError::Db` or `AppError::Timeout` on store failure.
pub async fn update_progress(
    store: &Store,
    session_id: &str,
    stage_index: i64,
    stage_id: &str,
) -> Result<()> {
    let changed = store
        .sessions
        .update_progress(session_id, stage_index, stage_id, Utc::now())
        .await?;
    if changed == 1 {
        return Ok(());
    }
    match store.sessions.status_of(session_id).await? {
        None => Err(AppError::NotFound(format!("session {session_id}"))),
        Some(status) => Err(AppError::InvalidTransition(format!(
            "session {session_id} is {}; progress requires in_progress",
            status.as_str()
        ))),
    }
}

/// Write the terminal outcome of a live session and return it as stored.
///
/// # Errors
///
/// Returns `AppError::Validation` when `outcome.status` is not terminal,
/// `AppError::NotFound` for an unknown id, `AppError::InvalidTransition`
/// when the session is not `in_progress` or `cancelling`, `AppError::Db` or
/// `AppError::Timeout` on store failure.
pub async fn set_terminal(
    store: &Store,
    session_id: &str,
    outcome: &SessionOutcome,
) -> Result<Session> {
    if !outcome.status.is_terminal() {
        return Err(AppError::validation(
            "status",
            format!("{} is not a terminal status", outcome.status.as_str()),
        ));
    }

    async {
        let changed = store
            .sessions
            .set_terminal(session_id, outcome, Utc::now())
            .await?;
        if changed == 0 {
            return match store.sessions.status_of(session_id).await? {
                None => Err(AppError::NotFound(format!("session {session_id}"))),
                Some(current) => Err(AppError::InvalidTransition(format!(
                    "session {session_id} is {}; cannot become {}",
                    current.as_str(),
                    outcome.status.as_str()
                ))),
            };
        }
        info!(status = outcome.status.as_str(), "session finished");
        get_session(store, session_id).await
    }
    .instrument(info_span!("set_terminal", session_id))
    .await
}

/// Ask the worker processing `session_id` to stop.
///
/// Only an `in_progress` session can be cancelled; the worker observes the
/// `cancelling` status on its next heartbeat.
///
/// # Errors
///
/// Returns `AppError::NotFound` for an unknown id,
/// `AppError::NotCancellable` for any other status, `AppError::Db` or
/// `AppError::Timeout` on store failure.
pub async fn request_cancel(store: &Store, session_id: &str) -> Result<()> {
    async {
        if store.sessions.mark_cancelling(session_id).await? == 1 {
            info!("cancellation requested");
            return Ok(());
        }
        match store.sessions.status_of(session_id).await? {
            None => Err(AppError::NotFound(format!("session {session_id}"))),
            Some(status) => Err(AppError::NotCancellable(format!(
                "session {session_id} is {}",
                status.as_str()
            ))),
        }
    }
    .instrument(info_span!("request_cancel", session_id))
    .await
}

/// `in_progress` sessions whose last heartbeat is older than `timeout`.
///
/// # Errors
///
/// Returns `AppError::Validation` for an out-of-range `timeout`,
/// `AppError::Db` on store failure.
pub async fn find_orphaned(store: &Store, timeout: Duration) -> Result<Vec<Session>> {
    let cutoff = cutoff_std(Utc::now(), timeout, "timeout")?;
    store.sessions.find_stale_in_progress(cutoff).await
}

/// Apply `action` to an orphan as it was observed by [`find_orphaned`].
///
/// Returns `true` when the session was changed. A session that heartbeated
/// or changed owner since it was observed is left alone.
///
/// # Errors
///
/// Returns `AppError::Db` or `AppError::Timeout` on store failure.
pub async fn recover_orphan(
    store: &Store,
    session: &Session,
    action: OrphanAction,
) -> Result<bool> {
    let recovered = store
        .sessions
        .recover_orphan(session, action, Utc::now())
        .await?;
    if recovered {
        info!(session_id = %session.id, ?action, "orphaned session recovered");
    } else if action != OrphanAction::Report {
        warn!(session_id = %session.id, ?action, "orphan changed since observed; skipped");
    }
    Ok(recovered)
}

/// Append an event to the ephemeral event log.
///
/// # Errors
///
/// Returns `AppError::Validation` for a blank channel, `AppError::Db` or
/// `AppError::Timeout` on store failure.
pub async fn publish_event(
    store: &Store,
    session_id: Option<&str>,
    channel: &str,
    payload: &serde_json::Value,
) -> Result<Event> {
    let event = store
        .events
        .insert(session_id, channel, payload, Utc::now())
        .await?;
    debug!(event_id = event.id, channel, session_id, "event published");
    Ok(event)
}
