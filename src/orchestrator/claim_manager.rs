//! Work claiming: hands the oldest pending session to exactly one worker.
//!
//! No lock is held between selecting a candidate and claiming it. The claim
//! is an `UPDATE … WHERE status = 'pending'`; a zero row count means a
//! competing worker claimed the candidate first, so we select again. Each
//! lost race implies some other worker made progress, so the loop ends once
//! the pending set is drained.

use chrono::Utc;
use tracing::{debug, info, info_span, Instrument};

use crate::models::session::Session;
use crate::persistence::session_repo::SessionRepo;
use crate::{AppError, Result};

/// Claim the oldest pending session for `worker_id`.
///
/// Returns `Ok(None)` when no pending session exists; that is the normal
/// idle outcome, not an error.
///
/// # Errors
///
/// Returns `AppError::Validation` for a blank `worker_id`, `AppError::Db` or
/// `AppError::Timeout` when the store fails.
pub async fn claim_next(sessions: &SessionRepo, worker_id: &str) -> Result<Option<Session>> {
    if worker_id.trim().is_empty() {
        return Err(AppError::validation("worker_id", "is required"));
    }

    async {
        let mut lost_races: u32 = 0;
        loop {
            let Some(candidate) = sessions.oldest_pending_id().await? else {
                debug!(lost_races, "no pending sessions");
                return Ok(None);
            };

            if sessions.try_claim(&candidate, worker_id, Utc::now()).await? == 1 {
                let session = sessions
                    .get_by_id(&candidate)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("session {candidate}")))?;
                info!(session_id = %session.id, lost_races, "session claimed");
                return Ok(Some(session));
            }

            lost_races += 1;
            debug!(session_id = %candidate, "claim lost to another worker; reselecting");
        }
    }
    .instrument(info_span!("claim_next", worker_id))
    .await
}
