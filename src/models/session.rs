//! Session model and lifecycle helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppError, Result};

/// Lifecycle status for an alert-analysis session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Submitted, waiting for a worker to claim it.
    Pending,
    /// Claimed and being processed by the worker in `pod_id`.
    InProgress,
    /// Cancellation requested; the owning worker has not yet stopped.
    Cancelling,
    /// All stages finished successfully.
    Completed,
    /// Processing failed.
    Failed,
    /// Cancelled by an operator.
    Cancelled,
    /// Exceeded its time budget or was abandoned by its worker.
    TimedOut,
}

impl SessionStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 7] = [
        Self::Pending,
        Self::InProgress,
        Self::Cancelling,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
        Self::TimedOut,
    ];

    /// Storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Cancelling => "cancelling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }

    /// Parse the storage representation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for an unknown status.
    pub fn parse(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| AppError::validation("status", format!("unknown session status: {s}")))
    }

    /// Whether the session has reached a final state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }
}

/// Session domain entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Globally unique, immutable identifier.
    pub id: String,
    /// Opaque alert payload.
    pub alert_data: String,
    /// Alert classification used for chain routing.
    pub alert_type: String,
    /// Chain the alert was routed to.
    pub chain_id: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Submitting user, if known.
    pub author: Option<String>,
    /// Worker that claimed the session.
    pub pod_id: Option<String>,
    /// Submission timestamp.
    pub created_at: DateTime<Utc>,
    /// Claim timestamp; unset while pending.
    pub started_at: Option<DateTime<Utc>>,
    /// Last worker heartbeat.
    pub last_interaction_at: Option<DateTime<Utc>>,
    /// Set on entry into a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Index of the stage currently executing.
    pub current_stage_index: Option<i64>,
    /// Identifier of the stage currently executing.
    pub current_stage_id: Option<String>,
    /// Soft-delete tombstone.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Final analysis text produced by the chain.
    pub final_analysis: Option<String>,
    /// Short summary of the final analysis.
    pub executive_summary: Option<String>,
    /// Failure description for unsuccessful sessions.
    pub error_message: Option<String>,
}

impl Session {
    /// Whether the session has been soft-deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Fields supplied when an alert is submitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct NewSession {
    /// Caller-chosen identifier; a UUID v4 is generated when absent.
    pub id: Option<String>,
    /// Opaque alert payload.
    pub alert_data: String,
    /// Alert classification.
    pub alert_type: String,
    /// Target chain.
    pub chain_id: String,
    /// Submitting user.
    pub author: Option<String>,
}

impl NewSession {
    /// Construct a submission with a generated identifier.
    #[must_use]
    pub fn new(
        alert_type: impl Into<String>,
        chain_id: impl Into<String>,
        alert_data: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            alert_data: alert_data.into(),
            alert_type: alert_type.into(),
            chain_id: chain_id.into(),
            author: None,
        }
    }

    /// Set the submitting user.
    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Use a caller-chosen identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Check required fields before any write.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            return Err(AppError::validation("id", "must not be blank"));
        }
        if self.alert_type.trim().is_empty() {
            return Err(AppError::validation("alert_type", "is required"));
        }
        if self.chain_id.trim().is_empty() {
            return Err(AppError::validation("chain_id", "is required"));
        }
        if self.alert_data.is_empty() {
            return Err(AppError::validation("alert_data", "is required"));
        }
        Ok(())
    }

    /// Materialize the pending session row.
    #[must_use]
    pub fn into_session(self, now: DateTime<Utc>) -> Session {
        Session {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            alert_data: self.alert_data,
            alert_type: self.alert_type,
            chain_id: self.chain_id,
            status: SessionStatus::Pending,
            author: self.author,
            pod_id: None,
            created_at: now,
            started_at: None,
            last_interaction_at: None,
            completed_at: None,
            current_stage_index: None,
            current_stage_id: None,
            deleted_at: None,
            final_analysis: None,
            executive_summary: None,
            error_message: None,
        }
    }
}

/// Terminal status plus the opaque result payload written with it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionOutcome {
    /// Terminal status to record.
    pub status: SessionStatus,
    /// Final analysis text.
    pub final_analysis: Option<String>,
    /// Executive summary.
    pub executive_summary: Option<String>,
    /// Failure description.
    pub error_message: Option<String>,
}

impl SessionOutcome {
    /// Outcome carrying only a status.
    #[must_use]
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status,
            final_analysis: None,
            executive_summary: None,
            error_message: None,
        }
    }

    /// Successful completion with analysis text.
    #[must_use]
    pub fn completed(final_analysis: impl Into<String>, executive_summary: Option<String>) -> Self {
        Self {
            status: SessionStatus::Completed,
            final_analysis: Some(final_analysis.into()),
            executive_summary,
            error_message: None,
        }
    }

    /// Failure with an error description.
    #[must_use]
    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            status: SessionStatus::Failed,
            final_analysis: None,
            executive_summary: None,
            error_message: Some(error_message.into()),
        }
    }
}
