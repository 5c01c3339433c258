//! Stage model: one step of a chain, executed by one or more agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppError, Result};

/// Lifecycle status shared by stages and agent executions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Created, no agent running yet.
    Pending,
    /// At least one agent is running.
    Active,
    /// Finished successfully under its success policy.
    Completed,
    /// Finished unsuccessfully.
    Failed,
    /// Every agent was cancelled.
    Cancelled,
    /// Every agent timed out.
    TimedOut,
}

impl StageStatus {
    /// Every status.
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Active,
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
            Self::Active => "active",
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
            .ok_or_else(|| AppError::validation("status", format!("unknown status: {s}")))
    }

    /// Whether the status is final.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }
}

/// How the agents of a stage relate to each other.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParallelType {
    /// Different agents working the same alert side by side.
    MultiAgent,
    /// Copies of one agent run for consensus.
    Replica,
}

impl ParallelType {
    /// Storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MultiAgent => "multi_agent",
            Self::Replica => "replica",
        }
    }

    /// Parse the storage representation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for an unknown value.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "multi_agent" => Ok(Self::MultiAgent),
            "replica" => Ok(Self::Replica),
            other => Err(AppError::validation(
                "parallel_type",
                format!("unknown parallel type: {other}"),
            )),
        }
    }
}

/// Rule deciding whether a finished stage counts as completed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SuccessPolicy {
    /// Every top-level agent must complete.
    All,
    /// At least one top-level agent must complete.
    #[default]
    Any,
}

impl SuccessPolicy {
    /// Storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Any => "any",
        }
    }

    /// Parse the storage representation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for an unknown value.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(Self::All),
            "any" => Ok(Self::Any),
            other => Err(AppError::validation(
                "success_policy",
                format!("unknown success policy: {other}"),
            )),
        }
    }
}

/// Stage domain entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Stage {
    /// Unique identifier.
    pub id: String,
    /// Owning session.
    pub session_id: String,
    /// Chain-configured stage name.
    pub stage_name: String,
    /// Order within the session; unique per session, gaps allowed.
    pub stage_index: i64,
    /// Number of top-level agents the chain expects to run.
    pub expected_agent_count: i64,
    /// Parallelism mode, if any.
    pub parallel_type: Option<ParallelType>,
    /// Configured success policy; `None` behaves as [`SuccessPolicy::Any`].
    pub success_policy: Option<SuccessPolicy>,
    /// Aggregated status.
    pub status: StageStatus,
    /// First transition into `active`.
    pub started_at: Option<DateTime<Utc>>,
    /// Transition into a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// `completed_at - started_at` in milliseconds.
    pub duration_ms: Option<i64>,
    /// Failure description.
    pub error_message: Option<String>,
    /// Chat that triggered this stage, for chat follow-ups.
    pub chat_id: Option<String>,
    /// Chat message that triggered this stage.
    pub chat_user_message_id: Option<String>,
}

impl Stage {
    /// Policy actually applied during aggregation.
    #[must_use]
    pub fn effective_policy(&self) -> SuccessPolicy {
        self.success_policy.unwrap_or_default()
    }
}

/// Fields supplied when a worker creates a stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct NewStage {
    /// Owning session.
    pub session_id: String,
    /// Stage name.
    pub stage_name: String,
    /// Order within the session.
    pub stage_index: i64,
    /// Number of top-level agents expected.
    pub expected_agent_count: i64,
    /// Parallelism mode.
    pub parallel_type: Option<ParallelType>,
    /// Success policy.
    pub success_policy: Option<SuccessPolicy>,
    /// Triggering chat.
    pub chat_id: Option<String>,
    /// Triggering chat message.
    pub chat_user_message_id: Option<String>,
}

impl NewStage {
    /// Single-agent stage.
    #[must_use]
    pub fn single(
        session_id: impl Into<String>,
        stage_name: impl Into<String>,
        stage_index: i64,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            stage_name: stage_name.into(),
            stage_index,
            expected_agent_count: 1,
            parallel_type: None,
            success_policy: None,
            chat_id: None,
            chat_user_message_id: None,
        }
    }

    /// Parallel stage with `expected_agent_count` agents.
    #[must_use]
    pub fn parallel(
        session_id: impl Into<String>,
        stage_name: impl Into<String>,
        stage_index: i64,
        parallel_type: ParallelType,
        expected_agent_count: i64,
        success_policy: Option<SuccessPolicy>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            stage_name: stage_name.into(),
            stage_index,
            expected_agent_count,
            parallel_type: Some(parallel_type),
            success_policy,
            chat_id: None,
            chat_user_message_id: None,
        }
    }

    /// Check required fields before any write.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.session_id.trim().is_empty() {
            return Err(AppError::validation("session_id", "is required"));
        }
        if self.stage_name.trim().is_empty() {
            return Err(AppError::validation("stage_name", "is required"));
        }
        if self.stage_index < 0 {
            return Err(AppError::validation("stage_index", "must not be negative"));
        }
        if self.expected_agent_count < 1 {
            return Err(AppError::validation(
                "expected_agent_count",
                "must be at least 1",
            ));
        }
        if self.parallel_type.is_some() && self.expected_agent_count < 2 {
            return Err(AppError::validation(
                "expected_agent_count",
                "parallel stages need at least 2 agents",
            ));
        }
        Ok(())
    }

    /// Materialize the pending stage row.
    #[must_use]
    pub fn into_stage(self) -> Stage {
        Stage {
            id: Uuid::new_v4().to_string(),
            session_id: self.session_id,
            stage_name: self.stage_name,
            stage_index: self.stage_index,
            expected_agent_count: self.expected_agent_count,
            parallel_type: self.parallel_type,
            success_policy: self.success_policy,
            status: StageStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            error_message: None,
            chat_id: self.chat_id,
            chat_user_message_id: self.chat_user_message_id,
        }
    }
}
