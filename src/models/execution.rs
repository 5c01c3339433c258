//! Agent execution model, including sub-agents spawned by an orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stage::StageStatus;
use crate::{AppError, Result};

/// Agent executions share the stage status vocabulary.
pub type ExecutionStatus = StageStatus;

/// One agent run inside a stage.
///
/// `parent_execution_id == None` marks a top-level (orchestrator) execution;
/// only those feed stage aggregation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentExecution {
    /// Unique identifier.
    pub id: String,
    /// Owning stage.
    pub stage_id: String,
    /// Owning session.
    pub session_id: String,
    /// Configured agent name.
    pub agent_name: String,
    /// 1-based index, unique per `(stage_id, parent_execution_id)`.
    pub agent_index: i64,
    /// Orchestrator that spawned this sub-agent.
    pub parent_execution_id: Option<String>,
    /// Task handed to a sub-agent.
    pub task: Option<String>,
    /// LLM backend driving the agent.
    pub llm_backend: String,
    /// LLM provider name.
    pub llm_provider: Option<String>,
    /// Current status.
    pub status: ExecutionStatus,
    /// Set once, on the first transition into `active`.
    pub started_at: Option<DateTime<Utc>>,
    /// Set once, on the first transition into a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// `completed_at - started_at` in milliseconds.
    pub duration_ms: Option<i64>,
    /// Failure description.
    pub error_message: Option<String>,
}

impl AgentExecution {
    /// Whether this execution was spawned by another execution.
    #[must_use]
    pub fn is_sub_agent(&self) -> bool {
        self.parent_execution_id.is_some()
    }
}

/// Fields supplied when a worker starts an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct NewAgentExecution {
    /// Owning stage.
    pub stage_id: String,
    /// Owning session.
    pub session_id: String,
    /// Agent name.
    pub agent_name: String,
    /// 1-based index.
    pub agent_index: i64,
    /// Spawning orchestrator, for sub-agents.
    pub parent_execution_id: Option<String>,
    /// Sub-agent task.
    pub task: Option<String>,
    /// LLM backend.
    pub llm_backend: String,
    /// LLM provider.
    pub llm_provider: Option<String>,
}

impl NewAgentExecution {
    /// Top-level execution.
    #[must_use]
    pub fn top_level(
        stage_id: impl Into<String>,
        session_id: impl Into<String>,
        agent_name: impl Into<String>,
        agent_index: i64,
        llm_backend: impl Into<String>,
    ) -> Self {
        Self {
            stage_id: stage_id.into(),
            session_id: session_id.into(),
            agent_name: agent_name.into(),
            agent_index,
            parent_execution_id: None,
            task: None,
            llm_backend: llm_backend.into(),
            llm_provider: None,
        }
    }

    /// Sub-agent of `parent`, inheriting its stage, session and backend.
    #[must_use]
    pub fn sub_agent(
        parent: &AgentExecution,
        agent_name: impl Into<String>,
        agent_index: i64,
        task: impl Into<String>,
    ) -> Self {
        Self {
            stage_id: parent.stage_id.clone(),
            session_id: parent.session_id.clone(),
            agent_name: agent_name.into(),
            agent_index,
            parent_execution_id: Some(parent.id.clone()),
            task: Some(task.into()),
            llm_backend: parent.llm_backend.clone(),
            llm_provider: parent.llm_provider.clone(),
        }
    }

    /// Set the LLM provider.
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.llm_provider = Some(provider.into());
        self
    }

    /// Check required fields before any write.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.stage_id.trim().is_empty() {
            return Err(AppError::validation("stage_id", "is required"));
        }
        if self.session_id.trim().is_empty() {
            return Err(AppError::validation("session_id", "is required"));
        }
        if self.agent_name.trim().is_empty() {
            return Err(AppError::validation("agent_name", "is required"));
        }
        if self.llm_backend.trim().is_empty() {
            return Err(AppError::validation("llm_backend", "is required"));
        }
        if self.agent_index < 1 {
            return Err(AppError::validation("agent_index", "must be at least 1"));
        }
        match (&self.parent_execution_id, &self.task) {
            (Some(_), None) => Err(AppError::validation("task", "sub-agents require a task")),
            (Some(_), Some(task)) if task.trim().is_empty() => {
                Err(AppError::validation("task", "sub-agents require a task"))
            }
            (None, Some(_)) => Err(AppError::validation(
                "task",
                "only sub-agents carry a task",
            )),
            _ => Ok(()),
        }
    }

    /// Materialize the pending execution row.
    #[must_use]
    pub fn into_execution(self) -> AgentExecution {
        AgentExecution {
            id: Uuid::new_v4().to_string(),
            stage_id: self.stage_id,
            session_id: self.session_id,
            agent_name: self.agent_name,
            agent_index: self.agent_index,
            parent_execution_id: self.parent_execution_id,
            task: self.task,
            llm_backend: self.llm_backend,
            llm_provider: self.llm_provider,
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            error_message: None,
        }
    }
}
