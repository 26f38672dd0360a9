//! Tasks: externally-fulfilled units of work
//!
//! A Task is created when a run reaches a step that needs outside input:
//! a human action, an agent execution, or a sub-workflow. The run pauses
//! at that step until the task is completed or failed.

use crate::run::{BranchScope, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Task Identifier ──────────────────────────────────────────────────

/// Unique identifier for a task
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Task Status ──────────────────────────────────────────────────────

/// The lifecycle status of a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet assigned
    #[default]
    Pending,
    /// Assigned to an agent, user, or role
    Assigned,
    /// Picked up by the assignee
    InProgress,
    /// Finished successfully; terminal
    Completed,
    /// Finished unsuccessfully; terminal
    Failed,
}

impl TaskStatus {
    /// Check if this is a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

// ── Task Kind ────────────────────────────────────────────────────────

/// What sort of work a task represents; mirrors the step kind that
/// created it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    AgentExecution,
    HumanReview,
    DataInput,
    Decision,
    /// Placeholder linking a parent run to a child run
    SubWorkflow,
}

// ── Task Assignment ──────────────────────────────────────────────────

/// Who fulfills a task. Sub-workflow placeholders carry no assignment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAssignment {
    Agent(String),
    User(String),
    Role(String),
}

// ── Task ─────────────────────────────────────────────────────────────

/// A unit of work that pauses run advancement until fulfilled
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub task_id: TaskId,
    /// The run this task belongs to
    pub run_id: RunId,
    /// Simple step name within its step list, never branch-qualified
    pub step_name: String,
    /// What sort of work this is
    pub kind: TaskKind,
    /// Who fulfills it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment: Option<TaskAssignment>,
    /// Input payload handed to the assignee
    pub input: Value,
    /// Output recorded at completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Current lifecycle status
    pub status: TaskStatus,
    /// When the work is due
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    /// Child run id, set only for sub_workflow placeholders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_run_id: Option<RunId>,
    /// The branch the task was created under, so completion resumes the
    /// correct branch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_scope: Option<BranchScope>,
    /// When the task was created
    pub created_at: DateTime<Utc>,
    /// When the task was last updated
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new pending task
    pub fn new(run_id: RunId, step_name: impl Into<String>, kind: TaskKind, input: Value) -> Self {
        let now = Utc::now();
        Self {
            task_id: TaskId::generate(),
            run_id,
            step_name: step_name.into(),
            kind,
            assignment: None,
            input,
            output: None,
            status: TaskStatus::Pending,
            due_date: None,
            sub_run_id: None,
            step_scope: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Assign the task; moves it from pending to assigned
    pub fn assigned_to(mut self, assignment: TaskAssignment) -> Self {
        self.assignment = Some(assignment);
        self.status = TaskStatus::Assigned;
        self
    }

    pub fn with_due_date(mut self, due_date: DateTime<Utc>) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn with_scope(mut self, scope: BranchScope) -> Self {
        self.step_scope = Some(scope);
        self
    }

    /// Check if the task has reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
