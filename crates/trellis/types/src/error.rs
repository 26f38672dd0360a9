use crate::{RunId, TaskId};
use thiserror::Error;

/// Result type for workflow operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Errors raised by the orchestration core.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow definition not found: {0}")]
    DefinitionNotFound(String),

    #[error("step not found: {0}")]
    StepNotFound(String),

    #[error("branch '{branch}' not found under parallel step '{parallel_step}'")]
    BranchNotFound {
        parallel_step: String,
        branch: String,
    },

    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(String),

    #[error("workflow run not found: {0}")]
    RunNotFound(RunId),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("run {0} is already in a terminal state")]
    RunAlreadyTerminal(RunId),

    #[error("task {0} is already in a terminal state")]
    TaskAlreadyTerminal(TaskId),

    #[error("agent execution failed: {0}")]
    ExecutionFailed(String),

    #[error("storage error: {0}")]
    Storage(String),
}
