use crate::StoreResult;
use async_trait::async_trait;
use serde_json::Value;
use trellis_types::{
    RunId, Task, TaskId, TaskStatus, WorkflowDefinition, WorkflowDefinitionId, WorkflowRun,
};

/// Storage interface for workflow definitions.
///
/// Definitions are immutable once referenced by a run: the engine always
/// reads by id and never re-resolves by name mid-execution.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Register a definition. Validates it structurally and, when the
    /// definition is active, deactivates any other version of the same
    /// name; at most one active version per name at any time.
    async fn put(&self, definition: WorkflowDefinition) -> StoreResult<()>;

    /// Get one definition by id.
    async fn get(&self, id: &WorkflowDefinitionId) -> StoreResult<Option<WorkflowDefinition>>;

    /// Get a definition by name. With a version, that exact version; with
    /// none, only the active version.
    async fn get_by_name(
        &self,
        name: &str,
        version: Option<u32>,
    ) -> StoreResult<Option<WorkflowDefinition>>;
}

/// Storage interface for workflow run state.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a newly created run.
    async fn create(&self, run: WorkflowRun) -> StoreResult<()>;

    /// Get one run by id.
    async fn get(&self, id: &RunId) -> StoreResult<Option<WorkflowRun>>;

    /// Persist a mutated run. Compare-and-swap on `run.version`: the
    /// update is rejected with a conflict when the stored version differs
    /// from the version the caller read, and when the stored run is
    /// already terminal. Returns the stored run with its version bumped.
    async fn update(&self, run: WorkflowRun) -> StoreResult<WorkflowRun>;
}

/// Storage interface for tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a newly created task.
    async fn create(&self, task: Task) -> StoreResult<()>;

    /// Get one task by id.
    async fn get(&self, id: &TaskId) -> StoreResult<Option<Task>>;

    /// Transition a task's status, recording `output` when supplied.
    /// A task already in a terminal status is rejected with a conflict;
    /// completion happens at most once.
    async fn update_status(
        &self,
        id: &TaskId,
        status: TaskStatus,
        output: Option<Value>,
    ) -> StoreResult<Task>;

    /// Record the child run a sub-workflow placeholder task is waiting on.
    async fn link_sub_run(&self, id: &TaskId, run_id: &RunId) -> StoreResult<()>;

    /// Find the task waiting on the given child run, if any.
    async fn find_by_sub_run(&self, run_id: &RunId) -> StoreResult<Option<Task>>;
}
