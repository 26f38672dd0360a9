//! In-memory reference implementations of the Trellis storage traits.
//!
//! These adapters are deterministic and test-friendly, and they enforce
//! the same invariants a transactional backend must: one active definition
//! version per name, compare-and-swap run updates, and terminal-at-most-once
//! task transitions.

use crate::traits::{DefinitionStore, RunStore, TaskStore};
use crate::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use trellis_types::{
    RunId, Task, TaskId, TaskStatus, WorkflowDefinition, WorkflowDefinitionId, WorkflowRun,
};

// ── Definition Store ─────────────────────────────────────────────────

/// In-memory definition store.
#[derive(Default)]
pub struct InMemoryDefinitionStore {
    definitions: RwLock<HashMap<WorkflowDefinitionId, WorkflowDefinition>>,
}

impl InMemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DefinitionStore for InMemoryDefinitionStore {
    async fn put(&self, definition: WorkflowDefinition) -> StoreResult<()> {
        definition
            .validate()
            .map_err(|e| StoreError::InvalidInput(e.to_string()))?;

        let mut guard = self
            .definitions
            .write()
            .map_err(|_| StoreError::Backend("definitions lock poisoned".to_string()))?;

        if guard.contains_key(&definition.id) {
            return Err(StoreError::Conflict(format!(
                "definition {} already exists",
                definition.id
            )));
        }

        if definition.is_active {
            for existing in guard.values_mut() {
                if existing.name == definition.name {
                    existing.is_active = false;
                }
            }
        }

        guard.insert(definition.id.clone(), definition);
        Ok(())
    }

    async fn get(&self, id: &WorkflowDefinitionId) -> StoreResult<Option<WorkflowDefinition>> {
        let guard = self
            .definitions
            .read()
            .map_err(|_| StoreError::Backend("definitions lock poisoned".to_string()))?;
        Ok(guard.get(id).cloned())
    }

    async fn get_by_name(
        &self,
        name: &str,
        version: Option<u32>,
    ) -> StoreResult<Option<WorkflowDefinition>> {
        let guard = self
            .definitions
            .read()
            .map_err(|_| StoreError::Backend("definitions lock poisoned".to_string()))?;
        let found = guard
            .values()
            .find(|d| match version {
                Some(v) => d.name == name && d.version == v,
                None => d.name == name && d.is_active,
            })
            .cloned();
        Ok(found)
    }
}

// ── Run Store ────────────────────────────────────────────────────────

/// In-memory run store with compare-and-swap updates.
#[derive(Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<RunId, WorkflowRun>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create(&self, run: WorkflowRun) -> StoreResult<()> {
        let mut guard = self
            .runs
            .write()
            .map_err(|_| StoreError::Backend("runs lock poisoned".to_string()))?;
        if guard.contains_key(&run.run_id) {
            return Err(StoreError::Conflict(format!(
                "run {} already exists",
                run.run_id
            )));
        }
        guard.insert(run.run_id.clone(), run);
        Ok(())
    }

    async fn get(&self, id: &RunId) -> StoreResult<Option<WorkflowRun>> {
        let guard = self
            .runs
            .read()
            .map_err(|_| StoreError::Backend("runs lock poisoned".to_string()))?;
        Ok(guard.get(id).cloned())
    }

    async fn update(&self, run: WorkflowRun) -> StoreResult<WorkflowRun> {
        let mut guard = self
            .runs
            .write()
            .map_err(|_| StoreError::Backend("runs lock poisoned".to_string()))?;
        let stored = guard
            .get(&run.run_id)
            .ok_or_else(|| StoreError::NotFound(format!("run {} not found", run.run_id)))?;

        if stored.is_terminal() {
            return Err(StoreError::InvariantViolation(format!(
                "run {} is terminal and cannot be mutated",
                run.run_id
            )));
        }
        if stored.version != run.version {
            return Err(StoreError::Conflict(format!(
                "stale run {}: stored version {}, update based on {}",
                run.run_id, stored.version, run.version
            )));
        }

        let mut next = run;
        next.version += 1;
        guard.insert(next.run_id.clone(), next.clone());
        Ok(next)
    }
}

// ── Task Store ───────────────────────────────────────────────────────

/// In-memory task store.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks created for a run, oldest first. Host/test convenience, not
    /// part of the `TaskStore` contract.
    pub fn tasks_for_run(&self, run_id: &RunId) -> StoreResult<Vec<Task>> {
        let guard = self
            .tasks
            .read()
            .map_err(|_| StoreError::Backend("tasks lock poisoned".to_string()))?;
        let mut tasks: Vec<Task> = guard
            .values()
            .filter(|t| &t.run_id == run_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: Task) -> StoreResult<()> {
        let mut guard = self
            .tasks
            .write()
            .map_err(|_| StoreError::Backend("tasks lock poisoned".to_string()))?;
        if guard.contains_key(&task.task_id) {
            return Err(StoreError::Conflict(format!(
                "task {} already exists",
                task.task_id
            )));
        }
        guard.insert(task.task_id.clone(), task);
        Ok(())
    }

    async fn get(&self, id: &TaskId) -> StoreResult<Option<Task>> {
        let guard = self
            .tasks
            .read()
            .map_err(|_| StoreError::Backend("tasks lock poisoned".to_string()))?;
        Ok(guard.get(id).cloned())
    }

    async fn update_status(
        &self,
        id: &TaskId,
        status: TaskStatus,
        output: Option<Value>,
    ) -> StoreResult<Task> {
        let mut guard = self
            .tasks
            .write()
            .map_err(|_| StoreError::Backend("tasks lock poisoned".to_string()))?;
        let task = guard
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("task {} not found", id)))?;

        if task.is_terminal() {
            return Err(StoreError::Conflict(format!(
                "task {} is already terminal ({:?})",
                id, task.status
            )));
        }

        task.status = status;
        if let Some(output) = output {
            task.output = Some(output);
        }
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn link_sub_run(&self, id: &TaskId, run_id: &RunId) -> StoreResult<()> {
        let mut guard = self
            .tasks
            .write()
            .map_err(|_| StoreError::Backend("tasks lock poisoned".to_string()))?;
        let task = guard
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("task {} not found", id)))?;
        task.sub_run_id = Some(run_id.clone());
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn find_by_sub_run(&self, run_id: &RunId) -> StoreResult<Option<Task>> {
        let guard = self
            .tasks
            .read()
            .map_err(|_| StoreError::Backend("tasks lock poisoned".to_string()))?;
        Ok(guard
            .values()
            .find(|t| t.sub_run_id.as_ref() == Some(run_id))
            .cloned())
    }
}
