//! Sub-workflow linkage and resumption
//!
//! A `sub_workflow` step starts a child run and pauses the parent behind
//! a placeholder task carrying the child's run id. When any run reaches a
//! terminal status the engine looks for a task waiting on it; finding one
//! completes that task with the child's final context and re-enters the
//! normal task-completion path for the parent. Control returns up the
//! logical call stack through this back-reference; no continuation state
//! is held in memory.

use crate::advancer::WorkItem;
use crate::condition;
use crate::engine::WorkflowEngine;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use trellis_types::{
    BranchScope, RunStatus, Task, TaskKind, TaskStatus, WorkflowResult, WorkflowRun,
};

/// Compute a child run's input: the parent's effective context, or, with
/// an input mapping, dot-path extractions from it, keyed as declared.
/// A mapping path that does not resolve is skipped with a warning.
pub(crate) fn child_input(run: &WorkflowRun, mapping: Option<&BTreeMap<String, String>>) -> Value {
    let context = run.effective_context();
    let Some(mapping) = mapping else {
        return context;
    };
    let mut extracted = Map::new();
    for (key, path) in mapping {
        match condition::resolve_path(&context, path) {
            Some(value) => {
                extracted.insert(key.clone(), value.clone());
            }
            None => tracing::warn!(
                run_id = %run.run_id,
                key = %key,
                path = %path,
                "input mapping path did not resolve; key skipped"
            ),
        }
    }
    Value::Object(extracted)
}

impl WorkflowEngine {
    /// Start the child run for a `sub_workflow` step and pause the parent
    /// behind a placeholder task linked to it.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn start_sub_workflow(
        &self,
        mut run: WorkflowRun,
        step_name: &str,
        workflow_name: &str,
        workflow_version: Option<u32>,
        input_mapping: Option<&BTreeMap<String, String>>,
        scope: Option<BranchScope>,
        queue: &mut VecDeque<WorkItem>,
    ) -> WorkflowResult<()> {
        let Some(child_def) = self
            .definitions
            .get_by_name(workflow_name, workflow_version)
            .await?
        else {
            run.fail(match workflow_version {
                Some(v) => format!("sub-workflow '{workflow_name}' version {v} not found"),
                None => format!("no active sub-workflow '{workflow_name}' found"),
            });
            return self.persist_terminal(run, queue).await;
        };

        let input = child_input(&run, input_mapping);
        let mut child = WorkflowRun::new(child_def.id.clone(), input.clone());
        if let Some(user) = &run.initiated_by {
            child = child.with_initiator(user.clone());
        }

        let mut task = Task::new(run.run_id.clone(), step_name, TaskKind::SubWorkflow, input);
        if let Some(s) = &scope {
            task = task.with_scope(s.clone());
        }

        run.record_event(
            "sub_workflow_started",
            format!("step '{step_name}' started child run {}", child.run_id),
        );
        self.runs.update(run).await?;
        self.tasks.create(task.clone()).await?;
        self.runs.create(child.clone()).await?;
        self.tasks.link_sub_run(&task.task_id, &child.run_id).await?;

        tracing::info!(
            parent_run = %task.run_id,
            child_run = %child.run_id,
            workflow = %workflow_name,
            "sub-workflow started; parent paused"
        );

        queue.push_back(WorkItem::Advance {
            run_id: child.run_id.clone(),
            scope: None,
            completed_step: None,
            output: None,
        });
        Ok(())
    }

    /// The terminal-status hook: if a task is waiting on this run, finish
    /// it (mirroring the child's outcome) and resume the parent run with
    /// the child's final context as the task output.
    pub(crate) async fn notify_run_terminal(
        &self,
        run: &WorkflowRun,
        queue: &mut VecDeque<WorkItem>,
    ) -> WorkflowResult<()> {
        let Some(task) = self.tasks.find_by_sub_run(&run.run_id).await? else {
            return Ok(());
        };
        if task.is_terminal() {
            tracing::debug!(
                child_run = %run.run_id,
                task_id = %task.task_id,
                "waiting task already terminal; nothing to resume"
            );
            return Ok(());
        }

        let status = if run.status == RunStatus::Completed {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        let output = Value::Object(run.context.clone());
        let task = self
            .tasks
            .update_status(&task.task_id, status, Some(output.clone()))
            .await?;

        tracing::info!(
            child_run = %run.run_id,
            parent_run = %task.run_id,
            status = ?status,
            "sub-workflow terminal; resuming parent"
        );

        queue.push_back(WorkItem::Advance {
            run_id: task.run_id.clone(),
            scope: task.step_scope.clone(),
            completed_step: Some(task.step_name.clone()),
            output: Some(output),
        });
        Ok(())
    }
}
