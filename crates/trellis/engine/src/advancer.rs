//! The step-advancement state machine
//!
//! Advancement is expressed as explicit work items instead of recursive
//! calls: an `Advance` is one hop through the graph, an `ExecuteAgent` is
//! one agent invocation, and a `FailPath` records an execution failure
//! against the run or the branch it happened in. The engine drains these
//! to empty, so a run observed between items is always consistent.

use crate::condition;
use crate::engine::WorkflowEngine;
use crate::parallel::{self, BranchOutcome};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::collections::VecDeque;
use trellis_types::{
    Assignee, BranchScope, RunId, RunStatus, StepDefinition, StepKind, StepPath, Task,
    TaskAssignment, TaskId, TaskKind, TaskStatus, WorkflowDefinition, WorkflowResult, WorkflowRun,
};

/// One unit of orchestration work.
#[derive(Debug)]
pub(crate) enum WorkItem {
    /// One advancement hop. `completed_step = None` is the initial advance
    /// of the run (or of a branch, when scoped).
    Advance {
        run_id: RunId,
        scope: Option<BranchScope>,
        completed_step: Option<String>,
        output: Option<Value>,
    },
    /// An agent invocation, processed outside the run lock.
    ExecuteAgent {
        run_id: RunId,
        scope: Option<BranchScope>,
        step: String,
        task_id: TaskId,
        agent_id: String,
        input: Value,
    },
    /// An execution failure on the given path.
    FailPath {
        run_id: RunId,
        scope: Option<BranchScope>,
        step: String,
        error: String,
    },
}

impl WorkItem {
    pub(crate) fn run_id(&self) -> &RunId {
        match self {
            WorkItem::Advance { run_id, .. }
            | WorkItem::ExecuteAgent { run_id, .. }
            | WorkItem::FailPath { run_id, .. } => run_id,
        }
    }
}

impl WorkflowEngine {
    /// Process one `Advance` hop: pick the next step from the completed
    /// step's transitions (or the entry point), merge the triggering
    /// output into the run context, and dispatch the target step.
    pub(crate) async fn process_advance(
        &self,
        run_id: &RunId,
        scope: Option<BranchScope>,
        completed_step: Option<String>,
        output: Option<Value>,
        queue: &mut VecDeque<WorkItem>,
    ) -> WorkflowResult<()> {
        let Some(mut run) = self.runs.get(run_id).await? else {
            tracing::debug!(run_id = %run_id, "advance for unknown run ignored");
            return Ok(());
        };
        if run.is_terminal() {
            tracing::debug!(run_id = %run_id, status = ?run.status, "advance for terminal run ignored");
            return Ok(());
        }

        let Some(definition) = self.definitions.get(&run.workflow_id).await? else {
            run.fail(format!(
                "workflow definition '{}' not found",
                run.workflow_id
            ));
            return self.persist_terminal(run, queue).await;
        };

        // The active step list: top level, or the branch named by the scope.
        let steps: &[StepDefinition] = match &scope {
            None => &definition.steps,
            Some(s) => match definition.find_branch(&s.parallel_step, &s.branch) {
                Some(branch) => &branch.steps,
                None => {
                    run.fail(format!(
                        "branch '{}' not found under parallel step '{}'",
                        s.branch, s.parallel_step
                    ));
                    return self.persist_terminal(run, queue).await;
                }
            },
        };

        // Next step: the list's entry point on the initial advance, else
        // the first transition of the completed step whose guard holds.
        let mut completed_namespace: Option<String> = None;
        let next = match &completed_step {
            None => match &scope {
                None => Some(definition.start_step.clone()),
                Some(s) => definition
                    .find_branch(&s.parallel_step, &s.branch)
                    .and_then(|b| b.entry_step())
                    .map(str::to_string),
            },
            Some(done) => {
                let Some(done_step) = steps.iter().find(|s| s.name == *done) else {
                    run.fail(format!(
                        "step '{done}' not found in workflow '{}'",
                        definition.name
                    ));
                    return self.persist_terminal(run, queue).await;
                };
                completed_namespace = done_step.output_namespace.clone();
                condition::select_transition(&done_step.transitions, output.as_ref())
                    .map(|t| t.to.clone())
            }
        };

        // End of path: a branch reports terminal and tries the join; the
        // top level completes the run with the context as accumulated.
        let Some(next_name) = next else {
            return match scope {
                Some(s) => {
                    self.finish_branch(run, &definition, s, BranchOutcome::Completed(output), queue)
                        .await
                }
                None => {
                    run.finish(RunStatus::Completed);
                    self.persist_terminal(run, queue).await
                }
            };
        };

        if let Some(out) = &output {
            if !run.merge_output(out, completed_namespace.as_deref()) {
                tracing::warn!(
                    run_id = %run.run_id,
                    step = completed_step.as_deref().unwrap_or_default(),
                    "non-object step output without a namespace; not merged"
                );
            }
        }

        let Some(target) = steps.iter().find(|s| s.name == next_name) else {
            run.fail(format!(
                "step '{next_name}' not found in workflow '{}'",
                definition.name
            ));
            return self.persist_terminal(run, queue).await;
        };

        run.enter_step(StepPath {
            scope: scope.clone(),
            step: target.name.clone(),
        });

        self.dispatch_step(run, target, scope, queue).await
    }

    /// Step-kind dispatch: pause on a task, fan out branches, start a
    /// child run, or finish the run.
    async fn dispatch_step(
        &self,
        mut run: WorkflowRun,
        target: &StepDefinition,
        scope: Option<BranchScope>,
        queue: &mut VecDeque<WorkItem>,
    ) -> WorkflowResult<()> {
        match &target.kind {
            StepKind::Parallel { branches, .. } => {
                run.init_parallel_branches(&target.name, branches.iter().map(|b| b.name.as_str()));
                let run = self.runs.update(run).await?;
                for branch in branches {
                    queue.push_back(WorkItem::Advance {
                        run_id: run.run_id.clone(),
                        scope: Some(BranchScope::new(&target.name, &branch.name)),
                        completed_step: None,
                        output: None,
                    });
                }
                Ok(())
            }
            StepKind::Join => {
                // Branches resolve the join; direct traversal stops here.
                self.runs.update(run).await?;
                Ok(())
            }
            StepKind::AgentExecution { agent_id } => {
                let input = run.effective_context();
                let mut task = Task::new(
                    run.run_id.clone(),
                    &target.name,
                    TaskKind::AgentExecution,
                    input.clone(),
                )
                .assigned_to(TaskAssignment::Agent(agent_id.clone()));
                if let Some(s) = &scope {
                    task = task.with_scope(s.clone());
                }
                let run = self.runs.update(run).await?;
                self.tasks.create(task.clone()).await?;
                tracing::info!(
                    run_id = %run.run_id,
                    task_id = %task.task_id,
                    agent_id = %agent_id,
                    "agent task created"
                );
                queue.push_back(WorkItem::ExecuteAgent {
                    run_id: run.run_id.clone(),
                    scope,
                    step: target.name.clone(),
                    task_id: task.task_id,
                    agent_id: agent_id.clone(),
                    input,
                });
                Ok(())
            }
            StepKind::HumanReview {
                assignee,
                due_in_secs,
            }
            | StepKind::DataInput {
                assignee,
                due_in_secs,
            }
            | StepKind::Decision {
                assignee,
                due_in_secs,
            } => {
                let kind = match &target.kind {
                    StepKind::HumanReview { .. } => TaskKind::HumanReview,
                    StepKind::DataInput { .. } => TaskKind::DataInput,
                    _ => TaskKind::Decision,
                };
                let assignment = match assignee {
                    Assignee::User(user) => TaskAssignment::User(user.clone()),
                    Assignee::Role(role) => TaskAssignment::Role(role.clone()),
                };
                let mut task = Task::new(
                    run.run_id.clone(),
                    &target.name,
                    kind,
                    run.effective_context(),
                )
                .assigned_to(assignment);
                if let Some(secs) = due_in_secs {
                    task = task.with_due_date(Utc::now() + Duration::seconds(*secs as i64));
                }
                if let Some(s) = &scope {
                    task = task.with_scope(s.clone());
                }
                let run = self.runs.update(run).await?;
                self.tasks.create(task.clone()).await?;
                tracing::info!(
                    run_id = %run.run_id,
                    task_id = %task.task_id,
                    step = %task.step_name,
                    "task created; run paused awaiting completion"
                );
                Ok(())
            }
            StepKind::SubWorkflow {
                workflow_name,
                workflow_version,
                input_mapping,
            } => {
                self.start_sub_workflow(
                    run,
                    &target.name,
                    workflow_name,
                    *workflow_version,
                    input_mapping.as_ref(),
                    scope,
                    queue,
                )
                .await
            }
            StepKind::End { final_status } => {
                run.finish(final_status.unwrap_or(RunStatus::Completed));
                self.persist_terminal(run, queue).await
            }
        }
    }

    /// Process one `ExecuteAgent` item. Runs outside the run lock so a
    /// slow agent never blocks unrelated completions on the same run.
    pub(crate) async fn process_execute_agent(
        &self,
        run_id: RunId,
        scope: Option<BranchScope>,
        step: String,
        task_id: TaskId,
        agent_id: String,
        input: Value,
        queue: &mut VecDeque<WorkItem>,
    ) -> WorkflowResult<()> {
        tracing::debug!(run_id = %run_id, task_id = %task_id, agent_id = %agent_id, "executing agent");
        match self.executor.execute(&agent_id, input).await {
            Ok(output) => {
                self.tasks
                    .update_status(&task_id, TaskStatus::Completed, Some(output.clone()))
                    .await?;
                queue.push_back(WorkItem::Advance {
                    run_id,
                    scope,
                    completed_step: Some(step),
                    output: Some(output),
                });
            }
            Err(err) => {
                let error = err.to_string();
                tracing::warn!(
                    run_id = %run_id,
                    task_id = %task_id,
                    agent_id = %agent_id,
                    error = %error,
                    "agent execution failed"
                );
                self.tasks
                    .update_status(
                        &task_id,
                        TaskStatus::Failed,
                        Some(json!({ "error": error.clone() })),
                    )
                    .await?;
                queue.push_back(WorkItem::FailPath {
                    run_id,
                    scope,
                    step,
                    error,
                });
            }
        }
        Ok(())
    }

    /// Process one `FailPath` item: fail the run, or, inside a branch,
    /// fail only that branch and attempt the join.
    pub(crate) async fn process_fail_path(
        &self,
        run_id: &RunId,
        scope: Option<BranchScope>,
        step: String,
        error: String,
        queue: &mut VecDeque<WorkItem>,
    ) -> WorkflowResult<()> {
        let Some(mut run) = self.runs.get(run_id).await? else {
            tracing::debug!(run_id = %run_id, "failure report for unknown run ignored");
            return Ok(());
        };
        if run.is_terminal() {
            tracing::debug!(run_id = %run_id, "failure report for terminal run ignored");
            return Ok(());
        }
        match scope {
            None => {
                run.fail(format!("step '{step}' failed: {error}"));
                self.persist_terminal(run, queue).await
            }
            Some(s) => {
                let Some(definition) = self.definitions.get(&run.workflow_id).await? else {
                    run.fail(format!(
                        "workflow definition '{}' not found",
                        run.workflow_id
                    ));
                    return self.persist_terminal(run, queue).await;
                };
                self.finish_branch(run, &definition, s, BranchOutcome::Failed { error }, queue)
                    .await
            }
        }
    }

    /// Record a branch's terminal state and resolve the join when it was
    /// the last branch out.
    async fn finish_branch(
        &self,
        mut run: WorkflowRun,
        definition: &WorkflowDefinition,
        scope: BranchScope,
        outcome: BranchOutcome,
        queue: &mut VecDeque<WorkItem>,
    ) -> WorkflowResult<()> {
        parallel::record_branch_terminal(&mut run, &scope.parallel_step, &scope.branch, outcome);
        let join = parallel::try_resolve_join(&mut run, definition, &scope.parallel_step)?;
        self.runs.update(run).await?;
        if let Some(item) = join {
            queue.push_back(item);
        }
        Ok(())
    }

    /// Persist a run that just reached a terminal status and fire the
    /// sub-workflow resumption hook.
    pub(crate) async fn persist_terminal(
        &self,
        run: WorkflowRun,
        queue: &mut VecDeque<WorkItem>,
    ) -> WorkflowResult<()> {
        let run = self.runs.update(run).await?;
        tracing::info!(run_id = %run.run_id, status = ?run.status, "run reached terminal status");
        self.notify_run_terminal(&run, queue).await
    }
}
