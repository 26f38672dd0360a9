//! The engine facade: entry points for the host service
//!
//! `start_run` and `complete_task` are the external triggers; both
//! enqueue work and drain the queue to empty before returning, so the
//! caller always observes a settled state (run paused on a task, or
//! terminal). Every `Advance`/`FailPath` item runs under a per-run async
//! mutex, and the run store's compare-and-swap versioning backs that up,
//! so branch completions arriving from unrelated triggers cannot lose
//! updates to the shared run record.

use crate::advancer::WorkItem;
use crate::executor::AgentExecutor;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use trellis_store::{DefinitionStore, RunStore, TaskStore};
use trellis_types::{
    RunId, Task, TaskId, TaskStatus, WorkflowDefinitionId, WorkflowError, WorkflowResult,
    WorkflowRun,
};

/// The Trellis orchestration engine.
pub struct WorkflowEngine {
    pub(crate) definitions: Arc<dyn DefinitionStore>,
    pub(crate) runs: Arc<dyn RunStore>,
    pub(crate) tasks: Arc<dyn TaskStore>,
    pub(crate) executor: Arc<dyn AgentExecutor>,
    /// Serialized access path per run; entries live as long as the engine.
    run_locks: Mutex<HashMap<RunId, Arc<Mutex<()>>>>,
}

impl WorkflowEngine {
    pub fn new(
        definitions: Arc<dyn DefinitionStore>,
        runs: Arc<dyn RunStore>,
        tasks: Arc<dyn TaskStore>,
        executor: Arc<dyn AgentExecutor>,
    ) -> Self {
        Self {
            definitions,
            runs,
            tasks,
            executor,
            run_locks: Mutex::new(HashMap::new()),
        }
    }

    // ── Entry points ─────────────────────────────────────────────────

    /// Start a run of the given definition and advance it until it pauses
    /// on a task or reaches a terminal status. A missing definition is an
    /// error to the caller; failures after the run exists fail the run
    /// instead.
    pub async fn start_run(
        &self,
        workflow_id: &WorkflowDefinitionId,
        initiated_by: Option<&str>,
        input: serde_json::Value,
    ) -> WorkflowResult<WorkflowRun> {
        let definition = self
            .definitions
            .get(workflow_id)
            .await?
            .ok_or_else(|| WorkflowError::DefinitionNotFound(workflow_id.to_string()))?;

        let mut run = WorkflowRun::new(definition.id.clone(), input);
        if let Some(user) = initiated_by {
            run = run.with_initiator(user);
        }
        let run_id = run.run_id.clone();
        self.runs.create(run).await?;
        tracing::info!(run_id = %run_id, workflow = %definition.name, "workflow run started");

        let mut queue = VecDeque::new();
        queue.push_back(WorkItem::Advance {
            run_id: run_id.clone(),
            scope: None,
            completed_step: None,
            output: None,
        });
        self.drain(&mut queue).await;

        self.runs
            .get(&run_id)
            .await?
            .ok_or_else(|| WorkflowError::RunNotFound(run_id))
    }

    /// Complete (or explicitly fail) a task and advance its run with the
    /// task output. Idempotent-safe: a task already in a terminal status
    /// is returned unchanged and the run is not advanced again, so
    /// at-least-once delivery of completion callbacks is harmless. An
    /// explicit failed status still advances: transitions route on the
    /// output, mirroring the failed-branch join policy.
    pub async fn complete_task(
        &self,
        task_id: &TaskId,
        output: serde_json::Value,
        completed_by: &str,
        explicit_status: Option<TaskStatus>,
    ) -> WorkflowResult<Task> {
        let task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| WorkflowError::TaskNotFound(task_id.clone()))?;
        if task.is_terminal() {
            tracing::warn!(
                task_id = %task_id,
                status = ?task.status,
                "completion for already-terminal task ignored"
            );
            return Ok(task);
        }

        let status = match explicit_status {
            Some(TaskStatus::Failed) => TaskStatus::Failed,
            _ => TaskStatus::Completed,
        };
        let task = self
            .tasks
            .update_status(task_id, status, Some(output.clone()))
            .await?;
        tracing::info!(
            task_id = %task_id,
            run_id = %task.run_id,
            completed_by = %completed_by,
            status = ?status,
            "task resolved"
        );

        let mut queue = VecDeque::new();
        queue.push_back(WorkItem::Advance {
            run_id: task.run_id.clone(),
            scope: task.step_scope.clone(),
            completed_step: Some(task.step_name.clone()),
            output: Some(output),
        });
        self.drain(&mut queue).await;

        self.tasks
            .get(task_id)
            .await?
            .ok_or_else(|| WorkflowError::TaskNotFound(task_id.clone()))
    }

    /// Read-through run accessor for the host service.
    pub async fn run(&self, run_id: &RunId) -> WorkflowResult<Option<WorkflowRun>> {
        Ok(self.runs.get(run_id).await?)
    }

    /// Read-through task accessor for the host service.
    pub async fn task(&self, task_id: &TaskId) -> WorkflowResult<Option<Task>> {
        Ok(self.tasks.get(task_id).await?)
    }

    // ── Queue loop ───────────────────────────────────────────────────

    /// Drain the work queue to empty. Dispatch errors fail the run they
    /// belong to instead of propagating; the caller observes a failed
    /// run, never an internal error chain.
    async fn drain(&self, queue: &mut VecDeque<WorkItem>) {
        while let Some(item) = queue.pop_front() {
            let run_id = item.run_id().clone();
            let result = match item {
                WorkItem::Advance {
                    run_id,
                    scope,
                    completed_step,
                    output,
                } => {
                    let lock = self.run_lock(&run_id).await;
                    let _guard = lock.lock().await;
                    self.process_advance(&run_id, scope, completed_step, output, queue)
                        .await
                }
                WorkItem::ExecuteAgent {
                    run_id,
                    scope,
                    step,
                    task_id,
                    agent_id,
                    input,
                } => {
                    // No run lock held: a slow agent must not block other
                    // completions on the same run.
                    self.process_execute_agent(run_id, scope, step, task_id, agent_id, input, queue)
                        .await
                }
                WorkItem::FailPath {
                    run_id,
                    scope,
                    step,
                    error,
                } => {
                    let lock = self.run_lock(&run_id).await;
                    let _guard = lock.lock().await;
                    self.process_fail_path(&run_id, scope, step, error, queue)
                        .await
                }
            };

            if let Err(err) = result {
                tracing::error!(run_id = %run_id, error = %err, "step dispatch failed; failing run");
                if let Err(fail_err) = self.fail_run(&run_id, err.to_string(), queue).await {
                    tracing::error!(
                        run_id = %run_id,
                        error = %fail_err,
                        "unable to record run failure"
                    );
                }
            }
        }
    }

    /// Fail a run from the dispatch-error path. No-op when the run is
    /// already gone or terminal.
    async fn fail_run(
        &self,
        run_id: &RunId,
        error: String,
        queue: &mut VecDeque<WorkItem>,
    ) -> WorkflowResult<()> {
        let lock = self.run_lock(run_id).await;
        let _guard = lock.lock().await;
        let Some(mut run) = self.runs.get(run_id).await? else {
            return Ok(());
        };
        if run.is_terminal() {
            return Ok(());
        }
        run.fail(error);
        self.persist_terminal(run, queue).await
    }

    async fn run_lock(&self, run_id: &RunId) -> Arc<Mutex<()>> {
        let mut locks = self.run_locks.lock().await;
        locks
            .entry(run_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::AgentError;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use trellis_store::{InMemoryDefinitionStore, InMemoryRunStore, InMemoryTaskStore};
    use trellis_types::{
        Assignee, BranchDefinition, Operator, RunStatus, StepDefinition, Transition,
        WorkflowDefinition,
    };

    /// Agent executor returning canned responses per agent id.
    #[derive(Default)]
    struct ScriptedExecutor {
        responses: HashMap<String, Result<Value, String>>,
    }

    impl ScriptedExecutor {
        fn with(mut self, agent_id: &str, response: Result<Value, String>) -> Self {
            self.responses.insert(agent_id.to_string(), response);
            self
        }
    }

    #[async_trait]
    impl AgentExecutor for ScriptedExecutor {
        async fn execute(&self, agent_id: &str, _input: Value) -> Result<Value, AgentError> {
            match self.responses.get(agent_id) {
                Some(Ok(output)) => Ok(output.clone()),
                Some(Err(error)) => Err(AgentError::Failed(error.clone())),
                None => Err(AgentError::UnknownAgent(agent_id.to_string())),
            }
        }
    }

    struct Fixture {
        engine: WorkflowEngine,
        definitions: Arc<InMemoryDefinitionStore>,
        tasks: Arc<InMemoryTaskStore>,
    }

    fn make_fixture(executor: ScriptedExecutor) -> Fixture {
        let definitions = Arc::new(InMemoryDefinitionStore::new());
        let runs = Arc::new(InMemoryRunStore::new());
        let tasks = Arc::new(InMemoryTaskStore::new());
        let engine = WorkflowEngine::new(
            definitions.clone(),
            runs.clone(),
            tasks.clone(),
            Arc::new(executor),
        );
        Fixture {
            engine,
            definitions,
            tasks,
        }
    }

    /// The approve/reject review workflow: one human step routing to a
    /// completing or a failing end.
    fn review_definition() -> WorkflowDefinition {
        let mut def = WorkflowDefinition::new("document-review", "review");
        def.add_step(
            StepDefinition::human_review("review", Assignee::Role("reviewer".into()))
                .with_transition(Transition::on_output(
                    "end_ok",
                    "outcome",
                    Operator::Eq,
                    json!("approved"),
                ))
                .with_transition(Transition::always("end_fail")),
        )
        .unwrap();
        def.add_step(StepDefinition::end("end_ok")).unwrap();
        def.add_step(StepDefinition::end_with("end_fail", RunStatus::Failed))
            .unwrap();
        def
    }

    async fn register(fixture: &Fixture, def: &WorkflowDefinition) {
        fixture.definitions.put(def.clone()).await.unwrap();
    }

    fn open_task_for_step(fixture: &Fixture, run_id: &RunId, step: &str) -> Task {
        fixture
            .tasks
            .tasks_for_run(run_id)
            .unwrap()
            .into_iter()
            .find(|t| t.step_name == step && !t.is_terminal())
            .expect("open task for step")
    }

    #[tokio::test]
    async fn test_start_run_enters_start_step_and_pauses() {
        let fixture = make_fixture(ScriptedExecutor::default());
        let def = review_definition();
        register(&fixture, &def).await;

        let run = fixture
            .engine
            .start_run(&def.id, Some("user-1"), json!({"document_id": "doc-42"}))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::InProgress);
        assert_eq!(run.current_step.as_ref().unwrap().step, "review");
        assert_eq!(run.initiated_by.as_deref(), Some("user-1"));

        let task = open_task_for_step(&fixture, &run.run_id, "review");
        assert_eq!(task.status, TaskStatus::Assigned);
        assert_eq!(task.input["document_id"], json!("doc-42"));
    }

    #[tokio::test]
    async fn test_start_run_unknown_definition_is_a_caller_error() {
        let fixture = make_fixture(ScriptedExecutor::default());
        let result = fixture
            .engine
            .start_run(&WorkflowDefinitionId::new("missing"), None, json!({}))
            .await;
        assert!(matches!(result, Err(WorkflowError::DefinitionNotFound(_))));
    }

    #[tokio::test]
    async fn test_approval_routes_to_completion() {
        let fixture = make_fixture(ScriptedExecutor::default());
        let def = review_definition();
        register(&fixture, &def).await;

        let run = fixture.engine.start_run(&def.id, None, json!({})).await.unwrap();
        let task = open_task_for_step(&fixture, &run.run_id, "review");

        fixture
            .engine
            .complete_task(&task.task_id, json!({"outcome": "approved"}), "reviewer-1", None)
            .await
            .unwrap();

        let run = fixture.engine.run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.context.get("outcome"), Some(&json!("approved")));
        assert!(run.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_rejection_routes_to_failing_end() {
        let fixture = make_fixture(ScriptedExecutor::default());
        let def = review_definition();
        register(&fixture, &def).await;

        let run = fixture.engine.start_run(&def.id, None, json!({})).await.unwrap();
        let task = open_task_for_step(&fixture, &run.run_id, "review");

        fixture
            .engine
            .complete_task(&task.task_id, json!({"outcome": "rejected"}), "reviewer-1", None)
            .await
            .unwrap();

        let run = fixture.engine.run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_complete_task_is_idempotent() {
        let fixture = make_fixture(ScriptedExecutor::default());
        let def = review_definition();
        register(&fixture, &def).await;

        let run = fixture.engine.start_run(&def.id, None, json!({})).await.unwrap();
        let task = open_task_for_step(&fixture, &run.run_id, "review");

        fixture
            .engine
            .complete_task(&task.task_id, json!({"outcome": "approved"}), "reviewer-1", None)
            .await
            .unwrap();
        let after_first = fixture.engine.run(&run.run_id).await.unwrap().unwrap();

        // Re-delivered completion: no error, no second advance.
        let again = fixture
            .engine
            .complete_task(&task.task_id, json!({"outcome": "approved"}), "reviewer-1", None)
            .await
            .unwrap();
        assert_eq!(again.status, TaskStatus::Completed);

        let after_second = fixture.engine.run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(after_second.version, after_first.version);
        assert_eq!(after_second.events.len(), after_first.events.len());
    }

    #[tokio::test]
    async fn test_agent_chain_runs_to_completion() {
        let executor = ScriptedExecutor::default()
            .with("triage-agent", Ok(json!({"score": 9, "category": "fraud"})));
        let fixture = make_fixture(executor);

        let mut def = WorkflowDefinition::new("auto-triage", "triage");
        def.add_step(
            StepDefinition::agent("triage", "triage-agent")
                .with_output_namespace("triage")
                .with_transition(Transition::always("done")),
        )
        .unwrap();
        def.add_step(StepDefinition::end("done")).unwrap();
        register(&fixture, &def).await;

        let run = fixture
            .engine
            .start_run(&def.id, None, json!({"claim_id": "c-1"}))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.context.get("triage"), Some(&json!({"score": 9, "category": "fraud"})));

        let task = fixture.tasks.tasks_for_run(&run.run_id).unwrap().remove(0);
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.input["claim_id"], json!("c-1"));
    }

    #[tokio::test]
    async fn test_agent_failure_fails_task_and_run() {
        let executor =
            ScriptedExecutor::default().with("triage-agent", Err("model offline".to_string()));
        let fixture = make_fixture(executor);

        let mut def = WorkflowDefinition::new("auto-triage", "triage");
        def.add_step(
            StepDefinition::agent("triage", "triage-agent")
                .with_transition(Transition::always("done")),
        )
        .unwrap();
        def.add_step(StepDefinition::end("done")).unwrap();
        register(&fixture, &def).await;

        let run = fixture.engine.start_run(&def.id, None, json!({})).await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        let error = run.context.get("error").and_then(Value::as_str).unwrap();
        assert!(error.contains("model offline"));

        let task = fixture.tasks.tasks_for_run(&run.run_id).unwrap().remove(0);
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_unknown_agent_fails_run() {
        let fixture = make_fixture(ScriptedExecutor::default());

        let mut def = WorkflowDefinition::new("auto", "work");
        def.add_step(
            StepDefinition::agent("work", "nobody").with_transition(Transition::always("done")),
        )
        .unwrap();
        def.add_step(StepDefinition::end("done")).unwrap();
        register(&fixture, &def).await;

        let run = fixture.engine.start_run(&def.id, None, json!({})).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_explicit_failed_status_still_advances() {
        let fixture = make_fixture(ScriptedExecutor::default());
        let def = review_definition();
        register(&fixture, &def).await;

        let run = fixture.engine.start_run(&def.id, None, json!({})).await.unwrap();
        let task = open_task_for_step(&fixture, &run.run_id, "review");

        // The reviewer gives up; the task records failed, and the run
        // still routes on the output (here to the always-transition).
        let task = fixture
            .engine
            .complete_task(
                &task.task_id,
                json!({"outcome": "abandoned"}),
                "reviewer-1",
                Some(TaskStatus::Failed),
            )
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Failed);

        let run = fixture.engine.run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.context.get("outcome"), Some(&json!("abandoned")));
    }

    #[tokio::test]
    async fn test_dead_end_completes_run_without_merging() {
        let fixture = make_fixture(ScriptedExecutor::default());

        let mut def = WorkflowDefinition::new("maybe-more", "gate");
        def.add_step(
            StepDefinition::data_input("gate", Assignee::User("u1".into())).with_transition(
                Transition::on_output("extra", "more", Operator::Eq, json!(true)),
            ),
        )
        .unwrap();
        def.add_step(
            StepDefinition::data_input("extra", Assignee::User("u1".into())),
        )
        .unwrap();
        register(&fixture, &def).await;

        let run = fixture.engine.start_run(&def.id, None, json!({})).await.unwrap();
        let task = open_task_for_step(&fixture, &run.run_id, "gate");

        fixture
            .engine
            .complete_task(&task.task_id, json!({"more": false}), "u1", None)
            .await
            .unwrap();

        // No transition matched: normal path termination, not a fault,
        // and the dead-end output is not merged into the context.
        let run = fixture.engine.run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.context.get("more").is_none());
    }

    fn fanout_definition() -> WorkflowDefinition {
        let left = BranchDefinition::new("left").with_step(StepDefinition::data_input(
            "collect",
            Assignee::User("u-left".into()),
        ));
        let right = BranchDefinition::new("right").with_step(StepDefinition::data_input(
            "collect",
            Assignee::User("u-right".into()),
        ));
        let mut def = WorkflowDefinition::new("gather", "fan");
        def.add_step(StepDefinition::parallel("fan", vec![left, right], "merge"))
            .unwrap();
        def.add_step(
            StepDefinition::join("merge")
                .with_output_namespace("gathered")
                .with_transition(Transition::always("done")),
        )
        .unwrap();
        def.add_step(StepDefinition::end("done")).unwrap();
        def
    }

    async fn complete_branch_task(fixture: &Fixture, run_id: &RunId, branch: &str, output: Value) {
        let task = fixture
            .tasks
            .tasks_for_run(run_id)
            .unwrap()
            .into_iter()
            .find(|t| {
                !t.is_terminal()
                    && t.step_scope.as_ref().is_some_and(|s| s.branch == branch)
            })
            .expect("open branch task");
        fixture
            .engine
            .complete_task(&task.task_id, output, "someone", None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_parallel_join_fires_once_after_all_branches() {
        let fixture = make_fixture(ScriptedExecutor::default());
        let def = fanout_definition();
        register(&fixture, &def).await;

        let run = fixture.engine.start_run(&def.id, None, json!({})).await.unwrap();
        assert_eq!(fixture.tasks.tasks_for_run(&run.run_id).unwrap().len(), 2);

        complete_branch_task(&fixture, &run.run_id, "left", json!({"n": 1})).await;
        let mid = fixture.engine.run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(mid.status, RunStatus::InProgress);
        assert!(!mid.events.iter().any(|e| e.kind == "join_fired"));

        complete_branch_task(&fixture, &run.run_id, "right", json!({"n": 2})).await;
        let done = fixture.engine.run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(
            done.events.iter().filter(|e| e.kind == "join_fired").count(),
            1
        );
        assert_eq!(
            done.context.get("gathered"),
            Some(&json!({"left": {"n": 1}, "right": {"n": 2}}))
        );
    }

    #[tokio::test]
    async fn test_join_aggregate_is_order_independent() {
        let fixture = make_fixture(ScriptedExecutor::default());
        let def = fanout_definition();
        register(&fixture, &def).await;

        let run = fixture.engine.start_run(&def.id, None, json!({})).await.unwrap();
        complete_branch_task(&fixture, &run.run_id, "right", json!({"n": 2})).await;
        complete_branch_task(&fixture, &run.run_id, "left", json!({"n": 1})).await;

        let done = fixture.engine.run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(
            done.context.get("gathered"),
            Some(&json!({"left": {"n": 1}, "right": {"n": 2}}))
        );
    }

    #[tokio::test]
    async fn test_failed_branch_does_not_fail_run() {
        let executor = ScriptedExecutor::default()
            .with("ok-agent", Ok(json!({"n": 2})))
            .with("bad-agent", Err("boom".to_string()));
        let fixture = make_fixture(executor);

        let left =
            BranchDefinition::new("left").with_step(StepDefinition::agent("work", "bad-agent"));
        let right =
            BranchDefinition::new("right").with_step(StepDefinition::agent("work", "ok-agent"));
        let mut def = WorkflowDefinition::new("tolerant", "fan");
        def.add_step(StepDefinition::parallel("fan", vec![left, right], "merge"))
            .unwrap();
        def.add_step(
            StepDefinition::join("merge")
                .with_transition(Transition::on_output(
                    "end_degraded",
                    "left.error",
                    Operator::Exists,
                    json!(null),
                ))
                .with_transition(Transition::always("end_ok")),
        )
        .unwrap();
        def.add_step(StepDefinition::end("end_ok")).unwrap();
        def.add_step(StepDefinition::end_with("end_degraded", RunStatus::Failed))
            .unwrap();
        register(&fixture, &def).await;

        // Both branches are agents, so the whole graph settles in one call.
        let run = fixture.engine.start_run(&def.id, None, json!({})).await.unwrap();

        // The branch failure routed the join to the degraded end; the
        // failure itself never failed the run directly.
        assert_eq!(run.status, RunStatus::Failed);
        let states = run.branch_states("fan").unwrap();
        assert_eq!(states["left"].error.as_deref(), Some("agent execution failed: boom"));
        assert_eq!(states["right"].output, Some(json!({"n": 2})));
        assert_eq!(run.context.get("left"), Some(&json!({"error": "agent execution failed: boom", "output": null})));
        assert_eq!(run.context.get("right"), Some(&json!({"n": 2})));
    }

    #[tokio::test]
    async fn test_sub_workflow_links_and_resumes_parent() {
        let fixture = make_fixture(ScriptedExecutor::default());

        let child = review_definition();
        register(&fixture, &child).await;

        let mut parent = WorkflowDefinition::new("intake", "escalate");
        parent.add_step(
            StepDefinition::sub_workflow("escalate", "document-review")
                .with_output_namespace("review")
                .with_transition(Transition::always("done")),
        )
        .unwrap();
        parent.add_step(StepDefinition::end("done")).unwrap();
        register(&fixture, &parent).await;

        let parent_run = fixture
            .engine
            .start_run(&parent.id, Some("user-1"), json!({"document_id": "doc-42"}))
            .await
            .unwrap();
        assert_eq!(parent_run.status, RunStatus::InProgress);

        // Exactly one placeholder task, linked to exactly one child run.
        let tasks = fixture.tasks.tasks_for_run(&parent_run.run_id).unwrap();
        assert_eq!(tasks.len(), 1);
        let placeholder = &tasks[0];
        assert_eq!(placeholder.kind, trellis_types::TaskKind::SubWorkflow);
        assert!(placeholder.assignment.is_none());
        let child_run_id = placeholder.sub_run_id.clone().unwrap();

        let child_run = fixture.engine.run(&child_run_id).await.unwrap().unwrap();
        assert_eq!(child_run.status, RunStatus::InProgress);
        assert_eq!(child_run.trigger["document_id"], json!("doc-42"));

        // Finish the child; the parent resumes and completes.
        let review = open_task_for_step(&fixture, &child_run_id, "review");
        fixture
            .engine
            .complete_task(&review.task_id, json!({"outcome": "approved"}), "reviewer-1", None)
            .await
            .unwrap();

        let parent_run = fixture.engine.run(&parent_run.run_id).await.unwrap().unwrap();
        assert_eq!(parent_run.status, RunStatus::Completed);
        assert_eq!(
            parent_run.context.get("review"),
            Some(&json!({"outcome": "approved"}))
        );

        let placeholder = fixture.engine.task(&placeholder.task_id).await.unwrap().unwrap();
        assert_eq!(placeholder.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_missing_sub_workflow_fails_parent() {
        let fixture = make_fixture(ScriptedExecutor::default());

        let mut parent = WorkflowDefinition::new("intake", "escalate");
        parent.add_step(
            StepDefinition::sub_workflow("escalate", "no-such-workflow")
                .with_transition(Transition::always("done")),
        )
        .unwrap();
        parent.add_step(StepDefinition::end("done")).unwrap();
        register(&fixture, &parent).await;

        let run = fixture.engine.start_run(&parent.id, None, json!({})).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        let error = run.context.get("error").and_then(Value::as_str).unwrap();
        assert!(error.contains("no-such-workflow"));
    }
}
