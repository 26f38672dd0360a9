//! Workflow runs: executing instances of workflow definitions
//!
//! A WorkflowRun tracks the runtime state of one execution: where the run
//! currently is in the graph, the context accumulated from completed steps,
//! the state of any parallel branches, and an ordered event log of every
//! state transition.

use crate::WorkflowDefinitionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

// ── Run Identifier ───────────────────────────────────────────────────

/// Unique identifier for a workflow run
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
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

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Run Status ───────────────────────────────────────────────────────

/// The lifecycle status of a workflow run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created but not yet advanced into its first step
    #[default]
    Pending,
    /// Advancing, or paused on an open task
    InProgress,
    /// Reached an end step or ran out of transitions
    Completed,
    /// Failed (definition error, execution error, or a failing end step)
    Failed,
    /// Cancelled by an authorized actor
    Cancelled,
}

impl RunStatus {
    /// Check if this is a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

// ── Step Path ────────────────────────────────────────────────────────

/// The branch a step executes under, when inside a parallel fan-out
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchScope {
    /// Name of the parallel step that owns the branch
    pub parallel_step: String,
    /// Name of the branch within that parallel step
    pub branch: String,
}

impl BranchScope {
    pub fn new(parallel_step: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            parallel_step: parallel_step.into(),
            branch: branch.into(),
        }
    }
}

/// Where a run currently is: a step name, optionally qualified by the
/// branch it executes under. Rendered in dotted
/// `parallelStep.branch.step` form for display only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepPath {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<BranchScope>,
    pub step: String,
}

impl StepPath {
    /// A path to a top-level step
    pub fn top_level(step: impl Into<String>) -> Self {
        Self {
            scope: None,
            step: step.into(),
        }
    }

    /// A path to a step inside a parallel branch
    pub fn in_branch(
        parallel_step: impl Into<String>,
        branch: impl Into<String>,
        step: impl Into<String>,
    ) -> Self {
        Self {
            scope: Some(BranchScope::new(parallel_step, branch)),
            step: step.into(),
        }
    }
}

impl std::fmt::Display for StepPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}.{}.{}", scope.parallel_step, scope.branch, self.step),
            None => write!(f, "{}", self.step),
        }
    }
}

// ── Branch State ─────────────────────────────────────────────────────

/// Terminal or pending status of a parallel branch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

/// Runtime state of one branch under a parallel step
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BranchState {
    pub status: BranchStatus,
    /// Output of the branch's final step, once terminal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Failure message, when the branch failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BranchState {
    pub fn pending() -> Self {
        Self {
            status: BranchStatus::Pending,
            output: None,
            error: None,
        }
    }

    pub fn completed(output: Option<Value>) -> Self {
        Self {
            status: BranchStatus::Completed,
            output,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, output: Option<Value>) -> Self {
        Self {
            status: BranchStatus::Failed,
            output,
            error: Some(error.into()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, BranchStatus::Completed | BranchStatus::Failed)
    }
}

// ── Run Event ────────────────────────────────────────────────────────

/// An entry in the run's ordered event log
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunEvent {
    /// Monotonically increasing sequence number
    pub sequence: u64,
    /// Kind of event (run_started, step_entered, join_fired, ...)
    pub kind: String,
    /// Human-readable detail
    pub detail: String,
    /// When the event occurred
    pub at: DateTime<Utc>,
}

// ── Workflow Run ─────────────────────────────────────────────────────

/// One execution of a workflow definition
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Unique run identifier
    pub run_id: RunId,
    /// The definition this run executes; resolved by id, never re-resolved
    /// by name mid-execution
    pub workflow_id: WorkflowDefinitionId,
    /// Current lifecycle status
    pub status: RunStatus,
    /// The step the run is at, absent before the initial advance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<StepPath>,
    /// Immutable initial context the run was started with
    pub trigger: Value,
    /// Context accumulated from completed step outputs
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Branch state per parallel step, keyed parallel-step → branch
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parallel_branches: BTreeMap<String, BTreeMap<String, BranchState>>,
    /// Who started the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiated_by: Option<String>,
    /// Monotonic counter for compare-and-swap updates in the run store
    pub version: u64,
    /// Ordered record of every state transition
    #[serde(default)]
    pub events: Vec<RunEvent>,
    /// When the run was created
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    /// Create a new pending run of `workflow_id` with `trigger` as its
    /// immutable initial context
    pub fn new(workflow_id: WorkflowDefinitionId, trigger: Value) -> Self {
        let mut run = Self {
            run_id: RunId::generate(),
            workflow_id,
            status: RunStatus::Pending,
            current_step: None,
            trigger,
            context: Map::new(),
            parallel_branches: BTreeMap::new(),
            initiated_by: None,
            version: 1,
            events: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        };
        run.record_event("run_started", "workflow run created");
        run
    }

    pub fn with_initiator(mut self, user_id: impl Into<String>) -> Self {
        self.initiated_by = Some(user_id.into());
        self
    }

    /// Check if the run has reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Append an entry to the event log
    pub fn record_event(&mut self, kind: impl Into<String>, detail: impl Into<String>) {
        self.events.push(RunEvent {
            sequence: self.events.len() as u64,
            kind: kind.into(),
            detail: detail.into(),
            at: Utc::now(),
        });
    }

    /// Move the run onto `path` and mark it in progress
    pub fn enter_step(&mut self, path: StepPath) {
        self.status = RunStatus::InProgress;
        self.record_event("step_entered", format!("entered step '{}'", path));
        self.current_step = Some(path);
    }

    /// Take the run to a terminal status. Non-terminal statuses are
    /// coerced to completed so a finished run can never be reopened.
    pub fn finish(&mut self, status: RunStatus) {
        let status = if status.is_terminal() {
            status
        } else {
            RunStatus::Completed
        };
        self.status = status;
        self.ended_at = Some(Utc::now());
        let kind = match status {
            RunStatus::Failed => "run_failed",
            RunStatus::Cancelled => "run_cancelled",
            _ => "run_completed",
        };
        self.record_event(kind, format!("run reached terminal status {:?}", status));
    }

    /// Fail the run, recording `error` in the accumulated context
    pub fn fail(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.context
            .insert("error".to_string(), Value::String(error.clone()));
        self.record_event("run_error", error);
        self.finish(RunStatus::Failed);
    }

    // ── Context ──────────────────────────────────────────────────────

    /// The trigger data overlaid by the accumulated context. This is the
    /// input handed to every created task and the default sub-workflow
    /// input.
    pub fn effective_context(&self) -> Value {
        let mut merged = match &self.trigger {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        for (key, value) in &self.context {
            merged.insert(key.clone(), value.clone());
        }
        Value::Object(merged)
    }

    /// Merge a completed step's output into the accumulated context.
    ///
    /// With a namespace the output lands under that key (key-wise when
    /// both old and new values are objects, replaced otherwise). Without
    /// one, object outputs merge key-wise at the top level (later keys
    /// overwrite earlier ones) and non-object outputs are not merged;
    /// returns false so the caller can log the skip.
    pub fn merge_output(&mut self, output: &Value, namespace: Option<&str>) -> bool {
        match namespace {
            Some(ns) => {
                let merged = match (self.context.get(ns), output) {
                    (Some(Value::Object(existing)), Value::Object(incoming)) => {
                        let mut merged = existing.clone();
                        for (key, value) in incoming {
                            merged.insert(key.clone(), value.clone());
                        }
                        Value::Object(merged)
                    }
                    _ => output.clone(),
                };
                self.context.insert(ns.to_string(), merged);
                true
            }
            None => match output {
                Value::Object(incoming) => {
                    for (key, value) in incoming {
                        self.context.insert(key.clone(), value.clone());
                    }
                    true
                }
                _ => false,
            },
        }
    }

    // ── Parallel branches ────────────────────────────────────────────

    /// Initialize the branch-state map for a parallel step, every branch
    /// pending with no output
    pub fn init_parallel_branches<'a>(
        &mut self,
        parallel_step: &str,
        branches: impl IntoIterator<Item = &'a str>,
    ) {
        let states = branches
            .into_iter()
            .map(|name| (name.to_string(), BranchState::pending()))
            .collect();
        self.parallel_branches
            .insert(parallel_step.to_string(), states);
    }

    /// Record the state of one branch under a parallel step
    pub fn set_branch_state(&mut self, parallel_step: &str, branch: &str, state: BranchState) {
        self.parallel_branches
            .entry(parallel_step.to_string())
            .or_default()
            .insert(branch.to_string(), state);
    }

    /// Branch states recorded under a parallel step
    pub fn branch_states(&self, parallel_step: &str) -> Option<&BTreeMap<String, BranchState>> {
        self.parallel_branches.get(parallel_step)
    }
}
