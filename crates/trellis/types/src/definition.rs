//! Workflow definitions: the blueprint a run executes
//!
//! A WorkflowDefinition is a directed graph where:
//! - Steps are typed units of work (human task, agent task, control flow)
//! - Transitions are conditionally-guarded edges between steps
//!
//! Definitions are immutable once referenced by a run. To modify, register
//! a new version; the store keeps one active version per name.

use crate::run::RunStatus;
use crate::{WorkflowError, WorkflowResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

// ── Identifier ───────────────────────────────────────────────────────

/// Unique identifier for a workflow definition
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowDefinitionId(pub String);

impl WorkflowDefinitionId {
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

impl std::fmt::Display for WorkflowDefinitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Workflow Definition ──────────────────────────────────────────────

/// A workflow definition: a named, versioned graph of steps
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique identifier
    pub id: WorkflowDefinitionId,
    /// Human-readable name; runs may be started by (name, version)
    pub name: String,
    /// Version for tracking definition evolution
    pub version: u32,
    /// Whether this is the active version for its name
    pub is_active: bool,
    /// Name of the entry step
    pub start_step: String,
    /// The steps in the graph, in declaration order
    pub steps: Vec<StepDefinition>,
    /// When this definition was created
    pub created_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    /// Create a new active version-1 definition
    pub fn new(name: impl Into<String>, start_step: impl Into<String>) -> Self {
        Self {
            id: WorkflowDefinitionId::generate(),
            name: name.into(),
            version: 1,
            is_active: true,
            start_step: start_step.into(),
            steps: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Add a step to the graph
    pub fn add_step(&mut self, step: StepDefinition) -> WorkflowResult<()> {
        if self.steps.iter().any(|s| s.name == step.name) {
            return Err(WorkflowError::InvalidDefinition(format!(
                "duplicate step name '{}'",
                step.name
            )));
        }
        self.steps.push(step);
        Ok(())
    }

    /// Get a top-level step by name
    pub fn find_step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Get a branch declared under a parallel step
    pub fn find_branch(&self, parallel_step: &str, branch: &str) -> Option<&BranchDefinition> {
        match self.find_step(parallel_step).map(|s| &s.kind) {
            Some(StepKind::Parallel { branches, .. }) => {
                branches.iter().find(|b| b.name == branch)
            }
            _ => None,
        }
    }

    /// Validate the definition for structural correctness.
    ///
    /// Called by the definition store at registration time; a run never
    /// executes against a definition that fails these checks.
    pub fn validate(&self) -> WorkflowResult<()> {
        if self.steps.is_empty() {
            return Err(WorkflowError::InvalidDefinition(
                "workflow must declare at least one step".into(),
            ));
        }
        if self.find_step(&self.start_step).is_none() {
            return Err(WorkflowError::InvalidDefinition(format!(
                "start step '{}' is not declared",
                self.start_step
            )));
        }

        validate_step_list(&self.steps, None)?;

        // Parallel wiring is checked against the top-level list: branches
        // are themselves step lists, and join_on must land on a join step.
        for step in &self.steps {
            if let StepKind::Parallel { branches, join_on } = &step.kind {
                if branches.is_empty() {
                    return Err(WorkflowError::InvalidDefinition(format!(
                        "parallel step '{}' declares no branches",
                        step.name
                    )));
                }
                let mut seen = HashSet::new();
                for branch in branches {
                    if !seen.insert(branch.name.as_str()) {
                        return Err(WorkflowError::InvalidDefinition(format!(
                            "duplicate branch name '{}' under parallel step '{}'",
                            branch.name, step.name
                        )));
                    }
                    if branch.steps.is_empty() {
                        return Err(WorkflowError::InvalidDefinition(format!(
                            "branch '{}' of parallel step '{}' has no steps",
                            branch.name, step.name
                        )));
                    }
                    if let Some(entry) = &branch.start_step {
                        if branch.find_step(entry).is_none() {
                            return Err(WorkflowError::InvalidDefinition(format!(
                                "branch '{}' start step '{}' is not declared in the branch",
                                branch.name, entry
                            )));
                        }
                    }
                    validate_step_list(&branch.steps, Some(&branch.name))?;
                }
                match self.find_step(join_on).map(|s| &s.kind) {
                    Some(StepKind::Join) => {}
                    Some(_) => {
                        return Err(WorkflowError::InvalidDefinition(format!(
                            "parallel step '{}' joins on '{}', which is not a join step",
                            step.name, join_on
                        )));
                    }
                    None => {
                        return Err(WorkflowError::InvalidDefinition(format!(
                            "parallel step '{}' joins on undeclared step '{}'",
                            step.name, join_on
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Total number of top-level steps
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

/// Checks shared by the top-level step list and every branch list:
/// unique names, transition targets resolving within the same list, and
/// (inside a branch) no nested control-flow steps.
fn validate_step_list(steps: &[StepDefinition], branch: Option<&str>) -> WorkflowResult<()> {
    let mut seen = HashSet::new();
    for step in steps {
        if !seen.insert(step.name.as_str()) {
            return Err(WorkflowError::InvalidDefinition(format!(
                "duplicate step name '{}'",
                step.name
            )));
        }
        if branch.is_some() {
            if matches!(step.kind, StepKind::Parallel { .. } | StepKind::Join) {
                return Err(WorkflowError::InvalidDefinition(format!(
                    "step '{}' in branch '{}': parallel and join steps cannot be nested in a branch",
                    step.name,
                    branch.unwrap_or_default()
                )));
            }
        }
        if let StepKind::End {
            final_status: Some(status),
        } = &step.kind
        {
            if !status.is_terminal() {
                return Err(WorkflowError::InvalidDefinition(format!(
                    "end step '{}' declares non-terminal status {:?}",
                    step.name, status
                )));
            }
        }
    }
    for step in steps {
        for transition in &step.transitions {
            if !steps.iter().any(|s| s.name == transition.to) {
                return Err(WorkflowError::InvalidDefinition(format!(
                    "step '{}' transitions to undeclared step '{}'",
                    step.name, transition.to
                )));
            }
        }
    }
    Ok(())
}

// ── Step Definition ──────────────────────────────────────────────────

/// A step in the workflow graph
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Unique name within its containing step list
    pub name: String,
    /// Type-specific behavior and fields
    #[serde(flatten)]
    pub kind: StepKind,
    /// Outgoing transitions, evaluated in declaration order
    #[serde(default)]
    pub transitions: Vec<Transition>,
    /// Key under which this step's output merges into the run context;
    /// without it, object outputs merge at the top level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_namespace: Option<String>,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            kind,
            transitions: Vec::new(),
            output_namespace: None,
        }
    }

    /// Create an agent-execution step
    pub fn agent(name: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self::new(
            name,
            StepKind::AgentExecution {
                agent_id: agent_id.into(),
            },
        )
    }

    /// Create a human-review step
    pub fn human_review(name: impl Into<String>, assignee: Assignee) -> Self {
        Self::new(
            name,
            StepKind::HumanReview {
                assignee,
                due_in_secs: None,
            },
        )
    }

    /// Create a data-input step
    pub fn data_input(name: impl Into<String>, assignee: Assignee) -> Self {
        Self::new(
            name,
            StepKind::DataInput {
                assignee,
                due_in_secs: None,
            },
        )
    }

    /// Create a decision step
    pub fn decision(name: impl Into<String>, assignee: Assignee) -> Self {
        Self::new(
            name,
            StepKind::Decision {
                assignee,
                due_in_secs: None,
            },
        )
    }

    /// Create a parallel step fanning out to `branches`, joining on `join_on`
    pub fn parallel(
        name: impl Into<String>,
        branches: Vec<BranchDefinition>,
        join_on: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            StepKind::Parallel {
                branches,
                join_on: join_on.into(),
            },
        )
    }

    /// Create a join step
    pub fn join(name: impl Into<String>) -> Self {
        Self::new(name, StepKind::Join)
    }

    /// Create a sub-workflow step invoking the active version of `workflow_name`
    pub fn sub_workflow(name: impl Into<String>, workflow_name: impl Into<String>) -> Self {
        Self::new(
            name,
            StepKind::SubWorkflow {
                workflow_name: workflow_name.into(),
                workflow_version: None,
                input_mapping: None,
            },
        )
    }

    /// Create an end step completing the run
    pub fn end(name: impl Into<String>) -> Self {
        Self::new(name, StepKind::End { final_status: None })
    }

    /// Create an end step with an explicit terminal status
    pub fn end_with(name: impl Into<String>, final_status: RunStatus) -> Self {
        Self::new(
            name,
            StepKind::End {
                final_status: Some(final_status),
            },
        )
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn with_output_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.output_namespace = Some(namespace.into());
        self
    }
}

// ── Step Kind ────────────────────────────────────────────────────────

/// The type of a workflow step, with its type-specific fields
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Delegates to an automated agent; the run pauses until the agent
    /// produces an output or fails
    AgentExecution {
        /// Identifier passed to the agent executor
        agent_id: String,
    },
    /// A human approval/review task; pauses the run
    HumanReview {
        assignee: Assignee,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        due_in_secs: Option<u64>,
    },
    /// A human data-entry task; pauses the run
    DataInput {
        assignee: Assignee,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        due_in_secs: Option<u64>,
    },
    /// A human routing decision; pauses the run, transitions route on the
    /// recorded outcome
    Decision {
        assignee: Assignee,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        due_in_secs: Option<u64>,
    },
    /// Fans out to independent branches; the run proceeds past the matching
    /// join step once every branch reaches a terminal state
    Parallel {
        branches: Vec<BranchDefinition>,
        /// Name of the top-level join step that resolves this fan-out
        join_on: String,
    },
    /// Synchronization point for a parallel step; traversal stops here
    /// until branch completion resolves it
    Join,
    /// Starts a child run and pauses until it reaches a terminal state
    SubWorkflow {
        workflow_name: String,
        /// Pin a specific version; the active version is used when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workflow_version: Option<u32>,
        /// Child input as dot-path extractions from the parent context;
        /// the full context is passed when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input_mapping: Option<BTreeMap<String, String>>,
    },
    /// Terminal step; the run takes `final_status` (default completed)
    End {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        final_status: Option<RunStatus>,
    },
}

/// Who a human task is assigned to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assignee {
    User(String),
    Role(String),
}

// ── Branch Definition ────────────────────────────────────────────────

/// An independent step sequence nested under a parallel step
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BranchDefinition {
    /// Unique name within the parallel step
    pub name: String,
    /// Entry step; the first listed step when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_step: Option<String>,
    /// The branch's steps, in declaration order
    pub steps: Vec<StepDefinition>,
}

impl BranchDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_step: None,
            steps: Vec::new(),
        }
    }

    pub fn with_start_step(mut self, start_step: impl Into<String>) -> Self {
        self.start_step = Some(start_step.into());
        self
    }

    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    /// Get a branch step by name
    pub fn find_step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// The name of the branch's entry step
    pub fn entry_step(&self) -> Option<&str> {
        self.start_step
            .as_deref()
            .or_else(|| self.steps.first().map(|s| s.name.as_str()))
    }
}

// ── Transition ───────────────────────────────────────────────────────

/// A conditionally-guarded edge to another step in the same step list
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transition {
    /// Target step name
    pub to: String,
    /// Guard evaluated against the finished step's output
    #[serde(flatten)]
    pub condition: Condition,
}

impl Transition {
    /// An unconditional transition
    pub fn always(to: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            condition: Condition::Always,
        }
    }

    /// A transition guarded by a predicate over the triggering output
    pub fn on_output(
        to: impl Into<String>,
        field: impl Into<String>,
        operator: Operator,
        value: Value,
    ) -> Self {
        Self {
            to: to.into(),
            condition: Condition::OnOutputValue {
                field: field.into(),
                operator,
                value,
            },
        }
    }
}

/// The guard on a transition
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "condition_type", rename_all = "snake_case")]
pub enum Condition {
    /// Always satisfied
    Always,
    /// Satisfied when `field` (a dot-path into the triggering output)
    /// compares against `value` under `operator`
    OnOutputValue {
        field: String,
        operator: Operator,
        #[serde(default)]
        value: Value,
    },
}

/// Comparison operator for output-value conditions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    Exists,
    NotExists,
    Contains,
    NotContains,
}
