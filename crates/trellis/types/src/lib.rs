//! Domain types for Trellis workflow orchestration
//!
//! A workflow is a directed graph of typed steps with conditionally-guarded
//! transitions. A [`WorkflowDefinition`] is the immutable blueprint; a
//! [`WorkflowRun`] is one execution of it, accumulating context as steps
//! complete; a [`Task`] is an externally-fulfilled unit of work (human or
//! agent) that pauses run advancement until it finishes.
//!
//! Definitions are plain serde-serializable documents. Step kinds,
//! transition conditions, and operators are closed tagged unions, so a
//! malformed definition fails at load time instead of misbehaving mid-run.

#![deny(unsafe_code)]

pub mod definition;
pub mod error;
pub mod run;
pub mod task;

pub use definition::{
    Assignee, BranchDefinition, Condition, Operator, StepDefinition, StepKind, Transition,
    WorkflowDefinition, WorkflowDefinitionId,
};
pub use error::{WorkflowError, WorkflowResult};
pub use run::{
    BranchScope, BranchState, BranchStatus, RunEvent, RunId, RunStatus, StepPath, WorkflowRun,
};
pub use task::{Task, TaskAssignment, TaskId, TaskKind, TaskStatus};
