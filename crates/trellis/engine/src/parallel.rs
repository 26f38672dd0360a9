//! Parallel branch bookkeeping and join resolution
//!
//! Branches under a parallel step advance independently; each reports a
//! terminal state into the run's branch-state map, and whichever branch
//! finishes last resolves the join. A failed branch never fails the run
//! by itself; its failure is surfaced in the aggregated join payload for
//! the join step's own transitions to act on.

use crate::advancer::WorkItem;
use serde_json::{json, Map, Value};
use trellis_types::{
    BranchState, BranchStatus, StepKind, StepPath, WorkflowDefinition, WorkflowError,
    WorkflowResult, WorkflowRun,
};

/// How a branch ended.
pub(crate) enum BranchOutcome {
    Completed(Option<Value>),
    Failed { error: String },
}

/// Record one branch's terminal state on the run.
pub(crate) fn record_branch_terminal(
    run: &mut WorkflowRun,
    parallel_step: &str,
    branch: &str,
    outcome: BranchOutcome,
) {
    let state = match outcome {
        BranchOutcome::Completed(output) => {
            run.record_event(
                "branch_completed",
                format!("branch '{branch}' of '{parallel_step}' completed"),
            );
            BranchState::completed(output)
        }
        BranchOutcome::Failed { error } => {
            run.record_event(
                "branch_failed",
                format!("branch '{branch}' of '{parallel_step}' failed: {error}"),
            );
            BranchState::failed(error, None)
        }
    };
    run.set_branch_state(parallel_step, branch, state);
}

/// Resolve the join for `parallel_step` if every branch is terminal.
///
/// Aggregates branch outputs into an object keyed by branch name (failed
/// branches contribute `{error, output}`), moves the run onto the join
/// step, and returns the advance item that routes the join's transitions
/// on the aggregate. Returns None while any branch is still pending; the
/// join fires exactly once, on the last branch to finish.
pub(crate) fn try_resolve_join(
    run: &mut WorkflowRun,
    definition: &WorkflowDefinition,
    parallel_step: &str,
) -> WorkflowResult<Option<WorkItem>> {
    let join_on = match definition.find_step(parallel_step).map(|s| &s.kind) {
        Some(StepKind::Parallel { join_on, .. }) => join_on.clone(),
        _ => {
            return Err(WorkflowError::StepNotFound(format!(
                "parallel step '{parallel_step}' not found in workflow '{}'",
                definition.name
            )))
        }
    };
    let Some(states) = run.branch_states(parallel_step) else {
        return Err(WorkflowError::StepNotFound(format!(
            "no branch state recorded for parallel step '{parallel_step}'"
        )));
    };

    let mut aggregate = Map::new();
    for (name, state) in states {
        let value = match state.status {
            BranchStatus::Pending => return Ok(None),
            BranchStatus::Completed => state.output.clone().unwrap_or(Value::Null),
            BranchStatus::Failed => json!({
                "error": state.error.clone().unwrap_or_default(),
                "output": state.output.clone().unwrap_or(Value::Null),
            }),
        };
        aggregate.insert(name.clone(), value);
    }

    run.record_event(
        "join_fired",
        format!("all branches of '{parallel_step}' terminal; resolving join '{join_on}'"),
    );
    run.current_step = Some(StepPath::top_level(&join_on));

    Ok(Some(WorkItem::Advance {
        run_id: run.run_id.clone(),
        scope: None,
        completed_step: Some(join_on),
        output: Some(Value::Object(aggregate)),
    }))
}
