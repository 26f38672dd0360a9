//! The agent-execution capability consumed by the engine
//!
//! An [`AgentExecutor`] turns an agent identifier and an input payload
//! into an output payload, asynchronously. The engine creates the task,
//! invokes the executor, and routes the result (or failure) back through
//! the normal advancement path; the executor itself knows nothing about
//! runs or steps.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors an agent execution can produce.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("agent execution failed: {0}")]
    Failed(String),
}

/// Executes automated agents on behalf of `agent_execution` steps.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Run the agent identified by `agent_id` with `input`, producing its
    /// output payload.
    async fn execute(&self, agent_id: &str, input: Value) -> Result<Value, AgentError>;
}
