//! Storage abstractions for Trellis workflow state
//!
//! The engine consumes three async stores: a [`DefinitionStore`] resolving
//! workflow definitions by id or by (name, version), a [`RunStore`] holding
//! run state behind compare-and-swap updates, and a [`TaskStore`] holding
//! work items with terminal-at-most-once status transitions.
//!
//! The in-memory adapters here are deterministic and test-friendly;
//! production deployments back these traits with a transactional store.

#![deny(unsafe_code)]

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryDefinitionStore, InMemoryRunStore, InMemoryTaskStore};
pub use traits::{DefinitionStore, RunStore, TaskStore};
