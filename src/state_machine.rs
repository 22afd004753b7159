//! Workflow state machine
//!
//! States are closed enums; the transition table and completion rules are
//! configuration held by [`StateGraph`]. Every decision here is pure.

pub mod graph;
pub mod state;

#[cfg(test)]
mod proptests;

pub use graph::{CompletionRule, StateGraph, StateGraphBuilder};
pub use state::{
    StateData, WorkflowState, AGENT_COMPLETED, HAS_SEED_DATA, ITERATION_COUNT, USER_APPROVED,
    USER_DECISION, USER_SELECTION,
};
