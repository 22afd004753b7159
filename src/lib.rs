//! Agent Relay - multi-agent conversation routing
//!
//! A conversation moves through a fixed graph of workflow states. Each state is
//! served by one handler; after every turn a classifier decides whether to stay
//! or move along a legal edge, and recent history follows the conversation into
//! the next handler.

pub mod config;
pub mod controller;
pub mod handler;
pub mod history;
pub mod llm;
pub mod manager;
pub mod router;
pub mod state_machine;
pub mod store;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use config::{ClassifierKind, Config, ConfigError};
pub use controller::{ControllerOptions, ConversationController, StatusReport, TransitionError};
pub use manager::SessionManager;
pub use state_machine::{StateData, StateGraph, WorkflowState};
pub use store::{FileBackend, StateStore};
pub use workflow::{HubState, SkillsState, Workflow, WorkflowKind};
