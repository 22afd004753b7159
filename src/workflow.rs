//! Concrete workflows
//!
//! A workflow is a state enum plus everything needed to run it: its graph,
//! default routing rules, approval phrases and the handler behind each state.

mod hub;
mod skills;

pub use hub::HubState;
pub use skills::{SkillsState, MAX_SEED_ITERATIONS};

use crate::config::ConfigError;
use crate::controller::DEFAULT_APPROVAL_PHRASES;
use crate::handler::{Handler, HandlerRegistry};
use crate::llm::LlmService;
use crate::router::RoutingRules;
use crate::state_machine::{StateGraph, WorkflowState};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowKind {
    /// Seven-state assistant hub
    Hub,
    /// Four-state seed → iterate → generate → close pipeline
    Skills,
}

impl FromStr for WorkflowKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hub" => Ok(Self::Hub),
            "skills" => Ok(Self::Skills),
            other => Err(ConfigError::UnknownWorkflow(other.to_string())),
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hub => "hub",
            Self::Skills => "skills",
        })
    }
}

pub trait Workflow: WorkflowState {
    /// Display title for the CLI banner
    const TITLE: &'static str;

    fn graph() -> Result<StateGraph<Self>, ConfigError>;

    /// Rules for the regex classifier when no rules file is given
    fn default_routing_rules() -> RoutingRules;

    fn approval_phrases() -> Vec<String> {
        DEFAULT_APPROVAL_PHRASES
            .iter()
            .map(|p| (*p).to_string())
            .collect()
    }

    /// The handler serving `state`
    fn handler_for(state: Self, llm: &Arc<dyn LlmService>) -> Arc<dyn Handler>;

    fn handlers(llm: &Arc<dyn LlmService>) -> HandlerRegistry<Self> {
        HandlerRegistry::build(|state| Self::handler_for(state, llm))
    }

    /// One-paragraph description of the flow for `help` output
    fn flow_summary() -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("Hub".parse::<WorkflowKind>().unwrap(), WorkflowKind::Hub);
        assert_eq!(" skills ".parse::<WorkflowKind>().unwrap(), WorkflowKind::Skills);
        assert!("pipeline".parse::<WorkflowKind>().is_err());
        assert_eq!(WorkflowKind::Skills.to_string(), "skills");
    }

    fn check_workflow<W: Workflow>() {
        let graph = W::graph().unwrap();
        for state in W::ALL {
            assert_eq!(W::from_name(state.name()), Some(*state));
            assert!(!state.description().is_empty());
            assert!(!state.completion_criteria().is_empty());
            for target in graph.legal_targets(*state) {
                assert!(W::ALL.contains(target));
            }
        }
        crate::router::RuleClassifier::new(&W::default_routing_rules()).unwrap();
        crate::controller::PhraseMatcher::new(&W::approval_phrases()).unwrap();
        for rule in W::default_routing_rules().rules {
            assert!(W::from_name(&rule.target).is_some(), "{}", rule.target);
            for from in &rule.from {
                assert!(W::from_name(from).is_some(), "{from}");
            }
        }
    }

    #[test]
    fn test_workflows_are_consistent() {
        check_workflow::<HubState>();
        check_workflow::<SkillsState>();
    }
}
