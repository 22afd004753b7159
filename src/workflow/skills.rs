//! Skills data pipeline: seed creation, refinement, generation, close

use super::Workflow;
use crate::config::ConfigError;
use crate::handler::{CloseRestartHandler, Handler, LlmHandler};
use crate::llm::LlmService;
use crate::router::{RoutingRule, RoutingRules};
use crate::state_machine::{
    CompletionRule, StateGraph, WorkflowState, AGENT_COMPLETED, ITERATION_COUNT, USER_APPROVED,
};
use std::sync::Arc;

/// Refinement rounds after which seed data counts as final without approval
pub const MAX_SEED_ITERATIONS: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkillsState {
    SeedDataCreation,
    SeedDataIteration,
    DataGeneration,
    CloseRestart,
}

impl WorkflowState for SkillsState {
    const ALL: &'static [Self] = &[
        Self::SeedDataCreation,
        Self::SeedDataIteration,
        Self::DataGeneration,
        Self::CloseRestart,
    ];

    fn name(self) -> &'static str {
        match self {
            Self::SeedDataCreation => "SEED_DATA_CREATION",
            Self::SeedDataIteration => "SEED_DATA_ITERATION",
            Self::DataGeneration => "DATA_GENERATION",
            Self::CloseRestart => "CLOSE_RESTART",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Self::SeedDataCreation => "Create a structured seed data file from user requirements",
            Self::SeedDataIteration => "Refine the seed data based on user feedback",
            Self::DataGeneration => "Generate synthetic training data from the approved seed data",
            Self::CloseRestart => "Session complete; restart or close",
        }
    }

    fn completion_criteria(self) -> &'static str {
        match self {
            Self::SeedDataCreation => "Seed data file created with all required fields",
            Self::SeedDataIteration => "User approval received or 3 refinement rounds done",
            Self::DataGeneration => "Synthetic data generated and saved",
            Self::CloseRestart => "User chooses to restart or close",
        }
    }
}

impl Workflow for SkillsState {
    const TITLE: &'static str = "Skills Data Pipeline";

    fn graph() -> Result<StateGraph<Self>, ConfigError> {
        use SkillsState::{CloseRestart, DataGeneration, SeedDataCreation, SeedDataIteration};

        StateGraph::builder(SeedDataCreation)
            .edges(SeedDataCreation, [SeedDataIteration])
            .edges(SeedDataIteration, [DataGeneration, SeedDataIteration])
            .edges(DataGeneration, [CloseRestart])
            .terminal(CloseRestart)
            .rule(SeedDataCreation, CompletionRule::flag(AGENT_COMPLETED))
            .rule(
                SeedDataIteration,
                CompletionRule::any([
                    CompletionRule::flag(USER_APPROVED),
                    CompletionRule::at_least(ITERATION_COUNT, MAX_SEED_ITERATIONS),
                ]),
            )
            .rule(DataGeneration, CompletionRule::flag(AGENT_COMPLETED))
            .build()
    }

    /// The pipeline advances as soon as a step is complete
    fn default_routing_rules() -> RoutingRules {
        RoutingRules {
            rules: vec![
                RoutingRule::new("SEED_DATA_ITERATION", &[])
                    .from_states(&["SEED_DATA_CREATION"])
                    .when_complete(),
                RoutingRule::new("DATA_GENERATION", &[])
                    .from_states(&["SEED_DATA_ITERATION"])
                    .when_complete(),
                RoutingRule::new("CLOSE_RESTART", &[])
                    .from_states(&["DATA_GENERATION"])
                    .when_complete(),
            ],
        }
    }

    fn handler_for(state: Self, llm: &Arc<dyn LlmService>) -> Arc<dyn Handler> {
        let (name, instruction) = match state {
            Self::SeedDataCreation => (
                "seed_data_creator",
                "You turn the user's description into seed data: a JSON document with a \
                 task_description and several seed_examples, each with a question and an answer. \
                 Show the result and signal completion once the seed data is written.",
            ),
            Self::SeedDataIteration => (
                "seed_data_iterator",
                "You refine existing seed data from user feedback. Apply the requested changes, \
                 show the updated examples, and ask whether the user approves them. When they \
                 approve, signal the approval.",
            ),
            Self::DataGeneration => (
                "data_generator",
                "You generate synthetic training data from the approved seed data. Report how \
                 many examples were produced and where they were saved, then signal completion.",
            ),
            Self::CloseRestart => {
                return Arc::new(CloseRestartHandler::new(
                    "close_restart",
                    Self::SeedDataCreation.name(),
                ));
            }
        };
        Arc::new(LlmHandler::new(name, instruction, llm.clone()))
    }

    fn flow_summary() -> &'static str {
        "SEED_DATA_CREATION -> SEED_DATA_ITERATION -> DATA_GENERATION -> CLOSE_RESTART -> SEED_DATA_CREATION"
    }
}
