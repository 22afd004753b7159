//! Assistant hub: a greeting menu that fans out to Q&A, knowledge and the
//! skills data pipeline

use super::Workflow;
use crate::config::ConfigError;
use crate::handler::{Handler, LlmHandler};
use crate::llm::LlmService;
use crate::router::{RoutingRule, RoutingRules};
use crate::state_machine::{
    CompletionRule, StateGraph, WorkflowState, AGENT_COMPLETED, USER_DECISION,
};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HubState {
    GreetingIntent,
    GeneralQa,
    KnowledgeFlow,
    SkillsGreeting,
    SeedDataCreation,
    DataGeneration,
    ReviewExit,
}

impl WorkflowState for HubState {
    const ALL: &'static [Self] = &[
        Self::GreetingIntent,
        Self::GeneralQa,
        Self::KnowledgeFlow,
        Self::SkillsGreeting,
        Self::SeedDataCreation,
        Self::DataGeneration,
        Self::ReviewExit,
    ];

    fn name(self) -> &'static str {
        match self {
            Self::GreetingIntent => "GREETING_INTENT",
            Self::GeneralQa => "GENERAL_QA",
            Self::KnowledgeFlow => "KNOWLEDGE_FLOW",
            Self::SkillsGreeting => "SKILLS_GREETING",
            Self::SeedDataCreation => "SEED_DATA_CREATION",
            Self::DataGeneration => "DATA_GENERATION",
            Self::ReviewExit => "REVIEW_EXIT",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Self::GreetingIntent => "Welcome the user and find out what they want to do",
            Self::GeneralQa => "Answer questions about synthetic data generation",
            Self::KnowledgeFlow => "Handle knowledge data requests (not yet available)",
            Self::SkillsGreeting => "Explain skills data and find the user's starting point",
            Self::SeedDataCreation => "Create a seed data JSONL file from the user's requirements",
            Self::DataGeneration => "Generate synthetic training data from approved seed data",
            Self::ReviewExit => "Review generated data and decide what happens next",
        }
    }

    fn completion_criteria(self) -> &'static str {
        match self {
            Self::GreetingIntent => "User picks an option (Q&A, skills or knowledge)",
            Self::GeneralQa => "User wants to go back to the menu or is done",
            Self::KnowledgeFlow => "User acknowledges that knowledge data is not available",
            Self::SkillsGreeting => "User says whether they already have seed data",
            Self::SeedDataCreation => "Seed data file written and reported complete",
            Self::DataGeneration => "Synthetic data generated and saved",
            Self::ReviewExit => "User accepts, asks for changes, or returns to the menu",
        }
    }
}

impl Workflow for HubState {
    const TITLE: &'static str = "Synthetic Data Assistant";

    fn graph() -> Result<StateGraph<Self>, ConfigError> {
        use HubState::{
            DataGeneration, GeneralQa, GreetingIntent, KnowledgeFlow, ReviewExit, SeedDataCreation,
            SkillsGreeting,
        };

        StateGraph::builder(GreetingIntent)
            .edges(GreetingIntent, [GeneralQa, KnowledgeFlow, SkillsGreeting])
            .edges(GeneralQa, [GreetingIntent])
            .edges(KnowledgeFlow, [GreetingIntent])
            .edges(SkillsGreeting, [SeedDataCreation, DataGeneration, GreetingIntent])
            .edges(SeedDataCreation, [DataGeneration, GreetingIntent])
            .edges(DataGeneration, [ReviewExit, GreetingIntent])
            .edges(ReviewExit, [SeedDataCreation, GreetingIntent])
            .rule(SeedDataCreation, CompletionRule::flag(AGENT_COMPLETED))
            .rule(DataGeneration, CompletionRule::flag(AGENT_COMPLETED))
            .rule(
                ReviewExit,
                CompletionRule::one_of(USER_DECISION, ["accept", "changes", "menu"]),
            )
            .build()
    }

    fn default_routing_rules() -> RoutingRules {
        RoutingRules {
            rules: vec![
                RoutingRule::new(
                    "GREETING_INTENT",
                    &[r"\bmain menu\b", r"\bmenu\b", r"\bgo back\b", r"\bhome\b"],
                ),
                RoutingRule::new(
                    "SEED_DATA_CREATION",
                    &[
                        r"\b(create|make|build|write)\b.*\bseed\b",
                        r"\bneed seed data\b",
                        r"\bmake changes\b",
                        r"\bmodify\b.*\bseed\b",
                    ],
                ),
                RoutingRule::new(
                    "DATA_GENERATION",
                    &[r"\bgenerate\b", r"\bhave seed data\b", r"\balready have\b"],
                )
                .from_states(&["SKILLS_GREETING", "SEED_DATA_CREATION"]),
                RoutingRule::new("REVIEW_EXIT", &[r"\breview\b", r"\bshow (me )?the results\b"]),
                RoutingRule::new(
                    "SKILLS_GREETING",
                    &[r"\bskills?\b", r"\btraining data\b", r"\bsynthetic data\b"],
                ),
                RoutingRule::new("KNOWLEDGE_FLOW", &[r"\bknowledge\b"]),
                RoutingRule::new(
                    "GENERAL_QA",
                    &[r"\bquestions?\b", r"\bwhat is\b", r"\bexplain\b", r"\bhow (do|does|can)\b"],
                ),
            ],
        }
    }

    fn handler_for(state: Self, llm: &Arc<dyn LlmService>) -> Arc<dyn Handler> {
        let (name, instruction) = match state {
            Self::GreetingIntent => (
                "greeting",
                "You greet users of a synthetic data generation assistant. Offer three options: \
                 general questions, skills data generation, and knowledge data generation. Keep it \
                 short and ask which one they want.",
            ),
            Self::GeneralQa => (
                "general_qa",
                "You answer questions about synthetic data generation, seed data, and the \
                 difference between skills and knowledge data. Be accurate and concise. Mention \
                 that the user can say 'menu' to go back.",
            ),
            Self::KnowledgeFlow => (
                "knowledge_flow",
                "Knowledge data generation is not available yet. Explain briefly what knowledge \
                 data is, suggest skills data generation instead, and offer to return to the menu.",
            ),
            Self::SkillsGreeting => (
                "skills_greeting",
                "You introduce skills data generation. Explain what seed data is and ask whether \
                 the user already has seed data (then they can generate right away) or needs to \
                 create it first.",
            ),
            Self::SeedDataCreation => (
                "seed_data_creator",
                "You create seed data in JSONL format from the user's requirements. Each line has \
                 task_description, seed_question and seed_response fields. Show the examples you \
                 wrote. Signal completion once the seed data is finished and record \
                 has_seed_data=true.",
            ),
            Self::DataGeneration => (
                "data_generator",
                "You generate synthetic training data from the approved seed data. Summarize the \
                 generation settings, report the result, and signal completion when the data has \
                 been produced.",
            ),
            Self::ReviewExit => (
                "review_exit",
                "You present the generated data and ask the user to accept it, make changes to \
                 the seed data, or return to the menu. Record their choice as user_decision \
                 (accept, changes or menu).",
            ),
        };
        Arc::new(LlmHandler::new(name, instruction, llm.clone()))
    }

    fn flow_summary() -> &'static str {
        "GREETING_INTENT -> GENERAL_QA | KNOWLEDGE_FLOW | SKILLS_GREETING\n\
         SKILLS_GREETING -> SEED_DATA_CREATION | DATA_GENERATION\n\
         SEED_DATA_CREATION -> DATA_GENERATION -> REVIEW_EXIT\n\
         REVIEW_EXIT -> SEED_DATA_CREATION (changes) | GREETING_INTENT (menu)"
    }
}
