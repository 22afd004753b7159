//! Agent Relay - interactive command-line host
//!
//! Runs one conversation against the configured workflow, reading user turns
//! from stdin.

use agent_relay::controller::ControllerOptions;
use agent_relay::llm::{LlmConfig, ModelRegistry};
use agent_relay::router::{Classifier, LlmClassifier, RoutingRules, RuleClassifier, TransitionRouter};
use agent_relay::{
    ClassifierKind, Config, ConfigError, ConversationController, FileBackend, HubState,
    SkillsState, StateStore, Workflow, WorkflowKind,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = Config::from_env()?;
    let llm_config = LlmConfig::from_env();
    let registry = ModelRegistry::new(&llm_config).map_err(ConfigError::from)?;

    if registry.has_models() {
        tracing::info!(
            models = ?registry.available_models(),
            default = %registry.default_model_id(),
            "LLM registry initialized"
        );
    } else {
        tracing::warn!("No LLM API keys configured. Set ANTHROPIC_API_KEY or LLM_GATEWAY.");
    }

    match config.workflow {
        WorkflowKind::Hub => run::<HubState>(&config, &registry).await,
        WorkflowKind::Skills => run::<SkillsState>(&config, &registry).await,
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "agent_relay=info".into());
    let json = std::env::var("AGENT_RELAY_LOG_JSON").is_ok_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn build_classifier<W: Workflow>(
    config: &Config,
    registry: &ModelRegistry,
) -> Result<Arc<dyn Classifier>, ConfigError> {
    match config.classifier {
        ClassifierKind::Rules => {
            let rules = match &config.rules_path {
                Some(path) => RoutingRules::load(path)?,
                None => W::default_routing_rules(),
            };
            tracing::info!(rules = rules.rules.len(), "Using rule-based classifier");
            Ok(Arc::new(RuleClassifier::new(&rules)?))
        }
        ClassifierKind::Llm => {
            let llm = registry.cheap().ok_or(ConfigError::NoLlmProvider)?;
            tracing::info!(model = %llm.model_id(), "Using LLM classifier");
            Ok(Arc::new(LlmClassifier::for_workflow::<W>(llm)))
        }
    }
}

async fn run<W: Workflow>(
    config: &Config,
    registry: &ModelRegistry,
) -> Result<(), Box<dyn std::error::Error>> {
    let llm = registry.default().ok_or(ConfigError::NoLlmProvider)?;
    let graph = W::graph()?;
    let classifier = build_classifier::<W>(config, registry)?;
    let router = TransitionRouter::new(classifier).with_timeout(config.turn_timeout);

    tracing::info!(path = %config.state_path.display(), fresh = config.fresh_start, "Opening state store");
    let store = StateStore::open(
        FileBackend::new(&config.state_path),
        graph.initial(),
        config.fresh_start,
    );

    let options = ControllerOptions {
        history_limit: config.history_limit,
        call_timeout: config.turn_timeout,
        approval_phrases: W::approval_phrases(),
        handoff_turns: config.handoff_turns,
    };
    let mut controller =
        ConversationController::new(store, graph, router, W::handlers(&llm), options)?;

    println!("{}", W::TITLE);
    println!("Workflow: {} | type 'help' for commands\n", config.workflow);
    println!("{}\n", controller.render_status());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("You: ");
        std::io::Write::flush(&mut std::io::stdout())?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();

        match input.to_ascii_lowercase().as_str() {
            "" => {
                println!("Please enter a message (or 'help').\n");
                continue;
            }
            "exit" | "quit" => break,
            "status" => {
                println!("{}\n", controller.render_status());
                continue;
            }
            "help" => {
                print_help::<W>();
                continue;
            }
            _ => {}
        }

        let reply = controller.process_turn(input).await;
        println!("\nAgent [{}]: {reply}\n", controller.current_state().name());
    }

    controller.shutdown().await;
    println!("Goodbye.");
    Ok(())
}

fn print_help<W: Workflow>() {
    println!("Commands:");
    println!("  status                  show the current state and its data");
    println!("  help                    show this message");
    println!("  exit | quit             leave");
    println!("  restart | reset         start the workflow over");
    println!("\nFlow:\n{}\n", W::flow_summary());
}
