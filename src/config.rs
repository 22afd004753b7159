//! Startup configuration
//!
//! Everything here is read once at startup. Errors in this module are the only
//! ones that stop the process; everything at runtime degrades instead.

use crate::controller::DEFAULT_HANDOFF_TURNS;
use crate::history::DEFAULT_HISTORY_LIMIT;
use crate::llm::LlmError;
use crate::workflow::WorkflowKind;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Fatal configuration problems
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("transition table has no entry for state {state}")]
    IncompleteTransitionTable { state: String },

    #[error("no handler registered for state {state}")]
    MissingHandler { state: String },

    #[error("state store starts at {store} but the workflow starts at {graph}")]
    InitialStateMismatch {
        store: &'static str,
        graph: &'static str,
    },

    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to read routing rules from {path}: {source}")]
    RulesFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed routing rules: {0}")]
    RulesFormat(#[from] serde_json::Error),

    #[error("unknown workflow {0:?} (expected \"hub\" or \"skills\")")]
    UnknownWorkflow(String),

    #[error("unknown classifier {0:?} (expected \"llm\" or \"rules\")")]
    UnknownClassifier(String),

    #[error("no LLM provider configured; set ANTHROPIC_API_KEY or LLM_GATEWAY")]
    NoLlmProvider,

    #[error("invalid value {value:?} for {var}")]
    InvalidValue { var: &'static str, value: String },

    #[error("LLM provider setup failed: {0}")]
    Llm(#[from] LlmError),
}

/// Which classifier backs the router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierKind {
    /// LLM oracle
    Llm,
    /// Regex routing rules, no network
    Rules,
}

impl FromStr for ClassifierKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "llm" => Ok(Self::Llm),
            "rules" => Ok(Self::Rules),
            other => Err(ConfigError::UnknownClassifier(other.to_string())),
        }
    }
}

/// Process configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub workflow: WorkflowKind,
    pub classifier: ClassifierKind,
    /// Snapshot file for the single-user CLI
    pub state_path: PathBuf,
    /// Optional JSON file overriding the workflow's default routing rules
    pub rules_path: Option<PathBuf>,
    pub history_limit: usize,
    pub handoff_turns: usize,
    pub turn_timeout: Option<Duration>,
    /// Discard any prior snapshot at startup
    pub fresh_start: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workflow: WorkflowKind::Hub,
            classifier: ClassifierKind::Llm,
            state_path: default_state_path(),
            rules_path: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
            handoff_turns: DEFAULT_HANDOFF_TURNS,
            turn_timeout: None,
            fresh_start: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup("AGENT_RELAY_WORKFLOW") {
            config.workflow = value.parse()?;
        }
        if let Some(value) = lookup("AGENT_RELAY_CLASSIFIER") {
            config.classifier = value.parse()?;
        }
        if let Some(value) = lookup("AGENT_RELAY_STATE_PATH") {
            config.state_path = PathBuf::from(value);
        }
        config.rules_path = lookup("AGENT_RELAY_RULES_PATH").map(PathBuf::from);

        if let Some(value) = lookup("AGENT_RELAY_HISTORY_LIMIT") {
            let limit: usize = parse_var("AGENT_RELAY_HISTORY_LIMIT", &value)?;
            if limit == 0 {
                return Err(ConfigError::InvalidValue {
                    var: "AGENT_RELAY_HISTORY_LIMIT",
                    value,
                });
            }
            config.history_limit = limit;
        }
        if let Some(value) = lookup("AGENT_RELAY_TURN_TIMEOUT_SECS") {
            let secs: u64 = parse_var("AGENT_RELAY_TURN_TIMEOUT_SECS", &value)?;
            config.turn_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(value) = lookup("AGENT_RELAY_FRESH_START") {
            config.fresh_start = parse_bool("AGENT_RELAY_FRESH_START", &value)?;
        }

        Ok(config)
    }
}

fn parse_var<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        var,
        value: value.to_string(),
    })
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: value.to_string(),
        }),
    }
}

/// `$HOME/.agent-relay/system_state.json`, or the working directory without a home
fn default_state_path() -> PathBuf {
    std::env::var_os("HOME").map_or_else(
        || PathBuf::from("system_state.json"),
        |home| {
            PathBuf::from(home)
                .join(".agent-relay")
                .join("system_state.json")
        },
    )
}
