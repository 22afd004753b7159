//! Transition table and completion predicates

use super::state::{StateData, WorkflowState};
use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

static ALWAYS: CompletionRule = CompletionRule::Always;

/// When a state counts as complete.
///
/// Rules are data so that workflows can be described declaratively; evaluation
/// only reads [`StateData`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum CompletionRule {
    /// No gating
    Always,
    /// A boolean flag must be `true`
    Flag { key: String },
    /// A key must hold one of the allowed values
    OneOf { key: String, allowed: Vec<Value> },
    /// A counter must have reached `min`
    AtLeast { key: String, min: u64 },
    /// Any nested rule is satisfied
    Any { rules: Vec<CompletionRule> },
}

impl CompletionRule {
    pub fn flag(key: impl Into<String>) -> Self {
        Self::Flag { key: key.into() }
    }

    pub fn one_of<V: Into<Value>>(key: impl Into<String>, allowed: impl IntoIterator<Item = V>) -> Self {
        Self::OneOf {
            key: key.into(),
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    pub fn at_least(key: impl Into<String>, min: u64) -> Self {
        Self::AtLeast {
            key: key.into(),
            min,
        }
    }

    pub fn any(rules: impl IntoIterator<Item = CompletionRule>) -> Self {
        Self::Any {
            rules: rules.into_iter().collect(),
        }
    }

    pub fn is_satisfied(&self, data: &StateData) -> bool {
        match self {
            Self::Always => true,
            Self::Flag { key } => data.flag(key),
            Self::OneOf { key, allowed } => data.get(key).is_some_and(|v| allowed.contains(v)),
            Self::AtLeast { key, min } => data.counter(key) >= *min,
            Self::Any { rules } => rules.iter().any(|rule| rule.is_satisfied(data)),
        }
    }

    /// Whether evaluating this rule reads `key`
    pub fn depends_on(&self, key: &str) -> bool {
        match self {
            Self::Always => false,
            Self::Flag { key: k } | Self::OneOf { key: k, .. } | Self::AtLeast { key: k, .. } => {
                k == key
            }
            Self::Any { rules } => rules.iter().any(|rule| rule.depends_on(key)),
        }
    }

    /// Every key this rule reads, in rule order without duplicates
    pub fn keys(&self) -> Vec<&str> {
        let mut keys = Vec::new();
        self.collect_keys(&mut keys);
        keys
    }

    fn collect_keys<'a>(&'a self, keys: &mut Vec<&'a str>) {
        match self {
            Self::Always => {}
            Self::Flag { key } | Self::OneOf { key, .. } | Self::AtLeast { key, .. } => {
                if !keys.contains(&key.as_str()) {
                    keys.push(key);
                }
            }
            Self::Any { rules } => {
                for rule in rules {
                    rule.collect_keys(keys);
                }
            }
        }
    }
}

/// Static transition table plus per-state completion rules.
///
/// The table is total: every state in `S::ALL` has an entry, possibly empty.
#[derive(Debug, Clone)]
pub struct StateGraph<S: WorkflowState> {
    initial: S,
    edges: HashMap<S, Vec<S>>,
    rules: HashMap<S, CompletionRule>,
}

impl<S: WorkflowState> StateGraph<S> {
    pub fn builder(initial: S) -> StateGraphBuilder<S> {
        StateGraphBuilder {
            initial,
            edges: HashMap::new(),
            rules: HashMap::new(),
        }
    }

    /// Entry state for a fresh run
    pub fn initial(&self) -> S {
        self.initial
    }

    /// Every state in the workflow
    pub fn states(&self) -> &'static [S] {
        S::ALL
    }

    /// Ordered legal targets (empty for terminal states)
    pub fn legal_targets(&self, current: S) -> &[S] {
        self.edges.get(&current).map_or(&[], Vec::as_slice)
    }

    pub fn can_transition(&self, current: S, target: S) -> bool {
        self.legal_targets(current).contains(&target)
    }

    /// Completion rule for a state (`Always` when none was configured)
    pub fn rule(&self, state: S) -> &CompletionRule {
        self.rules.get(&state).unwrap_or(&ALWAYS)
    }

    pub fn is_complete(&self, current: S, data: &StateData) -> bool {
        self.rule(current).is_satisfied(data)
    }
}

/// Builder that validates totality of the transition table
pub struct StateGraphBuilder<S: WorkflowState> {
    initial: S,
    edges: HashMap<S, Vec<S>>,
    rules: HashMap<S, CompletionRule>,
}

impl<S: WorkflowState> StateGraphBuilder<S> {
    /// Declare the legal targets of `from`. Duplicates are dropped, order kept.
    #[must_use]
    pub fn edges(mut self, from: S, targets: impl IntoIterator<Item = S>) -> Self {
        let mut ordered: Vec<S> = Vec::new();
        for target in targets {
            if !ordered.contains(&target) {
                ordered.push(target);
            }
        }
        self.edges.insert(from, ordered);
        self
    }

    /// Declare a state with no outgoing edges
    #[must_use]
    pub fn terminal(self, state: S) -> Self {
        self.edges(state, [])
    }

    #[must_use]
    pub fn rule(mut self, state: S, rule: CompletionRule) -> Self {
        self.rules.insert(state, rule);
        self
    }

    pub fn build(self) -> Result<StateGraph<S>, ConfigError> {
        if let Some(missing) = S::ALL.iter().find(|s| !self.edges.contains_key(s)) {
            return Err(ConfigError::IncompleteTransitionTable {
                state: missing.name().to_string(),
            });
        }
        Ok(StateGraph {
            initial: self.initial,
            edges: self.edges,
            rules: self.rules,
        })
    }
}
