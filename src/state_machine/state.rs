//! Workflow state identity and session-scoped state data

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Debug;
use std::hash::Hash;

/// Set when a handler signals that its step is done
pub const AGENT_COMPLETED: &str = "agent_completed";
/// Set when the user approves the current step's output
pub const USER_APPROVED: &str = "user_approved";
pub const USER_SELECTION: &str = "user_selection";
pub const HAS_SEED_DATA: &str = "has_seed_data";
pub const USER_DECISION: &str = "user_decision";
/// Number of completed turns in a state whose completion counts iterations
pub const ITERATION_COUNT: &str = "iteration_count";

// ============================================================================
// Workflow State
// ============================================================================

/// A closed set of workflow steps.
///
/// Implementors are plain fieldless enums. `ALL` lists every variant in
/// declaration order; `name` is the stable wire name used in snapshots and in
/// classifier prompts.
pub trait WorkflowState: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    /// Every state, in declaration order
    const ALL: &'static [Self];

    /// Stable SCREAMING_SNAKE identifier
    fn name(self) -> &'static str;

    /// What happens in this step
    fn description(self) -> &'static str;

    /// Human-readable summary of when this step counts as done
    fn completion_criteria(self) -> &'static str;

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|state| state.name() == name)
    }

    /// Position of this state in `ALL`
    fn ordinal(self) -> usize {
        Self::ALL
            .iter()
            .position(|state| *state == self)
            .unwrap_or_default()
    }
}

// ============================================================================
// State Data
// ============================================================================

/// Open-ended key/value bag scoped to the whole session (not to one state).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateData(Map<String, Value>);

impl StateData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Boolean flag; missing or non-boolean values read as `false`
    pub fn flag(&self, key: &str) -> bool {
        self.0.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn set_flag(&mut self, key: &str, value: bool) {
        self.set(key, value);
    }

    /// Numeric counter; missing or non-numeric values read as zero
    pub fn counter(&self, key: &str) -> u64 {
        self.0.get(key).and_then(Value::as_u64).unwrap_or(0)
    }

    /// Increment a counter and return the new value
    pub fn increment(&mut self, key: &str) -> u64 {
        let next = self.counter(key).saturating_add(1);
        self.set(key, next);
        next
    }

    /// Reset the two completion flags after a transition
    pub fn clear_completion_flags(&mut self) {
        self.set_flag(AGENT_COMPLETED, false);
        self.set_flag(USER_APPROVED, false);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for StateData {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flags_default_to_false() {
        let mut data = StateData::new();
        assert!(!data.flag(AGENT_COMPLETED));

        data.set(AGENT_COMPLETED, "yes");
        assert!(!data.flag(AGENT_COMPLETED), "non-boolean values are not flags");

        data.set_flag(AGENT_COMPLETED, true);
        assert!(data.flag(AGENT_COMPLETED));
    }

    #[test]
    fn test_counter_increment() {
        let mut data = StateData::new();
        assert_eq!(data.counter(ITERATION_COUNT), 0);
        assert_eq!(data.increment(ITERATION_COUNT), 1);
        assert_eq!(data.increment(ITERATION_COUNT), 2);
        assert_eq!(data.get(ITERATION_COUNT), Some(&json!(2)));
    }

    #[test]
    fn test_clear_completion_flags_keeps_other_keys() {
        let mut data = StateData::new();
        data.set_flag(AGENT_COMPLETED, true);
        data.set_flag(USER_APPROVED, true);
        data.set(USER_DECISION, "accept");

        data.clear_completion_flags();

        assert!(!data.flag(AGENT_COMPLETED));
        assert!(!data.flag(USER_APPROVED));
        assert_eq!(data.get(USER_DECISION), Some(&json!("accept")));
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let mut data = StateData::new();
        data.set(USER_SELECTION, "skills");
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json, json!({ "user_selection": "skills" }));

        let back: StateData = serde_json::from_value(json).unwrap();
        assert_eq!(back, data);
    }
}
