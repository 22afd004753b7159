//! Property-based tests for the state machine
//!
//! The transition table is the single source for both "what may I do next"
//! and "may I do this", and completion rules are pure functions of the data.

use super::*;
use crate::workflow::{HubState, SkillsState, Workflow};
use proptest::prelude::*;
use serde_json::json;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_hub_state() -> impl Strategy<Value = HubState> {
    proptest::sample::select(HubState::ALL)
}

fn arb_skills_state() -> impl Strategy<Value = SkillsState> {
    proptest::sample::select(SkillsState::ALL)
}

/// One target list (duplicates allowed) per skills state
fn arb_skills_table() -> impl Strategy<Value = Vec<Vec<SkillsState>>> {
    proptest::collection::vec(
        proptest::collection::vec(arb_skills_state(), 0..6),
        SkillsState::ALL.len(),
    )
}

fn build_skills_graph(table: &[Vec<SkillsState>]) -> StateGraph<SkillsState> {
    let mut builder = StateGraph::builder(SkillsState::SeedDataCreation);
    for (state, targets) in SkillsState::ALL.iter().zip(table) {
        builder = builder.edges(*state, targets.iter().copied());
    }
    builder.build().unwrap()
}

fn arb_data() -> impl Strategy<Value = StateData> {
    (
        proptest::option::of(any::<bool>()),
        proptest::option::of(any::<bool>()),
        proptest::option::of(0u64..6),
        proptest::option::of(prop_oneof![
            Just("accept"),
            Just("changes"),
            Just("menu"),
            Just("later"),
        ]),
    )
        .prop_map(|(completed, approved, count, decision)| {
            let mut data = StateData::new();
            if let Some(v) = completed {
                data.set_flag(AGENT_COMPLETED, v);
            }
            if let Some(v) = approved {
                data.set_flag(USER_APPROVED, v);
            }
            if let Some(v) = count {
                data.set(ITERATION_COUNT, v);
            }
            if let Some(v) = decision {
                data.set(USER_DECISION, v);
            }
            data
        })
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_hub_query_and_check_agree(from in arb_hub_state(), to in arb_hub_state()) {
        let graph = HubState::graph().unwrap();
        prop_assert_eq!(
            graph.can_transition(from, to),
            graph.legal_targets(from).contains(&to)
        );
    }

    #[test]
    fn prop_skills_query_and_check_agree(from in arb_skills_state(), to in arb_skills_state()) {
        let graph = SkillsState::graph().unwrap();
        prop_assert_eq!(
            graph.can_transition(from, to),
            graph.legal_targets(from).contains(&to)
        );
    }

    #[test]
    fn prop_built_table_is_deduplicated_in_order(table in arb_skills_table()) {
        let graph = build_skills_graph(&table);
        for (state, declared) in SkillsState::ALL.iter().zip(&table) {
            let legal = graph.legal_targets(*state);

            let mut expected: Vec<SkillsState> = Vec::new();
            for target in declared {
                if !expected.contains(target) {
                    expected.push(*target);
                }
            }
            prop_assert_eq!(legal, expected.as_slice());

            for target in SkillsState::ALL {
                prop_assert_eq!(graph.can_transition(*state, *target), declared.contains(target));
            }
        }
    }

    #[test]
    fn prop_missing_entry_always_rejected(table in arb_skills_table(), skip in 0usize..4) {
        let mut builder = StateGraph::builder(SkillsState::SeedDataCreation);
        for (i, (state, targets)) in SkillsState::ALL.iter().zip(&table).enumerate() {
            if i != skip {
                builder = builder.edges(*state, targets.iter().copied());
            }
        }
        prop_assert!(builder.build().is_err());
    }

    #[test]
    fn prop_any_rule_is_disjunction(data in arb_data()) {
        let flag = CompletionRule::flag(USER_APPROVED);
        let count = CompletionRule::at_least(ITERATION_COUNT, 3);
        let any = CompletionRule::any([flag.clone(), count.clone()]);
        prop_assert_eq!(
            any.is_satisfied(&data),
            flag.is_satisfied(&data) || count.is_satisfied(&data)
        );
    }

    #[test]
    fn prop_one_of_matches_membership(data in arb_data()) {
        let rule = CompletionRule::one_of(USER_DECISION, ["accept", "changes", "menu"]);
        let expected = matches!(
            data.get(USER_DECISION),
            Some(v) if *v == json!("accept") || *v == json!("changes") || *v == json!("menu")
        );
        prop_assert_eq!(rule.is_satisfied(&data), expected);
    }

    #[test]
    fn prop_cleared_flags_leave_other_data(data in arb_data()) {
        let mut cleared = data.clone();
        cleared.clear_completion_flags();
        prop_assert!(!cleared.flag(AGENT_COMPLETED));
        prop_assert!(!cleared.flag(USER_APPROVED));
        prop_assert_eq!(cleared.get(ITERATION_COUNT), data.get(ITERATION_COUNT));
        prop_assert_eq!(cleared.get(USER_DECISION), data.get(USER_DECISION));
    }

    #[test]
    fn prop_iteration_rule_reached_after_enough_turns(turns in 0u64..8) {
        let graph = SkillsState::graph().unwrap();
        let mut data = StateData::new();
        for _ in 0..turns {
            data.increment(ITERATION_COUNT);
        }
        prop_assert_eq!(data.counter(ITERATION_COUNT), turns);
        prop_assert_eq!(
            graph.is_complete(SkillsState::SeedDataIteration, &data),
            turns >= crate::workflow::MAX_SEED_ITERATIONS
        );
    }

    #[test]
    fn prop_walks_stay_inside_the_table(choices in proptest::collection::vec(any::<prop::sample::Index>(), 0..30)) {
        let graph = HubState::graph().unwrap();
        let mut state = graph.initial();
        for choice in choices {
            let legal = graph.legal_targets(state);
            prop_assert!(!legal.is_empty(), "hub has no dead ends: {:?}", state);
            let next = legal[choice.index(legal.len())];
            prop_assert!(graph.can_transition(state, next));
            state = next;
        }
    }
}
