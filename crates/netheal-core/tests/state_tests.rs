//! Transition table and history invariants

use std::collections::{HashSet, VecDeque};

use chrono::Utc;
use netheal_core::{
    allowed_transitions, validate_transition, AlarmMachine, AlarmState, NetHealError, RcaHistory,
    RcaHypothesis, RcaVerdict, RemediationPlan,
};
use proptest::prelude::*;
use ulid::Ulid;

fn any_state() -> impl Strategy<Value = AlarmState> {
    prop::sample::select(AlarmState::ALL.to_vec())
}

fn hypothesis(root_cause: &str) -> RcaHypothesis {
    RcaHypothesis {
        id: Ulid::new(),
        round: 1,
        root_cause: root_cause.to_string(),
        plan: RemediationPlan::new(),
        verdict: RcaVerdict::Actionable,
        generated_at: Utc::now(),
    }
}

proptest! {
    #[test]
    fn prop_validation_matches_table(from in any_state(), to in any_state()) {
        let listed = allowed_transitions(from).contains(&to);
        prop_assert_eq!(validate_transition(from, to).is_ok(), listed);
    }

    #[test]
    fn prop_terminal_states_never_move(from in any_state(), to in any_state()) {
        prop_assume!(from.is_terminal());
        let rejected = matches!(
            validate_transition(from, to),
            Err(NetHealError::IllegalTransition { .. })
        );
        prop_assert!(rejected);
    }

    #[test]
    fn prop_machine_trail_is_always_legal(steps in prop::collection::vec(any_state(), 0..48)) {
        let mut machine = AlarmMachine::new();
        for to in steps {
            let before = machine.state();
            let visited = machine.trail().len();
            if machine.advance(to).is_ok() {
                prop_assert_eq!(machine.state(), to);
                prop_assert_eq!(machine.trail().len(), visited + 1);
            } else {
                prop_assert_eq!(machine.state(), before);
                prop_assert_eq!(machine.trail().len(), visited);
            }
        }
        for pair in machine.trail().windows(2) {
            prop_assert!(validate_transition(pair[0], pair[1]).is_ok());
        }
    }

    #[test]
    fn prop_history_never_holds_duplicates(causes in prop::collection::vec("[a-c]{1,2}", 0..32)) {
        let mut history = RcaHistory::new();
        for cause in &causes {
            let fresh = !history.contains(cause);
            prop_assert_eq!(history.record(hypothesis(cause)).is_ok(), fresh);
        }
        let unique: HashSet<&str> = history.root_causes().into_iter().collect();
        prop_assert_eq!(unique.len(), history.len());
    }
}

#[test]
fn test_every_state_reaches_a_terminal() {
    for start in AlarmState::ALL {
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        let mut terminal = start.is_terminal();
        while let Some(state) = queue.pop_front() {
            for next in allowed_transitions(state) {
                terminal |= next.is_terminal();
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        assert!(terminal, "{start} cannot reach a terminal state");
    }
}

#[test]
fn test_remediation_is_always_verified_before_deciding() {
    assert_eq!(allowed_transitions(AlarmState::Remediate), vec![AlarmState::Verify]);
    for state in AlarmState::ALL {
        if state != AlarmState::AwaitingConfirmation && state != AlarmState::Hypothesize {
            assert!(
                !allowed_transitions(state).contains(&AlarmState::Remediate),
                "{state} may not jump to remediation"
            );
        }
    }
}
