use crate::error::NetHealError;
use crate::types::AlarmState;

/// Validates a state transition.
///
/// Every move the orchestrator makes goes through here; an illegal move is
/// a bug in the loop, reported as an error instead of a panic so one bad
/// alarm cannot take down its siblings.
pub fn validate_transition(from: AlarmState, to: AlarmState) -> Result<(), NetHealError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(NetHealError::IllegalTransition { from, to })
    }
}

pub fn allowed_transitions(from: AlarmState) -> Vec<AlarmState> {
    use AlarmState::*;
    match from {
        Intake => vec![Recon, Resolved, Escalated],
        Recon => vec![Hypothesize, Escalated],
        Hypothesize => vec![AwaitingConfirmation, Remediate, Retry, Resolved, Escalated],
        AwaitingConfirmation => vec![Remediate, Escalated],
        Remediate => vec![Verify],
        Verify => vec![Resolved, Retry, Escalated],
        Retry => vec![Recon, Hypothesize],
        Resolved => vec![],
        Escalated => vec![],
    }
}

fn allowed(from: AlarmState, to: AlarmState) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}

/// Current state of one alarm plus the path it took
#[derive(Debug, Clone)]
pub struct AlarmMachine {
    state: AlarmState,
    trail: Vec<AlarmState>,
}

impl Default for AlarmMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmMachine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AlarmState::Intake,
            trail: vec![AlarmState::Intake],
        }
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> AlarmState {
        self.state
    }

    /// Every state visited, starting with `Intake`
    #[must_use]
    pub fn trail(&self) -> &[AlarmState] {
        &self.trail
    }

    /// # Errors
    /// `NetHealError::IllegalTransition` if the table forbids the move; the
    /// state is left unchanged.
    pub fn advance(&mut self, to: AlarmState) -> Result<(), NetHealError> {
        validate_transition(self.state, to)?;
        tracing::debug!(from = %self.state, to = %to, "state transition");
        self.state = to;
        self.trail.push(to);
        Ok(())
    }

    /// Times `state` was entered
    #[must_use]
    pub fn visits(&self, state: AlarmState) -> usize {
        self.trail.iter().filter(|s| **s == state).count()
    }
}
