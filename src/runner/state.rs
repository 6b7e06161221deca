//! Runner state machine.
//!
//! ```text
//! INIT -> PLANNING -> EXECUTING -> TESTING -> COMMITTING -> (boundary)
//! boundary -> PLANNING | PAUSED | STOPPED | FAILED
//! PAUSED -> PLANNING | STOPPED
//! ```
//! A phase that fails jumps straight to the boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RalphError, Result};
use crate::telemetry::Phase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunnerState {
    Init,
    Planning,
    Executing,
    Testing,
    Committing,
    Paused,
    Stopped,
    Failed,
}

impl RunnerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunnerState::Stopped | RunnerState::Failed)
    }

    /// Inside an iteration, where signals are not observed.
    pub fn is_in_phase(&self) -> bool {
        self.phase().is_some()
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            RunnerState::Planning => Some(Phase::Planning),
            RunnerState::Executing => Some(Phase::Executing),
            RunnerState::Testing => Some(Phase::Testing),
            RunnerState::Committing => Some(Phase::Committing),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: RunnerState) -> bool {
        use RunnerState::{Committing, Executing, Failed, Init, Paused, Planning, Stopped, Testing};

        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Planning, Executing) | (Executing, Testing) | (Testing, Committing) => true,
            // Boundary: after INIT, after any phase, or while paused
            (Init | Planning | Executing | Testing | Committing, Planning | Paused | Stopped | Failed) => true,
            (Paused, Planning | Stopped | Failed) => true,
            _ => false,
        }
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition(&mut self, next: RunnerState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(RalphError::InvalidState(format!("cannot go from {} to {}", self, next)));
        }
        *self = next;
        Ok(())
    }
}

impl From<Phase> for RunnerState {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Planning => RunnerState::Planning,
            Phase::Executing => RunnerState::Executing,
            Phase::Testing => RunnerState::Testing,
            Phase::Committing => RunnerState::Committing,
        }
    }
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunnerState::Init => "INIT",
            RunnerState::Planning => "PLANNING",
            RunnerState::Executing => "EXECUTING",
            RunnerState::Testing => "TESTING",
            RunnerState::Committing => "COMMITTING",
            RunnerState::Paused => "PAUSED",
            RunnerState::Stopped => "STOPPED",
            RunnerState::Failed => "FAILED",
        };
        f.pad(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cycle() {
        let mut state = RunnerState::Init;
        for next in [
            RunnerState::Planning,
            RunnerState::Executing,
            RunnerState::Testing,
            RunnerState::Committing,
            RunnerState::Planning,
        ] {
            state.transition(next).unwrap();
        }
        assert_eq!(state, RunnerState::Planning);
    }

    #[test]
    fn test_phases_cannot_be_skipped() {
        assert!(!RunnerState::Planning.can_transition_to(RunnerState::Testing));
        assert!(!RunnerState::Executing.can_transition_to(RunnerState::Committing));
        assert!(!RunnerState::Init.can_transition_to(RunnerState::Executing));
    }

    #[test]
    fn test_failed_phase_returns_to_boundary() {
        let mut state = RunnerState::Executing;
        state.transition(RunnerState::Planning).unwrap();
        let mut state = RunnerState::Testing;
        state.transition(RunnerState::Failed).unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn test_pause_and_resume() {
        let mut state = RunnerState::Init;
        state.transition(RunnerState::Paused).unwrap();
        assert!(!RunnerState::Paused.can_transition_to(RunnerState::Executing));
        state.transition(RunnerState::Planning).unwrap();
        assert_eq!(state, RunnerState::Planning);
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [RunnerState::Stopped, RunnerState::Failed] {
            let mut state = terminal;
            assert!(state.transition(RunnerState::Planning).is_err());
            assert!(state.transition(RunnerState::Paused).is_err());
        }
    }

    #[test]
    fn test_phase_mapping() {
        assert_eq!(RunnerState::from(Phase::Testing), RunnerState::Testing);
        assert_eq!(RunnerState::Committing.phase(), Some(Phase::Committing));
        assert!(RunnerState::Executing.is_in_phase());
        assert!(!RunnerState::Paused.is_in_phase());
        assert_eq!(RunnerState::Paused.to_string(), "PAUSED");
    }
}
