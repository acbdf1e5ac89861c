//! Execution state machine for applying a plan.
//!
//! The orchestrator owns an [`ExecMachine`] and moves it through every step;
//! [`is_legal`] is the pure transition table it consults.

use std::fmt;

use crate::error::GitError;

/// Where an apply run currently is. Unit states carry the unit index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Idle,
    PreflightVerify,
    Staging(usize),
    VerifyStaged(usize),
    Committing(usize),
    Completed,
    /// Stopped before any unit mutated the repository, or cancelled at a boundary.
    Aborted,
    /// A unit failed after mutation began.
    Failed,
}

impl ExecState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecState::Completed | ExecState::Aborted | ExecState::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecState::Idle => "idle",
            ExecState::PreflightVerify => "preflight_verify",
            ExecState::Staging(_) => "staging",
            ExecState::VerifyStaged(_) => "verify_staged",
            ExecState::Committing(_) => "committing",
            ExecState::Completed => "completed",
            ExecState::Aborted => "aborted",
            ExecState::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecState::Staging(i) | ExecState::VerifyStaged(i) | ExecState::Committing(i) => {
                write!(f, "{}({})", self.as_str(), i)
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

/// Whether `from -> to` is allowed for a plan of `units` units.
///
/// Simulated runs skip `Committing`: they move from `VerifyStaged(i)` straight
/// to the next unit.
pub fn is_legal(from: ExecState, to: ExecState, units: usize, simulate: bool) -> bool {
    use ExecState::*;

    let next_unit = |i: usize| {
        if i + 1 < units {
            to == Staging(i + 1)
        } else {
            to == Completed
        }
    };

    match (from, to) {
        (from, _) if from.is_terminal() => false,
        (_, Aborted) => true,
        (Idle, PreflightVerify) => true,
        (Idle, _) => false,
        (PreflightVerify, Staging(0)) => units > 0,
        (PreflightVerify, Completed) => units == 0,
        (PreflightVerify, _) => false,
        (_, Failed) => true,
        (Staging(i), VerifyStaged(j)) => i == j,
        (VerifyStaged(i), Committing(j)) => !simulate && i == j,
        (VerifyStaged(i), _) => simulate && next_unit(i),
        (Committing(i), _) => !simulate && next_unit(i),
        _ => false,
    }
}

/// Tracks the current state and rejects illegal moves.
#[derive(Debug, Clone)]
pub struct ExecMachine {
    state: ExecState,
    units: usize,
    simulate: bool,
}

impl ExecMachine {
    pub fn new(units: usize, simulate: bool) -> Self {
        Self {
            state: ExecState::Idle,
            units,
            simulate,
        }
    }

    pub fn state(&self) -> ExecState {
        self.state
    }

    pub fn advance(&mut self, to: ExecState) -> Result<(), GitError> {
        if !is_legal(self.state, to, self.units, self.simulate) {
            return Err(GitError::IllegalTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        Ok(())
    }

    /// Move to the state that follows a finished unit `index`.
    pub fn finish_unit(&mut self, index: usize) -> Result<(), GitError> {
        if index + 1 < self.units {
            self.advance(ExecState::Staging(index + 1))
        } else {
            self.advance(ExecState::Completed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ExecState::*;

    fn walk(machine: &mut ExecMachine, states: &[ExecState]) {
        for state in states {
            machine.advance(*state).expect("legal transition");
        }
    }

    #[test]
    fn execute_walks_every_unit() {
        let mut m = ExecMachine::new(2, false);
        walk(
            &mut m,
            &[
                PreflightVerify,
                Staging(0),
                VerifyStaged(0),
                Committing(0),
                Staging(1),
                VerifyStaged(1),
                Committing(1),
                Completed,
            ],
        );
        assert_eq!(m.state(), Completed);
    }

    #[test]
    fn simulate_never_commits() {
        let mut m = ExecMachine::new(2, true);
        walk(&mut m, &[PreflightVerify, Staging(0), VerifyStaged(0)]);
        assert!(m.advance(Committing(0)).is_err());
        m.finish_unit(0).expect("next unit");
        walk(&mut m, &[VerifyStaged(1)]);
        m.finish_unit(1).expect("complete");
        assert_eq!(m.state(), Completed);
    }

    #[test]
    fn units_cannot_be_skipped() {
        let mut m = ExecMachine::new(3, false);
        walk(&mut m, &[PreflightVerify, Staging(0), VerifyStaged(0), Committing(0)]);
        let err = m.advance(Staging(2)).expect_err("skip");
        assert!(matches!(err, GitError::IllegalTransition { .. }));
        assert_eq!(m.state(), Committing(0));
    }

    #[test]
    fn failure_requires_started_unit() {
        let mut m = ExecMachine::new(1, false);
        assert!(m.advance(Failed).is_err());
        walk(&mut m, &[PreflightVerify]);
        assert!(m.advance(Failed).is_err());
        walk(&mut m, &[Staging(0), Failed]);
        assert!(m.state().is_terminal());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut m = ExecMachine::new(1, false);
        walk(&mut m, &[PreflightVerify, Aborted]);
        assert!(m.advance(Staging(0)).is_err());
        assert!(m.advance(Aborted).is_err());
    }

    #[test]
    fn display_includes_unit_index() {
        assert_eq!(VerifyStaged(3).to_string(), "verify_staged(3)");
        assert_eq!(Completed.to_string(), "completed");
    }
}
