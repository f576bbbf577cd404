//! Sequential execution gate.
//!
//! Enforces a strict left-to-right chain over the iterations of one
//! experiment: index `i` is enabled only once `i - 1` has completed or failed.
//! A failure counts as done, so it never blocks the chain.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationState {
    Idle,
    Enabled,
    Fetching,
    Completed,
    Failed,
}

impl IterationState {
    pub fn is_done(self) -> bool {
        matches!(self, IterationState::Completed | IterationState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("iteration {0} does not exist")]
    OutOfBounds(usize),
    #[error("iteration {index} is {state:?}, expected {expected:?}")]
    InvalidTransition {
        index: usize,
        state: IterationState,
        expected: IterationState,
    },
    #[error("iteration {0} is already fetching")]
    AlreadyFetching(usize),
}

#[derive(Debug, Clone)]
pub struct SequentialGate {
    states: Vec<IterationState>,
    cancelled: bool,
    /// Progress value shown after a cancel. Late completions do not move it.
    frozen_completed: Option<usize>,
}

impl SequentialGate {
    pub fn new(len: usize) -> Self {
        let mut states = vec![IterationState::Idle; len];
        if let Some(first) = states.first_mut() {
            *first = IterationState::Enabled;
        }
        Self {
            states,
            cancelled: false,
            frozen_completed: None,
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn state(&self, index: usize) -> Option<IterationState> {
        self.states.get(index).copied()
    }

    pub fn states(&self) -> &[IterationState] {
        &self.states
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Next index the worker may start, if any.
    pub fn next_enabled(&self) -> Option<usize> {
        if self.cancelled {
            return None;
        }
        self.states.iter().position(|s| *s == IterationState::Enabled)
    }

    /// True once nothing is left for the worker to do.
    pub fn is_finished(&self) -> bool {
        self.cancelled || self.states.iter().all(|s| s.is_done())
    }

    pub fn is_fetching(&self) -> bool {
        self.states.contains(&IterationState::Fetching)
    }

    /// Completed plus failed iterations, frozen at the moment of a cancel.
    pub fn completed_count(&self) -> usize {
        self.frozen_completed
            .unwrap_or_else(|| self.states.iter().filter(|s| s.is_done()).count())
    }

    /// `Enabled -> Fetching`.
    pub fn begin(&mut self, index: usize) -> Result<(), GateError> {
        let state = self.state(index).ok_or(GateError::OutOfBounds(index))?;
        if state != IterationState::Enabled || self.cancelled {
            return Err(GateError::InvalidTransition {
                index,
                state,
                expected: IterationState::Enabled,
            });
        }
        self.states[index] = IterationState::Fetching;
        Ok(())
    }

    /// `Fetching -> Completed | Failed`, then open the next gate in the chain.
    pub fn finish(&mut self, index: usize, success: bool) -> Result<(), GateError> {
        let state = self.state(index).ok_or(GateError::OutOfBounds(index))?;
        if state != IterationState::Fetching {
            return Err(GateError::InvalidTransition {
                index,
                state,
                expected: IterationState::Fetching,
            });
        }
        self.states[index] = if success {
            IterationState::Completed
        } else {
            IterationState::Failed
        };
        self.advance_from(index);
        Ok(())
    }

    /// Re-open a single gate for a manual refetch, regardless of the chain.
    /// Finish it with [`finish`](Self::finish).
    pub fn reopen(&mut self, index: usize) -> Result<IterationState, GateError> {
        let state = self.state(index).ok_or(GateError::OutOfBounds(index))?;
        if state == IterationState::Fetching {
            return Err(GateError::AlreadyFetching(index));
        }
        self.states[index] = IterationState::Fetching;
        Ok(state)
    }

    /// Soft cancel: stop opening gates. A request already fetching is left to
    /// finish but no longer moves the visible progress.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.frozen_completed = Some(self.completed_count());
        self.cancelled = true;
        for state in self.states.iter_mut() {
            if *state == IterationState::Enabled {
                *state = IterationState::Idle;
            }
        }
    }

    // Skips over indices already finished by a manual refetch.
    fn advance_from(&mut self, index: usize) {
        if self.cancelled {
            return;
        }
        let mut next = index + 1;
        while next < self.states.len() && self.states[next].is_done() {
            next += 1;
        }
        if next < self.states.len() && self.states[next] == IterationState::Idle {
            let previous_done = self.states[..next]
                .last()
                .map(|s| s.is_done())
                .unwrap_or(true);
            if previous_done {
                self.states[next] = IterationState::Enabled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use IterationState::*;

    fn run(gate: &mut SequentialGate, index: usize, success: bool) {
        gate.begin(index).unwrap();
        gate.finish(index, success).unwrap();
    }

    #[test]
    fn test_only_first_enabled_initially() {
        let gate = SequentialGate::new(3);
        assert_eq!(gate.states(), &[Enabled, Idle, Idle]);
        assert_eq!(gate.next_enabled(), Some(0));
        assert!(SequentialGate::new(0).is_finished());
    }

    #[test]
    fn test_chain_advances_in_order() {
        let mut gate = SequentialGate::new(3);
        gate.begin(0).unwrap();
        assert_eq!(gate.next_enabled(), None);
        assert!(gate.begin(1).is_err());

        gate.finish(0, true).unwrap();
        assert_eq!(gate.states(), &[Completed, Enabled, Idle]);
        assert_eq!(gate.completed_count(), 1);
    }

    #[test]
    fn test_failure_does_not_block_chain() {
        let mut gate = SequentialGate::new(5);
        run(&mut gate, 0, true);
        run(&mut gate, 1, true);
        gate.begin(2).unwrap();
        assert_eq!(gate.state(3), Some(Idle));
        gate.finish(2, false).unwrap();

        assert_eq!(gate.state(2), Some(Failed));
        assert_eq!(gate.state(3), Some(Enabled));
        assert_eq!(gate.completed_count(), 3);
    }

    #[test]
    fn test_cancel_freezes_progress_and_closes_gate() {
        let mut gate = SequentialGate::new(4);
        run(&mut gate, 0, true);
        gate.begin(1).unwrap();
        gate.cancel();

        assert_eq!(gate.next_enabled(), None);
        assert!(gate.is_finished());
        gate.finish(1, true).unwrap();
        assert_eq!(gate.state(1), Some(Completed));
        assert_eq!(gate.state(2), Some(Idle));
        assert_eq!(gate.completed_count(), 1);
    }

    #[test]
    fn test_cancel_closes_enabled_gate() {
        let mut gate = SequentialGate::new(2);
        gate.cancel();
        assert_eq!(gate.states(), &[Idle, Idle]);
        assert!(gate.begin(0).is_err());
    }

    #[test]
    fn test_reopen_does_not_disturb_others() {
        let mut gate = SequentialGate::new(3);
        run(&mut gate, 0, false);
        gate.begin(1).unwrap();

        assert_eq!(gate.reopen(0).unwrap(), Failed);
        assert_eq!(gate.reopen(0), Err(GateError::AlreadyFetching(0)));
        gate.finish(0, true).unwrap();

        assert_eq!(gate.states(), &[Completed, Fetching, Idle]);
    }

    #[test]
    fn test_chain_skips_iterations_finished_by_refetch() {
        let mut gate = SequentialGate::new(3);
        gate.begin(0).unwrap();
        gate.reopen(1).unwrap();
        gate.finish(1, true).unwrap();
        assert_eq!(gate.states(), &[Fetching, Completed, Idle]);

        gate.finish(0, true).unwrap();
        assert_eq!(gate.states(), &[Completed, Completed, Enabled]);
    }

    #[test]
    fn test_refetch_after_cancel_allowed() {
        let mut gate = SequentialGate::new(2);
        run(&mut gate, 0, false);
        gate.cancel();
        gate.reopen(0).unwrap();
        gate.finish(0, true).unwrap();
        assert_eq!(gate.states(), &[Completed, Idle]);
    }
}
