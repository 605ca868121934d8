// src/runner/state.rs

//! Runner identity and the runner state machine.

use std::fmt;

/// Index of a runner in the plant's [`RunnerArena`](super::RunnerArena).
///
/// Doubles as the owner identity recorded by a resource claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunnerId(usize);

impl RunnerId {
    /// Owner id for code outside any runner that wants to claim or
    /// snapshot a resource (tests, reporting). Never assigned to a runner.
    pub const EXTERNAL: RunnerId = RunnerId(usize::MAX);

    pub const fn new(index: usize) -> Self {
        RunnerId(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for RunnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == RunnerId::EXTERNAL {
            f.write_str("runner#external")
        } else {
            write!(f, "runner#{}", self.0)
        }
    }
}

/// State of a runner, ordered by ascending priority.
///
/// When summarising a set of dependents the highest state wins, so the
/// derived `Ord` is part of the contract: do not reorder the variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RunState {
    /// Work finished successfully. Terminal.
    Done,
    /// Resources claimed; the work closure is running.
    InProgress,
    /// Picked up by a worker; claiming resources.
    Initiated,
    /// Dependents done and resources free.
    Ready,
    /// Dependents done but at least one resource is held elsewhere.
    WaitingResource,
    /// At least one dependent has not finished.
    WaitingDependent,
    /// The runner or one of its dependents failed. Terminal.
    Error,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Error)
    }

    /// The runner is on a worker and owns its own state.
    pub fn is_executing(self) -> bool {
        matches!(self, RunState::Initiated | RunState::InProgress)
    }

    /// Every dependent is done; the runner may be handed to the pool.
    pub fn can_start(self) -> bool {
        matches!(self, RunState::Ready | RunState::WaitingResource)
    }

    /// Highest-priority state among `states`; `Done` for an empty set.
    ///
    /// `Error` short-circuits: the remaining states are not looked at.
    pub fn summarize<I>(states: I) -> RunState
    where
        I: IntoIterator<Item = RunState>,
    {
        let mut result = RunState::Done;
        for state in states {
            if state == RunState::Error {
                return RunState::Error;
            }
            result = result.max(state);
        }
        result
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Done => "DONE",
            RunState::InProgress => "IN_PROGRESS",
            RunState::Initiated => "INITIATED",
            RunState::Ready => "READY",
            RunState::WaitingResource => "WAITING_RESOURCE",
            RunState::WaitingDependent => "WAITING_DEPENDENT",
            RunState::Error => "ERROR",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a runner publishes to its watchers on every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub state: RunState,
    /// Times are recorded and claims released. Set once, after the runner
    /// reached a terminal state.
    pub settled: bool,
}

impl Progress {
    pub fn is_finished(&self) -> bool {
        self.settled && self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_order() {
        use RunState::*;
        let mut states = vec![Error, Ready, Done, WaitingDependent, InProgress, WaitingResource, Initiated];
        states.sort();
        assert_eq!(
            states,
            vec![Done, InProgress, Initiated, Ready, WaitingResource, WaitingDependent, Error]
        );
    }

    #[test]
    fn summarize_picks_highest_and_short_circuits_on_error() {
        use RunState::*;
        assert_eq!(RunState::summarize([]), Done);
        assert_eq!(RunState::summarize([Done, Done]), Done);
        assert_eq!(RunState::summarize([Done, InProgress, Ready]), Ready);
        assert_eq!(RunState::summarize([WaitingDependent, Error, Done]), Error);
    }

    #[test]
    fn display_uses_upper_snake_names() {
        assert_eq!(RunState::WaitingResource.to_string(), "WAITING_RESOURCE");
        assert_eq!(RunnerId::new(3).to_string(), "runner#3");
    }
}
