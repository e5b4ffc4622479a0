use std::fmt;

use log::info;

use crate::lifecycle::error::LifecycleError;

/// States of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Idle,
    Resolving,
    Registering,
    Syncing,
    Generating,
    Complete,
    Failed,
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Complete | LifecycleState::Failed)
    }

    /// The only state a successful run moves to next
    pub fn successor(&self) -> Option<LifecycleState> {
        match self {
            LifecycleState::Idle => Some(LifecycleState::Resolving),
            LifecycleState::Resolving => Some(LifecycleState::Registering),
            LifecycleState::Registering => Some(LifecycleState::Syncing),
            LifecycleState::Syncing => Some(LifecycleState::Generating),
            LifecycleState::Generating => Some(LifecycleState::Complete),
            LifecycleState::Complete | LifecycleState::Failed => None,
        }
    }

    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == LifecycleState::Failed || self.successor() == Some(next)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LifecycleState::Idle => "Idle",
            LifecycleState::Resolving => "Resolving",
            LifecycleState::Registering => "Registering",
            LifecycleState::Syncing => "Syncing",
            LifecycleState::Generating => "Generating",
            LifecycleState::Complete => "Complete",
            LifecycleState::Failed => "Failed",
        };
        write!(f, "{}", label)
    }
}

/// One recorded state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: LifecycleState,
    pub to: LifecycleState,
}

/// The run state machine. `Failed` is reachable from every non-terminal
/// state; everything else only moves forward one step.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: LifecycleState,
    history: Vec<Transition>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Idle,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    pub fn transition(&mut self, next: LifecycleState) -> Result<(), LifecycleError> {
        if !self.state.can_transition_to(next) {
            return Err(LifecycleError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        info!("Lifecycle: {} -> {}", self.state, next);
        self.history.push(Transition {
            from: self.state,
            to: next,
        });
        self.state = next;
        Ok(())
    }

    /// Move to `Failed` unless the run already ended.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            let _ = self.transition(LifecycleState::Failed);
        }
    }

    pub fn into_history(self) -> Vec<Transition> {
        self.history
    }
}
