//! Run state machine
//!
//! Legal transitions are declared in one table; the orchestrator checks every
//! move against it.

use crate::error::OrchestratorError;
use crate::trajectory::Step;
use serde::{Deserialize, Serialize};

/// Phase of an orchestration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    /// Objective received, nothing done yet
    Pending,
    /// Requesting a change set
    Planning,
    /// Materializing the change set
    Executing,
    /// First validation pass
    Validating,
    /// Classifying a validation failure
    Analyzing,
    /// Applying a recovery action
    Healing,
    /// Validating a healed change set
    Revalidating,
    /// Terminal: change accepted
    Approved,
    /// Terminal: objective refused
    Rejected,
    /// Terminal: handed to a human
    Escalated,
}

impl RunState {
    /// Whether the run has ended
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Approved | RunState::Rejected | RunState::Escalated
        )
    }

    /// Trajectory step recorded when entering this state
    #[must_use]
    pub fn step(&self) -> Step {
        match self {
            RunState::Pending | RunState::Planning => Step::Planning,
            RunState::Executing => Step::Executing,
            RunState::Validating => Step::Validating,
            RunState::Analyzing => Step::Analyzing,
            RunState::Healing => Step::SelfHealing,
            RunState::Revalidating => Step::Revalidating,
            RunState::Approved | RunState::Rejected | RunState::Escalated => Step::FinalDecision,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// States reachable from `from` in one move
///
/// `Revalidating -> Rejected` is listed for drivers that treat a failed
/// revalidation as a verdict on the objective itself. The built-in engine
/// escalates every failure it cannot heal, so it never takes that edge.
#[must_use]
pub fn allowed_transitions(from: RunState) -> Vec<RunState> {
    use RunState::*;
    match from {
        Pending => vec![Planning, Rejected, Escalated],
        Planning => vec![Executing, Escalated],
        Executing => vec![Validating, Escalated],
        Validating => vec![Approved, Analyzing, Escalated],
        Analyzing => vec![Healing, Escalated],
        Healing => vec![Revalidating, Escalated],
        Revalidating => vec![Approved, Analyzing, Rejected, Escalated],
        Approved | Rejected | Escalated => vec![],
    }
}

/// Check a transition against the table
///
/// # Errors
/// `OrchestratorError::InvalidTransition` for a move the table does not list
pub fn validate_transition(from: RunState, to: RunState) -> Result<(), OrchestratorError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidTransition { from, to })
    }
}
