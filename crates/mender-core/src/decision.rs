//! Final decision of a run

use crate::budget::BudgetKind;
use crate::classifier::{FailureCategory, FailurePattern};
use crate::error::OrchestratorError;
use crate::trajectory::TrajectoryLog;
use crate::types::{ChangeSet, RunId, RunResult};
use serde::{Deserialize, Serialize};

/// Outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionKind {
    /// Change validated
    Approve,
    /// Objective refused
    Reject,
    /// Handed to a human
    Escalate,
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DecisionKind::Approve => "approve",
            DecisionKind::Reject => "reject",
            DecisionKind::Escalate => "escalate",
        })
    }
}

/// Why a run ended the way it did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", content = "detail", rename_all = "kebab-case")]
pub enum DecisionReason {
    /// Every selected gate passed
    Validated {
        /// Healing attempts that were needed
        healing_attempts: u32,
    },
    /// Objective could not be planned
    InvalidObjective(String),
    /// Planner never produced a usable change set
    PlanningFailed(String),
    /// Change application failed
    ExecutionFailed(String),
    /// Reasoning service unreachable
    ReasoningUnavailable(String),
    /// Failure has no automatic recovery
    NotRecoverable {
        /// Failure category
        category: FailureCategory,
        /// Strategy registered for it
        strategy_id: String,
    },
    /// No healing attempts left
    RecoveryExhausted,
    /// Healing did not change the failure
    RecurringFailure,
    /// Recovery strategy failed
    RecoveryFailed(String),
    /// A run budget counter reached zero
    BudgetExhausted(BudgetKind),
    /// Run was cancelled
    Cancelled,
    /// Another run is active on this orchestrator
    RunInProgress,
    /// Engine misconfiguration or internal fault
    Internal(String),
}

impl DecisionReason {
    /// Stable machine-readable code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            DecisionReason::Validated { .. } => "validated",
            DecisionReason::InvalidObjective(_) => "invalid-objective",
            DecisionReason::PlanningFailed(_) => "planning-failed",
            DecisionReason::ExecutionFailed(_) => "execution-failed",
            DecisionReason::ReasoningUnavailable(_) => "reasoning-unavailable",
            DecisionReason::NotRecoverable { .. } => "not-recoverable",
            DecisionReason::RecoveryExhausted => "recovery-exhausted",
            DecisionReason::RecurringFailure => "recurring-failure",
            DecisionReason::RecoveryFailed(_) => "recovery-failed",
            DecisionReason::BudgetExhausted(_) => "budget-exhausted",
            DecisionReason::Cancelled => "cancelled",
            DecisionReason::RunInProgress => "run-in-progress",
            DecisionReason::Internal(_) => "internal",
        }
    }
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionReason::Validated { healing_attempts: 0 } => f.write_str("all gates passed"),
            DecisionReason::Validated { healing_attempts } => {
                write!(f, "all gates passed after {healing_attempts} healing attempt(s)")
            }
            DecisionReason::InvalidObjective(detail)
            | DecisionReason::PlanningFailed(detail)
            | DecisionReason::ExecutionFailed(detail)
            | DecisionReason::ReasoningUnavailable(detail)
            | DecisionReason::RecoveryFailed(detail)
            | DecisionReason::Internal(detail) => write!(f, "{}: {detail}", self.code()),
            DecisionReason::NotRecoverable {
                category,
                strategy_id,
            } => write!(f, "{}: {category} failures use {strategy_id}", self.code()),
            DecisionReason::BudgetExhausted(kind) => write!(f, "{}: {kind}", self.code()),
            DecisionReason::RecoveryExhausted
            | DecisionReason::RecurringFailure
            | DecisionReason::Cancelled
            | DecisionReason::RunInProgress => f.write_str(self.code()),
        }
    }
}

impl From<&OrchestratorError> for DecisionReason {
    fn from(error: &OrchestratorError) -> Self {
        match error {
            OrchestratorError::InvalidObjective(detail) => Self::InvalidObjective(detail.clone()),
            OrchestratorError::Planning(e) => Self::PlanningFailed(e.to_string()),
            OrchestratorError::Execution(e) => Self::ExecutionFailed(e.to_string()),
            OrchestratorError::ReasoningUnavailable(detail) => {
                Self::ReasoningUnavailable(detail.clone())
            }
            OrchestratorError::Recovery(e) => Self::RecoveryFailed(e.to_string()),
            OrchestratorError::BudgetExhausted(e) => Self::BudgetExhausted(e.0),
            OrchestratorError::Cancelled => Self::Cancelled,
            OrchestratorError::Config(e) => Self::Internal(e.to_string()),
            OrchestratorError::InvalidTransition { .. } => Self::Internal(error.to_string()),
        }
    }
}

/// Final decision with its full audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Run identifier
    pub run_id: RunId,
    /// Outcome
    #[serde(rename = "decision")]
    pub kind: DecisionKind,
    /// Why
    pub reason: DecisionReason,
    /// Every decision point of the run
    #[serde(rename = "reasoning_trajectory")]
    pub trajectory: TrajectoryLog,
    /// Last validation result, if validation ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RunResult>,
    /// Failure left unresolved (escalations caused by a failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unresolved: Option<FailurePattern>,
    /// Last change set that was applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_set: Option<ChangeSet>,
    /// Healing attempts spent
    pub healing_attempts: u32,
}

impl Decision {
    /// Check if approved
    #[inline]
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.kind == DecisionKind::Approve
    }

    /// Check if escalated
    #[inline]
    #[must_use]
    pub fn is_escalated(&self) -> bool {
        self.kind == DecisionKind::Escalate
    }

    /// Check if rejected
    #[inline]
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.kind == DecisionKind::Reject
    }

    /// Pretty JSON
    ///
    /// # Errors
    /// Serialization errors from `serde_json`
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
