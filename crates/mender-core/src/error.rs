//! Error types for Mender Core
//!
//! Provides the failure taxonomy of an orchestration run:
//! - Planning and execution failures (fatal, never retried by the engine)
//! - Reasoning transport failures
//! - Budget exhaustion
//! - Gate-internal failures (turned into issues, never propagated)
//! - Recovery strategy failures
//! - Configuration errors

use crate::budget::BudgetKind;
use crate::state::RunState;
use std::path::PathBuf;

/// Main orchestration error type
///
/// Validation failures are not errors: they are ordinary `RunResult`s routed
/// through the classifier. Everything here ends a run.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Objective cannot be planned
    #[error("invalid objective: {0}")]
    InvalidObjective(String),

    /// Planner produced no usable change set
    #[error("planning failed: {0}")]
    Planning(#[from] PlanningError),

    /// Change application failed
    #[error("execution failed: {0}")]
    Execution(#[from] ExecutionError),

    /// Reasoning service transport failure
    #[error("reasoning service unavailable: {0}")]
    ReasoningUnavailable(String),

    /// Recovery strategy could not produce a candidate
    #[error("recovery failed: {0}")]
    Recovery(#[from] RecoveryError),

    /// A run budget counter reached zero
    #[error(transparent)]
    BudgetExhausted(#[from] BudgetExhausted),

    /// Run was cancelled externally
    #[error("run cancelled")]
    Cancelled,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State machine refused a transition
    #[error("illegal transition {from} -> {to}")]
    InvalidTransition {
        /// Current state
        from: RunState,
        /// Requested state
        to: RunState,
    },
}

impl OrchestratorError {
    /// Infrastructure failures the engine never retries
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Planning(_) | Self::Execution(_) | Self::ReasoningUnavailable(_)
        )
    }

    /// Whether the error ends the run with `reject` rather than `escalate`
    #[inline]
    #[must_use]
    pub fn rejects(&self) -> bool {
        matches!(self, Self::InvalidObjective(_))
    }
}

/// Planning phase errors
#[derive(Debug, thiserror::Error)]
pub enum PlanningError {
    /// Every attempt returned an unusable change set
    #[error("no usable change set after {attempts} attempt(s): {last_error}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Reason the last attempt was rejected
        last_error: String,
    },
}

/// Errors from a modification planner
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProposeError {
    /// Reasoning service could not be reached
    #[error("reasoning unavailable: {0}")]
    Unavailable(String),

    /// A response was produced but cannot be used
    #[error("unusable proposal: {0}")]
    Unusable(String),
}

impl ProposeError {
    /// Whether another attempt may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unusable(_))
    }
}

/// Errors from the reasoning service
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReasoningError {
    /// Transport error
    #[error("reasoning service unavailable: {0}")]
    Unavailable(String),

    /// Completion did not have the expected shape
    #[error("malformed completion: {0}")]
    Malformed(String),
}

impl From<ReasoningError> for ProposeError {
    fn from(value: ReasoningError) -> Self {
        match value {
            ReasoningError::Unavailable(msg) => ProposeError::Unavailable(msg),
            ReasoningError::Malformed(msg) => ProposeError::Unusable(msg),
        }
    }
}

/// Change application errors
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// IO error while writing a file
    #[error("io error writing {path}: {source}")]
    Io {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Path escapes the project root
    #[error("path not allowed: {0}")]
    InvalidPath(String),

    /// Applier refused the change set
    #[error("change set rejected: {0}")]
    Rejected(String),
}

impl ExecutionError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Gate-internal errors (converted to `internal-error` issues)
#[derive(Debug, Clone, thiserror::Error)]
pub enum GateError {
    /// Underlying tool failed to run
    #[error("tool failed: {0}")]
    Tool(String),

    /// Gate cannot check this change set
    #[error("unsupported change set: {0}")]
    Unsupported(String),
}

/// Knowledge source errors (source is skipped)
#[derive(Debug, Clone, thiserror::Error)]
pub enum KnowledgeError {
    /// Index cannot be reached
    #[error("knowledge source unavailable: {0}")]
    Unavailable(String),

    /// Query rejected
    #[error("query failed: {0}")]
    Query(String),
}

/// Recovery strategy errors
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// The action never heals automatically
    #[error("strategy '{0}' is not auto-recoverable")]
    NotRecoverable(String),

    /// Re-planning inside the strategy failed
    #[error("re-planning failed: {0}")]
    Proposal(#[from] ProposeError),

    /// Strategy produced nothing new
    #[error("strategy '{0}' produced no change")]
    NoProgress(String),

    /// Strategy exceeded the reasoning timeout
    #[error("strategy '{0}' timed out")]
    TimedOut(String),

    /// Registry refused an action
    #[error("refusing to register '{0}' as auto-recoverable for security failures")]
    UnsafeRegistration(String),
}

impl RecoveryError {
    /// Whether the failure came from an unreachable reasoning service
    #[inline]
    #[must_use]
    pub fn is_reasoning_unavailable(&self) -> bool {
        matches!(self, Self::Proposal(ProposeError::Unavailable(_)))
    }
}

/// A budget counter reached zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{0} budget exhausted")]
pub struct BudgetExhausted(pub BudgetKind);

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("io error reading {path}: {source}")]
    Io {
        /// Config path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config text could not be parsed
    #[error("parse error: {0}")]
    Parse(String),

    /// Config file extension not recognised
    #[error("unsupported config format: '{0}'")]
    UnsupportedFormat(String),

    /// Value out of range
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Field name
        field: &'static str,
        /// Why it was refused
        reason: String,
    },
}

impl ConfigError {
    /// Create invalid-field error
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
