//! Mender Core - self-healing modification orchestrator
//!
//! Drives one objective through a fixed loop:
//! - plans a change set with bounded context
//! - applies it and runs the validation gates concurrently
//! - classifies failures and applies a registered recovery strategy
//! - ends with an approve, reject or escalate decision and a hash-chained trajectory
//!
//! # Example
//!
//! ```rust,ignore
//! use mender_core::prelude::*;
//!
//! # async fn example(planner: Arc<dyn ModificationPlanner>) -> Result<(), OrchestratorError> {
//! let orchestrator = Orchestrator::new(OrchestratorConfig::default(), planner, Arc::new(InMemoryApplier::new()))?
//!     .with_gate(Arc::new(StyleGate::new("lint", linter)));
//!
//! let decision = orchestrator
//!     .run(Objective::new("add a greeting helper"), RunBudget::default())
//!     .await;
//! println!("{} ({})", decision.kind, decision.reason);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod apply;
pub mod budget;
pub mod classifier;
pub mod config;
pub mod context;
pub mod decision;
pub mod error;
pub mod gate;
pub mod orchestrator;
pub mod planner;
pub mod reasoning;
pub mod recovery;
pub mod simulator;
pub mod state;
pub mod telemetry;
pub mod trajectory;
pub mod types;

pub use apply::{ApplyOutcome, ChangeApplier, FsChangeApplier, InMemoryApplier};
pub use budget::{BudgetKind, RunBudget};
pub use classifier::{FailureCategory, FailureClassifier, FailurePattern, Matcher};
pub use config::OrchestratorConfig;
pub use context::{
    ContextBudgetManager, ContextBundle, ContextCaps, ContextCategory, KnowledgeProvider, Snippet,
    StaticPatternSource,
};
pub use decision::{Decision, DecisionKind, DecisionReason};
pub use error::{
    BudgetExhausted, ConfigError, ExecutionError, GateError, KnowledgeError, OrchestratorError,
    PlanningError, ProposeError, ReasoningError, RecoveryError,
};
pub use gate::{
    run_gates, OperationalGate, SecurityGate, StyleGate, TestGate, ToolOutcome, ValidationGate,
    ValidationTool,
};
pub use orchestrator::Orchestrator;
pub use planner::{ModificationPlanner, ReasoningPlanner};
pub use reasoning::{Completion, CompletionKind, ReasoningService};
pub use recovery::{
    Recoverability, RecoveryAction, RecoveryContext, RecoveryStrategy, RecoveryStrategyRegistry,
};
pub use state::{allowed_transitions, validate_transition, RunState};
pub use trajectory::{IntegrityError, Step, TrajectoryEntry, TrajectoryLog};
pub use types::{
    ChangeSet, GateKind, Issue, Objective, RunId, RunResult, Severity, ValidationReport,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for wiring an orchestrator
    pub use crate::{
        ChangeSet, Decision, DecisionKind, GateKind, InMemoryApplier, Issue, ModificationPlanner,
        Objective, Orchestrator, OrchestratorConfig, OrchestratorError, RunBudget, RunResult,
        StyleGate, ValidationGate, ValidationReport,
    };
    pub use std::sync::Arc;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
