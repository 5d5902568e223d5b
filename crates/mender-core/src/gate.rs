//! Validation gates
//!
//! A gate is an independent check run against a `ChangeSet`. The four gate
//! variants wrap a `ValidationTool` and stamp their name and kind on the
//! report; the orchestrator only sees `Arc<dyn ValidationGate>`.
//!
//! `run_gates` fans a validation step out over the runtime (one task per
//! gate) and fans back in, in registration order. A gate that exceeds its
//! timeout, returns an error, or panics yields a failed report carrying a
//! synthetic issue; the other gates are unaffected.

use crate::error::GateError;
use crate::types::{ChangeSet, GateKind, Issue, RunResult, ValidationReport};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Independent quality check
#[async_trait]
pub trait ValidationGate: Send + Sync + std::fmt::Debug {
    /// Unique gate name
    fn name(&self) -> &str;

    /// Quality dimension
    fn kind(&self) -> GateKind;

    /// Check a change set
    ///
    /// # Errors
    /// `GateError` when the gate itself could not produce a verdict
    async fn run(&self, change_set: &ChangeSet) -> Result<ValidationReport, GateError>;
}

/// Verdict of a concrete checker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutcome {
    /// Whether the check passed
    pub passed: bool,
    /// Findings
    pub issues: Vec<Issue>,
}

impl ToolOutcome {
    /// Clean pass
    #[inline]
    #[must_use]
    pub fn pass() -> Self {
        Self {
            passed: true,
            issues: Vec::new(),
        }
    }

    /// Failure with findings
    #[inline]
    #[must_use]
    pub fn fail(issues: Vec<Issue>) -> Self {
        Self {
            passed: false,
            issues,
        }
    }
}

/// Concrete checker (linter, test runner, scanner, benchmark)
#[async_trait]
pub trait ValidationTool: Send + Sync + std::fmt::Debug {
    /// Check a change set
    ///
    /// # Errors
    /// `GateError::Tool` if the tool could not run
    async fn check(&self, change_set: &ChangeSet) -> Result<ToolOutcome, GateError>;
}

macro_rules! tool_gate {
    ($(#[$doc:meta])* $name:ident, $kind:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name {
            name: String,
            tool: Arc<dyn ValidationTool>,
        }

        impl $name {
            /// Create new gate around `tool`
            #[inline]
            #[must_use]
            pub fn new(name: impl Into<String>, tool: Arc<dyn ValidationTool>) -> Self {
                Self {
                    name: name.into(),
                    tool,
                }
            }
        }

        #[async_trait]
        impl ValidationGate for $name {
            fn name(&self) -> &str {
                &self.name
            }

            fn kind(&self) -> GateKind {
                $kind
            }

            async fn run(&self, change_set: &ChangeSet) -> Result<ValidationReport, GateError> {
                let outcome = self.tool.check(change_set).await?;
                Ok(report_from(&self.name, $kind, outcome))
            }
        }
    };
}

tool_gate!(
    /// Style and lint checks
    StyleGate,
    GateKind::Style
);
tool_gate!(
    /// Test execution
    TestGate,
    GateKind::Test
);
tool_gate!(
    /// Vulnerability and policy scanning
    SecurityGate,
    GateKind::Security
);
tool_gate!(
    /// Operational readiness (performance, resources)
    OperationalGate,
    GateKind::Operational
);

fn report_from(name: &str, kind: GateKind, outcome: ToolOutcome) -> ValidationReport {
    if outcome.passed {
        let mut report = ValidationReport::passed(name, kind);
        report.issues = outcome.issues;
        report
    } else {
        ValidationReport::failed(name, kind, outcome.issues)
    }
}

type GateOutcome =
    Result<Result<Result<ValidationReport, GateError>, Box<dyn Any + Send>>, tokio::time::error::Elapsed>;

/// Run every gate concurrently and aggregate the reports
///
/// Reports come back in the order of `gates`. Dropping the returned future
/// aborts every gate task still in flight.
pub async fn run_gates(
    gates: &[Arc<dyn ValidationGate>],
    change_set: Arc<ChangeSet>,
    timeout: Duration,
) -> RunResult {
    let mut tasks = JoinSet::new();
    for (index, gate) in gates.iter().enumerate() {
        let gate = Arc::clone(gate);
        let change_set = Arc::clone(&change_set);
        tasks.spawn(async move {
            let started = Instant::now();
            let outcome: GateOutcome = tokio::time::timeout(
                timeout,
                AssertUnwindSafe(gate.run(&change_set)).catch_unwind(),
            )
            .await;
            (index, outcome, started.elapsed())
        });
    }

    let mut slots: Vec<Option<ValidationReport>> = vec![None; gates.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, outcome, elapsed)) => {
                let gate = &gates[index];
                slots[index] = Some(settle(gate.as_ref(), outcome, elapsed, timeout));
            }
            Err(e) => tracing::error!(error = %e, "gate task failed to join"),
        }
    }

    let reports = slots
        .into_iter()
        .zip(gates)
        .map(|(slot, gate)| {
            slot.unwrap_or_else(|| {
                ValidationReport::internal_error(gate.name(), gate.kind(), "task did not complete")
            })
        })
        .collect();

    RunResult::from_reports(reports)
}

fn settle(
    gate: &dyn ValidationGate,
    outcome: GateOutcome,
    elapsed: Duration,
    timeout: Duration,
) -> ValidationReport {
    let (name, kind) = (gate.name(), gate.kind());
    match outcome {
        Ok(Ok(Ok(mut report))) => {
            report.gate_name = name.to_string();
            report.gate_kind = kind;
            tracing::debug!(gate = name, passed = report.passed, issues = report.issues.len(), "gate finished");
            report.with_elapsed(elapsed)
        }
        Ok(Ok(Err(e))) => {
            tracing::warn!(gate = name, error = %e, "gate errored");
            ValidationReport::internal_error(name, kind, e).with_elapsed(elapsed)
        }
        Ok(Err(panic)) => {
            let detail = panic_message(panic.as_ref());
            tracing::error!(gate = name, panic = %detail, "gate panicked");
            ValidationReport::internal_error(name, kind, format!("panicked: {detail}"))
                .with_elapsed(elapsed)
        }
        Err(_) => {
            tracing::warn!(gate = name, ?timeout, "gate timed out");
            ValidationReport::timed_out(name, kind, timeout)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
