//! Orchestrator
//!
//! Drives one run through the state machine:
//!
//! ```text
//! Planning -> Executing -> Validating -> Approved
//!                              |
//!                              v
//!                          Analyzing -> Healing -> Revalidating -> Approved
//!                              ^                        |
//!                              +------------------------+
//! ```
//!
//! Every transition is checked against `state::allowed_transitions` and
//! appends exactly one trajectory entry. Any live state may escalate
//! (cancellation, budget exhaustion, unrecoverable failure). A run always
//! ends with a `Decision` whose last trajectory entry states it.

use crate::apply::ChangeApplier;
use crate::budget::{BudgetKind, RunBudget};
use crate::classifier::{FailureClassifier, FailurePattern};
use crate::config::OrchestratorConfig;
use crate::context::{ContextBudgetManager, ContextBundle, ContextCaps, KnowledgeProvider};
use crate::decision::{Decision, DecisionKind, DecisionReason};
use crate::error::{BudgetExhausted, OrchestratorError, PlanningError, ProposeError, RecoveryError};
use crate::gate::{run_gates, ValidationGate};
use crate::planner::ModificationPlanner;
use crate::recovery::{RecoveryAction, RecoveryContext, RecoveryStrategyRegistry};
use crate::state::{validate_transition, RunState};
use crate::trajectory::{Step, TrajectoryLog};
use crate::types::{ChangeSet, Objective, RunId, RunResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Self-healing modification orchestrator
///
/// Collaborators are shared immutably; everything mutable belongs to the run
/// in progress. One instance runs one objective at a time.
#[derive(Debug)]
pub struct Orchestrator {
    config: OrchestratorConfig,
    planner: Arc<dyn ModificationPlanner>,
    applier: Arc<dyn ChangeApplier>,
    gates: Vec<Arc<dyn ValidationGate>>,
    context: ContextBudgetManager,
    classifier: Arc<FailureClassifier>,
    registry: Arc<RecoveryStrategyRegistry>,
    trajectory: Mutex<TrajectoryLog>,
    running: AtomicBool,
}

impl Orchestrator {
    /// Create new orchestrator with the built-in classifier and registry
    ///
    /// # Errors
    /// `OrchestratorError::Config` if `config` does not validate
    pub fn new(
        config: OrchestratorConfig,
        planner: Arc<dyn ModificationPlanner>,
        applier: Arc<dyn ChangeApplier>,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let caps = config.context_caps()?;
        Ok(Self {
            classifier: Arc::new(FailureClassifier::with_defaults(config.min_confidence)),
            registry: Arc::new(RecoveryStrategyRegistry::with_defaults(
                config.performance_recovery_confidence,
            )),
            context: ContextBudgetManager::new(caps),
            config,
            planner,
            applier,
            gates: Vec::new(),
            trajectory: Mutex::new(TrajectoryLog::new()),
            running: AtomicBool::new(false),
        })
    }

    /// With validation gate (runs in registration order)
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<dyn ValidationGate>) -> Self {
        self.gates.push(gate);
        self
    }

    /// With knowledge source
    #[must_use]
    pub fn with_knowledge_source(mut self, source: Arc<dyn KnowledgeProvider>) -> Self {
        self.context = self.context.with_source(source);
        self
    }

    /// With classifier
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<FailureClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// With recovery registry
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<RecoveryStrategyRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Names of the registered gates
    #[must_use]
    pub fn gate_names(&self) -> Vec<&str> {
        self.gates.iter().map(|g| g.name()).collect()
    }

    /// Snapshot of the current (or most recent) run's trajectory
    #[must_use]
    pub fn trajectory(&self) -> TrajectoryLog {
        self.trajectory.lock().clone()
    }

    /// Run `objective` to a decision
    pub async fn run(&self, objective: Objective, budget: RunBudget) -> Decision {
        self.run_with_cancellation(objective, budget, CancellationToken::new())
            .await
    }

    /// Run `objective` to a decision, abandoning it when `cancel` fires
    ///
    /// Cancellation and wall-clock expiry drop whatever step is in flight
    /// (gate tasks are aborted) and escalate.
    pub async fn run_with_cancellation(
        &self,
        objective: Objective,
        mut budget: RunBudget,
        cancel: CancellationToken,
    ) -> Decision {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            tracing::warn!("run requested while another run is in progress");
            return busy_decision();
        };

        *self.trajectory.lock() = TrajectoryLog::new();
        budget.start();
        let deadline = budget.remaining_time();
        let mut run = Run::new(self, budget);
        tracing::info!(run_id = %run.id, task = %objective.task, "run started");

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(OrchestratorError::Cancelled),
            () = tokio::time::sleep(deadline) => Err(BudgetExhausted(BudgetKind::WallClock).into()),
            outcome = run.drive(&objective) => outcome,
        };

        run.finish(outcome)
    }

    fn select_gates(
        &self,
        objective: &Objective,
    ) -> Result<Vec<Arc<dyn ValidationGate>>, OrchestratorError> {
        if objective.quality_gates.is_empty() {
            return Ok(self.gates.clone());
        }
        if let Some(unknown) = objective
            .quality_gates
            .iter()
            .find(|name| !self.gates.iter().any(|g| g.name() == name.as_str()))
        {
            return Err(OrchestratorError::InvalidObjective(format!(
                "unknown quality gate '{unknown}'"
            )));
        }
        Ok(self
            .gates
            .iter()
            .filter(|g| objective.quality_gates.iter().any(|n| n == g.name()))
            .cloned()
            .collect())
    }
}

/// Resets the in-progress flag however the run ends
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn busy_decision() -> Decision {
    let reason = DecisionReason::RunInProgress;
    let mut trajectory = TrajectoryLog::new();
    trajectory.append(
        Step::FinalDecision,
        format!("{} ({reason})", DecisionKind::Escalate),
        Some(false),
    );
    Decision {
        run_id: RunId::new(),
        kind: DecisionKind::Escalate,
        reason,
        trajectory,
        result: None,
        unresolved: None,
        change_set: None,
        healing_attempts: 0,
    }
}

/// How `drive` ended when it ended normally
struct Verdict {
    kind: DecisionKind,
    reason: DecisionReason,
}

impl Verdict {
    fn approve(healing_attempts: u32) -> Self {
        Self {
            kind: DecisionKind::Approve,
            reason: DecisionReason::Validated { healing_attempts },
        }
    }

    fn escalate(reason: DecisionReason) -> Self {
        Self {
            kind: DecisionKind::Escalate,
            reason,
        }
    }
}

/// State of one run
struct Run<'a> {
    orchestrator: &'a Orchestrator,
    id: RunId,
    state: RunState,
    budget: RunBudget,
    caps: ContextCaps,
    change_set: Option<ChangeSet>,
    last_result: Option<RunResult>,
    unresolved: Option<FailurePattern>,
    healing_attempts: u32,
}

impl<'a> Run<'a> {
    fn new(orchestrator: &'a Orchestrator, budget: RunBudget) -> Self {
        Self {
            orchestrator,
            id: RunId::new(),
            state: RunState::Pending,
            budget,
            caps: orchestrator.context.caps().clone(),
            change_set: None,
            last_result: None,
            unresolved: None,
            healing_attempts: 0,
        }
    }

    /// Move to `to` and record it
    fn advance(
        &mut self,
        to: RunState,
        description: impl Into<String>,
        success: Option<bool>,
    ) -> Result<(), OrchestratorError> {
        validate_transition(self.state, to)?;
        self.budget.check_deadline()?;
        let description = description.into();
        tracing::info!(run_id = %self.id, from = %self.state, to = %to, "{description}");
        self.orchestrator
            .trajectory
            .lock()
            .append(to.step(), description, success);
        self.state = to;
        Ok(())
    }

    async fn drive(&mut self, objective: &Objective) -> Result<Verdict, OrchestratorError> {
        let orchestrator = self.orchestrator;
        if !objective.is_actionable() {
            return Err(OrchestratorError::InvalidObjective(
                "task text is blank".to_string(),
            ));
        }
        let gates = orchestrator.select_gates(objective)?;

        self.advance(
            RunState::Planning,
            format!("planning change for '{}'", objective.task),
            None,
        )?;
        let (change_set, attempts) = self.plan(objective).await?;

        self.advance(
            RunState::Executing,
            format!(
                "plan proposes {} file(s) after {attempts} attempt(s)",
                change_set.len()
            ),
            Some(true),
        )?;
        let applied = self.execute(change_set).await?;

        self.advance(
            RunState::Validating,
            format!("applied {applied} file(s), running {} gate(s)", gates.len()),
            Some(true),
        )?;
        let mut result = self.validate(&gates).await;
        let mut healed: Option<FailurePattern> = None;

        loop {
            if result.passed {
                return Ok(Verdict::approve(self.healing_attempts));
            }

            self.advance(
                RunState::Analyzing,
                format!(
                    "{} gate(s) failed: {}",
                    result.failed_reports().count(),
                    result.failed_gate_names().join(", ")
                ),
                Some(false),
            )?;
            let pattern = orchestrator.classifier.classify(&result);
            tracing::info!(run_id = %self.id, %pattern, "classified failure");
            self.unresolved = Some(pattern);

            if healed == Some(pattern) {
                return Ok(Verdict::escalate(DecisionReason::RecurringFailure));
            }

            let action = orchestrator.registry.lookup(&pattern);
            if !action.is_auto_recoverable(&pattern) {
                return Ok(Verdict::escalate(DecisionReason::NotRecoverable {
                    category: pattern.category,
                    strategy_id: action.strategy_id.clone(),
                }));
            }
            if !self.budget.consume_recovery_attempt() {
                return Ok(Verdict::escalate(DecisionReason::RecoveryExhausted));
            }
            self.healing_attempts += 1;

            self.advance(
                RunState::Healing,
                format!("applying {}", action.strategy_id),
                None,
            )?;
            let candidate = self.heal(objective, action, &pattern, &result).await?;
            let applied = self.execute(candidate).await?;

            self.advance(
                RunState::Revalidating,
                format!("{} rewrote the change set, applied {applied} file(s)", action.strategy_id),
                Some(true),
            )?;
            result = self.validate(&gates).await;
            healed = Some(pattern);
        }
    }

    /// Ask the planner for a usable change set
    async fn plan(&mut self, objective: &Objective) -> Result<(ChangeSet, u32), OrchestratorError> {
        let attempts = self.orchestrator.config.planning_attempts;
        let timeout = self.orchestrator.config.reasoning_timeout();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            self.budget.consume_reasoning_call()?;
            let context = self.assemble_context(objective).await?;

            let proposal = tokio::time::timeout(
                timeout,
                self.orchestrator.planner.propose(objective, &context),
            )
            .await;
            match proposal {
                Ok(Ok(change_set)) if !change_set.is_empty() => return Ok((change_set, attempt)),
                Ok(Ok(_)) => last_error = "empty change set".to_string(),
                Ok(Err(e)) if e.is_retryable() => last_error = e.to_string(),
                Ok(Err(ProposeError::Unavailable(detail) | ProposeError::Unusable(detail))) => {
                    return Err(OrchestratorError::ReasoningUnavailable(detail));
                }
                Err(_) => last_error = format!("no proposal within {}ms", timeout.as_millis()),
            }
            tracing::warn!(run_id = %self.id, attempt, error = %last_error, "planning attempt failed");
        }

        Err(PlanningError::Exhausted {
            attempts,
            last_error,
        }
        .into())
    }

    /// Fresh bundle for one reasoning call, charged to the run budget
    async fn assemble_context(&mut self, objective: &Objective) -> Result<ContextBundle, OrchestratorError> {
        let ceiling = self.budget.context_ceiling(self.caps.overall_chars())?;
        let bundle = self
            .orchestrator
            .context
            .assemble(objective, &self.caps.clamped_to(ceiling))
            .await;
        self.budget.consume_context(bundle.total_chars());
        Ok(bundle)
    }

    async fn execute(&mut self, change_set: ChangeSet) -> Result<usize, OrchestratorError> {
        let outcome = self.orchestrator.applier.apply(&change_set).await?;
        self.change_set = Some(change_set);
        Ok(outcome.applied_paths.len())
    }

    async fn validate(&mut self, gates: &[Arc<dyn ValidationGate>]) -> RunResult {
        let change_set = Arc::new(self.change_set.clone().unwrap_or_default());
        let result = run_gates(gates, change_set, self.orchestrator.config.gate_timeout()).await;
        tracing::info!(
            run_id = %self.id,
            passed = result.passed,
            failed = ?result.failed_gate_names(),
            "validation finished"
        );
        self.last_result = Some(result.clone());
        result
    }

    async fn heal(
        &mut self,
        objective: &Objective,
        action: &RecoveryAction,
        pattern: &FailurePattern,
        result: &RunResult,
    ) -> Result<ChangeSet, OrchestratorError> {
        let reasons = action.strategy.uses_reasoning();
        let context = if reasons {
            self.budget.consume_reasoning_call()?;
            self.assemble_context(objective).await?
        } else {
            ContextBundle::empty()
        };

        let current = self.change_set.clone().unwrap_or_default();
        let ctx = RecoveryContext {
            objective,
            change_set: &current,
            result,
            pattern,
            context: &context,
            planner: self.orchestrator.planner.as_ref(),
        };

        let healed = if reasons {
            let timeout = self.orchestrator.config.reasoning_timeout();
            match tokio::time::timeout(timeout, action.strategy.apply(&ctx)).await {
                Ok(healed) => healed,
                Err(_) => Err(RecoveryError::TimedOut(action.strategy_id.clone())),
            }
        } else {
            action.strategy.apply(&ctx).await
        };

        healed.map_err(|e| {
            tracing::warn!(run_id = %self.id, strategy = %action.strategy_id, error = %e, "recovery failed");
            if e.is_reasoning_unavailable() {
                OrchestratorError::ReasoningUnavailable(e.to_string())
            } else {
                OrchestratorError::Recovery(e)
            }
        })
    }

    /// Record the terminal transition and build the decision
    fn finish(mut self, outcome: Result<Verdict, OrchestratorError>) -> Decision {
        let verdict = match outcome {
            Ok(verdict) => verdict,
            Err(e) => {
                if e.is_fatal() {
                    tracing::error!(run_id = %self.id, error = %e, "run aborted");
                } else {
                    tracing::warn!(run_id = %self.id, error = %e, "run ended early");
                }
                Verdict {
                    kind: if e.rejects() {
                        DecisionKind::Reject
                    } else {
                        DecisionKind::Escalate
                    },
                    reason: DecisionReason::from(&e),
                }
            }
        };

        let terminal = match verdict.kind {
            DecisionKind::Approve => RunState::Approved,
            DecisionKind::Reject => RunState::Rejected,
            DecisionKind::Escalate => RunState::Escalated,
        };
        if let Err(e) = validate_transition(self.state, terminal) {
            tracing::error!(run_id = %self.id, error = %e, "terminal transition outside the table");
        }
        self.state = terminal;

        let unresolved = if verdict.kind == DecisionKind::Escalate {
            self.unresolved
        } else {
            None
        };
        let description = match &unresolved {
            Some(pattern) => format!("{} ({}): {pattern}", verdict.kind, verdict.reason),
            None => format!("{} ({})", verdict.kind, verdict.reason),
        };
        let trajectory = {
            let mut log = self.orchestrator.trajectory.lock();
            log.append(
                Step::FinalDecision,
                description,
                Some(verdict.kind == DecisionKind::Approve),
            );
            log.clone()
        };

        tracing::info!(
            run_id = %self.id,
            decision = %verdict.kind,
            reason = %verdict.reason,
            healing_attempts = self.healing_attempts,
            "run finished"
        );

        Decision {
            run_id: self.id,
            kind: verdict.kind,
            unresolved,
            reason: verdict.reason,
            trajectory,
            result: self.last_result,
            change_set: self.change_set,
            healing_attempts: self.healing_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::InMemoryApplier;
    use crate::gate::{StyleGate, ToolOutcome, ValidationTool};
    use crate::error::GateError;
    use crate::types::{Issue, Severity};
    use async_trait::async_trait;

    #[derive(Debug)]
    struct FixedPlanner(ChangeSet);

    #[async_trait]
    impl ModificationPlanner for FixedPlanner {
        async fn propose(
            &self,
            _objective: &Objective,
            _context: &ContextBundle,
        ) -> Result<ChangeSet, ProposeError> {
            Ok(self.0.clone())
        }
    }

    /// Fails with a tab-indentation error until the file has no tabs
    #[derive(Debug)]
    struct TabLinter;

    #[async_trait]
    impl ValidationTool for TabLinter {
        async fn check(&self, change_set: &ChangeSet) -> Result<ToolOutcome, GateError> {
            let issues: Vec<_> = change_set
                .iter()
                .filter(|(_, content)| content.contains('\t'))
                .map(|(path, _)| Issue::new(path, Severity::Error, "indentation contains tabs", "E101"))
                .collect();
            Ok(if issues.is_empty() {
                ToolOutcome::pass()
            } else {
                ToolOutcome::fail(issues)
            })
        }
    }

    fn orchestrator(change_set: ChangeSet) -> Orchestrator {
        Orchestrator::new(
            OrchestratorConfig::default(),
            Arc::new(FixedPlanner(change_set)),
            Arc::new(InMemoryApplier::new()),
        )
        .unwrap()
        .with_gate(Arc::new(StyleGate::new("lint", Arc::new(TabLinter))))
    }

    #[tokio::test]
    async fn approves_on_first_pass() {
        let orchestrator = orchestrator(ChangeSet::new().with_file("a.py", "x = 1\n"));
        let decision = orchestrator.run(Objective::new("set x"), RunBudget::default()).await;

        assert!(decision.is_approved());
        assert_eq!(decision.trajectory.count(Step::Analyzing), 0);
        assert_eq!(decision.trajectory.count(Step::SelfHealing), 0);
        assert_eq!(decision.healing_attempts, 0);
        assert_eq!(orchestrator.trajectory(), decision.trajectory);
    }

    #[tokio::test]
    async fn heals_syntax_once() {
        let orchestrator = orchestrator(ChangeSet::new().with_file("a.py", "if x:\n\ty = 1\n"));
        let budget = RunBudget::default().with_recovery_attempts(1);
        let decision = orchestrator.run(Objective::new("indent"), budget).await;

        assert!(decision.is_approved(), "{:?}", decision.reason);
        assert_eq!(decision.trajectory.count(Step::SelfHealing), 1);
        assert_eq!(
            decision.change_set.unwrap().get("a.py"),
            Some("if x:\n    y = 1\n")
        );
        assert!(decision.trajectory.verify_integrity().is_ok());
    }

    #[tokio::test]
    async fn blank_objective_is_rejected() {
        let orchestrator = orchestrator(ChangeSet::new().with_file("a.py", "x\n"));
        let decision = orchestrator.run(Objective::new("  "), RunBudget::default()).await;

        assert!(decision.is_rejected());
        assert_eq!(decision.trajectory.len(), 1);
        assert_eq!(decision.reason.code(), "invalid-objective");
    }

    #[tokio::test]
    async fn unknown_gate_is_rejected() {
        let orchestrator = orchestrator(ChangeSet::new().with_file("a.py", "x\n"));
        let objective = Objective::new("x").with_quality_gates(["lint", "fuzz"]);
        let decision = orchestrator.run(objective, RunBudget::default()).await;
        assert!(decision.is_rejected());
    }

    #[test]
    fn invalid_config_is_refused() {
        let config = OrchestratorConfig::default().with_planning_attempts(0);
        let err = Orchestrator::new(
            config,
            Arc::new(FixedPlanner(ChangeSet::new())),
            Arc::new(InMemoryApplier::new()),
        )
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }
}
