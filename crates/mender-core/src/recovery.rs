//! Recovery strategies
//!
//! The registry maps a `FailurePattern` to a `RecoveryAction`. All
//! pattern-specific healing logic lives here; the orchestrator only asks
//! whether an action is auto-recoverable and then applies it.

use crate::classifier::{FailureCategory, FailurePattern};
use crate::context::ContextBundle;
use crate::error::RecoveryError;
use crate::planner::ModificationPlanner;
use crate::types::{ChangeSet, GateKind, Objective, RunResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Constraint appended to the objective when replanning for performance
pub const OPTIMIZE_CONSTRAINT: &str =
    "optimize for performance: reduce latency, memory and CPU usage";

/// Inputs available to a strategy
#[derive(Debug, Clone, Copy)]
pub struct RecoveryContext<'a> {
    /// Original objective (copy it to amend)
    pub objective: &'a Objective,
    /// Change set that failed validation
    pub change_set: &'a ChangeSet,
    /// Failed validation result
    pub result: &'a RunResult,
    /// Classified failure
    pub pattern: &'a FailurePattern,
    /// Fresh context bundle (empty for strategies that do not reason)
    pub context: &'a ContextBundle,
    /// Planner for strategies that re-plan
    pub planner: &'a dyn ModificationPlanner,
}

/// Transforms a failing change set into a candidate fix
#[async_trait]
pub trait RecoveryStrategy: Send + Sync + std::fmt::Debug {
    /// Strategy id
    fn id(&self) -> &str;

    /// Whether `apply` calls the reasoning service (charged to the run budget)
    fn uses_reasoning(&self) -> bool {
        false
    }

    /// Produce a candidate change set
    ///
    /// # Errors
    /// `RecoveryError` when no candidate can be produced
    async fn apply(&self, ctx: &RecoveryContext<'_>) -> Result<ChangeSet, RecoveryError>;
}

/// When an action may run without a human
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum Recoverability {
    /// Always heal
    Always,
    /// Never heal
    Never,
    /// Heal when the pattern confidence reaches the threshold
    Conditional {
        /// Inclusive threshold
        min_confidence: f64,
    },
}

impl Recoverability {
    /// Whether this setting permits healing `pattern`
    #[inline]
    #[must_use]
    pub fn permits(&self, pattern: &FailurePattern) -> bool {
        match self {
            Recoverability::Always => true,
            Recoverability::Never => false,
            Recoverability::Conditional { min_confidence } => pattern.confidence >= *min_confidence,
        }
    }
}

/// Registered strategy plus its recoverability
#[derive(Debug, Clone)]
pub struct RecoveryAction {
    /// Strategy id
    pub strategy_id: String,
    /// Auto-recoverability
    pub recoverability: Recoverability,
    /// Strategy
    pub strategy: Arc<dyn RecoveryStrategy>,
}

impl RecoveryAction {
    /// Create new action
    #[must_use]
    pub fn new(strategy: Arc<dyn RecoveryStrategy>, recoverability: Recoverability) -> Self {
        Self {
            strategy_id: strategy.id().to_string(),
            recoverability,
            strategy,
        }
    }

    /// Action that always hands the failure to a human
    #[must_use]
    pub fn escalate_only() -> Self {
        Self::new(Arc::new(EscalateOnly), Recoverability::Never)
    }

    /// Whether this action may heal `pattern` automatically
    ///
    /// Security failures are never healed, whatever the action says.
    #[inline]
    #[must_use]
    pub fn is_auto_recoverable(&self, pattern: &FailurePattern) -> bool {
        pattern.category != FailureCategory::Security && self.recoverability.permits(pattern)
    }
}

/// Pattern to action mapping
#[derive(Debug, Clone)]
pub struct RecoveryStrategyRegistry {
    actions: BTreeMap<FailureCategory, RecoveryAction>,
    fallback: RecoveryAction,
}

impl RecoveryStrategyRegistry {
    /// Empty registry (every pattern escalates)
    ///
    /// `Default` gives the built-in mapping instead.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            actions: BTreeMap::new(),
            fallback: RecoveryAction::escalate_only(),
        }
    }

    /// Built-in mapping
    ///
    /// | category | strategy | recoverable |
    /// |---|---|---|
    /// | syntax | `structural-repair` | always |
    /// | test-logic | `regenerate-tests` | always |
    /// | performance | `replan-optimized` | when confidence >= `performance_threshold` |
    /// | security, unknown | `escalate-only` | never |
    #[must_use]
    pub fn with_defaults(performance_threshold: f64) -> Self {
        let mut actions = BTreeMap::new();
        actions.insert(
            FailureCategory::Syntax,
            RecoveryAction::new(Arc::new(StructuralRepair), Recoverability::Always),
        );
        actions.insert(
            FailureCategory::TestLogic,
            RecoveryAction::new(Arc::new(RegenerateTests), Recoverability::Always),
        );
        actions.insert(
            FailureCategory::Performance,
            RecoveryAction::new(
                Arc::new(ReplanOptimized),
                Recoverability::Conditional {
                    min_confidence: performance_threshold,
                },
            ),
        );
        actions.insert(FailureCategory::Security, RecoveryAction::escalate_only());
        actions.insert(FailureCategory::Unknown, RecoveryAction::escalate_only());

        Self {
            actions,
            fallback: RecoveryAction::escalate_only(),
        }
    }

    /// Register `action` for `category`, replacing any previous one
    ///
    /// # Errors
    /// `RecoveryError::UnsafeRegistration` for an auto-recoverable security action
    pub fn register(
        &mut self,
        category: FailureCategory,
        action: RecoveryAction,
    ) -> Result<(), RecoveryError> {
        if category == FailureCategory::Security && action.recoverability != Recoverability::Never {
            return Err(RecoveryError::UnsafeRegistration(action.strategy_id));
        }
        self.actions.insert(category, action);
        Ok(())
    }

    /// Action for `pattern`; unmapped categories get the `unknown` entry
    #[must_use]
    pub fn lookup(&self, pattern: &FailurePattern) -> &RecoveryAction {
        self.actions
            .get(&pattern.category)
            .or_else(|| self.actions.get(&FailureCategory::Unknown))
            .unwrap_or(&self.fallback)
    }
}

impl Default for RecoveryStrategyRegistry {
    fn default() -> Self {
        Self::with_defaults(0.6)
    }
}

/// Whitespace repair of implicated files: tabs to four spaces, no trailing
/// whitespace, newline at end of file
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralRepair;

impl StructuralRepair {
    fn normalize(content: &str) -> String {
        let mut out = String::with_capacity(content.len() + 1);
        for line in content.lines() {
            out.push_str(line.replace('\t', "    ").trim_end());
            out.push('\n');
        }
        out
    }
}

#[async_trait]
impl RecoveryStrategy for StructuralRepair {
    fn id(&self) -> &str {
        "structural-repair"
    }

    async fn apply(&self, ctx: &RecoveryContext<'_>) -> Result<ChangeSet, RecoveryError> {
        let mut implicated: Vec<&str> = ctx
            .result
            .failed_issues()
            .map(|(_, issue)| issue.path())
            .filter(|path| ctx.change_set.contains(path))
            .collect();
        if implicated.is_empty() {
            implicated = ctx.change_set.paths().collect();
        }

        let mut repaired = ctx.change_set.clone();
        for path in implicated {
            if let Some(content) = ctx.change_set.get(path) {
                repaired.insert(path, Self::normalize(content));
            }
        }

        if &repaired == ctx.change_set {
            return Err(RecoveryError::NoProgress(self.id().to_string()));
        }
        Ok(repaired)
    }
}

/// Asks the planner for the test files behind failing assertions and merges them
#[derive(Debug, Clone, Copy, Default)]
pub struct RegenerateTests;

#[async_trait]
impl RecoveryStrategy for RegenerateTests {
    fn id(&self) -> &str {
        "regenerate-tests"
    }

    fn uses_reasoning(&self) -> bool {
        true
    }

    async fn apply(&self, ctx: &RecoveryContext<'_>) -> Result<ChangeSet, RecoveryError> {
        let mut paths: Vec<String> = Vec::new();
        let mut failures: Vec<&str> = Vec::new();
        for (kind, issue) in ctx.result.failed_issues() {
            if kind != GateKind::Test || issue.is_synthetic() {
                continue;
            }
            if !paths.iter().any(|p| p == issue.path()) {
                paths.push(issue.path().to_string());
            }
            failures.push(issue.message.as_str());
        }
        failures.truncate(5);

        let mut amended = ctx.objective.clone().with_constraint(format!(
            "make the failing assertions pass: {}",
            failures.join("; ")
        ));
        if !paths.is_empty() {
            amended = amended.with_targets(paths);
        }

        let patch = ctx.planner.propose(&amended, ctx.context).await?;
        let candidate = ctx.change_set.clone().merged(patch);
        if &candidate == ctx.change_set {
            return Err(RecoveryError::NoProgress(self.id().to_string()));
        }
        Ok(candidate)
    }
}

/// Re-plans with an optimization constraint on a copy of the objective
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplanOptimized;

#[async_trait]
impl RecoveryStrategy for ReplanOptimized {
    fn id(&self) -> &str {
        "replan-optimized"
    }

    fn uses_reasoning(&self) -> bool {
        true
    }

    async fn apply(&self, ctx: &RecoveryContext<'_>) -> Result<ChangeSet, RecoveryError> {
        let amended = ctx.objective.clone().with_constraint(OPTIMIZE_CONSTRAINT);
        let plan = ctx.planner.propose(&amended, ctx.context).await?;
        let candidate = ctx.change_set.clone().merged(plan);
        if &candidate == ctx.change_set {
            return Err(RecoveryError::NoProgress(self.id().to_string()));
        }
        Ok(candidate)
    }
}

/// Never heals
#[derive(Debug, Clone, Copy, Default)]
pub struct EscalateOnly;

#[async_trait]
impl RecoveryStrategy for EscalateOnly {
    fn id(&self) -> &str {
        "escalate-only"
    }

    async fn apply(&self, _ctx: &RecoveryContext<'_>) -> Result<ChangeSet, RecoveryError> {
        Err(RecoveryError::NotRecoverable(self.id().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProposeError;
    use crate::types::{Issue, Severity, ValidationReport};
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct Recording {
        seen: Mutex<Vec<Objective>>,
        reply: ChangeSet,
    }

    #[async_trait]
    impl ModificationPlanner for Recording {
        async fn propose(
            &self,
            objective: &Objective,
            _context: &ContextBundle,
        ) -> Result<ChangeSet, ProposeError> {
            self.seen.lock().push(objective.clone());
            Ok(self.reply.clone())
        }
    }

    fn pattern(category: FailureCategory, confidence: f64) -> FailurePattern {
        FailurePattern::new(category, confidence)
    }

    fn failing(kind: GateKind, location: &str, message: &str) -> RunResult {
        RunResult::from_reports(vec![ValidationReport::failed(
            "gate",
            kind,
            vec![Issue::new(location, Severity::Error, message, "R1")],
        )])
    }

    #[test]
    fn default_mapping() {
        let registry = RecoveryStrategyRegistry::default();

        let syntax = pattern(FailureCategory::Syntax, 0.9);
        assert_eq!(registry.lookup(&syntax).strategy_id, "structural-repair");
        assert!(registry.lookup(&syntax).is_auto_recoverable(&syntax));

        let tests = pattern(FailureCategory::TestLogic, 0.8);
        assert_eq!(registry.lookup(&tests).strategy_id, "regenerate-tests");

        let security = pattern(FailureCategory::Security, 1.0);
        assert_eq!(registry.lookup(&security).strategy_id, "escalate-only");
        assert!(!registry.lookup(&security).is_auto_recoverable(&security));

        let unknown = FailurePattern::unknown();
        assert!(!registry.lookup(&unknown).is_auto_recoverable(&unknown));
    }

    #[test]
    fn performance_is_conditional() {
        let registry = RecoveryStrategyRegistry::with_defaults(0.65);
        let weak = pattern(FailureCategory::Performance, 0.6);
        let strong = pattern(FailureCategory::Performance, 0.7);
        assert!(!registry.lookup(&weak).is_auto_recoverable(&weak));
        assert!(registry.lookup(&strong).is_auto_recoverable(&strong));
    }

    #[test]
    fn security_cannot_be_made_auto_recoverable() {
        let mut registry = RecoveryStrategyRegistry::default();
        let err = registry
            .register(
                FailureCategory::Security,
                RecoveryAction::new(Arc::new(StructuralRepair), Recoverability::Always),
            )
            .unwrap_err();
        assert!(matches!(err, RecoveryError::UnsafeRegistration(id) if id == "structural-repair"));

        // Even a permissive action for another category does not cover security.
        let permissive = RecoveryAction::new(Arc::new(StructuralRepair), Recoverability::Always);
        assert!(!permissive.is_auto_recoverable(&pattern(FailureCategory::Security, 1.0)));
    }

    #[test]
    fn unmapped_categories_fall_back_to_unknown() {
        let mut registry = RecoveryStrategyRegistry::empty();
        let syntax = pattern(FailureCategory::Syntax, 0.9);
        assert_eq!(registry.lookup(&syntax).strategy_id, "escalate-only");

        registry
            .register(
                FailureCategory::Unknown,
                RecoveryAction::new(Arc::new(StructuralRepair), Recoverability::Always),
            )
            .unwrap();
        assert_eq!(registry.lookup(&syntax).strategy_id, "structural-repair");
    }

    #[tokio::test]
    async fn structural_repair_normalizes_implicated_files() {
        let change_set = ChangeSet::new()
            .with_file("app.py", "def f():\n\treturn 1   \n")
            .with_file("other.py", "x = 1\t\n");
        let result = failing(GateKind::Style, "app.py:2", "E101 indentation contains tabs");
        let planner = Recording::default();
        let objective = Objective::new("fix");
        let ctx = RecoveryContext {
            objective: &objective,
            change_set: &change_set,
            result: &result,
            pattern: &pattern(FailureCategory::Syntax, 0.9),
            context: &ContextBundle::empty(),
            planner: &planner,
        };

        let repaired = StructuralRepair.apply(&ctx).await.unwrap();
        assert_eq!(repaired.get("app.py"), Some("def f():\n    return 1\n"));
        assert_eq!(repaired.get("other.py"), Some("x = 1\t\n"));
        assert!(planner.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn structural_repair_reports_no_progress() {
        let change_set = ChangeSet::new().with_file("app.py", "x = 1\n");
        let result = failing(GateKind::Style, "app.py:1", "syntax error");
        let planner = Recording::default();
        let objective = Objective::new("fix");
        let ctx = RecoveryContext {
            objective: &objective,
            change_set: &change_set,
            result: &result,
            pattern: &pattern(FailureCategory::Syntax, 0.9),
            context: &ContextBundle::empty(),
            planner: &planner,
        };
        assert!(matches!(
            StructuralRepair.apply(&ctx).await,
            Err(RecoveryError::NoProgress(_))
        ));
    }

    #[tokio::test]
    async fn regenerate_tests_targets_failing_files() {
        let change_set = ChangeSet::new()
            .with_file("src/calc.py", "def add(a, b): return a - b\n")
            .with_file("tests/test_calc.py", "assert add(1, 2) == 3\n");
        let result = failing(
            GateKind::Test,
            "tests/test_calc.py:1",
            "AssertionError: expected 3 but got -1",
        );
        let planner = Recording {
            reply: ChangeSet::new().with_file("tests/test_calc.py", "assert add(1, 2) == -1\n"),
            ..Recording::default()
        };
        let objective = Objective::new("add calculator");
        let ctx = RecoveryContext {
            objective: &objective,
            change_set: &change_set,
            result: &result,
            pattern: &pattern(FailureCategory::TestLogic, 0.8),
            context: &ContextBundle::empty(),
            planner: &planner,
        };

        let candidate = RegenerateTests.apply(&ctx).await.unwrap();
        assert_eq!(candidate.len(), 2);
        assert_eq!(candidate.get("tests/test_calc.py"), Some("assert add(1, 2) == -1\n"));

        let seen = planner.seen.lock();
        assert_eq!(seen[0].targets, vec!["tests/test_calc.py"]);
        assert!(seen[0].constraints[0].contains("expected 3 but got -1"));
        assert!(objective.constraints.is_empty());
    }

    #[tokio::test]
    async fn replan_amends_a_copy_of_the_objective() {
        let change_set = ChangeSet::new().with_file("svc.py", "slow()\n");
        let result = failing(GateKind::Operational, "svc.py", "latency exceeds threshold");
        let planner = Recording {
            reply: ChangeSet::new().with_file("svc.py", "fast()\n"),
            ..Recording::default()
        };
        let objective = Objective::new("serve requests");
        let ctx = RecoveryContext {
            objective: &objective,
            change_set: &change_set,
            result: &result,
            pattern: &pattern(FailureCategory::Performance, 0.7),
            context: &ContextBundle::empty(),
            planner: &planner,
        };

        let candidate = ReplanOptimized.apply(&ctx).await.unwrap();
        assert_eq!(candidate.get("svc.py"), Some("fast()\n"));
        assert_eq!(planner.seen.lock()[0].constraints, vec![OPTIMIZE_CONSTRAINT]);
        assert!(objective.constraints.is_empty());
    }

    #[tokio::test]
    async fn escalate_only_never_produces_a_candidate() {
        let change_set = ChangeSet::new().with_file("a", "b");
        let result = failing(GateKind::Security, "a", "secret");
        let planner = Recording::default();
        let objective = Objective::new("x");
        let ctx = RecoveryContext {
            objective: &objective,
            change_set: &change_set,
            result: &result,
            pattern: &pattern(FailureCategory::Security, 1.0),
            context: &ContextBundle::empty(),
            planner: &planner,
        };
        assert!(matches!(
            EscalateOnly.apply(&ctx).await,
            Err(RecoveryError::NotRecoverable(_))
        ));
    }
}
