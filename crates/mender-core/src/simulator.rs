//! Scripted collaborators and named scenarios
//!
//! Used by the `mender simulate` command and by tests to exercise the
//! orchestrator end to end without a reasoning service or real tools.

use crate::apply::InMemoryApplier;
use crate::budget::RunBudget;
use crate::config::OrchestratorConfig;
use crate::context::{ContextBundle, ContextCategory, Snippet, StaticPatternSource};
use crate::decision::Decision;
use crate::error::{GateError, OrchestratorError, ProposeError};
use crate::gate::{OperationalGate, SecurityGate, StyleGate, TestGate, ToolOutcome, ValidationTool};
use crate::orchestrator::Orchestrator;
use crate::planner::ModificationPlanner;
use crate::types::{ChangeSet, Issue, Objective, Severity};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Planner that replays scripted responses, repeating the last one
#[derive(Debug)]
pub struct ScriptedPlanner {
    script: Mutex<VecDeque<Result<ChangeSet, ProposeError>>>,
    last: Mutex<Option<Result<ChangeSet, ProposeError>>>,
    calls: Mutex<Vec<Objective>>,
}

impl ScriptedPlanner {
    /// Create new planner from responses in call order
    #[must_use]
    pub fn new(script: impl IntoIterator<Item = Result<ChangeSet, ProposeError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            last: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Planner that always proposes `change_set`
    #[must_use]
    pub fn always(change_set: ChangeSet) -> Self {
        Self::new([Ok(change_set)])
    }

    /// Objectives seen so far
    #[must_use]
    pub fn calls(&self) -> Vec<Objective> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ModificationPlanner for ScriptedPlanner {
    async fn propose(
        &self,
        objective: &Objective,
        _context: &ContextBundle,
    ) -> Result<ChangeSet, ProposeError> {
        self.calls.lock().push(objective.clone());
        let next = self.script.lock().pop_front();
        let mut last = self.last.lock();
        if let Some(response) = next {
            *last = Some(response);
        }
        (*last)
            .clone()
            .unwrap_or_else(|| Err(ProposeError::Unusable("script is empty".to_string())))
    }
}

/// What a scripted tool checks for
#[derive(Debug, Clone)]
pub enum Check {
    /// Always passes
    Pass,
    /// Fails with `issue` for every file containing `needle`
    Contains {
        /// Text that triggers the finding
        needle: String,
        /// Finding template (location is replaced by the path)
        issue: Issue,
    },
    /// Always fails with `issue`
    Always(Issue),
}

/// Validation tool with scripted behaviour and optional latency
#[derive(Debug, Clone)]
pub struct ScriptedTool {
    check: Check,
    delay: Duration,
}

impl ScriptedTool {
    /// Create new tool
    #[inline]
    #[must_use]
    pub fn new(check: Check) -> Self {
        Self {
            check,
            delay: Duration::ZERO,
        }
    }

    /// With latency before answering
    #[inline]
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl ValidationTool for ScriptedTool {
    async fn check(&self, change_set: &ChangeSet) -> Result<ToolOutcome, GateError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(match &self.check {
            Check::Pass => ToolOutcome::pass(),
            Check::Always(issue) => ToolOutcome::fail(vec![issue.clone()]),
            Check::Contains { needle, issue } => {
                let issues: Vec<Issue> = change_set
                    .iter()
                    .filter(|(_, content)| content.contains(needle.as_str()))
                    .map(|(path, _)| Issue {
                        location: path.to_string(),
                        ..issue.clone()
                    })
                    .collect();
                if issues.is_empty() {
                    ToolOutcome::pass()
                } else {
                    ToolOutcome::fail(issues)
                }
            }
        })
    }
}

/// Named end-to-end scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Clean change, every gate passes
    HappyPath,
    /// Tab indentation fixed by structural repair
    SyntaxHeal,
    /// Hard-coded secret, escalates without healing
    Security,
    /// Syntax error that repair cannot fix
    Recurring,
    /// Two gates exceed their timeout
    SlowGates,
}

impl Scenario {
    /// All scenarios
    pub const ALL: [Scenario; 5] = [
        Scenario::HappyPath,
        Scenario::SyntaxHeal,
        Scenario::Security,
        Scenario::Recurring,
        Scenario::SlowGates,
    ];

    /// Scenario name
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Scenario::HappyPath => "happy-path",
            Scenario::SyntaxHeal => "syntax-heal",
            Scenario::Security => "security",
            Scenario::Recurring => "recurring",
            Scenario::SlowGates => "slow-gates",
        }
    }

    /// Objective the scenario runs
    #[must_use]
    pub fn objective(&self) -> Objective {
        let task = match self {
            Scenario::HappyPath => "add a greeting helper",
            Scenario::SyntaxHeal => "add an indented conditional",
            Scenario::Security => "connect to the database",
            Scenario::Recurring => "add a parser entry point",
            Scenario::SlowGates => "add a batch job",
        };
        Objective::new(task).with_constraint("keep the public API unchanged")
    }

    fn proposal(&self) -> ChangeSet {
        match self {
            Scenario::HappyPath | Scenario::SlowGates => ChangeSet::new()
                .with_file("src/greet.py", "def greet(name):\n    return f\"hello {name}\"\n")
                .with_file("tests/test_greet.py", "def test_greet():\n    assert greet(\"a\") == \"hello a\"\n"),
            Scenario::SyntaxHeal => ChangeSet::new()
                .with_file("src/check.py", "def check(x):\n\tif x:\n\t\treturn 1\n\treturn 0\n"),
            Scenario::Security => ChangeSet::new()
                .with_file("src/db.py", "password = \"hunter2\"\nconnect(password)\n"),
            Scenario::Recurring => ChangeSet::new()
                .with_file("src/parse.py", "def parse(:   \n    pass\n"),
        }
    }

    fn gate_timeout(&self) -> Duration {
        match self {
            Scenario::SlowGates => Duration::from_millis(200),
            _ => Duration::from_secs(5),
        }
    }

    /// Orchestrator wired with the scenario's scripted collaborators
    ///
    /// # Errors
    /// `OrchestratorError::Config` if `config` does not validate
    pub fn build(&self, config: OrchestratorConfig) -> Result<Orchestrator, OrchestratorError> {
        let config = config.with_gate_timeout(self.gate_timeout());
        let planner = Arc::new(ScriptedPlanner::always(self.proposal()));

        let lint = match self {
            Scenario::Recurring => Check::Always(Issue::new(
                "src/parse.py:1",
                Severity::Error,
                "SyntaxError: invalid syntax",
                "E999",
            )),
            _ => Check::Contains {
                needle: "\t".to_string(),
                issue: Issue::new("", Severity::Error, "indentation contains tabs", "E101"),
            },
        };
        let scan = Check::Contains {
            needle: "password = ".to_string(),
            issue: Issue::new("", Severity::Critical, "hardcoded password", "B105"),
        };
        let slow = match self {
            Scenario::SlowGates => Duration::from_secs(2),
            _ => Duration::ZERO,
        };

        let patterns = StaticPatternSource::new("local-patterns")
            .with_snippet(Snippet::new(
                ContextCategory::Conventions,
                0.9,
                "functions use snake_case names",
            ))
            .with_snippet(Snippet::new(
                ContextCategory::Imports,
                0.7,
                "standard library imports come first",
            ));

        Ok(Orchestrator::new(config, planner, Arc::new(InMemoryApplier::new()))?
            .with_knowledge_source(Arc::new(patterns))
            .with_gate(Arc::new(StyleGate::new("lint", Arc::new(ScriptedTool::new(lint)))))
            .with_gate(Arc::new(TestGate::new(
                "tests",
                Arc::new(ScriptedTool::new(Check::Pass).with_delay(slow)),
            )))
            .with_gate(Arc::new(SecurityGate::new("scan", Arc::new(ScriptedTool::new(scan)))))
            .with_gate(Arc::new(OperationalGate::new(
                "bench",
                Arc::new(ScriptedTool::new(Check::Pass).with_delay(slow)),
            ))))
    }

    /// Build and run the scenario
    ///
    /// # Errors
    /// `OrchestratorError::Config` if `config` does not validate
    pub async fn simulate(
        &self,
        config: OrchestratorConfig,
        budget: RunBudget,
    ) -> Result<Decision, OrchestratorError> {
        let orchestrator = self.build(config)?;
        tracing::info!(scenario = self.name(), "simulating");
        Ok(orchestrator.run(self.objective(), budget).await)
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scenario::ALL
            .iter()
            .find(|scenario| scenario.name() == s)
            .copied()
            .ok_or_else(|| format!("unknown scenario '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DecisionKind;
    use crate::trajectory::Step;

    #[tokio::test]
    async fn scripted_planner_repeats_last_response() {
        let planner = ScriptedPlanner::new([
            Err(ProposeError::Unusable("garbled".into())),
            Ok(ChangeSet::new().with_file("a", "1")),
        ]);
        let objective = Objective::new("x");
        let bundle = ContextBundle::empty();
        assert!(planner.propose(&objective, &bundle).await.is_err());
        assert!(planner.propose(&objective, &bundle).await.is_ok());
        assert!(planner.propose(&objective, &bundle).await.is_ok());
        assert_eq!(planner.calls().len(), 3);
    }

    #[tokio::test]
    async fn contains_check_reports_each_file() {
        let tool = ScriptedTool::new(Check::Contains {
            needle: "TODO".into(),
            issue: Issue::new("", Severity::Warning, "leftover marker", "T1"),
        });
        let change_set = ChangeSet::new()
            .with_file("a.py", "# TODO")
            .with_file("b.py", "done")
            .with_file("c.py", "TODO later");
        let outcome = tool.check(&change_set).await.unwrap();
        assert!(!outcome.passed);
        let locations: Vec<_> = outcome.issues.iter().map(|i| i.location.as_str()).collect();
        assert_eq!(locations, vec!["a.py", "c.py"]);
    }

    #[test]
    fn scenario_names_parse() {
        for scenario in Scenario::ALL {
            assert_eq!(scenario.name().parse::<Scenario>(), Ok(scenario));
        }
        assert!("chaos".parse::<Scenario>().is_err());
    }

    #[tokio::test]
    async fn happy_path_scenario_approves() {
        let decision = Scenario::HappyPath
            .simulate(OrchestratorConfig::default(), RunBudget::default())
            .await
            .unwrap();
        assert_eq!(decision.kind, DecisionKind::Approve);
        assert_eq!(decision.trajectory.count(Step::SelfHealing), 0);
    }
}
