//! Testing utilities for the Mender workspace
//!
//! Misbehaving collaborators and fixtures shared by the integration tests.

#![allow(missing_docs)]

use async_trait::async_trait;
use mender_core::apply::{ApplyOutcome, ChangeApplier};
use mender_core::context::ContextBundle;
use mender_core::error::{ExecutionError, GateError, ProposeError};
use mender_core::gate::{ValidationGate, ValidationTool};
use mender_core::simulator::{Check, ScriptedPlanner, ScriptedTool};
use mender_core::{
    ChangeSet, GateKind, InMemoryApplier, Issue, ModificationPlanner, Objective, Orchestrator,
    OrchestratorConfig, Severity, StyleGate, TestGate, ValidationReport,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Gate that panics while running
#[derive(Debug)]
pub struct PanickingGate {
    pub name: String,
}

impl PanickingGate {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl ValidationGate for PanickingGate {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> GateKind {
        GateKind::Test
    }

    async fn run(&self, _change_set: &ChangeSet) -> Result<ValidationReport, GateError> {
        panic!("gate {} blew up", self.name)
    }
}

/// Gate whose tool cannot run
#[derive(Debug)]
pub struct ErroringGate {
    pub name: String,
}

impl ErroringGate {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl ValidationGate for ErroringGate {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> GateKind {
        GateKind::Style
    }

    async fn run(&self, _change_set: &ChangeSet) -> Result<ValidationReport, GateError> {
        Err(GateError::Tool("linter binary not found".to_string()))
    }
}

/// Gate that sleeps before passing
#[derive(Debug)]
pub struct SlowGate {
    pub name: String,
    pub kind: GateKind,
    pub delay: Duration,
}

impl SlowGate {
    pub fn new(name: &str, kind: GateKind, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            kind,
            delay,
        }
    }
}

#[async_trait]
impl ValidationGate for SlowGate {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> GateKind {
        self.kind
    }

    async fn run(&self, _change_set: &ChangeSet) -> Result<ValidationReport, GateError> {
        tokio::time::sleep(self.delay).await;
        Ok(ValidationReport::passed(&self.name, self.kind))
    }
}

/// Gate that returns a fixed report and counts its runs
#[derive(Debug)]
pub struct FixedGate {
    pub name: String,
    pub kind: GateKind,
    pub issues: Vec<Issue>,
    runs: AtomicUsize,
}

impl FixedGate {
    pub fn passing(name: &str, kind: GateKind) -> Self {
        Self::failing(name, kind, Vec::new())
    }

    pub fn failing(name: &str, kind: GateKind, issues: Vec<Issue>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            issues,
            runs: AtomicUsize::new(0),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ValidationGate for FixedGate {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> GateKind {
        self.kind
    }

    async fn run(&self, _change_set: &ChangeSet) -> Result<ValidationReport, GateError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(if self.issues.is_empty() {
            ValidationReport::passed(&self.name, self.kind)
        } else {
            ValidationReport::failed(&self.name, self.kind, self.issues.clone())
        })
    }
}

/// Applier that refuses every change set
#[derive(Debug, Default)]
pub struct FailingApplier;

#[async_trait]
impl ChangeApplier for FailingApplier {
    async fn apply(&self, change_set: &ChangeSet) -> Result<ApplyOutcome, ExecutionError> {
        Err(ExecutionError::Rejected(format!(
            "read-only workspace ({} file(s) refused)",
            change_set.len()
        )))
    }
}

/// Planner whose reasoning service is down
#[derive(Debug, Default)]
pub struct UnavailablePlanner {
    calls: AtomicUsize,
}

impl UnavailablePlanner {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModificationPlanner for UnavailablePlanner {
    async fn propose(
        &self,
        _objective: &Objective,
        _context: &ContextBundle,
    ) -> Result<ChangeSet, ProposeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProposeError::Unavailable("connection refused".to_string()))
    }
}

/// Planner that records the context bundles it receives
#[derive(Debug)]
pub struct RecordingPlanner {
    change_set: ChangeSet,
    seen: Mutex<Vec<ContextBundle>>,
}

impl RecordingPlanner {
    pub fn new(change_set: ChangeSet) -> Self {
        Self {
            change_set,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<ContextBundle> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl ModificationPlanner for RecordingPlanner {
    async fn propose(
        &self,
        _objective: &Objective,
        context: &ContextBundle,
    ) -> Result<ChangeSet, ProposeError> {
        self.seen.lock().push(context.clone());
        Ok(self.change_set.clone())
    }
}

/// Two files that pass every scripted check
pub fn clean_change_set() -> ChangeSet {
    ChangeSet::new()
        .with_file("src/greet.py", "def greet(name):\n    return name\n")
        .with_file("tests/test_greet.py", "def test_greet():\n    assert greet(\"a\") == \"a\"\n")
}

/// One file indented with tabs
pub fn tabbed_change_set() -> ChangeSet {
    ChangeSet::new().with_file("src/check.py", "def check(x):\n\tif x:\n\t\treturn 1\n")
}

/// Lint tool that flags tab indentation
pub fn tab_linter() -> Arc<dyn ValidationTool> {
    Arc::new(ScriptedTool::new(Check::Contains {
        needle: "\t".to_string(),
        issue: Issue::new("", Severity::Error, "indentation contains tabs", "E101"),
    }))
}

/// Orchestrator with a scripted planner, in-memory applier and a tab linter
pub fn orchestrator_with(
    config: OrchestratorConfig,
    planner: Arc<dyn ModificationPlanner>,
) -> Orchestrator {
    Orchestrator::new(config, planner, Arc::new(InMemoryApplier::new()))
        .unwrap()
        .with_gate(Arc::new(StyleGate::new("lint", tab_linter())))
        .with_gate(Arc::new(TestGate::new(
            "tests",
            Arc::new(ScriptedTool::new(Check::Pass)),
        )))
}

/// Orchestrator that always proposes `change_set`
pub fn setup_orchestrator(change_set: ChangeSet) -> Orchestrator {
    orchestrator_with(
        OrchestratorConfig::default(),
        Arc::new(ScriptedPlanner::always(change_set)),
    )
}
