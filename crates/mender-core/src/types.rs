//! Core types for Mender
//!
//! Defines the values that flow through one orchestration run:
//! - Run identifiers
//! - The immutable objective
//! - Change sets proposed by the planner
//! - Issues, per-gate validation reports and the aggregated run result

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use ulid::Ulid;

/// Rule id of the synthetic issue recorded for a gate that exceeded its timeout
pub const RULE_TIMEOUT: &str = "timeout";

/// Rule id of the synthetic issue recorded for a gate that errored or panicked
pub const RULE_INTERNAL_ERROR: &str = "internal-error";

/// Unique run identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Requested change (created once per run, never mutated)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Objective {
    /// Natural language task description
    pub task: String,
    /// Constraints the modification must respect
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Names of the gates to run; empty means every configured gate
    #[serde(default)]
    pub quality_gates: Vec<String>,
    /// Files or modules the change is expected to touch
    #[serde(default)]
    pub targets: Vec<String>,
}

impl Objective {
    /// Create new objective
    #[inline]
    #[must_use]
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            constraints: Vec::new(),
            quality_gates: Vec::new(),
            targets: Vec::new(),
        }
    }

    /// Copy of this objective with one more constraint appended
    #[inline]
    #[must_use]
    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    /// Restrict the run to the named gates
    #[inline]
    #[must_use]
    pub fn with_quality_gates<I, S>(mut self, gates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.quality_gates = gates.into_iter().map(Into::into).collect();
        self
    }

    /// With target paths
    #[inline]
    #[must_use]
    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    /// An objective needs non-blank task text to be planned
    #[inline]
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        !self.task.trim().is_empty()
    }

    /// Text used to query knowledge sources
    #[must_use]
    pub fn query_text(&self) -> String {
        if self.constraints.is_empty() {
            self.task.clone()
        } else {
            format!("{} ({})", self.task, self.constraints.join("; "))
        }
    }
}

/// Proposed file modifications, keyed by path in proposal order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet {
    files: IndexMap<String, String>,
}

impl ChangeSet {
    /// Create empty change set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With file content
    #[inline]
    #[must_use]
    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.insert(path, content);
        self
    }

    /// Insert or replace the content proposed for `path`
    ///
    /// Replacing keeps the original position of the path.
    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<String>) -> Option<String> {
        self.files.insert(path.into(), content.into())
    }

    /// Proposed content for `path`
    #[inline]
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    /// Whether `path` is part of the change
    #[inline]
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Paths in proposal order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// `(path, content)` pairs in proposal order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    /// Number of files touched
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if nothing is proposed
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Overlay `other` on top of this change set
    ///
    /// Paths already present are replaced in place, new paths are appended.
    #[must_use]
    pub fn merged(mut self, other: ChangeSet) -> Self {
        for (path, content) in other.files {
            self.files.insert(path, content);
        }
        self
    }

    /// Total number of characters across all proposed contents
    #[must_use]
    pub fn total_chars(&self) -> usize {
        self.files.values().map(|c| c.chars().count()).sum()
    }
}

impl FromIterator<(String, String)> for ChangeSet {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational
    Info,
    /// Should be fixed
    Warning,
    /// Must be fixed
    Error,
    /// Blocks any automated action
    Critical,
}

/// A single finding reported by a gate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Issue {
    /// Where the issue was found (`path` or `path:line`)
    pub location: String,
    /// Severity
    pub severity: Severity,
    /// Human-readable message
    pub message: String,
    /// Tool rule identifier
    pub rule_id: String,
}

impl Issue {
    /// Create new issue
    #[inline]
    #[must_use]
    pub fn new(
        location: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
        rule_id: impl Into<String>,
    ) -> Self {
        Self {
            location: location.into(),
            severity,
            message: message.into(),
            rule_id: rule_id.into(),
        }
    }

    /// Synthetic issue for a gate that did not finish in time
    #[must_use]
    pub fn timeout(gate_name: &str, timeout: Duration) -> Self {
        Self::new(
            gate_name,
            Severity::Error,
            format!("gate '{gate_name}' did not complete within {}ms", timeout.as_millis()),
            RULE_TIMEOUT,
        )
    }

    /// Synthetic issue for a gate that failed internally
    #[must_use]
    pub fn internal_error(gate_name: &str, detail: impl std::fmt::Display) -> Self {
        Self::new(
            gate_name,
            Severity::Error,
            format!("gate '{gate_name}' failed internally: {detail}"),
            RULE_INTERNAL_ERROR,
        )
    }

    /// File path part of the location
    #[inline]
    #[must_use]
    pub fn path(&self) -> &str {
        self.location
            .split_once(':')
            .map_or(self.location.as_str(), |(path, _)| path)
    }

    /// Whether this issue was synthesized by the orchestrator
    #[inline]
    #[must_use]
    pub fn is_synthetic(&self) -> bool {
        self.rule_id == RULE_TIMEOUT || self.rule_id == RULE_INTERNAL_ERROR
    }
}

/// Quality dimension a gate checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateKind {
    /// Style / lint checks
    Style,
    /// Test execution
    Test,
    /// Vulnerability and policy scanning
    Security,
    /// Operational readiness (performance, resources, deployability)
    Operational,
}

impl std::fmt::Display for GateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GateKind::Style => "style",
            GateKind::Test => "test",
            GateKind::Security => "security",
            GateKind::Operational => "operational",
        };
        f.write_str(name)
    }
}

/// Result of one gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Gate name
    pub gate_name: String,
    /// Gate kind
    pub gate_kind: GateKind,
    /// Whether the gate passed
    pub passed: bool,
    /// Findings
    pub issues: Vec<Issue>,
    /// Wall-clock time spent in the gate
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl ValidationReport {
    /// Passing report
    #[inline]
    #[must_use]
    pub fn passed(gate_name: impl Into<String>, gate_kind: GateKind) -> Self {
        Self {
            gate_name: gate_name.into(),
            gate_kind,
            passed: true,
            issues: Vec::new(),
            elapsed_ms: 0,
        }
    }

    /// Failing report with issues
    #[inline]
    #[must_use]
    pub fn failed(gate_name: impl Into<String>, gate_kind: GateKind, issues: Vec<Issue>) -> Self {
        Self {
            gate_name: gate_name.into(),
            gate_kind,
            passed: false,
            issues,
            elapsed_ms: 0,
        }
    }

    /// Failing report carrying a synthetic `timeout` issue
    #[must_use]
    pub fn timed_out(gate_name: impl Into<String>, gate_kind: GateKind, timeout: Duration) -> Self {
        let gate_name = gate_name.into();
        let issue = Issue::timeout(&gate_name, timeout);
        let mut report = Self::failed(gate_name, gate_kind, vec![issue]);
        report.elapsed_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        report
    }

    /// Failing report carrying a synthetic `internal-error` issue
    #[must_use]
    pub fn internal_error(
        gate_name: impl Into<String>,
        gate_kind: GateKind,
        detail: impl std::fmt::Display,
    ) -> Self {
        let gate_name = gate_name.into();
        let issue = Issue::internal_error(&gate_name, detail);
        Self::failed(gate_name, gate_kind, vec![issue])
    }

    /// With elapsed time
    #[inline]
    #[must_use]
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

/// Aggregated result of one validation step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// True iff every report passed
    pub passed: bool,
    /// Per-gate reports, in gate registration order
    pub reports: Vec<ValidationReport>,
}

impl RunResult {
    /// Aggregate reports (AND over `passed`)
    #[must_use]
    pub fn from_reports(reports: Vec<ValidationReport>) -> Self {
        let passed = reports.iter().all(|r| r.passed);
        Self { passed, reports }
    }

    /// Reports of the gates that failed
    pub fn failed_reports(&self) -> impl Iterator<Item = &ValidationReport> {
        self.reports.iter().filter(|r| !r.passed)
    }

    /// Union of issues across failed reports, with the kind of gate that raised each
    pub fn failed_issues(&self) -> impl Iterator<Item = (GateKind, &Issue)> {
        self.failed_reports()
            .flat_map(|r| r.issues.iter().map(move |i| (r.gate_kind, i)))
    }

    /// Names of the failed gates
    #[must_use]
    pub fn failed_gate_names(&self) -> Vec<&str> {
        self.failed_reports().map(|r| r.gate_name.as_str()).collect()
    }

    /// Report for a named gate
    #[must_use]
    pub fn report(&self, gate_name: &str) -> Option<&ValidationReport> {
        self.reports.iter().find(|r| r.gate_name == gate_name)
    }

    /// Total issue count across failed reports
    #[must_use]
    pub fn issue_count(&self) -> usize {
        self.failed_reports().map(|r| r.issues.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_generation() {
        let id1 = RunId::new();
        let id2 = RunId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn objective_builder() {
        let objective = Objective::new("add type hints")
            .with_constraint("keep public API")
            .with_quality_gates(["lint", "tests"])
            .with_targets(["src/lib.py"]);

        assert_eq!(objective.constraints, vec!["keep public API"]);
        assert_eq!(objective.quality_gates.len(), 2);
        assert_eq!(objective.query_text(), "add type hints (keep public API)");
        assert!(objective.is_actionable());
        assert!(!Objective::new("   ").is_actionable());
    }

    #[test]
    fn change_set_preserves_proposal_order() {
        let change_set = ChangeSet::new()
            .with_file("b.rs", "b")
            .with_file("a.rs", "a")
            .with_file("b.rs", "b2");

        let paths: Vec<_> = change_set.paths().collect();
        assert_eq!(paths, vec!["b.rs", "a.rs"]);
        assert_eq!(change_set.get("b.rs"), Some("b2"));
        assert_eq!(change_set.total_chars(), 3);
    }

    #[test]
    fn change_set_merge_overlays() {
        let base = ChangeSet::new().with_file("src/a.rs", "old").with_file("src/b.rs", "keep");
        let patch = ChangeSet::new().with_file("src/a.rs", "new").with_file("tests/t.rs", "t");

        let merged = base.merged(patch);
        let paths: Vec<_> = merged.paths().collect();
        assert_eq!(paths, vec!["src/a.rs", "src/b.rs", "tests/t.rs"]);
        assert_eq!(merged.get("src/a.rs"), Some("new"));
    }

    #[test]
    fn issue_path_strips_line() {
        let issue = Issue::new("src/main.py:12", Severity::Error, "bad", "E999");
        assert_eq!(issue.path(), "src/main.py");

        let bare = Issue::new("src/main.py", Severity::Error, "bad", "E999");
        assert_eq!(bare.path(), "src/main.py");
    }

    #[test]
    fn run_result_and_aggregation() {
        let ok = RunResult::from_reports(vec![
            ValidationReport::passed("lint", GateKind::Style),
            ValidationReport::passed("tests", GateKind::Test),
        ]);
        assert!(ok.passed);

        let failing = RunResult::from_reports(vec![
            ValidationReport::passed("lint", GateKind::Style),
            ValidationReport::timed_out("tests", GateKind::Test, Duration::from_millis(50)),
        ]);
        assert!(!failing.passed);
        assert_eq!(failing.failed_gate_names(), vec!["tests"]);
        assert_eq!(failing.issue_count(), 1);

        let (kind, issue) = failing.failed_issues().next().unwrap();
        assert_eq!(kind, GateKind::Test);
        assert_eq!(issue.rule_id, RULE_TIMEOUT);
        assert!(issue.is_synthetic());
    }

    #[test]
    fn empty_run_result_passes() {
        assert!(RunResult::from_reports(Vec::new()).passed);
    }
}
