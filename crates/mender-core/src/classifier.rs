//! Failure classification
//!
//! Maps a failed `RunResult` to a `FailurePattern`. Matchers are ordered by
//! explicit priority (highest first, ties broken by name); the first match
//! whose confidence reaches the classifier's threshold wins. Classification
//! is a pure function of the issues of the failed reports.

use crate::types::{GateKind, Issue, RunResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureCategory {
    /// Structural or compile-level breakage
    Syntax,
    /// Failing test assertions
    TestLogic,
    /// Resource or latency thresholds exceeded
    Performance,
    /// Vulnerability or policy violation
    Security,
    /// Nothing recognisable
    Unknown,
}

impl FailureCategory {
    /// Stable name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Syntax => "syntax",
            FailureCategory::TestLogic => "test-logic",
            FailureCategory::Performance => "performance",
            FailureCategory::Security => "security",
            FailureCategory::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "syntax" => Ok(FailureCategory::Syntax),
            "test-logic" => Ok(FailureCategory::TestLogic),
            "performance" => Ok(FailureCategory::Performance),
            "security" => Ok(FailureCategory::Security),
            "unknown" => Ok(FailureCategory::Unknown),
            other => Err(format!("unknown failure category '{other}'")),
        }
    }
}

/// Classified failure
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FailurePattern {
    /// Category
    pub category: FailureCategory,
    /// Confidence in [0, 1]
    pub confidence: f64,
}

impl FailurePattern {
    /// Create new pattern (confidence is clamped to [0, 1])
    #[inline]
    #[must_use]
    pub fn new(category: FailureCategory, confidence: f64) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            category,
            confidence,
        }
    }

    /// Fallback when no matcher fires
    #[inline]
    #[must_use]
    pub fn unknown() -> Self {
        Self::new(FailureCategory::Unknown, 0.0)
    }
}

impl std::fmt::Display for FailurePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ {:.2}", self.category, self.confidence)
    }
}

/// Issue from a failed report, with the kind of gate that raised it
pub type FailedIssue<'a> = (GateKind, &'a Issue);

/// One classification rule
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Matcher name (tie-breaker between equal priorities)
    fn name(&self) -> &str;

    /// Higher runs first
    fn priority(&self) -> u32;

    /// Pattern if this rule recognises the failure
    fn matches(&self, issues: &[FailedIssue<'_>]) -> Option<FailurePattern>;
}

static SECURITY_RULE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(security|sec[-_.:/]|cwe-\d+|cve-|vuln)").expect("valid security rule regex")
});

static SYNTAX_RULE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(syntax|parse|compile|^e9\d\d$|^e1\d\d$)").expect("valid syntax rule regex")
});

static SYNTAX_MESSAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(syntax ?error|unexpected (token|indent|eof)|invalid syntax)")
        .expect("valid syntax message regex")
});

static ASSERTION_MESSAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(assert|expected .+ (but )?(got|found|was)|left\s*==\s*right|mismatch)")
        .expect("valid assertion regex")
});

static PERFORMANCE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(perf(ormance)?\d*|latency|slow(er|est)?|memory|cpu|resources?|throughput|thresholds?|exceed(s|ed)?|budget)\b",
    )
    .expect("valid performance marker regex")
});

/// Security gate findings or security-namespace rule ids
///
/// Scanner codes such as bandit's `B105` only count when a security gate
/// reports them; the same shape is an ordinary lint code elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityMatcher;

impl Matcher for SecurityMatcher {
    fn name(&self) -> &str {
        "security"
    }

    fn priority(&self) -> u32 {
        100
    }

    fn matches(&self, issues: &[FailedIssue<'_>]) -> Option<FailurePattern> {
        issues
            .iter()
            .any(|(kind, issue)| {
                !issue.is_synthetic()
                    && (*kind == GateKind::Security || SECURITY_RULE.is_match(&issue.rule_id))
            })
            .then(|| FailurePattern::new(FailureCategory::Security, 1.0))
    }
}

/// Structural or compile-level rule ids
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntaxMatcher;

impl Matcher for SyntaxMatcher {
    fn name(&self) -> &str {
        "syntax"
    }

    fn priority(&self) -> u32 {
        80
    }

    fn matches(&self, issues: &[FailedIssue<'_>]) -> Option<FailurePattern> {
        issues
            .iter()
            .any(|(_, issue)| {
                !issue.is_synthetic()
                    && (SYNTAX_RULE.is_match(&issue.rule_id) || SYNTAX_MESSAGE.is_match(&issue.message))
            })
            .then(|| FailurePattern::new(FailureCategory::Syntax, 0.9))
    }
}

/// Test gate findings with assertion-style messages
#[derive(Debug, Clone, Copy, Default)]
pub struct TestLogicMatcher;

impl Matcher for TestLogicMatcher {
    fn name(&self) -> &str {
        "test-logic"
    }

    fn priority(&self) -> u32 {
        60
    }

    fn matches(&self, issues: &[FailedIssue<'_>]) -> Option<FailurePattern> {
        issues
            .iter()
            .any(|(kind, issue)| {
                *kind == GateKind::Test
                    && !issue.is_synthetic()
                    && ASSERTION_MESSAGE.is_match(&issue.message)
            })
            .then(|| FailurePattern::new(FailureCategory::TestLogic, 0.8))
    }
}

/// Resource or latency thresholds exceeded
///
/// Synthetic `timeout` / `internal-error` issues describe the gate, not the
/// change, and never count as evidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerformanceMatcher;

impl Matcher for PerformanceMatcher {
    fn name(&self) -> &str {
        "performance"
    }

    fn priority(&self) -> u32 {
        40
    }

    fn matches(&self, issues: &[FailedIssue<'_>]) -> Option<FailurePattern> {
        let mut evidence = issues.iter().filter(|(_, issue)| {
            !issue.is_synthetic()
                && (PERFORMANCE_MARKER.is_match(&issue.rule_id)
                    || PERFORMANCE_MARKER.is_match(&issue.message))
        });
        let first = evidence.next()?;
        let operational = first.0 == GateKind::Operational
            || evidence.any(|(kind, _)| *kind == GateKind::Operational);
        let confidence = if operational { 0.7 } else { 0.6 };
        Some(FailurePattern::new(FailureCategory::Performance, confidence))
    }
}

/// Ordered set of matchers
#[derive(Debug)]
pub struct FailureClassifier {
    matchers: Vec<Box<dyn Matcher>>,
    min_confidence: f64,
}

impl FailureClassifier {
    /// Empty classifier (everything is `unknown`)
    #[inline]
    #[must_use]
    pub fn new(min_confidence: f64) -> Self {
        Self {
            matchers: Vec::new(),
            min_confidence,
        }
    }

    /// Classifier with the built-in matchers
    #[must_use]
    pub fn with_defaults(min_confidence: f64) -> Self {
        Self::new(min_confidence)
            .with_matcher(Box::new(SecurityMatcher))
            .with_matcher(Box::new(SyntaxMatcher))
            .with_matcher(Box::new(TestLogicMatcher))
            .with_matcher(Box::new(PerformanceMatcher))
    }

    /// Add a matcher, keeping priority order
    #[must_use]
    pub fn with_matcher(mut self, matcher: Box<dyn Matcher>) -> Self {
        self.matchers.push(matcher);
        self.matchers.sort_by(|a, b| {
            b.priority()
                .cmp(&a.priority())
                .then_with(|| a.name().cmp(b.name()))
        });
        self
    }

    /// Matcher names in evaluation order
    #[must_use]
    pub fn matcher_names(&self) -> Vec<&str> {
        self.matchers.iter().map(|m| m.name()).collect()
    }

    /// Confidence threshold
    #[inline]
    #[must_use]
    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }

    /// Classify a run result
    #[must_use]
    pub fn classify(&self, result: &RunResult) -> FailurePattern {
        let issues: Vec<FailedIssue<'_>> = result.failed_issues().collect();
        if issues.is_empty() {
            return FailurePattern::unknown();
        }

        for matcher in &self.matchers {
            if let Some(pattern) = matcher.matches(&issues) {
                if pattern.confidence >= self.min_confidence {
                    tracing::debug!(matcher = matcher.name(), %pattern, "failure classified");
                    return pattern;
                }
                tracing::trace!(matcher = matcher.name(), %pattern, "match below confidence threshold");
            }
        }
        FailurePattern::unknown()
    }
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::with_defaults(0.5)
    }
}
