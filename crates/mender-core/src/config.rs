//! Orchestrator configuration
//!
//! Loaded from TOML or YAML (chosen by file extension). Every key is
//! optional; missing keys take the defaults below.

use crate::context::{ContextCaps, ContextCategory};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Healing attempts per run
    pub max_recovery_attempts: u32,
    /// Uniform number of context items per category (unset keeps the built-in table)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_category_context_cap: Option<usize>,
    /// Character ceiling of a single context bundle
    pub overall_context_char_cap: usize,
    /// Characters kept from any single snippet
    pub snippet_char_limit: usize,
    /// Per-gate timeout
    pub gate_timeout_ms: u64,
    /// Whole-run wall-clock limit
    pub run_timeout_ms: u64,
    /// Per reasoning call timeout
    pub reasoning_timeout_ms: u64,
    /// Reasoning calls per run (planning and recovery)
    pub max_reasoning_calls: u32,
    /// Context characters injected across a whole run
    pub max_context_chars: usize,
    /// Planner attempts before planning is declared failed
    pub planning_attempts: u32,
    /// Lowest matcher confidence the classifier accepts
    pub min_confidence: f64,
    /// Confidence a performance failure needs before it is healed
    pub performance_recovery_confidence: f64,
    /// Per-category overrides, keyed by category name
    pub category_caps: BTreeMap<String, usize>,
}

impl OrchestratorConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With max recovery attempts
    #[inline]
    #[must_use]
    pub fn with_max_recovery_attempts(mut self, attempts: u32) -> Self {
        self.max_recovery_attempts = attempts;
        self
    }

    /// With per-category context cap
    #[inline]
    #[must_use]
    pub fn with_per_category_context_cap(mut self, cap: usize) -> Self {
        self.per_category_context_cap = Some(cap);
        self.category_caps.clear();
        self
    }

    /// With overall context ceiling
    #[inline]
    #[must_use]
    pub fn with_overall_context_char_cap(mut self, cap: usize) -> Self {
        self.overall_context_char_cap = cap;
        self
    }

    /// With gate timeout
    #[inline]
    #[must_use]
    pub fn with_gate_timeout(mut self, timeout: Duration) -> Self {
        self.gate_timeout_ms = duration_ms(timeout);
        self
    }

    /// With run timeout
    #[inline]
    #[must_use]
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout_ms = duration_ms(timeout);
        self
    }

    /// With reasoning call timeout
    #[inline]
    #[must_use]
    pub fn with_reasoning_timeout(mut self, timeout: Duration) -> Self {
        self.reasoning_timeout_ms = duration_ms(timeout);
        self
    }

    /// With planning attempts
    #[inline]
    #[must_use]
    pub fn with_planning_attempts(mut self, attempts: u32) -> Self {
        self.planning_attempts = attempts;
        self
    }

    /// Gate timeout
    #[inline]
    #[must_use]
    pub fn gate_timeout(&self) -> Duration {
        Duration::from_millis(self.gate_timeout_ms)
    }

    /// Run timeout
    #[inline]
    #[must_use]
    pub fn run_timeout(&self) -> Duration {
        Duration::from_millis(self.run_timeout_ms)
    }

    /// Reasoning call timeout
    #[inline]
    #[must_use]
    pub fn reasoning_timeout(&self) -> Duration {
        Duration::from_millis(self.reasoning_timeout_ms)
    }

    /// Context caps derived from this configuration
    ///
    /// # Errors
    /// `ConfigError::Invalid` for an unknown category name
    pub fn context_caps(&self) -> Result<ContextCaps, ConfigError> {
        let mut caps = match self.per_category_context_cap {
            Some(cap) => ContextCaps::uniform(cap),
            None => ContextCaps::default(),
        };
        for (name, cap) in &self.category_caps {
            let category = ContextCategory::from_str(name)
                .map_err(|e| ConfigError::invalid("category_caps", e))?;
            caps = caps.with_cap(category, *cap);
        }
        Ok(caps
            .with_overall_chars(self.overall_context_char_cap)
            .with_snippet_chars(self.snippet_char_limit))
    }

    /// Check value ranges
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the first offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gate_timeout_ms == 0 {
            return Err(ConfigError::invalid("gate_timeout_ms", "must be greater than zero"));
        }
        if self.run_timeout_ms == 0 {
            return Err(ConfigError::invalid("run_timeout_ms", "must be greater than zero"));
        }
        if self.reasoning_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "reasoning_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.planning_attempts == 0 {
            return Err(ConfigError::invalid("planning_attempts", "must be at least 1"));
        }
        if self.overall_context_char_cap == 0 {
            return Err(ConfigError::invalid(
                "overall_context_char_cap",
                "must be greater than zero",
            ));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::invalid(
                "min_confidence",
                format!("{} is outside [0, 1]", self.min_confidence),
            ));
        }
        if !(0.0..=1.0).contains(&self.performance_recovery_confidence) {
            return Err(ConfigError::invalid(
                "performance_recovery_confidence",
                format!("{} is outside [0, 1]", self.performance_recovery_confidence),
            ));
        }
        self.context_caps().map(|_| ())
    }

    /// Parse TOML text
    ///
    /// # Errors
    /// `ConfigError::Parse` or a validation error
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML text
    ///
    /// # Errors
    /// `ConfigError::Parse` or a validation error
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.toml`, `.yaml` or `.yml` file
    ///
    /// # Errors
    /// IO, format, parse or validation errors
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&text),
            Some("yaml" | "yml") => Self::from_yaml_str(&text),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or_default().to_string(),
            )),
        }
    }

    /// Render as TOML
    ///
    /// # Errors
    /// `ConfigError::Parse` if serialization fails
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_recovery_attempts: 2,
            per_category_context_cap: None,
            overall_context_char_cap: 6_000,
            snippet_char_limit: 800,
            gate_timeout_ms: 60_000,
            run_timeout_ms: 600_000,
            reasoning_timeout_ms: 120_000,
            max_reasoning_calls: 12,
            max_context_chars: 60_000,
            planning_attempts: 3,
            min_confidence: 0.5,
            performance_recovery_confidence: 0.6,
            category_caps: BTreeMap::new(),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
