//! Run budget
//!
//! Counters that bound a single orchestration run. They belong to one run
//! only, so no locking is involved. Every counter is monotonically
//! non-increasing once the run starts.

use crate::config::OrchestratorConfig;
use crate::error::BudgetExhausted;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Which budget counter ran out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BudgetKind {
    /// Calls to the reasoning service (planning and recovery)
    ReasoningCalls,
    /// Characters of context injected across the run
    ContextChars,
    /// Healing attempts
    RecoveryAttempts,
    /// Wall-clock duration of the run
    WallClock,
}

impl std::fmt::Display for BudgetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BudgetKind::ReasoningCalls => "reasoning-calls",
            BudgetKind::ContextChars => "context-chars",
            BudgetKind::RecoveryAttempts => "recovery-attempts",
            BudgetKind::WallClock => "wall-clock",
        };
        f.write_str(name)
    }
}

/// Bounds for one run
#[derive(Debug, Clone)]
pub struct RunBudget {
    reasoning_calls: u32,
    context_chars: usize,
    recovery_attempts: u32,
    wall_clock: Duration,
    started: Option<Instant>,
}

impl RunBudget {
    /// Create new budget
    #[inline]
    #[must_use]
    pub fn new(
        reasoning_calls: u32,
        context_chars: usize,
        recovery_attempts: u32,
        wall_clock: Duration,
    ) -> Self {
        Self {
            reasoning_calls,
            context_chars,
            recovery_attempts,
            wall_clock,
            started: None,
        }
    }

    /// Budget with the limits from configuration
    #[must_use]
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(
            config.max_reasoning_calls,
            config.max_context_chars,
            config.max_recovery_attempts,
            config.run_timeout(),
        )
    }

    /// With recovery attempts
    #[inline]
    #[must_use]
    pub fn with_recovery_attempts(mut self, attempts: u32) -> Self {
        self.recovery_attempts = attempts;
        self
    }

    /// With reasoning calls
    #[inline]
    #[must_use]
    pub fn with_reasoning_calls(mut self, calls: u32) -> Self {
        self.reasoning_calls = calls;
        self
    }

    /// With run-wide context characters
    #[inline]
    #[must_use]
    pub fn with_context_chars(mut self, chars: usize) -> Self {
        self.context_chars = chars;
        self
    }

    /// With wall-clock limit
    #[inline]
    #[must_use]
    pub fn with_wall_clock(mut self, wall_clock: Duration) -> Self {
        self.wall_clock = wall_clock;
        self
    }

    /// Start the wall clock (idempotent)
    pub fn start(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
    }

    /// Remaining reasoning calls
    #[inline]
    #[must_use]
    pub fn reasoning_calls(&self) -> u32 {
        self.reasoning_calls
    }

    /// Remaining context characters
    #[inline]
    #[must_use]
    pub fn context_chars(&self) -> usize {
        self.context_chars
    }

    /// Remaining recovery attempts
    #[inline]
    #[must_use]
    pub fn recovery_attempts(&self) -> u32 {
        self.recovery_attempts
    }

    /// Remaining wall-clock time (full allowance before `start`)
    #[must_use]
    pub fn remaining_time(&self) -> Duration {
        match self.started {
            Some(started) => self.wall_clock.saturating_sub(started.elapsed()),
            None => self.wall_clock,
        }
    }

    /// Check the wall clock
    ///
    /// # Errors
    /// `BudgetExhausted(WallClock)` once the run deadline has passed
    pub fn check_deadline(&self) -> Result<(), BudgetExhausted> {
        if self.remaining_time().is_zero() {
            Err(BudgetExhausted(BudgetKind::WallClock))
        } else {
            Ok(())
        }
    }

    /// Take one reasoning call
    ///
    /// # Errors
    /// `BudgetExhausted(ReasoningCalls)` when none remain
    pub fn consume_reasoning_call(&mut self) -> Result<(), BudgetExhausted> {
        if self.reasoning_calls == 0 {
            return Err(BudgetExhausted(BudgetKind::ReasoningCalls));
        }
        self.reasoning_calls -= 1;
        Ok(())
    }

    /// Largest bundle a single call may receive given a per-call ceiling
    ///
    /// # Errors
    /// `BudgetExhausted(ContextChars)` when the run-wide allowance is spent
    pub fn context_ceiling(&self, per_call_ceiling: usize) -> Result<usize, BudgetExhausted> {
        if self.context_chars == 0 {
            return Err(BudgetExhausted(BudgetKind::ContextChars));
        }
        Ok(per_call_ceiling.min(self.context_chars))
    }

    /// Charge injected context against the run-wide allowance
    pub fn consume_context(&mut self, chars: usize) {
        self.context_chars = self.context_chars.saturating_sub(chars);
    }

    /// Take one recovery attempt, returning false when none remain
    pub fn consume_recovery_attempt(&mut self) -> bool {
        if self.recovery_attempts == 0 {
            return false;
        }
        self.recovery_attempts -= 1;
        true
    }
}

impl Default for RunBudget {
    fn default() -> Self {
        Self::from_config(&OrchestratorConfig::default())
    }
}
