//! Trajectory log
//!
//! Append-only audit trail of a run. Each entry is chained to its
//! predecessor by SHA-256 so a rewritten log fails `verify_integrity`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const GENESIS: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Decision point recorded in the trajectory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    /// Planning
    #[serde(rename = "Planning")]
    Planning,
    /// Executing
    #[serde(rename = "Executing")]
    Executing,
    /// Validating
    #[serde(rename = "Validating")]
    Validating,
    /// Analyzing
    #[serde(rename = "Analyzing")]
    Analyzing,
    /// Self-Healing
    #[serde(rename = "Self-Healing")]
    SelfHealing,
    /// Revalidating
    #[serde(rename = "Revalidating")]
    Revalidating,
    /// Final Decision
    #[serde(rename = "Final Decision")]
    FinalDecision,
}

impl Step {
    /// Display label
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Step::Planning => "Planning",
            Step::Executing => "Executing",
            Step::Validating => "Validating",
            Step::Analyzing => "Analyzing",
            Step::SelfHealing => "Self-Healing",
            Step::Revalidating => "Revalidating",
            Step::FinalDecision => "Final Decision",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One recorded decision point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrajectoryEntry {
    /// Step
    pub step: Step,
    /// What happened
    pub description: String,
    /// When it was recorded
    pub timestamp: DateTime<Utc>,
    /// Outcome of the work that led here, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    /// Hash of the previous entry (hex)
    pub prev_hash: String,
    /// Hash of this entry (hex)
    pub hash: String,
}

impl TrajectoryEntry {
    /// `"<Step>: <description>"`
    #[must_use]
    pub fn summary(&self) -> String {
        format!("{}: {}", self.step, self.description)
    }

    fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(self.step.label().as_bytes());
        hasher.update([0]);
        hasher.update(self.description.as_bytes());
        hasher.update([0]);
        hasher.update(self.timestamp.to_rfc3339().as_bytes());
        hasher.update([match self.success {
            None => 0,
            Some(false) => 1,
            Some(true) => 2,
        }]);
        hex::encode(hasher.finalize())
    }
}

/// Why a trajectory failed verification
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    /// Entry does not point at its predecessor
    #[error("entry {index} is not chained to its predecessor")]
    BrokenChain {
        /// Entry index
        index: usize,
    },
    /// Entry content does not match its hash
    #[error("entry {index} was modified after it was recorded")]
    Tampered {
        /// Entry index
        index: usize,
    },
}

/// Append-only trajectory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrajectoryLog {
    entries: Vec<TrajectoryEntry>,
}

impl TrajectoryLog {
    /// Empty log
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return it
    pub fn append(
        &mut self,
        step: Step,
        description: impl Into<String>,
        success: Option<bool>,
    ) -> &TrajectoryEntry {
        let prev_hash = self
            .entries
            .last()
            .map_or_else(|| GENESIS.to_string(), |e| e.hash.clone());
        let mut entry = TrajectoryEntry {
            step,
            description: description.into(),
            timestamp: Utc::now(),
            success,
            prev_hash,
            hash: String::new(),
        };
        entry.hash = entry.compute_hash();
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    /// Entries in order
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[TrajectoryEntry] {
        &self.entries
    }

    /// Most recent entry
    #[inline]
    #[must_use]
    pub fn last(&self) -> Option<&TrajectoryEntry> {
        self.entries.last()
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries for `step`
    #[must_use]
    pub fn count(&self, step: Step) -> usize {
        self.entries.iter().filter(|e| e.step == step).count()
    }

    /// Human-readable lines
    #[must_use]
    pub fn summaries(&self) -> Vec<String> {
        self.entries.iter().map(TrajectoryEntry::summary).collect()
    }

    /// Verify the hash chain
    ///
    /// # Errors
    /// `IntegrityError` naming the first entry that does not verify
    pub fn verify_integrity(&self) -> Result<(), IntegrityError> {
        let mut prev = GENESIS;
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.prev_hash != prev {
                return Err(IntegrityError::BrokenChain { index });
            }
            if entry.hash != entry.compute_hash() {
                return Err(IntegrityError::Tampered { index });
            }
            prev = entry.hash.as_str();
        }
        Ok(())
    }
}
