//! Modification planning
//!
//! A planner turns an objective plus a context bundle into a `ChangeSet`.
//! `ReasoningPlanner` is the adapter that does so through a
//! `ReasoningService`.

use crate::context::ContextBundle;
use crate::error::ProposeError;
use crate::reasoning::{CompletionKind, ReasoningService};
use crate::types::{ChangeSet, Objective};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt::Write as _;
use std::sync::Arc;

/// Produces change sets for objectives
///
/// Implementations hold no per-run state; the orchestrator applies timeouts
/// and budget accounting around every call.
#[async_trait]
pub trait ModificationPlanner: Send + Sync + std::fmt::Debug {
    /// Propose a change set
    ///
    /// # Errors
    /// `ProposeError::Unavailable` if the reasoning backend is unreachable,
    /// `ProposeError::Unusable` if the proposal cannot be used
    async fn propose(
        &self,
        objective: &Objective,
        context: &ContextBundle,
    ) -> Result<ChangeSet, ProposeError>;
}

#[derive(Debug, Deserialize)]
struct FilesPayload {
    files: ChangeSet,
}

/// Planner backed by a reasoning service
///
/// Accepts `plan` or `diff` completions whose payload is
/// `{"files": {"<path>": "<content>"}}`.
#[derive(Debug, Clone)]
pub struct ReasoningPlanner {
    service: Arc<dyn ReasoningService>,
}

impl ReasoningPlanner {
    /// Create new planner
    #[inline]
    #[must_use]
    pub fn new(service: Arc<dyn ReasoningService>) -> Self {
        Self { service }
    }

    /// Prompt for one planning call
    #[must_use]
    pub fn prompt(objective: &Objective, context: &ContextBundle) -> String {
        let mut prompt = format!("# Task\n{}\n", objective.task);
        if !objective.constraints.is_empty() {
            prompt.push_str("\n# Constraints\n");
            for constraint in &objective.constraints {
                let _ = writeln!(prompt, "- {constraint}");
            }
        }
        if !objective.targets.is_empty() {
            let _ = write!(prompt, "\n# Targets\n{}\n", objective.targets.join(", "));
        }
        if !context.is_empty() {
            let _ = write!(prompt, "\n# Project context\n{}", context.render());
        }
        prompt.push_str("\nRespond with {\"files\": {\"<path>\": \"<full content>\"}}.\n");
        prompt
    }
}

#[async_trait]
impl ModificationPlanner for ReasoningPlanner {
    async fn propose(
        &self,
        objective: &Objective,
        context: &ContextBundle,
    ) -> Result<ChangeSet, ProposeError> {
        let prompt = Self::prompt(objective, context);
        let completion = self.service.complete(&prompt, context).await?;

        match completion.kind {
            CompletionKind::Plan | CompletionKind::Diff => {}
            CompletionKind::Analysis => {
                return Err(ProposeError::Unusable(
                    "analysis completion carries no changes".to_string(),
                ));
            }
        }

        let payload: FilesPayload = serde_json::from_value(completion.payload)
            .map_err(|e| ProposeError::Unusable(format!("unparseable payload: {e}")))?;
        if payload.files.is_empty() {
            return Err(ProposeError::Unusable("empty change set".to_string()));
        }
        Ok(payload.files)
    }
}
