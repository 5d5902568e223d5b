//! Reasoning service interface
//!
//! The engine only needs `complete(prompt, bundle)`. Transport, model choice
//! and prompting strategy belong to the implementation.

use crate::context::ContextBundle;
use crate::error::ReasoningError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Shape of a completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionKind {
    /// Whole-file plan
    Plan,
    /// File-level diff
    Diff,
    /// Free-form analysis (carries no changes)
    Analysis,
}

/// Structured completion returned by the reasoning service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// Completion kind
    pub kind: CompletionKind,
    /// Kind-specific payload
    pub payload: serde_json::Value,
}

impl Completion {
    /// Plan completion proposing whole-file contents
    #[must_use]
    pub fn plan<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        let files: serde_json::Map<String, serde_json::Value> = files
            .into_iter()
            .map(|(p, c)| (p.into(), serde_json::Value::String(c.into())))
            .collect();
        Self {
            kind: CompletionKind::Plan,
            payload: serde_json::json!({ "files": files }),
        }
    }

    /// Analysis completion
    #[must_use]
    pub fn analysis(text: impl Into<String>) -> Self {
        Self {
            kind: CompletionKind::Analysis,
            payload: serde_json::Value::String(text.into()),
        }
    }
}

/// External reasoning service
#[async_trait]
pub trait ReasoningService: Send + Sync + std::fmt::Debug {
    /// Complete `prompt` using the given bounded context
    ///
    /// # Errors
    /// `ReasoningError::Unavailable` on transport failure,
    /// `ReasoningError::Malformed` when the response has no usable shape
    async fn complete(
        &self,
        prompt: &str,
        context: &ContextBundle,
    ) -> Result<Completion, ReasoningError>;
}
