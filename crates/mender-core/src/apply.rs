//! Change application
//!
//! Materializes a `ChangeSet`. The filesystem applier writes under a project
//! root and refuses any path that could escape it.

use crate::error::ExecutionError;
use crate::types::ChangeSet;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Paths written by one application
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    /// Paths in application order
    pub applied_paths: Vec<String>,
}

/// Materializes change sets
#[async_trait]
pub trait ChangeApplier: Send + Sync + std::fmt::Debug {
    /// Apply every file in `change_set`
    ///
    /// # Errors
    /// Any `ExecutionError`; the orchestrator treats all of them as fatal
    async fn apply(&self, change_set: &ChangeSet) -> Result<ApplyOutcome, ExecutionError>;
}

/// Writes change sets to disk under a root directory
#[derive(Debug, Clone)]
pub struct FsChangeApplier {
    root: PathBuf,
}

impl FsChangeApplier {
    /// Create new applier rooted at `root`
    #[inline]
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Project root
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a change-set path against the root
    ///
    /// # Errors
    /// `ExecutionError::InvalidPath` for empty, absolute or parent-relative paths
    pub fn resolve(&self, path: &str) -> Result<PathBuf, ExecutionError> {
        let relative = Path::new(path);
        if path.trim().is_empty() {
            return Err(ExecutionError::InvalidPath("empty path".to_string()));
        }
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(ExecutionError::InvalidPath(path.to_string()));
                }
            }
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ChangeApplier for FsChangeApplier {
    async fn apply(&self, change_set: &ChangeSet) -> Result<ApplyOutcome, ExecutionError> {
        // Resolve everything first so a bad path leaves the tree untouched.
        let mut resolved = Vec::with_capacity(change_set.len());
        for (path, content) in change_set.iter() {
            resolved.push((path, self.resolve(path)?, content));
        }

        let mut outcome = ApplyOutcome::default();
        for (path, target, content) in resolved {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ExecutionError::io_error(parent, e))?;
            }
            tokio::fs::write(&target, content)
                .await
                .map_err(|e| ExecutionError::io_error(&target, e))?;
            tracing::debug!(path, "applied file");
            outcome.applied_paths.push(path.to_string());
        }
        Ok(outcome)
    }
}

/// Records applied change sets without touching disk (dry runs)
#[derive(Debug, Default)]
pub struct InMemoryApplier {
    history: Mutex<Vec<ChangeSet>>,
}

impl InMemoryApplier {
    /// Create new applier
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every change set applied so far
    #[must_use]
    pub fn history(&self) -> Vec<ChangeSet> {
        self.history.lock().clone()
    }

    /// Most recently applied change set
    #[must_use]
    pub fn last(&self) -> Option<ChangeSet> {
        self.history.lock().last().cloned()
    }
}

#[async_trait]
impl ChangeApplier for InMemoryApplier {
    async fn apply(&self, change_set: &ChangeSet) -> Result<ApplyOutcome, ExecutionError> {
        self.history.lock().push(change_set.clone());
        Ok(ApplyOutcome {
            applied_paths: change_set.paths().map(str::to_string).collect(),
        })
    }
}
