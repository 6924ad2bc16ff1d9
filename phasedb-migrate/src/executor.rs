//! Collaborators that touch the target store.

use std::fmt;

use crate::error::MigrateResult;
use crate::script::{ScriptVariables, SqlScript};

/// Applies script text against the target store.
#[async_trait::async_trait]
pub trait ScriptExecutor: Send + Sync {
    /// Fail fast if the store cannot run scripts. Called once per batch.
    async fn verify_schema(&self) -> MigrateResult<()> {
        Ok(())
    }

    /// Execute one script.
    async fn execute(&self, script: &SqlScript, variables: &ScriptVariables) -> MigrateResult<()>;
}

/// Provides the scope wrapping a whole batch (typically one held connection).
#[async_trait::async_trait]
pub trait ConnectionManager: Send + Sync {
    /// Check that the store is reachable.
    async fn try_connect(&self) -> MigrateResult<()> {
        Ok(())
    }

    /// Begin an operation. The returned scope is held for the whole batch.
    async fn operation_starting(&self) -> MigrateResult<OperationScope>;
}

/// Guard for one engine operation; releases its resource when dropped.
pub struct OperationScope {
    label: &'static str,
    release_fn: Option<Box<dyn FnOnce() + Send>>,
}

impl OperationScope {
    /// Create a scope that runs `release` when dropped.
    pub fn new(label: &'static str, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label,
            release_fn: Some(Box::new(release)),
        }
    }

    /// Create a scope with nothing to release.
    pub fn empty(label: &'static str) -> Self {
        Self {
            label,
            release_fn: None,
        }
    }

    /// Label given by the connection manager.
    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl fmt::Debug for OperationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationScope")
            .field("label", &self.label)
            .field("releases", &self.release_fn.is_some())
            .finish()
    }
}

impl Drop for OperationScope {
    fn drop(&mut self) {
        if let Some(release) = self.release_fn.take() {
            release();
        }
    }
}

/// Connection manager with no resource to hold.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopConnectionManager;

#[async_trait::async_trait]
impl ConnectionManager for NoopConnectionManager {
    async fn operation_starting(&self) -> MigrateResult<OperationScope> {
        Ok(OperationScope::empty("noop"))
    }
}
