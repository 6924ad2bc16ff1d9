//! Outcome of an engine operation.

use crate::descriptor::{Direction, MigrationDescriptor, MigrationKind};
use crate::error::MigrationError;
use crate::plan::PlannedMigration;
use crate::script::SqlScript;

/// A script that was executed (or marked as executed) during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedScript {
    /// Script or migration name.
    pub name: String,
    /// Migration version; `None` for flat scripts.
    pub version: Option<i64>,
    /// Migration kind; `None` for flat scripts.
    pub kind: Option<MigrationKind>,
    /// Direction it was performed in.
    pub direction: Direction,
    /// The migration performed; `None` for flat scripts.
    pub descriptor: Option<MigrationDescriptor>,
}

impl From<&PlannedMigration> for ExecutedScript {
    fn from(step: &PlannedMigration) -> Self {
        Self {
            name: step.name().to_string(),
            version: Some(step.descriptor.version()),
            kind: Some(step.descriptor.kind()),
            direction: step.direction,
            descriptor: Some(step.descriptor.clone()),
        }
    }
}

impl From<&SqlScript> for ExecutedScript {
    fn from(script: &SqlScript) -> Self {
        Self {
            name: script.name.clone(),
            version: None,
            kind: None,
            direction: Direction::Up,
            descriptor: None,
        }
    }
}

/// Why a run stopped early.
#[derive(Debug)]
pub struct UpgradeFailure {
    /// Script being processed when the failure occurred, if any.
    pub script: Option<String>,
    /// Underlying cause.
    pub cause: MigrationError,
}

/// Result of an upgrade, migration or marking run.
#[derive(Debug)]
pub struct DatabaseUpgradeResult {
    /// Scripts performed, in execution order.
    pub executed: Vec<ExecutedScript>,
    /// Whether the run completed.
    pub successful: bool,
    /// Failure details when `successful` is false.
    pub error: Option<UpgradeFailure>,
    /// Total duration in milliseconds.
    pub duration_ms: i64,
}

impl DatabaseUpgradeResult {
    /// Create a successful result.
    pub fn success(executed: Vec<ExecutedScript>, duration_ms: i64) -> Self {
        Self {
            executed,
            successful: true,
            error: None,
            duration_ms,
        }
    }

    /// Create a failed result.
    pub fn failure(
        executed: Vec<ExecutedScript>,
        script: Option<String>,
        cause: MigrationError,
        duration_ms: i64,
    ) -> Self {
        Self {
            executed,
            successful: false,
            error: Some(UpgradeFailure { script, cause }),
            duration_ms,
        }
    }

    /// Names of executed scripts.
    pub fn executed_names(&self) -> Vec<&str> {
        self.executed.iter().map(|s| s.name.as_str()).collect()
    }

    /// Underlying cause of a failure.
    pub fn cause(&self) -> Option<&MigrationError> {
        self.error.as_ref().map(|e| &e.cause)
    }

    /// Script that failed.
    pub fn failed_script(&self) -> Option<&str> {
        self.error.as_ref().and_then(|e| e.script.as_deref())
    }

    /// Descriptors of the migrations performed, in execution order.
    pub fn executed_descriptors(&self) -> impl Iterator<Item = &MigrationDescriptor> {
        self.executed.iter().filter_map(|s| s.descriptor.as_ref())
    }

    /// Get a summary of the result.
    pub fn summary(&self) -> String {
        let applied = self
            .executed
            .iter()
            .filter(|s| s.direction == Direction::Up)
            .count();
        let rolled_back = self.executed.len() - applied;

        let mut parts = Vec::new();
        if applied > 0 {
            parts.push(format!("{} applied", applied));
        }
        if rolled_back > 0 {
            parts.push(format!("{} rolled back", rolled_back));
        }

        let body = if parts.is_empty() {
            "No scripts executed".to_string()
        } else {
            format!("{} in {}ms", parts.join(", "), self.duration_ms)
        };

        match &self.error {
            None => body,
            Some(UpgradeFailure {
                script: Some(script),
                cause,
            }) => format!("{}; failed at '{}': {}", body, script, cause),
            Some(UpgradeFailure { script: None, cause }) => format!("{}; failed: {}", body, cause),
        }
    }
}
