//! Error types for the upgrade engine.

use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Boxed error used to carry driver-specific causes.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while planning or applying migrations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Invalid input to the planner (target version, step filter, descriptor set).
    #[error("Planning error: {0}")]
    Planning(String),

    /// A data migration requires a schema version that has not been journaled.
    #[error("Dependent migration {dependency} for migration '{migration}' hasn't been executed yet")]
    DependencyUnsatisfied {
        /// Name of the blocked data migration.
        migration: String,
        /// Schema version it depends on.
        dependency: i64,
    },

    /// The executor failed to apply a script.
    #[error("Failed to execute script '{script}': {source}")]
    Execution {
        /// Name of the script being executed.
        script: String,
        /// Underlying store error.
        #[source]
        source: BoxError,
    },

    /// The journal failed to read or write applied state.
    #[error("Journal error: {0}")]
    Journal(#[source] BoxError),

    /// A journal record with this name already exists.
    #[error("Migration '{0}' has already been applied")]
    AlreadyApplied(String),

    /// Could not open or hold the store connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Invalid descriptor manifest or configuration file.
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of a [`MigrationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Rejected before any side effect.
    Planning,
    /// A data migration's schema dependency is missing.
    DependencyUnsatisfied,
    /// The executor failed.
    Execution,
    /// The persisted-state layer failed.
    Journal,
    /// Anything else (connection, I/O, configuration).
    Other,
}

impl MigrationError {
    /// Create a planning error.
    pub fn planning(msg: impl Into<String>) -> Self {
        Self::Planning(msg.into())
    }

    /// Create an execution error for the given script.
    pub fn execution(script: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Execution {
            script: script.into(),
            source: source.into(),
        }
    }

    /// Create a journal error.
    pub fn journal(source: impl Into<BoxError>) -> Self {
        Self::Journal(source.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a manifest error.
    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::Manifest(msg.into())
    }

    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Planning(_) => ErrorCategory::Planning,
            Self::DependencyUnsatisfied { .. } => ErrorCategory::DependencyUnsatisfied,
            Self::Execution { .. } => ErrorCategory::Execution,
            Self::Journal(_) | Self::AlreadyApplied(_) => ErrorCategory::Journal,
            Self::Connection(_) | Self::Manifest(_) | Self::Io(_) => ErrorCategory::Other,
        }
    }

    /// Check if re-invoking after fixing state outside the engine can succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DependencyUnsatisfied { .. } | Self::Connection(_)
        )
    }
}
