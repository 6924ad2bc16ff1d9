//! Upgrade configuration.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::descriptor::SortMode;
use crate::error::{MigrateResult, MigrationError};
use crate::journal::JournalTable;
use crate::plan::{LATEST_VERSION, StepFilter};
use crate::script::ScriptVariables;

/// Configuration for the upgrade engine.
///
/// ```toml
/// target_version = 20160609100800
/// step = "before_code"
/// sort_mode = "numeric"
/// journal_table = "schema_versions"
///
/// [variables]
/// schema = "app"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpgradeConfig {
    /// Version to migrate to; `None` means latest.
    pub target_version: Option<i64>,
    /// Deployment phase to run.
    pub step: StepFilter,
    /// How forward order is derived.
    pub sort_mode: SortMode,
    /// Values for `$name$` tokens in scripts.
    pub variables: ScriptVariables,
    /// Journal table name.
    pub journal_table: String,
    /// Schema holding the journal table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_schema: Option<String>,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            target_version: None,
            step: StepFilter::All,
            sort_mode: SortMode::Numeric,
            variables: ScriptVariables::new(),
            journal_table: JournalTable::DEFAULT_TABLE.to_string(),
            journal_schema: None,
        }
    }
}

impl UpgradeConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file. A missing file yields defaults.
    pub async fn load(path: impl AsRef<Path>) -> MigrateResult<Self> {
        let path = path.as_ref();

        match tokio::fs::read_to_string(path).await {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No upgrade config found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Parse configuration from a TOML string.
    ///
    /// An unrecognized `step` is a planning error; any other malformed
    /// content is a manifest error.
    pub fn parse(content: &str) -> MigrateResult<Self> {
        let table: toml::Table = toml::from_str(content)
            .map_err(|e| MigrationError::manifest(format!("Failed to parse upgrade config: {}", e)))?;

        if let Some(step) = table.get("step").and_then(toml::Value::as_str) {
            step.parse::<StepFilter>()?;
        }

        toml::Value::Table(table)
            .try_into()
            .map_err(|e| MigrationError::manifest(format!("Failed to parse upgrade config: {}", e)))
    }

    /// Set the target version.
    pub fn target_version(mut self, version: i64) -> Self {
        self.target_version = Some(version);
        self
    }

    /// Set the step filter.
    pub fn step(mut self, step: StepFilter) -> Self {
        self.step = step;
        self
    }

    /// Set the sort mode.
    pub fn sort_mode(mut self, mode: SortMode) -> Self {
        self.sort_mode = mode;
        self
    }

    /// Add a script variable.
    pub fn variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Set the journal table name.
    pub fn journal_table(mut self, table: impl Into<String>) -> Self {
        self.journal_table = table.into();
        self
    }

    /// Set the journal schema.
    pub fn journal_schema(mut self, schema: impl Into<String>) -> Self {
        self.journal_schema = Some(schema.into());
        self
    }

    /// Effective target version.
    pub fn resolved_target(&self) -> i64 {
        self.target_version.unwrap_or(LATEST_VERSION)
    }
}
