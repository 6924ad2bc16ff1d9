//! Migration descriptors and their execution ordering.
//!
//! A [`MigrationDescriptor`] is the immutable unit the engine plans over. Schema
//! and data migrations share one type; the [`MigrationBody`] tag carries the
//! fields that only make sense for one kind (the down script for schema
//! migrations, the schema dependency for data migrations).

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateResult, MigrationError};

/// Width of the timestamp prefix used as a version (`YYYYMMDDHHMMSS`).
pub const VERSION_WIDTH: usize = 14;

/// Kind of change a migration performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationKind {
    /// Structural change; reversible.
    Schema,
    /// Data change; forward only.
    Data,
}

impl MigrationKind {
    /// Integer code stored in journal tables.
    pub fn as_code(&self) -> i64 {
        match self {
            Self::Schema => 0,
            Self::Data => 1,
        }
    }

    /// Decode a journal integer code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Schema),
            1 => Some(Self::Data),
            _ => None,
        }
    }
}

impl fmt::Display for MigrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schema => write!(f, "schema"),
            Self::Data => write!(f, "data"),
        }
    }
}

/// Deployment phase a migration is eligible for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum ExecutionStep {
    /// Runs in whichever phase reaches it first.
    #[default]
    NoPreference,
    /// Must run before the new application code is deployed.
    BeforeCode,
    /// Must run after the new application code is deployed.
    AfterCode,
}

impl FromStr for ExecutionStep {
    type Err = MigrationError;

    fn from_str(s: &str) -> MigrateResult<Self> {
        match s.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "nopreference" => Ok(Self::NoPreference),
            "beforecode" => Ok(Self::BeforeCode),
            "aftercode" => Ok(Self::AfterCode),
            other => Err(MigrationError::planning(format!(
                "unknown execution step: {}",
                other
            ))),
        }
    }
}

impl TryFrom<String> for ExecutionStep {
    type Error = MigrationError;

    fn try_from(s: String) -> MigrateResult<Self> {
        s.parse()
    }
}

/// Direction a migration is performed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Apply the migration.
    Up,
    /// Reverse the migration.
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "UP"),
            Self::Down => write!(f, "DOWN"),
        }
    }
}

/// Kind-specific descriptor fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationBody {
    /// A schema migration and its reverse script.
    Schema {
        /// Script that undoes `up`.
        down: String,
    },
    /// A data migration, optionally pinned after a schema version.
    Data {
        /// Schema version that must be applied first.
        depends_on: Option<i64>,
    },
}

/// Immutable description of one migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationDescriptor {
    version: i64,
    name: String,
    up: String,
    step: ExecutionStep,
    body: MigrationBody,
}

impl MigrationDescriptor {
    /// Create a schema migration.
    pub fn schema(
        version: i64,
        name: impl Into<String>,
        up: impl Into<String>,
        down: impl Into<String>,
    ) -> Self {
        Self {
            version,
            name: name.into(),
            up: up.into(),
            step: ExecutionStep::NoPreference,
            body: MigrationBody::Schema { down: down.into() },
        }
    }

    /// Create a data migration with no schema dependency.
    pub fn data(version: i64, name: impl Into<String>, up: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
            up: up.into(),
            step: ExecutionStep::NoPreference,
            body: MigrationBody::Data { depends_on: None },
        }
    }

    /// Set the deployment step.
    pub fn with_step(mut self, step: ExecutionStep) -> Self {
        self.step = step;
        self
    }

    /// Pin a data migration after a schema version. Has no effect on schema migrations.
    pub fn depends_on(mut self, schema_version: i64) -> Self {
        if let MigrationBody::Data { depends_on } = &mut self.body {
            *depends_on = Some(schema_version);
        }
        self
    }

    /// Version (timestamp) of this migration.
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Logical name; the journal key.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Forward script.
    pub fn up_text(&self) -> &str {
        &self.up
    }

    /// Reverse script, only for schema migrations.
    pub fn down_text(&self) -> Option<&str> {
        match &self.body {
            MigrationBody::Schema { down } => Some(down),
            MigrationBody::Data { .. } => None,
        }
    }

    /// Deployment step.
    pub fn step(&self) -> ExecutionStep {
        self.step
    }

    /// Kind-specific fields.
    pub fn body(&self) -> &MigrationBody {
        &self.body
    }

    /// Kind of change.
    pub fn kind(&self) -> MigrationKind {
        match self.body {
            MigrationBody::Schema { .. } => MigrationKind::Schema,
            MigrationBody::Data { .. } => MigrationKind::Data,
        }
    }

    /// Schema version a data migration depends on.
    pub fn dependent_schema_version(&self) -> Option<i64> {
        match self.body {
            MigrationBody::Data { depends_on } => depends_on,
            MigrationBody::Schema { .. } => None,
        }
    }

    /// Script text for the given direction.
    pub fn script_for(&self, direction: Direction) -> Option<&str> {
        match direction {
            Direction::Up => Some(self.up_text()),
            Direction::Down => self.down_text(),
        }
    }

    /// Ordering key under the given sort mode.
    pub fn sort_key(&self, mode: SortMode) -> SortKey {
        SortKey::new(self, mode)
    }
}

/// How forward execution order is derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    /// Compare `(dependency or version, version or 0)` as integers.
    #[default]
    Numeric,
    /// Compare the concatenated decimal strings ordinally.
    ///
    /// Only orders correctly when every version has the same digit width.
    Legacy,
}

/// Total ordering key for forward execution.
///
/// A data migration with a dependency sorts directly after the schema version
/// it requires; everything else sorts by its own version. Kind (schema first)
/// and name break any remaining ties.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortKey {
    primary: Primary,
    kind: MigrationKind,
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Primary {
    Numeric(i64, i64),
    Legacy(String),
}

impl SortKey {
    /// Build the key for a descriptor.
    pub fn new(descriptor: &MigrationDescriptor, mode: SortMode) -> Self {
        let dependency = descriptor.dependent_schema_version();
        let primary = match mode {
            SortMode::Numeric => match dependency {
                Some(dep) => Primary::Numeric(dep, descriptor.version),
                None => Primary::Numeric(descriptor.version, 0),
            },
            SortMode::Legacy => match dependency {
                Some(dep) => Primary::Legacy(format!("{}{}", dep, descriptor.version)),
                None => Primary::Legacy(format!(
                    "{}{}",
                    descriptor.version,
                    "0".repeat(VERSION_WIDTH)
                )),
            },
        };

        Self {
            primary,
            kind: descriptor.kind(),
            name: descriptor.name.clone(),
        }
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.primary
            .cmp(&other.primary)
            .then_with(|| self.kind.cmp(&other.kind))
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Extract the version from a `YYYYMMDDHHMMSS_name` style script name.
pub fn parse_version(name: &str) -> MigrateResult<i64> {
    let prefix = name.get(..VERSION_WIDTH).ok_or_else(|| {
        MigrationError::planning(format!(
            "migration name '{}' does not start with a {}-digit version",
            name, VERSION_WIDTH
        ))
    })?;

    if !prefix.chars().all(|c| c.is_ascii_digit()) {
        return Err(MigrationError::planning(format!(
            "invalid migration version (expected timestamp): {}",
            prefix
        )));
    }

    prefix
        .parse::<i64>()
        .map_err(|e| MigrationError::planning(format!("invalid migration version: {}", e)))
}
