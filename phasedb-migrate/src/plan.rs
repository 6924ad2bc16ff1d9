//! Execution planning.
//!
//! The planner is pure: given the descriptor set and a snapshot of the
//! journal it decides which migrations run, in which direction and order.
//! Dependency checks happen later, while the engine executes the plan.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::descriptor::{Direction, ExecutionStep, MigrationDescriptor, MigrationKind, SortMode};
use crate::error::{MigrateResult, MigrationError};
use crate::journal::AppliedRecord;

/// Target version meaning "everything available".
pub const LATEST_VERSION: i64 = i64::MAX;

/// Which deployment phase is being run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum StepFilter {
    /// Run everything not yet applied.
    #[default]
    All,
    /// Run only migrations marked `BeforeCode` or `NoPreference`.
    BeforeCode,
    /// Run everything still pending after the before-code pass.
    AfterCode,
}

impl StepFilter {
    /// Whether a migration tagged with `step` is eligible under this filter.
    pub fn admits(&self, step: ExecutionStep) -> bool {
        match self {
            Self::BeforeCode => matches!(
                step,
                ExecutionStep::BeforeCode | ExecutionStep::NoPreference
            ),
            Self::All | Self::AfterCode => true,
        }
    }
}

impl FromStr for StepFilter {
    type Err = MigrationError;

    fn from_str(s: &str) -> MigrateResult<Self> {
        match s.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "all" | "nopreference" => Ok(Self::All),
            "beforecode" => Ok(Self::BeforeCode),
            "aftercode" => Ok(Self::AfterCode),
            other => Err(MigrationError::planning(format!(
                "unknown step filter '{}' (expected BeforeCode, AfterCode or All)",
                other
            ))),
        }
    }
}

impl TryFrom<String> for StepFilter {
    type Error = MigrationError;

    fn try_from(s: String) -> MigrateResult<Self> {
        s.parse()
    }
}

impl fmt::Display for StepFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "All"),
            Self::BeforeCode => write!(f, "BeforeCode"),
            Self::AfterCode => write!(f, "AfterCode"),
        }
    }
}

/// One operation in a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMigration {
    /// The migration to perform.
    pub descriptor: MigrationDescriptor,
    /// Whether it is applied or rolled back.
    pub direction: Direction,
}

impl PlannedMigration {
    /// Name of the migration.
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// Script text to run for this operation.
    pub fn script(&self) -> &str {
        self.descriptor.script_for(self.direction).unwrap_or_default()
    }

    /// Schema version that must be journaled before this step runs.
    pub fn required_schema_version(&self) -> Option<i64> {
        match self.direction {
            Direction::Up => self.descriptor.dependent_schema_version(),
            Direction::Down => None,
        }
    }
}

/// Ordered list of operations for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationPlan {
    /// Forward applications, in sort-key order.
    pub forward: Vec<PlannedMigration>,
    /// Rollbacks, in descending version order.
    pub rollback: Vec<PlannedMigration>,
}

impl MigrationPlan {
    /// Check if there's anything to do.
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty() && self.rollback.is_empty()
    }

    /// Total number of operations.
    pub fn len(&self) -> usize {
        self.forward.len() + self.rollback.len()
    }

    /// Operations in execution order: every forward step, then every rollback.
    pub fn steps(&self) -> impl Iterator<Item = &PlannedMigration> {
        self.forward.iter().chain(self.rollback.iter())
    }

    /// Consume the plan into its execution order.
    pub fn into_steps(self) -> Vec<PlannedMigration> {
        let mut steps = self.forward;
        steps.extend(self.rollback);
        steps
    }

    /// Get a summary of the plan.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if !self.forward.is_empty() {
            parts.push(format!("{} to apply", self.forward.len()));
        }

        if !self.rollback.is_empty() {
            parts.push(format!("{} to roll back", self.rollback.len()));
        }

        if parts.is_empty() {
            "No changes to apply".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Computes plans over a descriptor set.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionPlanner<'a> {
    descriptors: &'a [MigrationDescriptor],
    sort_mode: SortMode,
}

impl<'a> ExecutionPlanner<'a> {
    /// Create a planner over the given descriptors.
    pub fn new(descriptors: &'a [MigrationDescriptor]) -> Self {
        Self {
            descriptors,
            sort_mode: SortMode::default(),
        }
    }

    /// Set the sort mode used for forward ordering.
    pub fn sort_mode(mut self, mode: SortMode) -> Self {
        self.sort_mode = mode;
        self
    }

    /// Reject descriptor sets that break the unique-name invariant.
    pub fn validate(&self) -> MigrateResult<()> {
        let mut seen = HashSet::with_capacity(self.descriptors.len());
        for descriptor in self.descriptors {
            if !seen.insert(descriptor.name()) {
                return Err(MigrationError::planning(format!(
                    "duplicate migration name '{}'",
                    descriptor.name()
                )));
            }
        }
        Ok(())
    }

    /// Compute the full plan: forward applications followed by rollbacks.
    pub fn plan(
        &self,
        applied: &[AppliedRecord],
        target: i64,
        filter: StepFilter,
    ) -> MigrateResult<MigrationPlan> {
        check_target(target)?;
        self.validate()?;

        let applied_names: HashSet<&str> = applied.iter().map(|r| r.name.as_str()).collect();

        Ok(MigrationPlan {
            forward: self.forward_steps(&applied_names, target, filter),
            rollback: self.rollback_steps(&applied_names, target),
        })
    }

    /// Compute only the forward part of the plan.
    pub fn forward(
        &self,
        applied: &[AppliedRecord],
        target: i64,
        filter: StepFilter,
    ) -> MigrateResult<Vec<PlannedMigration>> {
        check_target(target)?;
        self.validate()?;

        let applied_names: HashSet<&str> = applied.iter().map(|r| r.name.as_str()).collect();
        Ok(self.forward_steps(&applied_names, target, filter))
    }

    fn forward_steps(
        &self,
        applied: &HashSet<&str>,
        target: i64,
        filter: StepFilter,
    ) -> Vec<PlannedMigration> {
        let mut pending: Vec<&MigrationDescriptor> = self
            .descriptors
            .iter()
            .filter(|d| filter.admits(d.step()))
            .filter(|d| d.version() <= target && !applied.contains(d.name()))
            .collect();

        pending.sort_by_cached_key(|d| d.sort_key(self.sort_mode));

        pending
            .into_iter()
            .map(|d| PlannedMigration {
                descriptor: d.clone(),
                direction: Direction::Up,
            })
            .collect()
    }

    fn rollback_steps(&self, applied: &HashSet<&str>, target: i64) -> Vec<PlannedMigration> {
        let mut rollback: Vec<&MigrationDescriptor> = self
            .descriptors
            .iter()
            .filter(|d| d.kind() == MigrationKind::Schema)
            .filter(|d| d.version() > target && applied.contains(d.name()))
            .collect();

        rollback.sort_by(|a, b| {
            b.version()
                .cmp(&a.version())
                .then_with(|| b.name().cmp(a.name()))
        });

        rollback
            .into_iter()
            .map(|d| PlannedMigration {
                descriptor: d.clone(),
                direction: Direction::Down,
            })
            .collect()
    }
}

fn check_target(target: i64) -> MigrateResult<()> {
    if target < 0 {
        return Err(MigrationError::planning(format!(
            "target version must not be negative, got {}",
            target
        )));
    }
    Ok(())
}
