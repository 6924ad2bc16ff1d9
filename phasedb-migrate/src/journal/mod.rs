//! Applied-migration journal.
//!
//! The journal is the only persisted state the engine consults. Every
//! back-end implements [`Journal`]; all operations create the backing
//! structure on first use and are safe to call repeatedly.

mod memory;
mod table;

pub use memory::{InMemoryJournal, NullJournal};
pub use table::{Dialect, JournalTable};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::descriptor::{Direction, MigrationDescriptor, MigrationKind};
use crate::error::MigrateResult;

/// Version stored for scripts recorded through the flat script mode.
pub const LEGACY_SCRIPT_VERSION: i64 = 0;

/// A record of an applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedRecord {
    /// Identifier assigned by the store.
    pub id: i64,
    /// Migration version.
    pub version: i64,
    /// Migration kind.
    pub kind: MigrationKind,
    /// Migration name; unique within the journal.
    pub name: String,
    /// When the migration was applied.
    pub applied_at: DateTime<Utc>,
}

/// Persisted record of applied migrations.
#[async_trait::async_trait]
pub trait Journal: Send + Sync {
    /// Get all applied migrations, ascending by version.
    async fn get_applied(&self) -> MigrateResult<Vec<AppliedRecord>>;

    /// Record a migration as applied (`Up`) or remove its record (`Down`).
    ///
    /// Recording `Up` for a name that already has a record fails with
    /// [`MigrationError::AlreadyApplied`](crate::MigrationError::AlreadyApplied).
    async fn record_applied(
        &self,
        descriptor: &MigrationDescriptor,
        direction: Direction,
    ) -> MigrateResult<()>;

    /// Record a script from the flat, version-less script mode.
    async fn record_legacy_script(&self, name: &str) -> MigrateResult<()>;

    /// Check whether a migration of the given version and kind is recorded.
    async fn has_applied(&self, version: i64, kind: MigrationKind) -> MigrateResult<bool>;
}

#[async_trait::async_trait]
impl<J: Journal + ?Sized> Journal for std::sync::Arc<J> {
    async fn get_applied(&self) -> MigrateResult<Vec<AppliedRecord>> {
        (**self).get_applied().await
    }

    async fn record_applied(
        &self,
        descriptor: &MigrationDescriptor,
        direction: Direction,
    ) -> MigrateResult<()> {
        (**self).record_applied(descriptor, direction).await
    }

    async fn record_legacy_script(&self, name: &str) -> MigrateResult<()> {
        (**self).record_legacy_script(name).await
    }

    async fn has_applied(&self, version: i64, kind: MigrationKind) -> MigrateResult<bool> {
        (**self).has_applied(version, kind).await
    }
}
