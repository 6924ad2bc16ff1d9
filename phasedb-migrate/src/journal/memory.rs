//! In-process journals.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{AppliedRecord, Journal, LEGACY_SCRIPT_VERSION};
use crate::descriptor::{Direction, MigrationDescriptor, MigrationKind};
use crate::error::{MigrateResult, MigrationError};

#[derive(Debug, Default)]
struct State {
    records: Vec<AppliedRecord>,
    next_id: i64,
}

impl State {
    fn insert(&mut self, version: i64, kind: MigrationKind, name: &str) -> MigrateResult<()> {
        if self.records.iter().any(|r| r.name == name) {
            return Err(MigrationError::AlreadyApplied(name.to_string()));
        }

        self.next_id += 1;
        self.records.push(AppliedRecord {
            id: self.next_id,
            version,
            kind,
            name: name.to_string(),
            applied_at: Utc::now(),
        });
        Ok(())
    }
}

/// Journal kept in memory.
///
/// Clones share the same records, so a test can hand one clone to the engine
/// and inspect another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryJournal {
    state: Arc<RwLock<State>>,
}

impl InMemoryJournal {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a journal pre-populated with applied descriptors.
    pub fn with_applied<'a>(
        descriptors: impl IntoIterator<Item = &'a MigrationDescriptor>,
    ) -> MigrateResult<Self> {
        let journal = Self::new();
        {
            let mut state = journal.state.write();
            for descriptor in descriptors {
                state.insert(descriptor.version(), descriptor.kind(), descriptor.name())?;
            }
        }
        Ok(journal)
    }

    /// Names of all recorded migrations, ascending by version.
    pub fn names(&self) -> Vec<String> {
        let mut records = self.state.read().records.clone();
        records.sort_by_key(|r| (r.version, r.id));
        records.into_iter().map(|r| r.name).collect()
    }

    /// Number of recorded migrations.
    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    /// Check if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.state.read().records.is_empty()
    }
}

#[async_trait::async_trait]
impl Journal for InMemoryJournal {
    async fn get_applied(&self) -> MigrateResult<Vec<AppliedRecord>> {
        let mut records = self.state.read().records.clone();
        records.sort_by_key(|r| (r.version, r.id));
        Ok(records)
    }

    async fn record_applied(
        &self,
        descriptor: &MigrationDescriptor,
        direction: Direction,
    ) -> MigrateResult<()> {
        let mut state = self.state.write();
        match direction {
            Direction::Up => {
                state.insert(descriptor.version(), descriptor.kind(), descriptor.name())?;
            }
            Direction::Down => {
                let before = state.records.len();
                state.records.retain(|r| r.name != descriptor.name());
                if state.records.len() == before {
                    warn!(migration = %descriptor.name(), "No journal record to remove");
                }
            }
        }

        debug!(migration = %descriptor.name(), %direction, "Journal updated");
        Ok(())
    }

    async fn record_legacy_script(&self, name: &str) -> MigrateResult<()> {
        self.state
            .write()
            .insert(LEGACY_SCRIPT_VERSION, MigrationKind::Schema, name)
    }

    async fn has_applied(&self, version: i64, kind: MigrationKind) -> MigrateResult<bool> {
        Ok(self
            .state
            .read()
            .records
            .iter()
            .any(|r| r.version == version && r.kind == kind))
    }
}

/// Journal that records nothing.
///
/// Every script runs on every invocation, so it only suits idempotent
/// scripts. Dependencies are reported as satisfied since plan order already
/// places schema migrations ahead of the data migrations pinned to them.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullJournal;

#[async_trait::async_trait]
impl Journal for NullJournal {
    async fn get_applied(&self) -> MigrateResult<Vec<AppliedRecord>> {
        Ok(Vec::new())
    }

    async fn record_applied(
        &self,
        _descriptor: &MigrationDescriptor,
        _direction: Direction,
    ) -> MigrateResult<()> {
        Ok(())
    }

    async fn record_legacy_script(&self, _name: &str) -> MigrateResult<()> {
        Ok(())
    }

    async fn has_applied(&self, _version: i64, _kind: MigrationKind) -> MigrateResult<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_up_and_down() {
        let journal = InMemoryJournal::new();
        let schema = MigrationDescriptor::schema(2, "s2", "up", "down");
        let data = MigrationDescriptor::data(1, "d1", "insert");

        journal.record_applied(&schema, Direction::Up).await.unwrap();
        journal.record_applied(&data, Direction::Up).await.unwrap();

        let applied = journal.get_applied().await.unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].name, "d1");
        assert_eq!(applied[1].name, "s2");
        assert_ne!(applied[0].id, applied[1].id);

        assert!(journal.has_applied(2, MigrationKind::Schema).await.unwrap());
        assert!(!journal.has_applied(2, MigrationKind::Data).await.unwrap());

        journal.record_applied(&schema, Direction::Down).await.unwrap();
        assert_eq!(journal.names(), vec!["d1".to_string()]);
        assert!(!journal.has_applied(2, MigrationKind::Schema).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_up_rejected() {
        let journal = InMemoryJournal::new();
        let schema = MigrationDescriptor::schema(1, "s1", "", "");

        journal.record_applied(&schema, Direction::Up).await.unwrap();
        let err = journal
            .record_applied(&schema, Direction::Up)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::AlreadyApplied(name) if name == "s1"));
        assert_eq!(journal.len(), 1);
    }

    #[tokio::test]
    async fn test_down_without_record_is_noop() {
        let journal = InMemoryJournal::new();
        let schema = MigrationDescriptor::schema(1, "s1", "", "");
        journal.record_applied(&schema, Direction::Down).await.unwrap();
        assert!(journal.is_empty());
    }

    #[tokio::test]
    async fn test_legacy_script() {
        let journal = InMemoryJournal::new();
        journal.record_legacy_script("001_init.sql").await.unwrap();

        let applied = journal.get_applied().await.unwrap();
        assert_eq!(applied[0].version, LEGACY_SCRIPT_VERSION);
        assert!(journal.record_legacy_script("001_init.sql").await.is_err());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let journal = InMemoryJournal::new();
        let other = journal.clone();
        journal
            .record_applied(&MigrationDescriptor::data(1, "d", ""), Direction::Up)
            .await
            .unwrap();
        assert_eq!(other.len(), 1);
    }

    #[tokio::test]
    async fn test_null_journal() {
        let journal = NullJournal;
        let schema = MigrationDescriptor::schema(1, "s1", "", "");
        journal.record_applied(&schema, Direction::Up).await.unwrap();
        journal.record_applied(&schema, Direction::Up).await.unwrap();
        assert!(journal.get_applied().await.unwrap().is_empty());
        assert!(journal.has_applied(1, MigrationKind::Schema).await.unwrap());
    }
}
