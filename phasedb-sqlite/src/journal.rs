//! Journal stored in a SQLite table.

use chrono::{DateTime, Utc};
use phasedb_migrate::{
    AppliedRecord, Dialect, Direction, JournalTable, LEGACY_SCRIPT_VERSION, MigrateResult,
    MigrationDescriptor, MigrationError, MigrationKind,
};
use rusqlite::{OptionalExtension, params};
use tokio_rusqlite::Connection;
use tracing::{debug, warn};

use crate::error::{SqliteError, SqliteResult};

type RawRecord = (i64, i64, i64, String, String);

/// Journal persisted in a SQLite table.
///
/// The table is created on first use by every operation.
#[derive(Clone)]
pub struct SqliteJournal {
    conn: Connection,
    table: JournalTable,
}

impl SqliteJournal {
    /// Create a journal using the default table name.
    pub fn new(conn: Connection) -> Self {
        Self::with_table(conn, JournalTable::DEFAULT_TABLE)
    }

    /// Create a journal using a custom table name.
    pub fn with_table(conn: Connection, table: impl Into<String>) -> Self {
        Self {
            conn,
            table: JournalTable::new(Dialect::Sqlite, table),
        }
    }

    /// Place the table in an attached database.
    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.table = self.table.with_schema(schema);
        self
    }

    /// Table layout in use.
    pub fn table(&self) -> &JournalTable {
        &self.table
    }

    async fn ensure_table(&self) -> SqliteResult<()> {
        let sql = self.table.create_sql();
        self.conn
            .call(move |conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Insert a record unless the name is already present; returns whether it was inserted.
    async fn insert(&self, version: i64, kind: MigrationKind, name: &str) -> SqliteResult<bool> {
        self.ensure_table().await?;

        let exists_sql = self.table.exists_by_name_sql();
        let insert_sql = self.table.insert_sql();
        let name = name.to_string();
        let applied_at = Utc::now().to_rfc3339();

        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let exists = tx
                    .query_row(&exists_sql, params![name], |_| Ok(()))
                    .optional()?
                    .is_some();
                if !exists {
                    tx.execute(&insert_sql, params![version, kind.as_code(), name, applied_at])?;
                }
                tx.commit()?;
                Ok(!exists)
            })
            .await?;
        Ok(inserted)
    }

    async fn remove(&self, name: &str) -> SqliteResult<usize> {
        self.ensure_table().await?;

        let sql = self.table.delete_sql();
        let name = name.to_string();
        let removed = self
            .conn
            .call(move |conn| Ok(conn.execute(&sql, params![name])?))
            .await?;
        Ok(removed)
    }
}

impl std::fmt::Debug for SqliteJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteJournal")
            .field("table", &self.table.qualified_name())
            .finish()
    }
}

fn decode(raw: RawRecord) -> SqliteResult<AppliedRecord> {
    let (id, version, kind, name, applied_at) = raw;
    let kind = MigrationKind::from_code(kind).ok_or_else(|| {
        SqliteError::deserialization(format!("unknown migration type {} for '{}'", kind, name))
    })?;
    let applied_at = DateTime::parse_from_rfc3339(&applied_at)
        .map_err(|e| SqliteError::deserialization(format!("created_on for '{}': {}", name, e)))?
        .with_timezone(&Utc);

    Ok(AppliedRecord {
        id,
        version,
        kind,
        name,
        applied_at,
    })
}

#[async_trait::async_trait]
impl phasedb_migrate::Journal for SqliteJournal {
    async fn get_applied(&self) -> MigrateResult<Vec<AppliedRecord>> {
        self.ensure_table().await?;

        let sql = self.table.select_applied_sql();
        let rows: Vec<RawRecord> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows: Vec<RawRecord> = stmt
                    .query_map([], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(SqliteError::from)?;

        let records = rows
            .into_iter()
            .map(decode)
            .collect::<SqliteResult<Vec<_>>>()?;
        debug!(count = records.len(), "Loaded applied migrations");
        Ok(records)
    }

    async fn record_applied(
        &self,
        descriptor: &MigrationDescriptor,
        direction: Direction,
    ) -> MigrateResult<()> {
        match direction {
            Direction::Up => {
                let inserted = self
                    .insert(descriptor.version(), descriptor.kind(), descriptor.name())
                    .await?;
                if !inserted {
                    return Err(MigrationError::AlreadyApplied(descriptor.name().to_string()));
                }
            }
            Direction::Down => {
                if self.remove(descriptor.name()).await? == 0 {
                    warn!(migration = %descriptor.name(), "No journal record to remove");
                }
            }
        }
        Ok(())
    }

    async fn record_legacy_script(&self, name: &str) -> MigrateResult<()> {
        if !self
            .insert(LEGACY_SCRIPT_VERSION, MigrationKind::Schema, name)
            .await?
        {
            return Err(MigrationError::AlreadyApplied(name.to_string()));
        }
        Ok(())
    }

    async fn has_applied(&self, version: i64, kind: MigrationKind) -> MigrateResult<bool> {
        self.ensure_table().await?;

        let sql = self.table.exists_by_version_sql();
        let found = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(&sql, params![version, kind.as_code()], |_| Ok(()))
                    .optional()?
                    .is_some())
            })
            .await
            .map_err(SqliteError::from)?;
        Ok(found)
    }
}
