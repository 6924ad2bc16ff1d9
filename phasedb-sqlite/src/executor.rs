//! Script executor backed by SQLite.

use phasedb_migrate::{MigrateResult, MigrationError, ScriptExecutor, ScriptVariables, SqlScript};
use tokio_rusqlite::Connection;
use tracing::{debug, info};

use crate::error::SqliteError;

/// Runs migration scripts as SQLite batches.
#[derive(Clone)]
pub struct SqliteExecutor {
    conn: Connection,
}

impl SqliteExecutor {
    /// Create an executor over an open connection.
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

impl std::fmt::Debug for SqliteExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteExecutor").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl ScriptExecutor for SqliteExecutor {
    async fn verify_schema(&self) -> MigrateResult<()> {
        let read_only: bool = self
            .conn
            .call(|conn| Ok(conn.is_readonly(rusqlite::DatabaseName::Main)?))
            .await
            .map_err(SqliteError::from)?;

        if read_only {
            return Err(MigrationError::connection("database is opened read-only"));
        }
        Ok(())
    }

    async fn execute(&self, script: &SqlScript, variables: &ScriptVariables) -> MigrateResult<()> {
        let sql = script.render(variables)?;
        if sql.trim().is_empty() {
            debug!(script = %script.name, "Skipping empty script");
            return Ok(());
        }

        info!(script = %script.name, "Executing script");
        self.conn
            .call(move |conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .await
            .map_err(|e| MigrationError::execution(script.name.clone(), SqliteError::from(e)))
    }
}
