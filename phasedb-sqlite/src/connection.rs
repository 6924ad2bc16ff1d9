//! SQLite connection handling.

use std::sync::Arc;

use phasedb_migrate::{ConnectionManager, MigrateResult, MigrationError, OperationScope};
use tokio::sync::Mutex;
use tokio_rusqlite::Connection;
use tracing::{debug, trace};

use crate::config::{DatabasePath, SqliteConfig};
use crate::error::{SqliteError, SqliteResult};

/// Open a connection and apply the configured pragmas.
pub async fn open(config: &SqliteConfig) -> SqliteResult<Connection> {
    let conn = match &config.path {
        DatabasePath::Memory => Connection::open_in_memory().await?,
        DatabasePath::File(path) => Connection::open(path).await?,
    };

    let init_sql = config.init_sql();
    if !init_sql.is_empty() {
        conn.call(move |conn| {
            conn.execute_batch(&init_sql)?;
            Ok(())
        })
        .await?;
    }

    debug!(path = %config.path_str(), "Opened SQLite connection");
    Ok(conn)
}

/// Holds the single connection for the length of an engine operation.
///
/// Operations from engines sharing this manager are serialized: a second
/// operation waits until the first one's scope is dropped.
#[derive(Clone)]
pub struct SqliteConnectionManager {
    conn: Connection,
    gate: Arc<Mutex<()>>,
}

impl SqliteConnectionManager {
    /// Create a manager over an open connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Check whether an operation currently holds the connection.
    pub fn is_busy(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    async fn ping(&self) -> SqliteResult<()> {
        let one: i64 = self
            .conn
            .call(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get(0))?))
            .await
            .map_err(|e| SqliteError::connection(e.to_string()))?;
        trace!(result = one, "SQLite ping");
        Ok(())
    }
}

impl std::fmt::Debug for SqliteConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnectionManager")
            .field("busy", &self.is_busy())
            .finish()
    }
}

#[async_trait::async_trait]
impl ConnectionManager for SqliteConnectionManager {
    async fn try_connect(&self) -> MigrateResult<()> {
        self.ping().await.map_err(MigrationError::from)
    }

    async fn operation_starting(&self) -> MigrateResult<OperationScope> {
        let guard = Arc::clone(&self.gate).lock_owned().await;
        self.ping().await?;
        debug!("SQLite operation started");

        Ok(OperationScope::new("sqlite", move || {
            drop(guard);
            debug!("SQLite operation finished");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_memory() {
        let conn = open(&SqliteConfig::memory()).await.unwrap();
        let fk: i64 = conn
            .call(|conn| Ok(conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[tokio::test]
    async fn test_scope_holds_connection() {
        let conn = open(&SqliteConfig::memory()).await.unwrap();
        let manager = SqliteConnectionManager::new(conn);
        manager.try_connect().await.unwrap();
        assert!(!manager.is_busy());

        let scope = manager.operation_starting().await.unwrap();
        assert_eq!(scope.label(), "sqlite");
        assert!(manager.is_busy());

        drop(scope);
        assert!(!manager.is_busy());
    }

    #[tokio::test]
    async fn test_try_connect_after_close() {
        let conn = open(&SqliteConfig::memory()).await.unwrap();
        let manager = SqliteConnectionManager::new(conn.clone());
        conn.close().await.unwrap();

        let err = manager.try_connect().await.unwrap_err();
        assert!(matches!(err, MigrationError::Connection(_)));
    }
}
