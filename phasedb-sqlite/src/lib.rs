//! SQLite back-end for the phasedb migration engine.
//!
//! Provides the three store-facing collaborators of
//! [`UpgradeEngine`](phasedb_migrate::UpgradeEngine) on top of a single
//! `tokio-rusqlite` connection:
//!
//! - [`SqliteJournal`] - applied migrations kept in a table
//! - [`SqliteExecutor`] - scripts run as SQLite batches
//! - [`SqliteConnectionManager`] - one operation at a time per connection
//!
//! # Example
//!
//! ```rust,ignore
//! use phasedb_migrate::{ManifestProvider, UpgradeConfig};
//! use phasedb_sqlite::{SqliteBackend, SqliteConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = SqliteBackend::open(SqliteConfig::from_url("sqlite://./app.db")?).await?;
//!     let engine = backend
//!         .engine_builder(UpgradeConfig::load("upgrade.toml").await?)
//!         .with_descriptors(ManifestProvider::load("migrations.toml").await?)
//!         .build();
//!
//!     let result = engine.migrate().await;
//!     println!("{}", result.summary());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod journal;

pub use config::{DatabasePath, SqliteConfig};
pub use connection::SqliteConnectionManager;
pub use error::{SqliteError, SqliteResult};
pub use executor::SqliteExecutor;
pub use journal::SqliteJournal;

use phasedb_migrate::{UpgradeConfig, UpgradeEngineBuilder};
use tokio_rusqlite::Connection;

/// An open SQLite database ready to be migrated.
#[derive(Clone)]
pub struct SqliteBackend {
    config: SqliteConfig,
    manager: SqliteConnectionManager,
    conn: Connection,
}

impl SqliteBackend {
    /// Open the database described by `config`.
    pub async fn open(config: SqliteConfig) -> SqliteResult<Self> {
        let conn = connection::open(&config).await?;
        Ok(Self {
            config,
            manager: SqliteConnectionManager::new(conn.clone()),
            conn,
        })
    }

    /// Configuration the database was opened with.
    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// Underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Journal stored in `table`.
    pub fn journal(&self, table: impl Into<String>) -> SqliteJournal {
        SqliteJournal::with_table(self.conn.clone(), table)
    }

    /// Executor running scripts on this database.
    pub fn executor(&self) -> SqliteExecutor {
        SqliteExecutor::new(self.conn.clone())
    }

    /// Connection manager shared by every engine built from this backend.
    pub fn connection_manager(&self) -> SqliteConnectionManager {
        self.manager.clone()
    }

    /// Engine builder wired to this database, with the journal table taken from `config`.
    pub fn engine_builder(&self, config: UpgradeConfig) -> UpgradeEngineBuilder {
        let mut journal = self.journal(config.journal_table.clone());
        if let Some(schema) = &config.journal_schema {
            journal = journal.in_schema(schema.clone());
        }
        UpgradeEngineBuilder::new(journal, self.executor())
            .connection_manager(self.connection_manager())
            .config(config)
    }
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("path", &self.config.path_str())
            .finish()
    }
}
