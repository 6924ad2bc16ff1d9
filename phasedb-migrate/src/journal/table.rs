//! SQL for table-backed journals.
//!
//! The tracking table has the shape
//! `(id, version_id, migration_type, script_name, created_on)`.

use serde::{Deserialize, Serialize};

/// SQL dialect of a journal table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// PostgreSQL.
    Postgres,
    /// MySQL / MariaDB.
    MySql,
    /// SQLite.
    Sqlite,
}

impl Dialect {
    /// Quote an identifier.
    pub fn quote_identifier(&self, ident: &str) -> String {
        match self {
            Self::MySql => format!("`{}`", ident.replace('`', "``")),
            Self::Postgres | Self::Sqlite => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Bind placeholder for the `n`th (1-based) parameter.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Self::Postgres => format!("${}", n),
            Self::MySql => "?".to_string(),
            Self::Sqlite => format!("?{}", n),
        }
    }
}

/// Location and statements of a journal table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalTable {
    dialect: Dialect,
    schema: Option<String>,
    table: String,
}

impl JournalTable {
    /// Default journal table name.
    pub const DEFAULT_TABLE: &'static str = "schema_versions";

    /// Create a table descriptor.
    pub fn new(dialect: Dialect, table: impl Into<String>) -> Self {
        Self {
            dialect,
            schema: None,
            table: table.into(),
        }
    }

    /// Place the table in a schema.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        let schema = schema.into();
        self.schema = (!schema.is_empty()).then_some(schema);
        self
    }

    /// Dialect used for rendering.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Unquoted table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Schema, if any.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Quoted, schema-qualified table name.
    pub fn qualified_name(&self) -> String {
        let table = self.dialect.quote_identifier(&self.table);
        match &self.schema {
            Some(schema) => format!("{}.{}", self.dialect.quote_identifier(schema), table),
            None => table,
        }
    }

    /// DDL creating the table if it does not exist.
    pub fn create_sql(&self) -> String {
        let id = match self.dialect {
            Dialect::Postgres => "id BIGSERIAL PRIMARY KEY",
            Dialect::MySql => "id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY",
            Dialect::Sqlite => "id INTEGER PRIMARY KEY AUTOINCREMENT",
        };
        let timestamp = match self.dialect {
            Dialect::Postgres => "TIMESTAMP WITH TIME ZONE",
            Dialect::MySql => "TIMESTAMP",
            Dialect::Sqlite => "TEXT",
        };

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
             {},\n    \
             version_id BIGINT NOT NULL,\n    \
             migration_type INTEGER NOT NULL,\n    \
             script_name VARCHAR(512) NOT NULL UNIQUE,\n    \
             created_on {} NOT NULL\n\
             )",
            self.qualified_name(),
            id,
            timestamp
        )
    }

    /// Query returning every record ordered by version.
    pub fn select_applied_sql(&self) -> String {
        format!(
            "SELECT id, version_id, migration_type, script_name, created_on FROM {} \
             ORDER BY version_id, id",
            self.qualified_name()
        )
    }

    /// Insert taking `(version_id, migration_type, script_name, created_on)`.
    pub fn insert_sql(&self) -> String {
        let d = self.dialect;
        format!(
            "INSERT INTO {} (version_id, migration_type, script_name, created_on) \
             VALUES ({}, {}, {}, {})",
            self.qualified_name(),
            d.placeholder(1),
            d.placeholder(2),
            d.placeholder(3),
            d.placeholder(4)
        )
    }

    /// Delete taking `(script_name)`.
    pub fn delete_sql(&self) -> String {
        format!(
            "DELETE FROM {} WHERE script_name = {}",
            self.qualified_name(),
            self.dialect.placeholder(1)
        )
    }

    /// Existence check taking `(script_name)`.
    pub fn exists_by_name_sql(&self) -> String {
        format!(
            "SELECT 1 FROM {} WHERE script_name = {}",
            self.qualified_name(),
            self.dialect.placeholder(1)
        )
    }

    /// Existence check taking `(version_id, migration_type)`.
    pub fn exists_by_version_sql(&self) -> String {
        format!(
            "SELECT 1 FROM {} WHERE version_id = {} AND migration_type = {}",
            self.qualified_name(),
            self.dialect.placeholder(1),
            self.dialect.placeholder(2)
        )
    }
}
