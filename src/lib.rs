//! # phasedb
//!
//! Ordering, dependency validation and phased execution of database
//! migrations.
//!
//! phasedb provides:
//! - Schema and data migrations, ordered so a data migration runs right after
//!   the schema change it depends on
//! - Two-phase deployments: run `BeforeCode` changes, deploy, then `AfterCode`
//! - Rollback of schema migrations above a target version
//! - Pluggable journal, executor and connection back-ends
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use phasedb::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = SqliteBackend::open(SqliteConfig::file("app.db")).await?;
//!     let engine = backend
//!         .engine_builder(UpgradeConfig::new().step(StepFilter::BeforeCode))
//!         .with_descriptors(ManifestProvider::load("migrations.toml").await?)
//!         .build();
//!
//!     let result = engine.migrate().await;
//!     if !result.successful {
//!         eprintln!("{}", result.summary());
//!     }
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Migration engine: descriptors, planning, journals and orchestration.
pub mod migrate {
    pub use phasedb_migrate::*;
}

/// SQLite back-end.
#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod sqlite {
    pub use phasedb_sqlite::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::migrate::{
        DatabaseUpgradeResult, ManifestProvider, MigrationDescriptor, MigrationError,
        StaticDescriptorProvider, StepFilter, UpgradeConfig, UpgradeEngine,
    };
    #[cfg(feature = "sqlite")]
    pub use crate::sqlite::{SqliteBackend, SqliteConfig};
}

pub use migrate::{MigrateResult, MigrationError};
