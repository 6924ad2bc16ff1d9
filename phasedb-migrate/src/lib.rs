//! # phasedb-migrate
//!
//! Versioned, phase-aware migration engine.
//!
//! This crate decides *what* to run, *in what order* and *under which
//! preconditions* when bringing a store from its journaled state to a target
//! version:
//! - Schema and data migrations interleaved by dependency
//! - Forward application and schema rollback to a target version
//! - Two-phase deployments (`BeforeCode` / `AfterCode` steps)
//! - Idempotent, resumable runs tracked in a journal
//! - A flat, version-less script mode for simple linear migration sets
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌────────────────┐     ┌─────────────┐
//! │ Providers   │────▶│ Planner        │◀────│ Journal     │
//! └─────────────┘     └────────────────┘     └─────────────┘
//!                             │                     ▲
//!                             ▼                     │
//!                     ┌────────────────┐     ┌─────────────┐
//!                     │ Upgrade Engine │────▶│ Executor    │
//!                     └────────────────┘     └─────────────┘
//! ```
//!
//! Loading migration definitions, running scripts against a concrete store
//! and persisting the journal are left to the collaborators behind
//! [`DescriptorProvider`], [`ScriptExecutor`] and [`Journal`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use phasedb_migrate::{
//!     InMemoryJournal, MigrationDescriptor, StaticDescriptorProvider, StepFilter,
//!     UpgradeEngine, LATEST_VERSION,
//! };
//!
//! async fn deploy(executor: impl phasedb_migrate::ScriptExecutor + 'static) {
//!     let engine = UpgradeEngine::builder(InMemoryJournal::new(), executor)
//!         .with_descriptors(StaticDescriptorProvider::new(vec![
//!             MigrationDescriptor::schema(
//!                 20160609100800,
//!                 "20160609100800_add_email",
//!                 "ALTER TABLE users ADD COLUMN email TEXT",
//!                 "ALTER TABLE users DROP COLUMN email",
//!             ),
//!             MigrationDescriptor::data(20160609100700, "20160609100700_backfill_email", "...")
//!                 .depends_on(20160609100800),
//!         ]))
//!         .build();
//!
//!     // Before the new code ships
//!     let result = engine.perform_migration(LATEST_VERSION, StepFilter::BeforeCode).await;
//!     if !result.successful {
//!         eprintln!("{}", result.summary());
//!     }
//!
//!     // After it ships
//!     engine.perform_migration(LATEST_VERSION, StepFilter::AfterCode).await;
//! }
//! ```

pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod executor;
pub mod journal;
pub mod plan;
pub mod provider;
pub mod result;
pub mod script;

// Re-exports
pub use config::UpgradeConfig;
pub use descriptor::{
    Direction, ExecutionStep, MigrationBody, MigrationDescriptor, MigrationKind, SortKey,
    SortMode, parse_version,
};
pub use engine::{UpgradeEngine, UpgradeEngineBuilder};
pub use error::{BoxError, ErrorCategory, MigrateResult, MigrationError};
pub use executor::{ConnectionManager, NoopConnectionManager, OperationScope, ScriptExecutor};
pub use journal::{
    AppliedRecord, Dialect, InMemoryJournal, Journal, JournalTable, LEGACY_SCRIPT_VERSION,
    NullJournal,
};
pub use plan::{ExecutionPlanner, LATEST_VERSION, MigrationPlan, PlannedMigration, StepFilter};
pub use provider::{
    DescriptorProvider, ManifestProvider, ScriptProvider, StaticDescriptorProvider,
    StaticScriptProvider,
};
pub use result::{DatabaseUpgradeResult, ExecutedScript, UpgradeFailure};
pub use script::{ScriptVariables, SqlScript, substitute_variables};
