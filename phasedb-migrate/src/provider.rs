//! Sources of migrations.
//!
//! The engine never discovers migrations itself. It is given a list of
//! providers at construction and asks each for its descriptors (or, in the
//! flat script mode, its scripts).
//!
//! ```toml
//! [[migration]]
//! name = "20160609100800_beforecode_schema"
//! kind = "schema"
//! step = "before_code"
//! up = "ALTER TABLE users ADD COLUMN email TEXT"
//! down = "ALTER TABLE users DROP COLUMN email"
//!
//! [[migration]]
//! name = "20160609100700_beforecode_data"
//! kind = "data"
//! depends_on = 20160609100800
//! up = "UPDATE users SET email = ''"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::descriptor::{ExecutionStep, MigrationDescriptor, MigrationKind, parse_version};
use crate::error::{MigrateResult, MigrationError};
use crate::script::SqlScript;

/// Supplies migration descriptors.
#[async_trait::async_trait]
pub trait DescriptorProvider: Send + Sync {
    /// Get every descriptor this provider knows about, in any order.
    async fn descriptors(&self) -> MigrateResult<Vec<MigrationDescriptor>>;
}

/// Supplies plain scripts for the flat script mode.
#[async_trait::async_trait]
pub trait ScriptProvider: Send + Sync {
    /// Get every script, in execution order.
    async fn scripts(&self) -> MigrateResult<Vec<SqlScript>>;
}

/// Descriptors supplied from code.
#[derive(Debug, Clone, Default)]
pub struct StaticDescriptorProvider {
    descriptors: Vec<MigrationDescriptor>,
}

impl StaticDescriptorProvider {
    /// Create a provider over the given descriptors.
    pub fn new(descriptors: impl IntoIterator<Item = MigrationDescriptor>) -> Self {
        Self {
            descriptors: descriptors.into_iter().collect(),
        }
    }
}

#[async_trait::async_trait]
impl DescriptorProvider for StaticDescriptorProvider {
    async fn descriptors(&self) -> MigrateResult<Vec<MigrationDescriptor>> {
        Ok(self.descriptors.clone())
    }
}

/// Scripts supplied from code.
#[derive(Debug, Clone, Default)]
pub struct StaticScriptProvider {
    scripts: Vec<SqlScript>,
}

impl StaticScriptProvider {
    /// Create a provider over the given scripts.
    pub fn new(scripts: impl IntoIterator<Item = SqlScript>) -> Self {
        Self {
            scripts: scripts.into_iter().collect(),
        }
    }
}

#[async_trait::async_trait]
impl ScriptProvider for StaticScriptProvider {
    async fn scripts(&self) -> MigrateResult<Vec<SqlScript>> {
        Ok(self.scripts.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Manifest {
    #[serde(default, rename = "migration")]
    migrations: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestEntry {
    name: String,
    version: Option<i64>,
    kind: MigrationKind,
    #[serde(default)]
    step: ExecutionStep,
    #[serde(default)]
    up: String,
    down: Option<String>,
    depends_on: Option<i64>,
}

impl ManifestEntry {
    fn into_descriptor(self) -> MigrateResult<MigrationDescriptor> {
        let version = match self.version {
            Some(v) => v,
            None => parse_version(&self.name)
                .map_err(|e| MigrationError::manifest(format!("{}: {}", self.name, e)))?,
        };

        let descriptor = match self.kind {
            MigrationKind::Schema => {
                if self.depends_on.is_some() {
                    return Err(MigrationError::manifest(format!(
                        "schema migration '{}' cannot declare depends_on",
                        self.name
                    )));
                }
                MigrationDescriptor::schema(
                    version,
                    self.name,
                    self.up,
                    self.down.unwrap_or_default(),
                )
            }
            MigrationKind::Data => {
                if self.down.is_some() {
                    return Err(MigrationError::manifest(format!(
                        "data migration '{}' cannot declare a down script",
                        self.name
                    )));
                }
                let descriptor = MigrationDescriptor::data(version, self.name, self.up);
                match self.depends_on {
                    Some(dep) => descriptor.depends_on(dep),
                    None => descriptor,
                }
            }
        };

        Ok(descriptor.with_step(self.step))
    }
}

/// Descriptors read from a TOML manifest.
#[derive(Debug, Clone, Default)]
pub struct ManifestProvider {
    path: Option<PathBuf>,
    descriptors: Vec<MigrationDescriptor>,
}

impl ManifestProvider {
    /// Parse a manifest from a string.
    pub fn parse(content: &str) -> MigrateResult<Self> {
        let manifest: Manifest = toml::from_str(content)
            .map_err(|e| MigrationError::manifest(format!("Failed to parse manifest: {}", e)))?;

        let descriptors = manifest
            .migrations
            .into_iter()
            .map(ManifestEntry::into_descriptor)
            .collect::<MigrateResult<Vec<_>>>()?;

        Ok(Self {
            path: None,
            descriptors,
        })
    }

    /// Load a manifest from a file.
    pub async fn load(path: impl AsRef<Path>) -> MigrateResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            MigrationError::manifest(format!(
                "Failed to read manifest {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut provider = Self::parse(&content)?;
        debug!(
            path = %path.display(),
            count = provider.descriptors.len(),
            "Loaded migration manifest"
        );
        provider.path = Some(path.to_path_buf());
        Ok(provider)
    }

    /// File the manifest was loaded from.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[async_trait::async_trait]
impl DescriptorProvider for ManifestProvider {
    async fn descriptors(&self) -> MigrateResult<Vec<MigrationDescriptor>> {
        Ok(self.descriptors.clone())
    }
}
