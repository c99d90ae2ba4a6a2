//! Migration files.
//!
//! A migration is stored as `<dir>/<app_label>/<name>.json`:
//!
//! ```json
//! {
//!   "dependencies": [["blog", "0001_initial"]],
//!   "initial": false,
//!   "operations": [{"type": "AddField", "model_name": "Post", "field": {...}}]
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use powerorm_core::{OrmError, OrmResult};
use serde::{Deserialize, Serialize};

use crate::migration::{Migration, MigrationKey};
use crate::operations::OperationSpec;

/// The serialized form of a migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationFile {
    /// Migrations that must run first.
    #[serde(default)]
    pub dependencies: Vec<MigrationKey>,
    /// Whether this is the first migration of its app.
    #[serde(default)]
    pub initial: bool,
    /// The operations, in order.
    #[serde(default)]
    pub operations: Vec<OperationSpec>,
}

impl MigrationFile {
    /// Captures `migration`.
    pub fn from_migration(migration: &Migration) -> Self {
        Self {
            dependencies: migration.dependencies.clone(),
            initial: migration.initial,
            operations: migration.operations.iter().map(|op| op.deconstruct()).collect(),
        }
    }

    /// Parses a file's JSON.
    pub fn from_json(json: &str) -> OrmResult<Self> {
        serde_json::from_str(json).map_err(|e| OrmError::SerializationError(e.to_string()))
    }

    /// Builds the migration `app_label.name`.
    pub fn into_migration(self, app_label: impl Into<String>, name: impl Into<String>) -> Migration {
        let mut migration = Migration::new(app_label, name);
        migration.dependencies = self.dependencies;
        migration.initial = self.initial;
        migration.operations = self
            .operations
            .into_iter()
            .map(OperationSpec::into_operation)
            .collect();
        migration
    }
}

/// Renders a migration to disk.
#[derive(Debug)]
pub struct MigrationWriter<'m> {
    migration: &'m Migration,
}

impl<'m> MigrationWriter<'m> {
    /// A writer for `migration`.
    pub const fn new(migration: &'m Migration) -> Self {
        Self { migration }
    }

    /// Pretty-printed JSON.
    pub fn as_json(&self) -> OrmResult<String> {
        serde_json::to_string_pretty(&MigrationFile::from_migration(self.migration))
            .map_err(|e| OrmError::SerializationError(e.to_string()))
    }

    /// The file the migration is written to under `dir`.
    pub fn path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.migration.app_label)
            .join(format!("{}.json", self.migration.name))
    }

    /// Writes the migration under `dir`, creating the app directory.
    pub fn write(&self, dir: &Path) -> OrmResult<PathBuf> {
        let path = self.path(dir);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, self.as_json()?)?;
        tracing::info!(path = %path.display(), migration = %self.migration, "wrote migration");
        Ok(path)
    }
}
