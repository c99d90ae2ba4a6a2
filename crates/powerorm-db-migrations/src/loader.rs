//! Migration loading.
//!
//! The [`MigrationLoader`] gathers migrations defined in code and migration
//! files found under the configured migration path, builds the
//! [`MigrationGraph`] from them and tracks which nodes are applied. It also
//! reconstructs the [`ProjectState`] at any point of the history.
//!
//! Files are laid out as:
//! ```text
//! migration_path/
//!   app_label/
//!     0001_initial.json
//!     0002_add_field.json
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use powerorm_core::{OrmError, OrmResult, Settings};

use crate::migration::{Migration, MigrationGraph, MigrationKey};
use crate::recorder::MigrationRecorder;
use crate::state::ProjectState;
use crate::writer::MigrationFile;

/// Loads migrations and the applied set.
#[derive(Debug, Default)]
pub struct MigrationLoader {
    graph: MigrationGraph,
    applied: BTreeSet<MigrationKey>,
    db_prefix: String,
}

impl MigrationLoader {
    /// Builds the graph from code-defined migrations.
    pub fn new(migrations: Vec<Migration>) -> OrmResult<Self> {
        Ok(Self {
            graph: MigrationGraph::from_migrations(migrations)?,
            applied: BTreeSet::new(),
            db_prefix: String::new(),
        })
    }

    /// Builds the graph from `migrations` plus the files under the
    /// configured migration path.
    pub fn from_settings(settings: &Settings, mut migrations: Vec<Migration>) -> OrmResult<Self> {
        if let Some(ref dir) = settings.migration_path {
            migrations.extend(Self::discover(dir)?);
        }
        let mut loader = Self::new(migrations)?;
        loader.db_prefix.clone_from(&settings.db_prefix);
        tracing::debug!(migrations = loader.graph.len(), "loaded migration graph");
        Ok(loader)
    }

    /// Reads every `<app>/<name>.json` under `dir`. A missing directory
    /// holds no migrations.
    pub fn discover(dir: &Path) -> OrmResult<Vec<Migration>> {
        let mut migrations = Vec::new();
        if !dir.is_dir() {
            return Ok(migrations);
        }
        let mut app_dirs: Vec<_> = fs::read_dir(dir)?
            .map(|e| e.map(|e| e.path()))
            .collect::<Result<_, _>>()?;
        app_dirs.sort();
        for app_dir in app_dirs.into_iter().filter(|p| p.is_dir()) {
            let Some(app_label) = app_dir.file_name().and_then(|n| n.to_str()).map(str::to_string)
            else {
                continue;
            };
            let mut files: Vec<_> = fs::read_dir(&app_dir)?
                .map(|e| e.map(|e| e.path()))
                .collect::<Result<_, _>>()?;
            files.sort();
            for path in files {
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                migrations.push(Self::read_migration_file(&app_label, &path)?);
            }
        }
        Ok(migrations)
    }

    /// Reads one migration file. The file stem is the migration name.
    pub fn read_migration_file(app_label: &str, path: &Path) -> OrmResult<Migration> {
        let name = path
            .file_stem()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                OrmError::ConfigurationError(format!("Invalid migration file name: {}", path.display()))
            })?;
        let file = MigrationFile::from_json(&fs::read_to_string(path)?).map_err(|e| {
            OrmError::SerializationError(format!("{}: {e}", path.display()))
        })?;
        Ok(file.into_migration(app_label, name))
    }

    /// Replaces the applied set with the recorder's.
    pub fn load_applied(&mut self, recorder: &MigrationRecorder<'_>) -> OrmResult<()> {
        self.applied = recorder.applied_migrations()?;
        Ok(())
    }

    /// The migration graph.
    pub const fn graph(&self) -> &MigrationGraph {
        &self.graph
    }

    /// Applied migrations.
    pub const fn applied(&self) -> &BTreeSet<MigrationKey> {
        &self.applied
    }

    /// Returns `true` when `key` is applied.
    pub fn is_applied(&self, key: &MigrationKey) -> bool {
        self.applied.contains(key)
    }

    /// Records `key` as applied in memory.
    pub fn mark_applied(&mut self, key: MigrationKey) {
        self.applied.insert(key);
    }

    /// Records `key` as unapplied in memory.
    pub fn mark_unapplied(&mut self, key: &MigrationKey) {
        self.applied.remove(key);
    }

    /// An empty state carrying the table prefix.
    pub fn empty_state(&self) -> ProjectState {
        ProjectState::with_prefix(self.db_prefix.clone())
    }

    /// The state after applying everything `nodes` depend on, and `nodes`
    /// themselves when `at_end` is set.
    pub fn project_state(&self, nodes: &[MigrationKey], at_end: bool) -> OrmResult<ProjectState> {
        let mut plan: Vec<MigrationKey> = Vec::new();
        for node in nodes {
            for key in self.graph.forwards_plan(node)? {
                if !plan.contains(&key) && (at_end || !nodes.contains(&key)) {
                    plan.push(key);
                }
            }
        }
        let mut state = self.empty_state();
        for key in &plan {
            state = self.graph.get_migration(key)?.mutate_state(&state)?;
        }
        Ok(state)
    }

    /// The state at the end of every app's history.
    pub fn end_state(&self) -> OrmResult<ProjectState> {
        self.project_state(&self.graph.leaf_nodes(None), true)
    }

    /// Apps with more than one leaf, with the names of those leaves.
    pub fn detect_conflicts(&self) -> BTreeMap<String, Vec<String>> {
        self.graph
            .apps()
            .into_iter()
            .filter_map(|app| {
                let leaves = self.graph.leaf_nodes(Some(&app));
                (leaves.len() > 1).then(|| (app, leaves.into_iter().map(|(_, name)| name).collect()))
            })
            .collect()
    }

    /// Fails when an applied migration has an unapplied dependency.
    pub fn check_consistent_history(&self) -> OrmResult<()> {
        for key in self.applied.iter().filter(|k| self.graph.contains(k)) {
            for parent in self.graph.dependencies(key) {
                if !self.applied.contains(&parent) {
                    return Err(OrmError::InconsistentMigrationHistory(format!(
                        "Migration {}.{} is applied before its dependency {}.{}",
                        key.0, key.1, parent.0, parent.1
                    )));
                }
            }
        }
        Ok(())
    }
}
