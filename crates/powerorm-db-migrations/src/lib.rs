//! # powerorm-db-migrations
//!
//! Migration engine for PowerORM. Builds the dependency graph of migrations,
//! tracks which ones are applied, and moves the database schema forwards or
//! backwards through a schema editor.
//!
//! ## Architecture
//!
//! - [`Migration`] is a named set of [`Operation`]s belonging to an app.
//! - [`MigrationGraph`] resolves dependency ordering across apps.
//! - [`MigrationLoader`] builds the graph from code and migration files and
//!   reconstructs [`ProjectState`]s.
//! - [`MigrationRecorder`] owns the applied-migrations table.
//! - [`SchemaEditor`] turns operations into backend-specific DDL.
//! - [`MigrationExecutor`] plans and runs migrations.
//! - [`MigrationAutodetector`] diffs two [`ProjectState`]s to produce operations.
//!
//! ## Module Overview
//!
//! - [`migration`] - `Migration`, `MigrationGraph`
//! - [`loader`] - `MigrationLoader`
//! - [`recorder`] - `MigrationRecorder`
//! - [`state`] - `ProjectState`, `ModelState`, `ModelOptions`
//! - [`operations`] - `Operation` trait and all concrete operations
//! - [`schema_editor`] - `SchemaEditor` and the SQLite/PostgreSQL/MySQL DDL dialects
//! - [`executor`] - `MigrationExecutor`, `MigrationPlan`, `MigrationTarget`
//! - [`show`] - applied/pending listing
//! - [`autodetect`] - `MigrationAutodetector`
//! - [`writer`] - migration files

// Clippy overrides appropriate for a DDL generation / migration crate.
#![allow(clippy::too_many_lines)]
#![allow(clippy::result_large_err)]
#![allow(clippy::format_push_string)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]

pub mod autodetect;
pub mod executor;
pub mod loader;
pub mod migration;
pub mod operations;
pub mod recorder;
pub mod schema_editor;
pub mod show;
pub mod state;
pub mod writer;

// Re-export key types at the crate root.
pub use autodetect::MigrationAutodetector;
pub use executor::{MigrationExecutor, MigrationPlan, MigrationStep, MigrationTarget};
pub use loader::MigrationLoader;
pub use migration::{Migration, MigrationGraph, MigrationKey};
pub use operations::{Operation, OperationSpec};
pub use recorder::{MigrationRecorder, MIGRATIONS_TABLE};
pub use schema_editor::{DdlDialect, MySqlDialect, PostgresDialect, SchemaEditor, SqliteDialect};
pub use show::{render_show_migrations, show_migrations, MigrationStatus};
pub use state::{ModelOptions, ModelState, ProjectState};
pub use writer::{MigrationFile, MigrationWriter};
