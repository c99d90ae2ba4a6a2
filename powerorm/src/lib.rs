//! # powerorm
//!
//! A Django-style object-relational mapper for Rust.
//!
//! This is the meta-crate that re-exports all sub-crates for convenient access.
//! You can depend on `powerorm` to get the entire ORM, or depend on
//! individual crates for finer-grained control.
//!
//! ```ignore
//! use powerorm::core::Settings;
//! use powerorm::db_backends::SqliteConnection;
//! use powerorm::db_migrations::{MigrationExecutor, MigrationLoader};
//!
//! let settings = Settings::in_memory();
//! powerorm::core::logging::setup_logging(&settings);
//! let conn = SqliteConnection::memory()?;
//! let loader = MigrationLoader::from_settings(&settings, app_migrations())?;
//! let mut executor = MigrationExecutor::new(&conn, loader)?;
//! let targets = executor.leaf_targets();
//! executor.migrate(&targets, None, false, &mut std::io::stdout())?;
//! ```

/// Error types, settings, logging, and system checks.
pub use powerorm_core as core;

/// ORM: model metadata, queries, querysets, and SQL compilation.
#[cfg(feature = "db")]
pub use powerorm_db as db;

/// Database backends: `SQLite`.
pub use powerorm_db_backends as db_backends;

/// Migration engine and auto-detection.
#[cfg(feature = "db-migrations")]
pub use powerorm_db_migrations as db_migrations;

pub use powerorm_core::{OrmError, OrmResult, Settings};

// Third-party crates used in the public API.
pub use chrono;
pub use serde;
pub use serde_json;
pub use tracing;
pub use tracing_subscriber;
