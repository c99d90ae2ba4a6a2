//! # powerorm-db-backends
//!
//! Database backend implementations for PowerORM. Each backend implements
//! [`Connection`](powerorm_db::connection::Connection) synchronously.
//!
//! Supported backends:
//! - `SQLite` (feature `sqlite`, on by default)

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteConnection;
