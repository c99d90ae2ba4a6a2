//! # powerorm-core
//!
//! Foundation types shared by every PowerORM crate: the error enum, settings
//! and their loaders, tracing setup, and the system check framework.
//! This crate has no ORM dependencies of its own.
//!
//! ## Modules
//!
//! - [`error`] - Error types and result aliases
//! - [`settings`] - ORM settings (databases, table prefix, migration path)
//! - [`settings_loader`] - Loading settings from TOML, JSON and the environment
//! - [`checks`] - System checks with tag filtering and silencing
//! - [`logging`] - Tracing-based logging integration

pub mod checks;
pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use error::{OrmError, OrmResult};
pub use settings::{DatabaseSettings, Settings};
