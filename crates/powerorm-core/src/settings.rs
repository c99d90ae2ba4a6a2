//! Settings for PowerORM.
//!
//! [`Settings`] holds everything the ORM reads at start-up: database
//! connection parameters, the table prefix applied to generated table names,
//! the directory migrations are loaded from, and logging/check options.
//! There is no global instance; the settings are owned by the ORM context
//! and passed by reference to whatever needs them.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{OrmError, OrmResult};

/// Database connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// The database engine (`sqlite`, `postgresql` or `mysql`).
    pub engine: String,
    /// The database name (or file path for `SQLite`, `:memory:` allowed).
    pub name: String,
    /// The database user.
    pub user: String,
    /// The database password.
    pub password: String,
    /// The database host.
    pub host: String,
    /// The database port.
    pub port: u16,
    /// Additional engine-specific options.
    pub options: HashMap<String, String>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            engine: "sqlite".to_string(),
            name: "db.sqlite3".to_string(),
            user: String::new(),
            password: String::new(),
            host: String::new(),
            port: 0,
            options: HashMap::new(),
        }
    }
}

impl DatabaseSettings {
    /// An in-memory `SQLite` database, handy for tests.
    pub fn sqlite_memory() -> Self {
        Self {
            name: ":memory:".to_string(),
            ..Self::default()
        }
    }
}

/// The complete set of ORM settings.
///
/// # Examples
///
/// ```
/// use powerorm_core::settings::Settings;
///
/// let settings = Settings::default();
/// assert!(settings.debug);
/// assert_eq!(settings.db_prefix, "");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // ── Core ─────────────────────────────────────────────────────────

    /// Whether debug mode is enabled.
    pub debug: bool,

    // ── Database ─────────────────────────────────────────────────────

    /// Database configurations, keyed by alias (e.g. "default").
    pub databases: HashMap<String, DatabaseSettings>,
    /// Prefix prepended to every generated table name.
    pub db_prefix: String,
    /// Character set used when creating MySQL tables.
    pub charset: String,
    /// The default time zone (e.g. "UTC").
    pub time_zone: String,

    // ── Migrations ───────────────────────────────────────────────────

    /// Directory holding one sub-directory of migration files per app.
    pub migration_path: Option<PathBuf>,

    // ── Checks ───────────────────────────────────────────────────────

    /// Check ids (e.g. `fields.W340`) that should not be reported.
    pub silenced_checks: Vec<String>,

    // ── Logging ──────────────────────────────────────────────────────

    /// The log level (e.g. "info", "debug", "warn").
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        let mut databases = HashMap::new();
        databases.insert("default".to_string(), DatabaseSettings::default());

        Self {
            debug: true,
            databases,
            db_prefix: String::new(),
            charset: "utf8".to_string(),
            time_zone: "UTC".to_string(),
            migration_path: None,
            silenced_checks: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Settings pointing at an in-memory `SQLite` database.
    pub fn in_memory() -> Self {
        let mut settings = Self::default();
        settings
            .databases
            .insert("default".to_string(), DatabaseSettings::sqlite_memory());
        settings
    }

    /// Returns the `default` database configuration.
    pub fn default_database(&self) -> OrmResult<&DatabaseSettings> {
        self.databases.get("default").ok_or_else(|| {
            OrmError::ImproperlyConfigured(
                "settings.databases is improperly configured: no 'default' database".into(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let s = Settings::default();
        assert!(s.debug);
        assert_eq!(s.time_zone, "UTC");
        assert_eq!(s.charset, "utf8");
        assert_eq!(s.log_level, "info");
        assert!(s.migration_path.is_none());
        assert!(s.silenced_checks.is_empty());
    }

    #[test]
    fn test_default_database() {
        let s = Settings::default();
        let db = s.default_database().unwrap();
        assert_eq!(db.engine, "sqlite");
        assert_eq!(db.name, "db.sqlite3");
    }

    #[test]
    fn test_in_memory() {
        let s = Settings::in_memory();
        assert_eq!(s.default_database().unwrap().name, ":memory:");
    }

    #[test]
    fn test_missing_default_database() {
        let mut s = Settings::default();
        s.databases.clear();
        assert!(matches!(
            s.default_database(),
            Err(OrmError::ImproperlyConfigured(_))
        ));
    }
}
