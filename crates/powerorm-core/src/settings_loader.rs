//! Settings loading from configuration files.
//!
//! [`Settings`] can be loaded from TOML or JSON files, with environment
//! variables applied on top.
//!
//! ## Loading Order
//!
//! 1. Start with default settings.
//! 2. Load from a TOML or JSON file (overriding defaults).
//! 3. Apply environment variable overrides (highest priority).
//!
//! ## Environment Variable Mapping
//!
//! | Env Var | Setting |
//! |---|---|
//! | `POWERORM_DEBUG` | `debug` |
//! | `POWERORM_LOG_LEVEL` | `log_level` |
//! | `POWERORM_DB_PREFIX` | `db_prefix` |
//! | `POWERORM_TIME_ZONE` | `time_zone` |
//! | `POWERORM_CHARSET` | `charset` |
//! | `POWERORM_MIGRATION_PATH` | `migration_path` |
//! | `POWERORM_SILENCED_CHECKS` | `silenced_checks` (comma-separated) |
//! | `POWERORM_DATABASE_ENGINE` | `databases.default.engine` |
//! | `POWERORM_DATABASE_NAME` | `databases.default.name` |
//!
//! ## Examples
//!
//! ```rust,no_run
//! use powerorm_core::settings_loader;
//!
//! let settings = settings_loader::from_toml_file("config/orm.toml").unwrap();
//! let settings = settings_loader::from_json_file_with_env("config/orm.json").unwrap();
//! ```

use std::path::{Path, PathBuf};

use crate::error::{OrmError, OrmResult};
use crate::settings::{DatabaseSettings, Settings};

/// Loads settings from a TOML string.
///
/// Keys missing from the TOML keep their default values.
pub fn from_toml_str(toml_str: &str) -> OrmResult<Settings> {
    let toml_value: toml::Value = toml::from_str(toml_str)
        .map_err(|e| OrmError::ConfigurationError(format!("Failed to parse TOML: {e}")))?;

    merge_into_defaults(toml_to_json(toml_value), "TOML")
}

/// Loads settings from a TOML file.
pub fn from_toml_file(path: impl AsRef<Path>) -> OrmResult<Settings> {
    from_toml_str(&read_config(path.as_ref(), "TOML")?)
}

/// Loads settings from a TOML file and then applies environment variable overrides.
pub fn from_toml_file_with_env(path: impl AsRef<Path>) -> OrmResult<Settings> {
    let mut settings = from_toml_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads settings from a JSON string.
pub fn from_json_str(json_str: &str) -> OrmResult<Settings> {
    let json_value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| OrmError::ConfigurationError(format!("Failed to parse JSON: {e}")))?;

    merge_into_defaults(json_value, "JSON")
}

/// Loads settings from a JSON file.
pub fn from_json_file(path: impl AsRef<Path>) -> OrmResult<Settings> {
    from_json_str(&read_config(path.as_ref(), "JSON")?)
}

/// Loads settings from a JSON file and then applies environment variable overrides.
pub fn from_json_file_with_env(path: impl AsRef<Path>) -> OrmResult<Settings> {
    let mut settings = from_json_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads settings from just environment variables (starting from defaults).
pub fn from_env() -> Settings {
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings);
    settings
}

/// Applies `POWERORM_*` environment variable overrides to a settings struct.
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(val) = std::env::var("POWERORM_DEBUG") {
        settings.debug = matches!(val.to_lowercase().as_str(), "true" | "1" | "yes");
    }

    if let Ok(val) = std::env::var("POWERORM_LOG_LEVEL") {
        settings.log_level = val;
    }

    if let Ok(val) = std::env::var("POWERORM_DB_PREFIX") {
        settings.db_prefix = val;
    }

    if let Ok(val) = std::env::var("POWERORM_TIME_ZONE") {
        settings.time_zone = val;
    }

    if let Ok(val) = std::env::var("POWERORM_CHARSET") {
        settings.charset = val;
    }

    if let Ok(val) = std::env::var("POWERORM_MIGRATION_PATH") {
        settings.migration_path = Some(PathBuf::from(val));
    }

    if let Ok(val) = std::env::var("POWERORM_SILENCED_CHECKS") {
        settings.silenced_checks = val
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    let engine = std::env::var("POWERORM_DATABASE_ENGINE").ok();
    let name = std::env::var("POWERORM_DATABASE_NAME").ok();
    if engine.is_some() || name.is_some() {
        let db = settings
            .databases
            .entry("default".to_string())
            .or_insert_with(DatabaseSettings::default);
        if let Some(engine) = engine {
            db.engine = engine;
        }
        if let Some(name) = name {
            db.name = name;
        }
    }
}

// ============================================================
// Helpers
// ============================================================

fn read_config(path: &Path, kind: &str) -> OrmResult<String> {
    std::fs::read_to_string(path).map_err(|e| {
        OrmError::ConfigurationError(format!(
            "Failed to read {kind} file '{}': {e}",
            path.display()
        ))
    })
}

fn merge_into_defaults(value: serde_json::Value, kind: &str) -> OrmResult<Settings> {
    let default_json = serde_json::to_value(Settings::default()).map_err(|e| {
        OrmError::ConfigurationError(format!("Failed to serialize default settings: {e}"))
    })?;

    let merged = merge_json(default_json, value);
    serde_json::from_value(merged).map_err(|e| {
        OrmError::ConfigurationError(format!("Failed to deserialize settings from {kind}: {e}"))
    })
}

/// Converts a TOML value to a `serde_json::Value`.
fn toml_to_json(value: toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(b),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
        toml::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => serde_json::Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

/// Deep-merges two JSON values. The `override_val` takes precedence.
fn merge_json(base: serde_json::Value, override_val: serde_json::Value) -> serde_json::Value {
    match (base, override_val) {
        (serde_json::Value::Object(mut base_map), serde_json::Value::Object(override_map)) => {
            for (key, override_v) in override_map {
                let merged = if let Some(base_v) = base_map.remove(&key) {
                    merge_json(base_v, override_v)
                } else {
                    override_v
                };
                base_map.insert(key, merged);
            }
            serde_json::Value::Object(base_map)
        }
        (_, override_val) => override_val,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── TOML loading ────────────────────────────────────────────────

    #[test]
    fn test_from_toml_str_basic() {
        let toml = r#"
            debug = false
            db_prefix = "app_"
            silenced_checks = ["fields.W340"]
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert!(!settings.debug);
        assert_eq!(settings.db_prefix, "app_");
        assert_eq!(settings.silenced_checks, vec!["fields.W340".to_string()]);
        // Defaults preserved
        assert_eq!(settings.time_zone, "UTC");
    }

    #[test]
    fn test_from_toml_str_databases() {
        let toml = r#"
            migration_path = "migrations"

            [databases.default]
            engine = "postgresql"
            name = "mydb"
            user = "myuser"
            port = 5432
        "#;

        let settings = from_toml_str(toml).unwrap();
        let db = settings.default_database().unwrap();
        assert_eq!(db.engine, "postgresql");
        assert_eq!(db.name, "mydb");
        assert_eq!(db.user, "myuser");
        assert_eq!(db.port, 5432);
        assert_eq!(settings.migration_path, Some(PathBuf::from("migrations")));
    }

    #[test]
    fn test_from_toml_str_empty() {
        let settings = from_toml_str("").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_from_toml_str_invalid() {
        assert!(matches!(
            from_toml_str("[[invalid toml content"),
            Err(OrmError::ConfigurationError(_))
        ));
    }

    // ── JSON loading ────────────────────────────────────────────────

    #[test]
    fn test_from_json_str_basic() {
        let json = r#"{"debug": false, "log_level": "debug"}"#;

        let settings = from_json_str(json).unwrap();
        assert!(!settings.debug);
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.charset, "utf8");
    }

    #[test]
    fn test_from_json_str_partial_database() {
        let json = r#"{"databases": {"default": {"name": ":memory:"}}}"#;

        let settings = from_json_str(json).unwrap();
        let db = settings.default_database().unwrap();
        assert_eq!(db.name, ":memory:");
        assert_eq!(db.engine, "sqlite");
    }

    #[test]
    fn test_from_json_str_invalid() {
        assert!(from_json_str("{invalid json").is_err());
    }

    // ── File loading ────────────────────────────────────────────────

    #[test]
    fn test_from_toml_file() {
        let dir = std::env::temp_dir().join("powerorm_test_toml");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("orm.toml");
        std::fs::write(&path, "db_prefix = \"file_\"\n").unwrap();

        let settings = from_toml_file(&path).unwrap();
        assert_eq!(settings.db_prefix, "file_");

        std::fs::remove_file(&path).ok();
        std::fs::remove_dir(&dir).ok();
    }

    #[test]
    fn test_from_json_file() {
        let dir = std::env::temp_dir().join("powerorm_test_json");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("orm.json");
        std::fs::write(&path, r#"{"charset": "utf8mb4"}"#).unwrap();

        let settings = from_json_file(&path).unwrap();
        assert_eq!(settings.charset, "utf8mb4");

        std::fs::remove_file(&path).ok();
        std::fs::remove_dir(&dir).ok();
    }

    #[test]
    fn test_from_toml_file_missing() {
        assert!(from_toml_file("/nonexistent/path/orm.toml").is_err());
    }

    // ── Environment variable overrides ──────────────────────────────

    #[test]
    fn test_apply_env_overrides_silenced_checks() {
        let mut settings = Settings::default();
        std::env::set_var("POWERORM_SILENCED_CHECKS", "fields.W340, models.E004");
        apply_env_overrides(&mut settings);
        assert_eq!(
            settings.silenced_checks,
            vec!["fields.W340".to_string(), "models.E004".to_string()]
        );
        std::env::remove_var("POWERORM_SILENCED_CHECKS");
    }

    #[test]
    fn test_apply_env_overrides_database_name() {
        let mut settings = Settings::default();
        std::env::set_var("POWERORM_DATABASE_NAME", "/tmp/orm.sqlite3");
        apply_env_overrides(&mut settings);
        assert_eq!(
            settings.default_database().unwrap().name,
            "/tmp/orm.sqlite3"
        );
        std::env::remove_var("POWERORM_DATABASE_NAME");
    }

    #[test]
    fn test_from_env_migration_path() {
        std::env::set_var("POWERORM_MIGRATION_PATH", "/srv/migrations");
        let settings = from_env();
        assert_eq!(
            settings.migration_path,
            Some(PathBuf::from("/srv/migrations"))
        );
        std::env::remove_var("POWERORM_MIGRATION_PATH");
    }

    // ── merge_json helper ───────────────────────────────────────────

    #[test]
    fn test_merge_json_nested() {
        let base = serde_json::json!({"outer": {"a": 1, "b": 2}});
        let over = serde_json::json!({"outer": {"b": 3}});
        let merged = merge_json(base, over);
        assert_eq!(merged["outer"]["a"], 1);
        assert_eq!(merged["outer"]["b"], 3);
    }

    #[test]
    fn test_merge_json_array_override() {
        let base = serde_json::json!({"list": [1, 2, 3]});
        let over = serde_json::json!({"list": [4, 5]});
        assert_eq!(merge_json(base, over)["list"], serde_json::json!([4, 5]));
    }
}
