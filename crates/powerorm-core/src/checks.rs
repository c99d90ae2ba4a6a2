//! System check framework for PowerORM.
//!
//! Checks inspect the configuration (and, through closures registered by the
//! `powerorm-db` crate, the model registry) and report problems before any
//! query runs. Mirrors Django's `django.core.checks`.
//!
//! ## Overview
//!
//! - [`CheckMessage`]: A diagnostic message from a check (with level, message, hint, etc.).
//! - [`CheckLevel`]: Severity level (Debug, Info, Warning, Error, Critical).
//! - [`CheckRegistry`]: Registry for check functions with tag-based filtering.
//! - Built-in checks: a usable `default` database, an existing migration directory.
//!
//! ## Examples
//!
//! ```
//! use powerorm_core::checks::{CheckMessage, CheckRegistry};
//!
//! let mut registry = CheckRegistry::new();
//! registry.register(
//!     |_settings| {
//!         vec![CheckMessage::warning(
//!             "Custom check warning",
//!             Some("Consider fixing this."),
//!             None,
//!             Some("myapp.W001"),
//!         )]
//!     },
//!     &["myapp"],
//! );
//!
//! let settings = powerorm_core::settings::Settings::default();
//! let messages = registry.run_checks(None, &settings);
//! assert!(!messages.is_empty());
//! ```

use crate::settings::Settings;

/// Severity level for a check message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CheckLevel {
    /// Debugging information.
    Debug = 10,
    /// Informational message.
    Info = 20,
    /// A potential problem.
    Warning = 30,
    /// A definite problem that should be fixed.
    Error = 40,
    /// A problem that prevents the ORM from working at all.
    Critical = 50,
}

impl std::fmt::Display for CheckLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "DEBUG"),
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// A diagnostic message produced by a system check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckMessage {
    /// The severity level.
    pub level: CheckLevel,
    /// The human-readable message describing the issue.
    pub msg: String,
    /// An optional hint on how to fix the issue.
    pub hint: Option<String>,
    /// The object (setting, model, field) that has the issue.
    pub obj: Option<String>,
    /// A unique identifier for this check message (e.g. "fields.E001").
    pub id: Option<String>,
}

impl CheckMessage {
    /// Creates a new `CheckMessage` with the given level and details.
    pub fn new(
        level: CheckLevel,
        msg: impl Into<String>,
        hint: Option<&str>,
        obj: Option<&str>,
        id: Option<&str>,
    ) -> Self {
        Self {
            level,
            msg: msg.into(),
            hint: hint.map(String::from),
            obj: obj.map(String::from),
            id: id.map(String::from),
        }
    }

    /// Creates a debug-level message.
    pub fn debug(msg: impl Into<String>, hint: Option<&str>, obj: Option<&str>, id: Option<&str>) -> Self {
        Self::new(CheckLevel::Debug, msg, hint, obj, id)
    }

    /// Creates an info-level message.
    pub fn info(msg: impl Into<String>, hint: Option<&str>, obj: Option<&str>, id: Option<&str>) -> Self {
        Self::new(CheckLevel::Info, msg, hint, obj, id)
    }

    /// Creates a warning-level message.
    pub fn warning(msg: impl Into<String>, hint: Option<&str>, obj: Option<&str>, id: Option<&str>) -> Self {
        Self::new(CheckLevel::Warning, msg, hint, obj, id)
    }

    /// Creates an error-level message.
    pub fn error(msg: impl Into<String>, hint: Option<&str>, obj: Option<&str>, id: Option<&str>) -> Self {
        Self::new(CheckLevel::Error, msg, hint, obj, id)
    }

    /// Creates a critical-level message.
    pub fn critical(msg: impl Into<String>, hint: Option<&str>, obj: Option<&str>, id: Option<&str>) -> Self {
        Self::new(CheckLevel::Critical, msg, hint, obj, id)
    }

    /// Returns `true` if this is a warning or higher severity.
    pub fn is_serious(&self) -> bool {
        self.level >= CheckLevel::Warning
    }

    /// Returns `true` if the message id is listed in `settings.silenced_checks`.
    pub fn is_silenced(&self, settings: &Settings) -> bool {
        self.id
            .as_ref()
            .is_some_and(|id| settings.silenced_checks.iter().any(|s| s == id))
    }
}

impl std::fmt::Display for CheckMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref id) = self.id {
            write!(f, "({id}) ")?;
        }
        write!(f, "{}: {}", self.level, self.msg)?;
        if let Some(ref hint) = self.hint {
            write!(f, "\n\tHINT: {hint}")?;
        }
        if let Some(ref obj) = self.obj {
            write!(f, "\n\tObject: {obj}")?;
        }
        Ok(())
    }
}

/// A check function that receives settings and returns diagnostic messages.
///
/// Boxed so that checks can capture state such as the model registry.
pub type CheckFn = Box<dyn Fn(&Settings) -> Vec<CheckMessage>>;

/// A registered check with associated tags.
struct RegisteredCheck {
    func: CheckFn,
    tags: Vec<String>,
}

/// Registry for system check functions.
///
/// Check functions can be registered with tags, and then run all at once
/// or filtered by tag.
pub struct CheckRegistry {
    checks: Vec<RegisteredCheck>,
}

impl CheckRegistry {
    /// Creates a new empty check registry.
    pub const fn new() -> Self {
        Self { checks: Vec::new() }
    }

    /// Creates a new check registry pre-loaded with built-in checks.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(check_database_configured, &["database"]);
        registry.register(check_migration_path, &["migrations"]);
        registry
    }

    /// Registers a check function with the given tags.
    pub fn register<F>(&mut self, func: F, tags: &[&str])
    where
        F: Fn(&Settings) -> Vec<CheckMessage> + 'static,
    {
        self.checks.push(RegisteredCheck {
            func: Box::new(func),
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
        });
    }

    /// Runs all registered checks (or only those matching the given tags)
    /// and collects all resulting messages, minus silenced ones.
    ///
    /// If `tags` is `None`, all checks are run. If `Some(&["models"])`,
    /// only checks tagged with "models" are run.
    pub fn run_checks(&self, tags: Option<&[&str]>, settings: &Settings) -> Vec<CheckMessage> {
        let mut messages = Vec::new();

        for check in &self.checks {
            let should_run = tags.map_or(true, |filter_tags| {
                filter_tags.iter().any(|t| check.tags.iter().any(|c| c == t))
            });

            if should_run {
                messages.extend(
                    (check.func)(settings)
                        .into_iter()
                        .filter(|m| !m.is_silenced(settings)),
                );
            }
        }

        for message in messages.iter().filter(|m| m.is_serious()) {
            tracing::warn!(check = message.id.as_deref().unwrap_or(""), "{}", message.msg);
        }

        messages
    }

    /// Returns the number of registered checks.
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// Returns `true` if no checks are registered.
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

impl Default for CheckRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================
// Built-in checks
// ============================================================

const KNOWN_ENGINES: &[&str] = &["sqlite", "postgresql", "mysql"];

/// Checks that a `default` database exists and names a known engine.
fn check_database_configured(settings: &Settings) -> Vec<CheckMessage> {
    let Ok(db) = settings.default_database() else {
        return vec![CheckMessage::critical(
            "No 'default' database is configured.",
            Some("Add a [databases.default] section to your settings."),
            Some("settings.databases"),
            Some("database.E001"),
        )];
    };

    if KNOWN_ENGINES.contains(&db.engine.as_str()) {
        Vec::new()
    } else {
        vec![CheckMessage::error(
            format!("Unknown database engine '{}'.", db.engine),
            Some("Use one of: sqlite, postgresql, mysql."),
            Some("settings.databases.default.engine"),
            Some("database.E002"),
        )]
    }
}

/// Checks that the configured migration directory exists.
fn check_migration_path(settings: &Settings) -> Vec<CheckMessage> {
    match settings.migration_path {
        Some(ref path) if !path.is_dir() => vec![CheckMessage::warning(
            format!("Migration directory '{}' does not exist.", path.display()),
            Some("Create the directory or fix settings.migration_path."),
            Some("settings.migration_path"),
            Some("migrations.W001"),
        )],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    // ── CheckLevel ──────────────────────────────────────────────────

    #[test]
    fn test_check_level_ordering() {
        assert!(CheckLevel::Debug < CheckLevel::Info);
        assert!(CheckLevel::Info < CheckLevel::Warning);
        assert!(CheckLevel::Warning < CheckLevel::Error);
        assert!(CheckLevel::Error < CheckLevel::Critical);
        assert_eq!(CheckLevel::Error as u8, 40);
    }

    #[test]
    fn test_check_level_display() {
        assert_eq!(CheckLevel::Debug.to_string(), "DEBUG");
        assert_eq!(CheckLevel::Warning.to_string(), "WARNING");
        assert_eq!(CheckLevel::Critical.to_string(), "CRITICAL");
    }

    // ── CheckMessage ────────────────────────────────────────────────

    #[test]
    fn test_check_message_constructors() {
        let m = CheckMessage::debug("msg", Some("hint"), Some("obj"), Some("id"));
        assert_eq!(m.level, CheckLevel::Debug);
        assert_eq!(m.msg, "msg");
        assert_eq!(m.hint.as_deref(), Some("hint"));
        assert_eq!(m.obj.as_deref(), Some("obj"));
        assert_eq!(m.id.as_deref(), Some("id"));

        assert_eq!(CheckMessage::info("", None, None, None).level, CheckLevel::Info);
        assert_eq!(CheckMessage::error("", None, None, None).level, CheckLevel::Error);
    }

    #[test]
    fn test_check_message_is_serious() {
        assert!(!CheckMessage::info("", None, None, None).is_serious());
        assert!(CheckMessage::warning("", None, None, None).is_serious());
        assert!(CheckMessage::critical("", None, None, None).is_serious());
    }

    #[test]
    fn test_check_message_display() {
        let m = CheckMessage::error(
            "Field names must not end with an underscore.",
            None,
            Some("blog.Post.title_"),
            Some("fields.E001"),
        );
        let s = m.to_string();
        assert!(s.starts_with("(fields.E001) ERROR: Field names"));
        assert!(s.contains("Object: blog.Post.title_"));
    }

    // ── CheckRegistry ───────────────────────────────────────────────

    #[test]
    fn test_registry_tag_filtering() {
        let mut registry = CheckRegistry::new();
        registry.register(
            |_| vec![CheckMessage::warning("db issue", None, None, None)],
            &["database"],
        );
        registry.register(
            |_| vec![CheckMessage::info("model info", None, None, None)],
            &["models"],
        );

        let settings = Settings::default();
        assert_eq!(registry.run_checks(None, &settings).len(), 2);

        let models_only = registry.run_checks(Some(&["models"]), &settings);
        assert_eq!(models_only.len(), 1);
        assert!(models_only[0].msg.contains("model"));

        assert!(registry.run_checks(Some(&["other"]), &settings).is_empty());
    }

    #[test]
    fn test_registry_closure_captures_state() {
        let names = vec!["a_".to_string()];
        let mut registry = CheckRegistry::new();
        registry.register(
            move |_| {
                names
                    .iter()
                    .map(|n| CheckMessage::error(n.clone(), None, None, Some("fields.E001")))
                    .collect()
            },
            &["models"],
        );
        let messages = registry.run_checks(None, &Settings::default());
        assert_eq!(messages[0].msg, "a_");
    }

    #[test]
    fn test_registry_silenced_checks() {
        let mut registry = CheckRegistry::new();
        registry.register(
            |_| {
                vec![
                    CheckMessage::warning("w", None, None, Some("fields.W340")),
                    CheckMessage::error("e", None, None, Some("fields.E001")),
                ]
            },
            &["models"],
        );
        let settings = Settings {
            silenced_checks: vec!["fields.W340".to_string()],
            ..Settings::default()
        };
        let messages = registry.run_checks(None, &settings);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id.as_deref(), Some("fields.E001"));
    }

    // ── Built-in checks ─────────────────────────────────────────────

    #[test]
    fn test_builtin_database_missing() {
        let mut settings = Settings::default();
        settings.databases.clear();
        let messages = check_database_configured(&settings);
        assert_eq!(messages[0].id.as_deref(), Some("database.E001"));
        assert_eq!(messages[0].level, CheckLevel::Critical);
    }

    #[test]
    fn test_builtin_database_unknown_engine() {
        let mut settings = Settings::default();
        if let Some(db) = settings.databases.get_mut("default") {
            db.engine = "oracle".to_string();
        }
        let messages = check_database_configured(&settings);
        assert_eq!(messages[0].id.as_deref(), Some("database.E002"));
    }

    #[test]
    fn test_builtin_migration_path_missing() {
        let settings = Settings {
            migration_path: Some(PathBuf::from("/nonexistent/powerorm/migrations")),
            ..Settings::default()
        };
        let messages = check_migration_path(&settings);
        assert_eq!(messages[0].id.as_deref(), Some("migrations.W001"));
    }

    #[test]
    fn test_registry_with_builtins_clean() {
        let registry = CheckRegistry::with_builtins();
        assert_eq!(registry.len(), 2);
        assert!(registry.run_checks(None, &Settings::default()).is_empty());
    }
}
