//! Core error types for PowerORM.
//!
//! [`OrmError`] covers every failure the query engine, the metadata registry
//! and the migration engine can report. It mirrors Django's exception
//! hierarchy (`FieldError`, `ObjectDoesNotExist`, `NodeNotFoundError`, ...)
//! so callers can branch on the kind of failure rather than on messages.

use thiserror::Error;

/// The primary error type for PowerORM.
///
/// Every variant carries a human-readable message. Variants are grouped by
/// the subsystem that raises them.
#[derive(Error, Debug)]
pub enum OrmError {
    // ── Query construction ───────────────────────────────────────────

    /// A field path could not be resolved, or an expression is invalid in
    /// the position it was used (ordering, aggregation).
    #[error("Field error: {0}")]
    FieldError(String),

    /// An operand has an invalid value, e.g. `null` on a non-`exact` lookup.
    #[error("Value error: {0}")]
    ValueError(String),

    /// A result-shaping option was misused.
    #[error("Type error: {0}")]
    TypeError(String),

    /// The requested operation is not supported in the current state.
    #[error("Not supported: {0}")]
    NotSupported(String),

    // ── ORM errors ───────────────────────────────────────────────────

    /// Raised when a query expected exactly one result but found none.
    #[error("Object does not exist: {0}")]
    DoesNotExist(String),

    /// Raised when a query expected exactly one result but found multiple.
    #[error("Multiple objects returned when one expected: {0}")]
    MultipleObjectsReturned(String),

    /// A generic database error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A database integrity constraint was violated.
    #[error("Integrity error: {0}")]
    IntegrityError(String),

    /// An operational database error (connection failure, etc.).
    #[error("Operational error: {0}")]
    OperationalError(String),

    // ── Migrations ───────────────────────────────────────────────────

    /// A migration node referenced by name is not part of the graph.
    #[error("Node not found: {node} (referenced by {origin})")]
    NodeNotFound {
        /// The missing node, rendered as `app.name`.
        node: String,
        /// Who asked for it.
        origin: String,
    },

    /// An operation has no backwards implementation.
    #[error("Irreversible operation: {0}")]
    IrreversibleError(String),

    /// The applied set contradicts the dependency graph.
    #[error("Inconsistent migration history: {0}")]
    InconsistentMigrationHistory(String),

    // ── Configuration ────────────────────────────────────────────────

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The ORM is improperly configured.
    #[error("Improperly configured: {0}")]
    ImproperlyConfigured(String),

    // ── Serialization ────────────────────────────────────────────────

    /// An error occurred during serialization or deserialization.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // ── IO ───────────────────────────────────────────────────────────

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrmError {
    /// Builds a [`OrmError::NodeNotFound`] for `app.name`.
    pub fn node_not_found(app: &str, name: &str, origin: impl Into<String>) -> Self {
        Self::NodeNotFound {
            node: format!("{app}.{name}"),
            origin: origin.into(),
        }
    }

    /// Returns `true` for errors raised by the database driver.
    pub const fn is_database_error(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(_) | Self::IntegrityError(_) | Self::OperationalError(_)
        )
    }
}

/// A convenience type alias for `Result<T, OrmError>`.
pub type OrmResult<T> = Result<T, OrmError>;
