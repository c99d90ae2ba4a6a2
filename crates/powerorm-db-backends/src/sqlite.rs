//! SQLite database backend using `rusqlite`.
//!
//! [`SqliteConnection`] implements [`Connection`] synchronously on top of a
//! single `rusqlite::Connection`.
//!
//! Features:
//! - WAL mode for file-based databases
//! - In-memory database support via `:memory:` (great for testing)
//! - Foreign key enforcement switched on at open

use std::path::{Path, PathBuf};

use powerorm_core::{DatabaseSettings, OrmError, OrmResult};
use powerorm_db::connection::{Connection, DatabaseBackendType, Row};
use powerorm_db::value::Value;
use rusqlite::types::ValueRef;

/// A SQLite connection.
pub struct SqliteConnection {
    /// The path to the database file (or ":memory:").
    path: PathBuf,
    conn: rusqlite::Connection,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn db_error(e: rusqlite::Error) -> OrmError {
    match e {
        rusqlite::Error::SqliteFailure(ref code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            OrmError::IntegrityError(e.to_string())
        }
        other => OrmError::DatabaseError(other.to_string()),
    }
}

impl SqliteConnection {
    /// Opens a SQLite database at the given path.
    ///
    /// If the path is `:memory:`, an in-memory database is created.
    /// WAL journal mode is enabled for file-based databases.
    pub fn open(path: impl Into<PathBuf>) -> OrmResult<Self> {
        let path = path.into();
        let in_memory = path.to_str() == Some(":memory:");
        let conn = if in_memory {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(&path)
        }
        .map_err(|e| OrmError::OperationalError(format!("SQLite open failed: {e}")))?;

        let pragmas = if in_memory {
            "PRAGMA foreign_keys=ON;"
        } else {
            "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;"
        };
        conn.execute_batch(pragmas)
            .map_err(|e| OrmError::OperationalError(format!("Failed to set pragmas: {e}")))?;

        tracing::debug!(path = %path.display(), "opened sqlite database");
        Ok(Self { path, conn })
    }

    /// Opens an in-memory database.
    pub fn memory() -> OrmResult<Self> {
        Self::open(":memory:")
    }

    /// Opens the database described by a settings entry.
    pub fn from_settings(settings: &DatabaseSettings) -> OrmResult<Self> {
        match DatabaseBackendType::from_engine(&settings.engine) {
            Some(DatabaseBackendType::SQLite) => Self::open(&settings.name),
            _ => Err(OrmError::ImproperlyConfigured(format!(
                "The sqlite backend cannot serve engine '{}'",
                settings.engine
            ))),
        }
    }

    /// Returns the database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Binds ORM `Value`s to a prepared statement.
    fn bind_params(stmt: &mut rusqlite::Statement<'_>, params: &[Value]) -> OrmResult<()> {
        for (i, param) in params.iter().enumerate() {
            let idx = i + 1;
            match param {
                Value::Null => stmt.raw_bind_parameter(idx, rusqlite::types::Null),
                Value::Bool(b) => stmt.raw_bind_parameter(idx, b),
                Value::Int(v) => stmt.raw_bind_parameter(idx, v),
                Value::Float(v) => stmt.raw_bind_parameter(idx, v),
                Value::String(s) => stmt.raw_bind_parameter(idx, s.as_str()),
                Value::Bytes(b) => stmt.raw_bind_parameter(idx, b.as_slice()),
                Value::Date(d) => stmt.raw_bind_parameter(idx, d.format("%Y-%m-%d").to_string()),
                Value::DateTime(dt) => {
                    stmt.raw_bind_parameter(idx, dt.format("%Y-%m-%d %H:%M:%S%.f").to_string())
                }
                Value::Time(t) => stmt.raw_bind_parameter(idx, t.format("%H:%M:%S%.f").to_string()),
                Value::Uuid(u) => stmt.raw_bind_parameter(idx, u.simple().to_string()),
                Value::Json(j) => stmt.raw_bind_parameter(idx, j.to_string()),
                Value::List(vals) => {
                    let json = serde_json::to_string(vals)
                        .map_err(|e| OrmError::SerializationError(e.to_string()))?;
                    stmt.raw_bind_parameter(idx, json)
                }
            }
            .map_err(|e| OrmError::DatabaseError(format!("Bind error: {e}")))?;
        }
        Ok(())
    }

    fn convert_value(value: ValueRef<'_>) -> Value {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(v) => Value::Int(v),
            ValueRef::Real(v) => Value::Float(v),
            ValueRef::Text(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
            ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
        }
    }

    fn run(&self, sql: &str, params: &[Value]) -> OrmResult<usize> {
        let mut stmt = self.conn.prepare(sql).map_err(db_error)?;
        Self::bind_params(&mut stmt, params)?;
        stmt.raw_execute().map_err(db_error)
    }
}

impl Connection for SqliteConnection {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::SQLite
    }

    fn execute(&self, sql: &str, params: &[Value]) -> OrmResult<u64> {
        tracing::trace!(sql, "execute");
        Ok(self.run(sql, params)? as u64)
    }

    fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        tracing::trace!(sql, "query");
        let mut stmt = self.conn.prepare(sql).map_err(db_error)?;
        let column_names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        Self::bind_params(&mut stmt, params)?;

        let mut raw_rows = stmt.raw_query();
        let mut rows = Vec::new();
        while let Some(row) = raw_rows.next().map_err(db_error)? {
            let values = (0..column_names.len())
                .map(|i| row.get_ref(i).map(Self::convert_value).map_err(db_error))
                .collect::<OrmResult<Vec<Value>>>()?;
            rows.push(Row::new(column_names.clone(), values));
        }
        Ok(rows)
    }

    fn insert(&self, sql: &str, params: &[Value]) -> OrmResult<Value> {
        self.run(sql, params)?;
        Ok(Value::Int(self.conn.last_insert_rowid()))
    }

    fn table_names(&self) -> OrmResult<Vec<String>> {
        let rows = self.query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            &[],
        )?;
        rows.iter().map(|row| row.get::<String>("name")).collect()
    }
}
