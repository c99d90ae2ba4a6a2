//! The database connection seam.
//!
//! [`Connection`] is the minimal interface the query engine and the
//! migration executor need from a database: run a statement, fetch rows,
//! insert and read back the generated key, and quote identifiers. Concrete
//! connections live in `powerorm-db-backends`; keeping the trait here lets
//! the ORM compile SQL and execute it without depending on any driver.

use powerorm_core::{OrmError, OrmResult};

use crate::value::Value;

/// The type of database backend, used by the compiler to generate
/// backend-specific SQL syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseBackendType {
    /// PostgreSQL (uses `$1, $2, ...` placeholders).
    PostgreSQL,
    /// SQLite (uses `?` placeholders).
    SQLite,
    /// MySQL (uses `?` placeholders).
    MySQL,
}

impl DatabaseBackendType {
    /// Maps a settings engine name (`sqlite`, `postgresql`, `mysql`) to a
    /// backend type.
    pub fn from_engine(engine: &str) -> Option<Self> {
        match engine.rsplit('.').next().unwrap_or(engine) {
            "sqlite" | "sqlite3" => Some(Self::SQLite),
            "postgres" | "postgresql" | "postgresql_psycopg2" => Some(Self::PostgreSQL),
            "mysql" => Some(Self::MySQL),
            _ => None,
        }
    }

    /// The vendor name reported by connections of this type.
    pub const fn vendor(self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgresql",
            Self::SQLite => "sqlite",
            Self::MySQL => "mysql",
        }
    }

    /// Quotes an identifier the way this backend expects.
    pub fn quote_name(self, name: &str) -> String {
        match self {
            Self::MySQL => {
                if name.starts_with('`') && name.ends_with('`') {
                    name.to_string()
                } else {
                    format!("`{name}`")
                }
            }
            Self::PostgreSQL | Self::SQLite => {
                if name.starts_with('"') && name.ends_with('"') {
                    name.to_string()
                } else {
                    format!("\"{name}\"")
                }
            }
        }
    }

    /// Longest identifier the backend accepts.
    pub const fn max_name_length(self) -> usize {
        match self {
            Self::PostgreSQL => 63,
            Self::MySQL => 64,
            Self::SQLite => 2000,
        }
    }
}

/// A synchronous database connection.
///
/// Querysets and the migration executor accept `&dyn Connection`; backends
/// implement it.
pub trait Connection {
    /// Returns the backend type for SQL compilation.
    fn backend_type(&self) -> DatabaseBackendType;

    /// The vendor name (`sqlite`, `postgresql`, `mysql`).
    fn vendor(&self) -> &'static str {
        self.backend_type().vendor()
    }

    /// Runs a statement that does not return rows. Returns the number of
    /// rows affected.
    fn execute(&self, sql: &str, params: &[Value]) -> OrmResult<u64>;

    /// Runs a query and returns all result rows.
    fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>>;

    /// Runs a query that must return exactly one row.
    fn query_one(&self, sql: &str, params: &[Value]) -> OrmResult<Row> {
        let mut rows = self.query(sql, params)?.into_iter();
        match (rows.next(), rows.next()) {
            (Some(row), None) => Ok(row),
            (None, _) => Err(OrmError::DoesNotExist("Query returned no rows".into())),
            (Some(_), Some(_)) => Err(OrmError::MultipleObjectsReturned(
                "Query returned more than one row".into(),
            )),
        }
    }

    /// Executes an INSERT and returns the generated primary key.
    fn insert(&self, sql: &str, params: &[Value]) -> OrmResult<Value>;

    /// Quotes an identifier.
    fn quote_name(&self, name: &str) -> String {
        self.backend_type().quote_name(name)
    }

    /// Longest identifier the backend accepts.
    fn max_name_length(&self) -> usize {
        self.backend_type().max_name_length()
    }

    /// Names of the tables in the database.
    fn table_names(&self) -> OrmResult<Vec<String>>;

    /// Starts a transaction.
    fn begin(&self) -> OrmResult<()> {
        self.execute("BEGIN", &[]).map(|_| ())
    }

    /// Commits the current transaction.
    fn commit(&self) -> OrmResult<()> {
        self.execute("COMMIT", &[]).map(|_| ())
    }

    /// Rolls back the current transaction.
    fn rollback(&self) -> OrmResult<()> {
        self.execute("ROLLBACK", &[]).map(|_| ())
    }
}

/// Runs `f` inside a transaction, committing on success and rolling back
/// on error.
pub fn atomic<T>(conn: &dyn Connection, f: impl FnOnce() -> OrmResult<T>) -> OrmResult<T> {
    conn.begin()?;
    match f() {
        Ok(value) => {
            conn.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = conn.rollback() {
                tracing::warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

/// A generic database row for passing data between backends and the ORM.
///
/// `Row` holds a list of column names and their corresponding values. It
/// provides typed access via the [`get`](Row::get) method.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Creates a new row from column names and values.
    ///
    /// # Panics
    ///
    /// Panics if the number of columns does not match the number of values.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        assert_eq!(
            columns.len(),
            values.len(),
            "Row column count must match value count"
        );
        Self { columns, values }
    }

    /// Returns the column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the raw values, in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consumes the row, returning its values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Gets a typed value by column name.
    ///
    /// # Errors
    ///
    /// Returns an error if the column does not exist or the value cannot be
    /// converted to the requested type.
    pub fn get<T: FromValue>(&self, column: &str) -> OrmResult<T> {
        let idx = self
            .columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| OrmError::DatabaseError(format!("Column '{column}' not found in row")))?;
        T::from_value(&self.values[idx])
    }

    /// Gets a typed value by column index.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of bounds or the value cannot be
    /// converted to the requested type.
    pub fn get_by_index<T: FromValue>(&self, idx: usize) -> OrmResult<T> {
        let value = self.values.get(idx).ok_or_else(|| {
            OrmError::DatabaseError(format!(
                "Column index {idx} out of bounds (row has {} columns)",
                self.values.len()
            ))
        })?;
        T::from_value(value)
    }

    /// Returns a reference to the raw Value at the given column name.
    pub fn get_value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }
}

/// Trait for converting a [`Value`] to a concrete Rust type.
pub trait FromValue: Sized {
    /// Attempts to convert a value reference to this type.
    fn from_value(value: &Value) -> OrmResult<Self>;
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::Int(i) => Ok(*i),
            _ => Err(OrmError::DatabaseError(format!("Expected Int, got {value:?}"))),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::Int(i) => i32::try_from(*i)
                .map_err(|e| OrmError::DatabaseError(format!("Int value out of i32 range: {e}"))),
            _ => Err(OrmError::DatabaseError(format!("Expected Int, got {value:?}"))),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> OrmResult<Self> {
        value
            .as_float()
            .ok_or_else(|| OrmError::DatabaseError(format!("Expected Float, got {value:?}")))
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            _ => Err(OrmError::DatabaseError(format!("Expected Bool, got {value:?}"))),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::String(s) => Ok(s.clone()),
            _ => Err(OrmError::DatabaseError(format!("Expected String, got {value:?}"))),
        }
    }
}

impl FromValue for uuid::Uuid {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::Uuid(u) => Ok(*u),
            Value::String(s) => uuid::Uuid::parse_str(s)
                .map_err(|e| OrmError::DatabaseError(format!("Invalid UUID '{s}': {e}"))),
            _ => Err(OrmError::DatabaseError(format!("Expected Uuid, got {value:?}"))),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> OrmResult<Self> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> OrmResult<Self> {
        match value {
            Value::Null => Ok(None),
            _ => T::from_value(value).map(Some),
        }
    }
}
