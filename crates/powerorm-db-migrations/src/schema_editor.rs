//! Schema editing: DDL generation and execution.
//!
//! A [`DdlDialect`] turns column definitions into statements for one
//! backend. The [`SchemaEditor`] drives a dialect from model metadata and
//! either runs each statement on a [`Connection`] or, in collect mode, only
//! records it so the SQL of a migration plan can be previewed.
//!
//! SQLite cannot alter or drop most columns in place. For those changes the
//! editor rebuilds the table: create `new__<table>`, copy the rows across,
//! drop the original and rename the copy.

use std::collections::BTreeSet;

use powerorm_core::{OrmError, OrmResult};
use powerorm_db::connection::{atomic, Connection, DatabaseBackendType};
use powerorm_db::fields::{FieldDef, FieldType, OnDelete};
use powerorm_db::model::ModelMeta;
use powerorm_db::value::Value;
use powerorm_db::Registry;

/// The foreign key part of a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRef {
    /// Referenced table.
    pub table: String,
    /// Referenced column.
    pub column: String,
    /// ON DELETE action.
    pub on_delete: OnDelete,
}

/// A resolved column: everything a dialect needs to render it.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Native column type.
    pub type_sql: String,
    /// Whether NULL is allowed.
    pub null: bool,
    /// Whether the column is the primary key.
    pub primary_key: bool,
    /// Whether the key is generated by the database.
    pub auto_increment: bool,
    /// Whether a single-column UNIQUE constraint applies.
    pub unique: bool,
    /// Default value.
    pub default: Option<Value>,
    /// Target of a foreign key column.
    pub references: Option<ForeignKeyRef>,
    /// Whether a separate index is created for the column.
    pub db_index: bool,
}

impl ColumnDef {
    /// Returns `true` when both definitions only differ by name.
    pub fn same_definition(&self, other: &Self) -> bool {
        let mut renamed = other.clone();
        renamed.name.clone_from(&self.name);
        *self == renamed
    }
}

/// Generates DDL statements for one backend.
///
/// Methods return `Vec<String>` because some changes need more than one
/// statement.
pub trait DdlDialect {
    /// The backend this dialect targets.
    fn backend_type(&self) -> DatabaseBackendType;

    /// Native type for a field type.
    fn type_sql(&self, field_type: &FieldType, max_length: Option<usize>) -> String;

    /// Quotes an identifier.
    fn quote(&self, name: &str) -> String {
        self.backend_type().quote_name(name)
    }

    /// Renders a literal for DEFAULT clauses and copy statements.
    fn literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            other => format!("'{}'", other.to_string().replace('\'', "''")),
        }
    }

    /// The definition of a column following its quoted name.
    fn column_sql(&self, column: &ColumnDef) -> String;

    /// `CREATE TABLE`.
    fn create_table(&self, table: &str, columns: &[ColumnDef]) -> Vec<String> {
        let defs: Vec<String> = columns
            .iter()
            .map(|c| format!("{} {}", self.quote(&c.name), self.column_sql(c)))
            .collect();
        vec![format!(
            "CREATE TABLE {} ({})",
            self.quote(table),
            defs.join(", ")
        )]
    }

    /// `DROP TABLE`.
    fn drop_table(&self, table: &str) -> Vec<String> {
        vec![format!("DROP TABLE {}", self.quote(table))]
    }

    /// Renames a table.
    fn rename_table(&self, old: &str, new: &str) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote(old),
            self.quote(new)
        )]
    }

    /// `ALTER TABLE ... ADD COLUMN`.
    fn add_column(&self, table: &str, column: &ColumnDef) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            self.quote(table),
            self.quote(&column.name),
            self.column_sql(column)
        )]
    }

    /// `ALTER TABLE ... DROP COLUMN`.
    fn drop_column(&self, table: &str, column: &str) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote(table),
            self.quote(column)
        )]
    }

    /// `ALTER TABLE ... RENAME COLUMN`.
    fn rename_column(&self, table: &str, old: &str, new: &str) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            self.quote(table),
            self.quote(old),
            self.quote(new)
        )]
    }

    /// Whether columns can be altered in place. When `false` the editor
    /// rebuilds the table instead.
    fn supports_column_alter(&self) -> bool {
        true
    }

    /// Changes type, nullability, default and uniqueness of a column that
    /// already carries its new name.
    fn alter_column(&self, table: &str, old: &ColumnDef, new: &ColumnDef) -> Vec<String>;

    /// Adds a multi-column unique constraint.
    fn add_unique(&self, table: &str, name: &str, columns: &[String]) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
            self.quote(table),
            self.quote(name),
            self.quote_list(columns)
        )]
    }

    /// Drops a constraint created by [`add_unique`](Self::add_unique).
    fn drop_unique(&self, table: &str, name: &str) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.quote(table),
            self.quote(name)
        )]
    }

    /// `CREATE INDEX`.
    fn create_index(&self, table: &str, name: &str, columns: &[String]) -> Vec<String> {
        vec![format!(
            "CREATE INDEX {} ON {} ({})",
            self.quote(name),
            self.quote(table),
            self.quote_list(columns)
        )]
    }

    /// Statements run before a migration, outside its transaction.
    fn disable_constraints(&self) -> Vec<String> {
        Vec::new()
    }

    /// Statements run after a migration, outside its transaction.
    fn enable_constraints(&self) -> Vec<String> {
        Vec::new()
    }

    /// Comma-separated quoted identifiers.
    fn quote_list(&self, names: &[String]) -> String {
        names
            .iter()
            .map(|n| self.quote(n))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// The DDL dialect for a backend.
pub fn dialect_for(backend: DatabaseBackendType) -> Box<dyn DdlDialect> {
    match backend {
        DatabaseBackendType::SQLite => Box::new(SqliteDialect),
        DatabaseBackendType::PostgreSQL => Box::new(PostgresDialect),
        DatabaseBackendType::MySQL => Box::new(MySqlDialect),
    }
}

/// ON DELETE clause for a cascade policy.
const fn on_delete_sql(on_delete: OnDelete) -> &'static str {
    match on_delete {
        OnDelete::Cascade => "CASCADE",
        OnDelete::Protect => "RESTRICT",
        OnDelete::SetNull => "SET NULL",
        OnDelete::SetDefault => "SET DEFAULT",
        OnDelete::DoNothing => "NO ACTION",
    }
}

/// Builds an identifier from a table and column names, cut to `max_len`.
pub fn constraint_name(table: &str, columns: &[String], suffix: &str, max_len: usize) -> String {
    let name = format!("{table}_{}_{suffix}", columns.join("_"));
    if name.len() <= max_len {
        return name;
    }
    let keep = max_len.saturating_sub(suffix.len() + 1);
    let head: String = name.chars().take(keep).collect();
    format!("{head}_{suffix}")
}

// ── SQLite ───────────────────────────────────────────────────────────────

/// SQLite DDL.
///
/// Columns are never altered in place, unique sets become unique indexes
/// and foreign keys are checked at commit.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl DdlDialect for SqliteDialect {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::SQLite
    }

    fn type_sql(&self, field_type: &FieldType, _max_length: Option<usize>) -> String {
        match field_type {
            FieldType::AutoField
            | FieldType::BigAutoField
            | FieldType::IntegerField
            | FieldType::BigIntegerField
            | FieldType::SmallIntegerField
            | FieldType::BooleanField
            | FieldType::ForeignKey { .. }
            | FieldType::OneToOneField { .. } => "INTEGER",
            FieldType::FloatField | FieldType::DecimalField { .. } => "REAL",
            FieldType::BinaryField => "BLOB",
            FieldType::ManyToManyField { .. } => "",
            _ => "TEXT",
        }
        .to_string()
    }

    fn column_sql(&self, column: &ColumnDef) -> String {
        let mut sql = column.type_sql.clone();
        sql.push_str(if column.null { " NULL" } else { " NOT NULL" });
        if column.primary_key {
            sql.push_str(" PRIMARY KEY");
            if column.auto_increment {
                sql.push_str(" AUTOINCREMENT");
            }
        }
        if column.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(ref default) = column.default {
            sql.push_str(&format!(" DEFAULT {}", self.literal(default)));
        }
        if let Some(ref fk) = column.references {
            sql.push_str(&format!(
                " REFERENCES {} ({}) ON DELETE {} DEFERRABLE INITIALLY DEFERRED",
                self.quote(&fk.table),
                self.quote(&fk.column),
                on_delete_sql(fk.on_delete)
            ));
        }
        sql
    }

    fn supports_column_alter(&self) -> bool {
        false
    }

    fn alter_column(&self, _table: &str, _old: &ColumnDef, _new: &ColumnDef) -> Vec<String> {
        Vec::new()
    }

    fn add_unique(&self, table: &str, name: &str, columns: &[String]) -> Vec<String> {
        vec![format!(
            "CREATE UNIQUE INDEX {} ON {} ({})",
            self.quote(name),
            self.quote(table),
            self.quote_list(columns)
        )]
    }

    fn drop_unique(&self, _table: &str, name: &str) -> Vec<String> {
        vec![format!("DROP INDEX {}", self.quote(name))]
    }

    fn disable_constraints(&self) -> Vec<String> {
        vec!["PRAGMA foreign_keys = OFF".to_string()]
    }

    fn enable_constraints(&self) -> Vec<String> {
        vec!["PRAGMA foreign_keys = ON".to_string()]
    }
}

// ── PostgreSQL ───────────────────────────────────────────────────────────

/// PostgreSQL DDL: `SERIAL` keys, native booleans and `ALTER COLUMN`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl DdlDialect for PostgresDialect {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::PostgreSQL
    }

    fn type_sql(&self, field_type: &FieldType, max_length: Option<usize>) -> String {
        match field_type {
            FieldType::AutoField => "SERIAL".to_string(),
            FieldType::BigAutoField => "BIGSERIAL".to_string(),
            FieldType::CharField | FieldType::EmailField | FieldType::SlugField => {
                format!("VARCHAR({})", max_length.unwrap_or(255))
            }
            FieldType::TextField => "TEXT".to_string(),
            FieldType::IntegerField => "INTEGER".to_string(),
            FieldType::BigIntegerField => "BIGINT".to_string(),
            FieldType::SmallIntegerField => "SMALLINT".to_string(),
            FieldType::FloatField => "DOUBLE PRECISION".to_string(),
            FieldType::DecimalField {
                max_digits,
                decimal_places,
            } => format!("NUMERIC({max_digits}, {decimal_places})"),
            FieldType::BooleanField => "BOOLEAN".to_string(),
            FieldType::DateField => "DATE".to_string(),
            FieldType::DateTimeField => "TIMESTAMP".to_string(),
            FieldType::TimeField => "TIME".to_string(),
            FieldType::UuidField => "UUID".to_string(),
            FieldType::BinaryField => "BYTEA".to_string(),
            FieldType::JsonField => "JSONB".to_string(),
            FieldType::ForeignKey { .. } | FieldType::OneToOneField { .. } => "INTEGER".to_string(),
            FieldType::ManyToManyField { .. } => String::new(),
        }
    }

    fn literal(&self, value: &Value) -> String {
        match value {
            Value::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
            Value::Null => "NULL".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            other => format!("'{}'", other.to_string().replace('\'', "''")),
        }
    }

    fn column_sql(&self, column: &ColumnDef) -> String {
        let mut sql = column.type_sql.clone();
        if column.primary_key {
            sql.push_str(" PRIMARY KEY");
        } else {
            sql.push_str(if column.null { " NULL" } else { " NOT NULL" });
        }
        if column.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(ref default) = column.default {
            sql.push_str(&format!(" DEFAULT {}", self.literal(default)));
        }
        if let Some(ref fk) = column.references {
            sql.push_str(&format!(
                " REFERENCES {} ({}) ON DELETE {} DEFERRABLE INITIALLY DEFERRED",
                self.quote(&fk.table),
                self.quote(&fk.column),
                on_delete_sql(fk.on_delete)
            ));
        }
        sql
    }

    fn alter_column(&self, table: &str, old: &ColumnDef, new: &ColumnDef) -> Vec<String> {
        let prefix = format!(
            "ALTER TABLE {} ALTER COLUMN {}",
            self.quote(table),
            self.quote(&new.name)
        );
        let mut stmts = Vec::new();
        if old.type_sql != new.type_sql {
            stmts.push(format!(
                "{prefix} TYPE {} USING {}::{}",
                new.type_sql,
                self.quote(&new.name),
                new.type_sql
            ));
        }
        if old.null != new.null {
            stmts.push(format!(
                "{prefix} {}",
                if new.null { "DROP NOT NULL" } else { "SET NOT NULL" }
            ));
        }
        if old.default != new.default {
            stmts.push(match new.default {
                Some(ref value) => format!("{prefix} SET DEFAULT {}", self.literal(value)),
                None => format!("{prefix} DROP DEFAULT"),
            });
        }
        let key = constraint_name(table, &[new.name.clone()], "key", 63);
        match (old.unique, new.unique) {
            (false, true) => stmts.extend(self.add_unique(table, &key, &[new.name.clone()])),
            (true, false) => stmts.extend(self.drop_unique(table, &key)),
            _ => {}
        }
        stmts
    }
}

// ── MySQL ────────────────────────────────────────────────────────────────

/// MySQL DDL: `AUTO_INCREMENT`, table-level foreign keys and
/// `MODIFY COLUMN` for alterations.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl MySqlDialect {
    fn foreign_key_sql(&self, column: &ColumnDef, fk: &ForeignKeyRef) -> String {
        format!(
            "FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
            self.quote(&column.name),
            self.quote(&fk.table),
            self.quote(&fk.column),
            on_delete_sql(fk.on_delete)
        )
    }
}

impl DdlDialect for MySqlDialect {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::MySQL
    }

    fn type_sql(&self, field_type: &FieldType, max_length: Option<usize>) -> String {
        match field_type {
            FieldType::AutoField | FieldType::IntegerField => "INT".to_string(),
            FieldType::BigAutoField | FieldType::BigIntegerField => "BIGINT".to_string(),
            FieldType::CharField | FieldType::EmailField | FieldType::SlugField => {
                format!("VARCHAR({})", max_length.unwrap_or(255))
            }
            FieldType::TextField => "LONGTEXT".to_string(),
            FieldType::SmallIntegerField => "SMALLINT".to_string(),
            FieldType::FloatField => "DOUBLE".to_string(),
            FieldType::DecimalField {
                max_digits,
                decimal_places,
            } => format!("DECIMAL({max_digits}, {decimal_places})"),
            FieldType::BooleanField => "TINYINT(1)".to_string(),
            FieldType::DateField => "DATE".to_string(),
            FieldType::DateTimeField => "DATETIME(6)".to_string(),
            FieldType::TimeField => "TIME(6)".to_string(),
            FieldType::UuidField => "CHAR(32)".to_string(),
            FieldType::BinaryField => "LONGBLOB".to_string(),
            FieldType::JsonField => "JSON".to_string(),
            FieldType::ForeignKey { .. } | FieldType::OneToOneField { .. } => "INT".to_string(),
            FieldType::ManyToManyField { .. } => String::new(),
        }
    }

    fn column_sql(&self, column: &ColumnDef) -> String {
        let mut sql = column.type_sql.clone();
        sql.push_str(if column.null { " NULL" } else { " NOT NULL" });
        if column.primary_key {
            sql.push_str(" PRIMARY KEY");
            if column.auto_increment {
                sql.push_str(" AUTO_INCREMENT");
            }
        }
        if column.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(ref default) = column.default {
            sql.push_str(&format!(" DEFAULT {}", self.literal(default)));
        }
        sql
    }

    fn create_table(&self, table: &str, columns: &[ColumnDef]) -> Vec<String> {
        let mut defs: Vec<String> = columns
            .iter()
            .map(|c| format!("{} {}", self.quote(&c.name), self.column_sql(c)))
            .collect();
        defs.extend(
            columns
                .iter()
                .filter_map(|c| c.references.as_ref().map(|fk| self.foreign_key_sql(c, fk))),
        );
        vec![format!(
            "CREATE TABLE {} ({})",
            self.quote(table),
            defs.join(", ")
        )]
    }

    fn rename_table(&self, old: &str, new: &str) -> Vec<String> {
        vec![format!(
            "RENAME TABLE {} TO {}",
            self.quote(old),
            self.quote(new)
        )]
    }

    fn add_column(&self, table: &str, column: &ColumnDef) -> Vec<String> {
        let mut stmts = vec![format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            self.quote(table),
            self.quote(&column.name),
            self.column_sql(column)
        )];
        if let Some(ref fk) = column.references {
            stmts.push(format!(
                "ALTER TABLE {} ADD {}",
                self.quote(table),
                self.foreign_key_sql(column, fk)
            ));
        }
        stmts
    }

    fn alter_column(&self, table: &str, old: &ColumnDef, new: &ColumnDef) -> Vec<String> {
        let mut plain = new.clone();
        plain.unique = false;
        let mut stmts = vec![format!(
            "ALTER TABLE {} MODIFY COLUMN {} {}",
            self.quote(table),
            self.quote(&new.name),
            self.column_sql(&plain)
        )];
        match (old.unique, new.unique) {
            (false, true) => stmts.push(format!(
                "ALTER TABLE {} ADD UNIQUE ({})",
                self.quote(table),
                self.quote(&new.name)
            )),
            (true, false) => stmts.push(format!(
                "ALTER TABLE {} DROP INDEX {}",
                self.quote(table),
                self.quote(&old.name)
            )),
            _ => {}
        }
        stmts
    }

    fn drop_unique(&self, table: &str, name: &str) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} DROP INDEX {}",
            self.quote(table),
            self.quote(name)
        )]
    }
}

// ── Editor ───────────────────────────────────────────────────────────────

/// Applies schema changes described by model metadata.
///
/// Every statement is recorded; when the editor holds a connection it is
/// also executed immediately.
pub struct SchemaEditor<'a> {
    connection: Option<&'a dyn Connection>,
    dialect: Box<dyn DdlDialect>,
    collected: Vec<String>,
}

impl std::fmt::Debug for SchemaEditor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaEditor")
            .field("backend", &self.dialect.backend_type())
            .field("executes", &self.connection.is_some())
            .field("collected", &self.collected.len())
            .finish()
    }
}

impl<'a> SchemaEditor<'a> {
    /// An editor that executes on `connection`.
    pub fn new(connection: &'a dyn Connection) -> Self {
        Self {
            connection: Some(connection),
            dialect: dialect_for(connection.backend_type()),
            collected: Vec::new(),
        }
    }

    /// An editor that only records statements.
    pub fn collect_only(backend: DatabaseBackendType) -> Self {
        Self {
            connection: None,
            dialect: dialect_for(backend),
            collected: Vec::new(),
        }
    }

    /// The dialect in use.
    pub fn dialect(&self) -> &dyn DdlDialect {
        self.dialect.as_ref()
    }

    /// Returns `true` when statements are executed.
    pub const fn is_executing(&self) -> bool {
        self.connection.is_some()
    }

    /// Statements seen so far.
    pub fn collected_sql(&self) -> &[String] {
        &self.collected
    }

    /// Consumes the editor, returning the statements it saw.
    pub fn into_collected(self) -> Vec<String> {
        self.collected
    }

    /// Records and, when connected, runs one statement.
    pub fn execute(&mut self, sql: impl Into<String>) -> OrmResult<()> {
        let sql = sql.into();
        tracing::debug!(sql = %sql, "schema");
        if let Some(conn) = self.connection {
            conn.execute(&sql, &[])?;
        }
        self.collected.push(sql);
        Ok(())
    }

    fn execute_all(&mut self, statements: Vec<String>) -> OrmResult<()> {
        for sql in statements {
            self.execute(sql)?;
        }
        Ok(())
    }

    /// Runs `f` in a transaction when connected. Constraint checks the
    /// dialect cannot toggle inside a transaction are switched off around it.
    pub fn atomic<T>(&mut self, f: impl FnOnce(&mut Self) -> OrmResult<T>) -> OrmResult<T> {
        let Some(conn) = self.connection else {
            return f(self);
        };
        for sql in self.dialect.disable_constraints() {
            conn.execute(&sql, &[])?;
        }
        let result = atomic(conn, || f(self));
        let mut restored = Ok(());
        for sql in self.dialect.enable_constraints() {
            if let Err(err) = conn.execute(&sql, &[]) {
                tracing::warn!(error = %err, sql = %sql, "re-enabling constraints failed");
                if restored.is_ok() {
                    restored = Err(err);
                }
            }
        }
        let value = result?;
        restored.map(|()| value)
    }

    /// Resolves a field into a column definition.
    pub fn column_def(
        &self,
        registry: &Registry,
        meta: &ModelMeta,
        field: &FieldDef,
    ) -> OrmResult<ColumnDef> {
        let (type_sql, references) = match field.field_type {
            FieldType::ForeignKey { on_delete, .. } | FieldType::OneToOneField { on_delete, .. } => {
                let target = registry.resolve_relation(meta, field)?;
                let target_field = match field.to_field_name() {
                    Some(name) => target.field_or_err(name)?,
                    None => target.pk_field()?,
                };
                (
                    self.dialect
                        .type_sql(&target_field.field_type.rel_db_type(), target_field.max_length),
                    Some(ForeignKeyRef {
                        table: target.db_table.clone(),
                        column: target_field.column.clone(),
                        on_delete,
                    }),
                )
            }
            FieldType::ManyToManyField { .. } => {
                return Err(OrmError::FieldError(format!(
                    "'{}.{}' has no column",
                    meta.label(),
                    field.name
                )));
            }
            ref other => (self.dialect.type_sql(other, field.max_length), None),
        };
        Ok(ColumnDef {
            name: field.column.clone(),
            type_sql,
            null: field.null,
            primary_key: field.primary_key,
            auto_increment: field.primary_key && field.field_type.is_auto(),
            unique: field.unique && !field.primary_key,
            default: field.default.clone(),
            db_index: !field.primary_key
                && !field.unique
                && (field.db_index || references.is_some()),
            references,
        })
    }

    fn columns(&self, registry: &Registry, meta: &ModelMeta) -> OrmResult<Vec<ColumnDef>> {
        meta.concrete_fields()
            .map(|f| self.column_def(registry, meta, f))
            .collect()
    }

    fn max_name(&self) -> usize {
        self.dialect.backend_type().max_name_length()
    }

    fn unique_together_columns(meta: &ModelMeta, sets: &[Vec<String>]) -> OrmResult<Vec<Vec<String>>> {
        sets.iter()
            .map(|set| {
                set.iter()
                    .map(|name| meta.field_or_err(name).map(|f| f.column.clone()))
                    .collect()
            })
            .collect()
    }

    fn create_secondary(&mut self, table: &str, meta: &ModelMeta, columns: &[ColumnDef]) -> OrmResult<()> {
        for set in Self::unique_together_columns(meta, &meta.unique_together)? {
            let name = constraint_name(table, &set, "uniq", self.max_name());
            let stmts = self.dialect.add_unique(table, &name, &set);
            self.execute_all(stmts)?;
        }
        for column in columns.iter().filter(|c| c.db_index) {
            let cols = [column.name.clone()];
            let name = constraint_name(table, &cols, "idx", self.max_name());
            let stmts = self.dialect.create_index(table, &name, &cols);
            self.execute_all(stmts)?;
        }
        Ok(())
    }

    /// Creates the table of `meta`, its indexes and the join tables of its
    /// many-to-many fields.
    pub fn create_model(&mut self, registry: &Registry, meta: &ModelMeta) -> OrmResult<()> {
        let columns = self.columns(registry, meta)?;
        let stmts = self.dialect.create_table(&meta.db_table, &columns);
        self.execute_all(stmts)?;
        self.create_secondary(&meta.db_table, meta, &columns)?;
        for field in meta.many_to_many() {
            let through = registry.through_model(meta, field)?;
            if through.auto_created {
                self.create_model(registry, &through)?;
            }
        }
        Ok(())
    }

    /// Drops the table of `meta` and its synthesized join tables.
    pub fn delete_model(&mut self, registry: &Registry, meta: &ModelMeta) -> OrmResult<()> {
        for field in meta.many_to_many() {
            let through = registry.through_model(meta, field)?;
            if through.auto_created {
                self.delete_model(registry, &through)?;
            }
        }
        let stmts = self.dialect.drop_table(&meta.db_table);
        self.execute_all(stmts)
    }

    /// Renames a table. Nothing happens when the names are equal.
    pub fn alter_db_table(&mut self, old: &str, new: &str) -> OrmResult<()> {
        if old == new {
            return Ok(());
        }
        let stmts = self.dialect.rename_table(old, new);
        self.execute_all(stmts)
    }

    /// Renames a column.
    pub fn rename_column(&mut self, table: &str, old: &str, new: &str) -> OrmResult<()> {
        if old == new {
            return Ok(());
        }
        let stmts = self.dialect.rename_column(table, old, new);
        self.execute_all(stmts)
    }

    /// Adds `field` to the table of `meta`, which already declares it.
    pub fn add_field(&mut self, registry: &Registry, meta: &ModelMeta, field: &FieldDef) -> OrmResult<()> {
        if field.is_many_to_many() {
            let through = registry.through_model(meta, field)?;
            if through.auto_created {
                return self.create_model(registry, &through);
            }
            return Ok(());
        }
        let column = self.column_def(registry, meta, field)?;
        let in_place = self.dialect.supports_column_alter()
            || (!column.unique && !column.primary_key && (column.null || column.default.is_some()));
        if !in_place {
            let copy = self.copy_existing(meta, |f| f.name != field.name);
            return self.remake_table(registry, meta, copy);
        }
        let stmts = self.dialect.add_column(&meta.db_table, &column);
        self.execute_all(stmts)?;
        if column.db_index {
            let cols = [column.name.clone()];
            let name = constraint_name(&meta.db_table, &cols, "idx", self.max_name());
            let stmts = self.dialect.create_index(&meta.db_table, &name, &cols);
            self.execute_all(stmts)?;
        }
        Ok(())
    }

    /// Removes `field` from the table of `meta`, which still declares it.
    pub fn remove_field(&mut self, registry: &Registry, meta: &ModelMeta, field: &FieldDef) -> OrmResult<()> {
        if field.is_many_to_many() {
            let through = registry.through_model(meta, field)?;
            if through.auto_created {
                let stmts = self.dialect.drop_table(&through.db_table);
                return self.execute_all(stmts);
            }
            return Ok(());
        }
        if self.dialect.supports_column_alter() {
            let stmts = self.dialect.drop_column(&meta.db_table, &field.column);
            return self.execute_all(stmts);
        }
        let mut remaining = meta.clone();
        remaining.fields.retain(|f| f.name != field.name);
        remaining
            .unique_together
            .retain(|set| !set.iter().any(|n| *n == field.name));
        let copy = self.copy_existing(&remaining, |_| true);
        self.remake_table(registry, &remaining, copy)
    }

    /// Changes a field from `old_field` on `old_meta` to `new_field` on
    /// `new_meta`. Each side is resolved against its own registry.
    #[allow(clippy::too_many_arguments)]
    pub fn alter_field(
        &mut self,
        old_registry: &Registry,
        old_meta: &ModelMeta,
        old_field: &FieldDef,
        new_registry: &Registry,
        new_meta: &ModelMeta,
        new_field: &FieldDef,
    ) -> OrmResult<()> {
        match (old_field.is_many_to_many(), new_field.is_many_to_many()) {
            (true, true) => {
                let old_through = old_registry.through_model(old_meta, old_field)?;
                let new_through = new_registry.through_model(new_meta, new_field)?;
                if old_through.auto_created && new_through.auto_created {
                    return self.alter_db_table(&old_through.db_table, &new_through.db_table);
                }
                return Ok(());
            }
            (false, false) => {}
            _ => {
                return Err(OrmError::NotSupported(format!(
                    "Cannot alter field '{}.{}' into or out of a many-to-many relation",
                    new_meta.label(),
                    new_field.name
                )));
            }
        }

        let old = self.column_def(old_registry, old_meta, old_field)?;
        let new = self.column_def(new_registry, new_meta, new_field)?;
        let table = new_meta.db_table.clone();
        if old.same_definition(&new) {
            return self.rename_column(&table, &old.name, &new.name);
        }
        if !self.dialect.supports_column_alter() {
            let mut copy = self.copy_existing(new_meta, |f| f.name != new_field.name);
            copy.push((new.name.clone(), self.dialect.quote(&old.name)));
            return self.remake_table(new_registry, new_meta, copy);
        }
        self.rename_column(&table, &old.name, &new.name)?;
        let stmts = self.dialect.alter_column(&table, &old, &new);
        self.execute_all(stmts)?;
        if new.db_index && !old.db_index {
            let cols = [new.name.clone()];
            let name = constraint_name(&table, &cols, "idx", self.max_name());
            let stmts = self.dialect.create_index(&table, &name, &cols);
            self.execute_all(stmts)?;
        }
        Ok(())
    }

    /// Replaces the unique-together sets of `meta` (given in field names)
    /// with `new_sets`.
    pub fn alter_unique_together(
        &mut self,
        meta: &ModelMeta,
        old_sets: &[Vec<String>],
        new_sets: &[Vec<String>],
    ) -> OrmResult<()> {
        let old: BTreeSet<Vec<String>> = Self::unique_together_columns(meta, old_sets)?.into_iter().collect();
        let new: BTreeSet<Vec<String>> = Self::unique_together_columns(meta, new_sets)?.into_iter().collect();
        let table = &meta.db_table;
        for set in old.difference(&new) {
            let name = constraint_name(table, set, "uniq", self.max_name());
            let stmts = self.dialect.drop_unique(table, &name);
            self.execute_all(stmts)?;
        }
        for set in new.difference(&old) {
            let name = constraint_name(table, set, "uniq", self.max_name());
            let stmts = self.dialect.add_unique(table, &name, set);
            self.execute_all(stmts)?;
        }
        Ok(())
    }

    /// `(target column, source expression)` pairs copying the columns of
    /// the fields of `meta` accepted by `keep` unchanged.
    fn copy_existing(&self, meta: &ModelMeta, keep: impl Fn(&FieldDef) -> bool) -> Vec<(String, String)> {
        meta.concrete_fields()
            .filter(|f| keep(f))
            .map(|f| (f.column.clone(), self.dialect.quote(&f.column)))
            .collect()
    }

    /// Rebuilds the table of `meta` with its current definition, filling
    /// the copied columns from the old table.
    fn remake_table(
        &mut self,
        registry: &Registry,
        meta: &ModelMeta,
        copy: Vec<(String, String)>,
    ) -> OrmResult<()> {
        let table = meta.db_table.clone();
        let temp = format!("new__{table}");
        let columns = self.columns(registry, meta)?;
        let mut targets = Vec::new();
        let mut sources = Vec::new();
        for column in &columns {
            if let Some((_, source)) = copy.iter().find(|(name, _)| *name == column.name) {
                targets.push(column.name.clone());
                sources.push(source.clone());
            } else if let Some(ref default) = column.default {
                targets.push(column.name.clone());
                sources.push(self.dialect.literal(default));
            }
        }

        let stmts = self.dialect.create_table(&temp, &columns);
        self.execute_all(stmts)?;
        if !targets.is_empty() {
            let q = |s: &str| self.dialect.quote(s);
            let insert = format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                q(&temp),
                self.dialect.quote_list(&targets),
                sources.join(", "),
                q(&table)
            );
            self.execute(insert)?;
        }
        let stmts = self.dialect.drop_table(&table);
        self.execute_all(stmts)?;
        let stmts = self.dialect.rename_table(&temp, &table);
        self.execute_all(stmts)?;
        self.create_secondary(&table, meta, &columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register(
                ModelMeta::new("blog", "Author")
                    .field(FieldDef::new("name", FieldType::CharField).max_length(50)),
            )
            .unwrap();
        registry
            .register(
                ModelMeta::new("blog", "Post")
                    .field(FieldDef::new("title", FieldType::CharField).max_length(100))
                    .field(FieldDef::new("views", FieldType::IntegerField).default(0))
                    .field(FieldDef::foreign_key("author", "Author", OnDelete::Cascade))
                    .field(FieldDef::many_to_many("readers", "Author"))
                    .unique_together(&["title", "author"]),
            )
            .unwrap();
        registry.populate().unwrap();
        registry
    }

    fn create_post_sql(backend: DatabaseBackendType) -> Vec<String> {
        let registry = registry();
        let post = registry.get_model("blog.Post").unwrap();
        let mut editor = SchemaEditor::collect_only(backend);
        editor.create_model(&registry, &post).unwrap();
        editor.into_collected()
    }

    /// A SQLite-flavoured connection that logs statements and fails the
    /// ones listed in `failing`.
    struct ScriptedConnection {
        log: std::cell::RefCell<Vec<String>>,
        failing: Vec<&'static str>,
    }

    impl ScriptedConnection {
        fn new(failing: Vec<&'static str>) -> Self {
            Self { log: std::cell::RefCell::new(Vec::new()), failing }
        }
    }

    impl Connection for ScriptedConnection {
        fn backend_type(&self) -> DatabaseBackendType {
            DatabaseBackendType::SQLite
        }

        fn execute(&self, sql: &str, _params: &[Value]) -> OrmResult<u64> {
            self.log.borrow_mut().push(sql.to_string());
            if self.failing.contains(&sql) {
                return Err(OrmError::OperationalError(format!("cannot run {sql}")));
            }
            Ok(0)
        }

        fn query(&self, _sql: &str, _params: &[Value]) -> OrmResult<Vec<powerorm_db::connection::Row>> {
            Ok(Vec::new())
        }

        fn insert(&self, _sql: &str, _params: &[Value]) -> OrmResult<Value> {
            Ok(Value::Null)
        }

        fn table_names(&self) -> OrmResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_atomic_keeps_body_error_over_restore_error() {
        let conn = ScriptedConnection::new(vec!["DROP TABLE missing", "PRAGMA foreign_keys = ON"]);
        let mut editor = SchemaEditor::new(&conn);
        let err = editor
            .atomic(|editor| editor.execute("DROP TABLE missing"))
            .unwrap_err();
        assert!(matches!(err, OrmError::OperationalError(msg) if msg == "cannot run DROP TABLE missing"));
        assert_eq!(
            *conn.log.borrow(),
            vec![
                "PRAGMA foreign_keys = OFF",
                "BEGIN",
                "DROP TABLE missing",
                "ROLLBACK",
                "PRAGMA foreign_keys = ON",
            ]
        );
    }

    #[test]
    fn test_atomic_reports_restore_error_after_success() {
        let conn = ScriptedConnection::new(vec!["PRAGMA foreign_keys = ON"]);
        let mut editor = SchemaEditor::new(&conn);
        let err = editor.atomic(|editor| editor.execute("SELECT 1")).unwrap_err();
        assert!(matches!(err, OrmError::OperationalError(msg) if msg.contains("foreign_keys = ON")));
    }

    #[test]
    fn test_sqlite_create_model() {
        let sql = create_post_sql(DatabaseBackendType::SQLite);
        assert_eq!(
            sql[0],
            "CREATE TABLE \"blog_post\" (\"id\" INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT, \
             \"title\" TEXT NOT NULL, \"views\" INTEGER NOT NULL DEFAULT 0, \
             \"author_id\" INTEGER NOT NULL REFERENCES \"blog_author\" (\"id\") ON DELETE CASCADE DEFERRABLE INITIALLY DEFERRED)"
        );
        assert_eq!(
            sql[1],
            "CREATE UNIQUE INDEX \"blog_post_title_author_id_uniq\" ON \"blog_post\" (\"title\", \"author_id\")"
        );
        assert_eq!(
            sql[2],
            "CREATE INDEX \"blog_post_author_id_idx\" ON \"blog_post\" (\"author_id\")"
        );
        assert!(sql[3].starts_with("CREATE TABLE \"blog_post_readers\""));
        assert!(sql.iter().any(|s| s.contains("\"blog_post_readers_post_id_author_id_uniq\"")));
    }

    #[test]
    fn test_postgres_create_model() {
        let sql = create_post_sql(DatabaseBackendType::PostgreSQL);
        assert!(sql[0].contains("\"id\" SERIAL PRIMARY KEY"));
        assert!(sql[0].contains("\"title\" VARCHAR(100) NOT NULL"));
        assert!(sql[0].contains("\"author_id\" INTEGER NOT NULL REFERENCES \"blog_author\""));
        assert_eq!(
            sql[1],
            "ALTER TABLE \"blog_post\" ADD CONSTRAINT \"blog_post_title_author_id_uniq\" UNIQUE (\"title\", \"author_id\")"
        );
    }

    #[test]
    fn test_mysql_create_model() {
        let sql = create_post_sql(DatabaseBackendType::MySQL);
        assert!(sql[0].starts_with("CREATE TABLE `blog_post` (`id` INT NOT NULL PRIMARY KEY AUTO_INCREMENT"));
        assert!(sql[0].ends_with(
            "FOREIGN KEY (`author_id`) REFERENCES `blog_author` (`id`) ON DELETE CASCADE)"
        ));
    }

    #[test]
    fn test_delete_model_drops_join_table_first() {
        let registry = registry();
        let post = registry.get_model("blog.Post").unwrap();
        let mut editor = SchemaEditor::collect_only(DatabaseBackendType::SQLite);
        editor.delete_model(&registry, &post).unwrap();
        assert_eq!(
            editor.collected_sql(),
            ["DROP TABLE \"blog_post_readers\"", "DROP TABLE \"blog_post\""]
        );
    }

    #[test]
    fn test_mysql_rename_table() {
        let mut editor = SchemaEditor::collect_only(DatabaseBackendType::MySQL);
        editor.alter_db_table("a", "b").unwrap();
        editor.alter_db_table("c", "c").unwrap();
        assert_eq!(editor.collected_sql(), ["RENAME TABLE `a` TO `b`"]);
    }

    #[test]
    fn test_sqlite_add_nullable_field_in_place() {
        let registry = registry();
        let author = registry.get_model("blog.Author").unwrap();
        let field = FieldDef::new("bio", FieldType::TextField).nullable();
        let mut meta = (*author).clone();
        meta.fields.push(field.clone());
        let mut editor = SchemaEditor::collect_only(DatabaseBackendType::SQLite);
        editor.add_field(&registry, &meta, &field).unwrap();
        assert_eq!(
            editor.collected_sql(),
            ["ALTER TABLE \"blog_author\" ADD COLUMN \"bio\" TEXT NULL"]
        );
    }

    #[test]
    fn test_sqlite_remove_field_remakes_table() {
        let registry = registry();
        let author = registry.get_model("blog.Author").unwrap();
        let name = author.field_or_err("name").unwrap().clone();
        let mut editor = SchemaEditor::collect_only(DatabaseBackendType::SQLite);
        editor.remove_field(&registry, &author, &name).unwrap();
        let sql = editor.into_collected();
        assert_eq!(
            sql,
            vec![
                "CREATE TABLE \"new__blog_author\" (\"id\" INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT)".to_string(),
                "INSERT INTO \"new__blog_author\" (\"id\") SELECT \"id\" FROM \"blog_author\"".to_string(),
                "DROP TABLE \"blog_author\"".to_string(),
                "ALTER TABLE \"new__blog_author\" RENAME TO \"blog_author\"".to_string(),
            ]
        );
    }

    #[test]
    fn test_postgres_alter_field() {
        let registry = registry();
        let author = registry.get_model("blog.Author").unwrap();
        let old = author.field_or_err("name").unwrap().clone();
        let new = old.clone().max_length(80).nullable();
        let mut editor = SchemaEditor::collect_only(DatabaseBackendType::PostgreSQL);
        editor
            .alter_field(&registry, &author, &old, &registry, &author, &new)
            .unwrap();
        assert_eq!(
            editor.collected_sql(),
            [
                "ALTER TABLE \"blog_author\" ALTER COLUMN \"name\" TYPE VARCHAR(80) USING \"name\"::VARCHAR(80)",
                "ALTER TABLE \"blog_author\" ALTER COLUMN \"name\" DROP NOT NULL",
            ]
        );
    }

    #[test]
    fn test_alter_field_rename_only() {
        let registry = registry();
        let author = registry.get_model("blog.Author").unwrap();
        let old = author.field_or_err("name").unwrap().clone();
        let new = old.clone().column("full_name");
        let mut editor = SchemaEditor::collect_only(DatabaseBackendType::SQLite);
        editor
            .alter_field(&registry, &author, &old, &registry, &author, &new)
            .unwrap();
        assert_eq!(
            editor.collected_sql(),
            ["ALTER TABLE \"blog_author\" RENAME COLUMN \"name\" TO \"full_name\""]
        );
    }

    #[test]
    fn test_alter_field_into_m2m_not_supported() {
        let registry = registry();
        let post = registry.get_model("blog.Post").unwrap();
        let old = post.field_or_err("author").unwrap().clone();
        let new = FieldDef::many_to_many("author", "Author");
        let mut editor = SchemaEditor::collect_only(DatabaseBackendType::SQLite);
        let err = editor
            .alter_field(&registry, &post, &old, &registry, &post, &new)
            .unwrap_err();
        assert!(matches!(err, OrmError::NotSupported(_)));
    }

    #[test]
    fn test_alter_unique_together() {
        let registry = registry();
        let post = registry.get_model("blog.Post").unwrap();
        let mut editor = SchemaEditor::collect_only(DatabaseBackendType::PostgreSQL);
        editor
            .alter_unique_together(
                &post,
                &[vec!["title".into(), "author".into()]],
                &[vec!["title".into()]],
            )
            .unwrap();
        assert_eq!(
            editor.collected_sql(),
            [
                "ALTER TABLE \"blog_post\" DROP CONSTRAINT \"blog_post_title_author_id_uniq\"",
                "ALTER TABLE \"blog_post\" ADD CONSTRAINT \"blog_post_title_uniq\" UNIQUE (\"title\")",
            ]
        );
    }

    #[test]
    fn test_constraint_name_truncated() {
        let cols = vec!["a_very_long_column_name".to_string(), "another_long_one".to_string()];
        let name = constraint_name("some_rather_long_table_name", &cols, "uniq", 40);
        assert_eq!(name.len(), 40);
        assert!(name.ends_with("_uniq"));
    }

    #[test]
    fn test_literals() {
        assert_eq!(SqliteDialect.literal(&Value::Bool(true)), "1");
        assert_eq!(PostgresDialect.literal(&Value::Bool(false)), "FALSE");
        assert_eq!(MySqlDialect.literal(&Value::from("it's")), "'it''s'");
    }

    #[test]
    fn test_fk_type_follows_target_pk() {
        let mut registry = Registry::new();
        registry
            .register(
                ModelMeta::new("shop", "Sku")
                    .field(FieldDef::new("code", FieldType::CharField).max_length(12).primary_key()),
            )
            .unwrap();
        registry
            .register(
                ModelMeta::new("shop", "Line")
                    .field(FieldDef::foreign_key("sku", "Sku", OnDelete::Protect)),
            )
            .unwrap();
        registry.populate().unwrap();
        let line = registry.get_model("shop.Line").unwrap();
        let editor = SchemaEditor::collect_only(DatabaseBackendType::PostgreSQL);
        let column = editor
            .column_def(&registry, &line, line.field_or_err("sku").unwrap())
            .unwrap();
        assert_eq!(column.type_sql, "VARCHAR(12)");
        assert_eq!(column.references.unwrap().on_delete, OnDelete::Protect);
    }
}
