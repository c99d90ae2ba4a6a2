//! Bookkeeping of applied migrations.
//!
//! The recorder owns the `powerorm_migrations` table. The table is described
//! as an ordinary model so its DDL and queries go through the schema editor
//! and the query compiler like any other model.

use std::collections::BTreeSet;
use std::rc::Rc;

use powerorm_core::OrmResult;
use powerorm_db::connection::Connection;
use powerorm_db::fields::{FieldDef, FieldType};
use powerorm_db::model::ModelMeta;
use powerorm_db::query::{Query, SqlCompiler, Q};
use powerorm_db::value::Value;
use powerorm_db::Registry;

use crate::migration::MigrationKey;
use crate::schema_editor::SchemaEditor;

/// Name of the table holding applied migrations.
pub const MIGRATIONS_TABLE: &str = "powerorm_migrations";

fn migration_meta() -> ModelMeta {
    ModelMeta::new("powerorm", "Migration")
        .db_table(MIGRATIONS_TABLE)
        .field(FieldDef::new("app", FieldType::CharField).max_length(255))
        .field(FieldDef::new("name", FieldType::CharField).max_length(255))
        .field(FieldDef::new("applied", FieldType::DateTimeField))
}

/// Reads and writes the applied-migrations table.
pub struct MigrationRecorder<'a> {
    connection: &'a dyn Connection,
    registry: Rc<Registry>,
    meta: Rc<ModelMeta>,
}

impl std::fmt::Debug for MigrationRecorder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRecorder")
            .field("table", &self.meta.db_table)
            .field("vendor", &self.connection.vendor())
            .finish()
    }
}

impl<'a> MigrationRecorder<'a> {
    /// A recorder working on `connection`.
    pub fn new(connection: &'a dyn Connection) -> OrmResult<Self> {
        let mut registry = Registry::new();
        registry.register(migration_meta())?;
        registry.populate()?;
        let meta = registry.get_model("powerorm.Migration")?;
        Ok(Self {
            connection,
            registry: Rc::new(registry),
            meta,
        })
    }

    /// The connection the recorder writes to.
    pub fn connection(&self) -> &'a dyn Connection {
        self.connection
    }

    /// Returns `true` when the table exists.
    pub fn has_table(&self) -> OrmResult<bool> {
        Ok(self
            .connection
            .table_names()?
            .iter()
            .any(|t| t == MIGRATIONS_TABLE))
    }

    /// Creates the table when it is missing.
    pub fn ensure_schema(&self) -> OrmResult<()> {
        if self.has_table()? {
            return Ok(());
        }
        tracing::debug!(table = MIGRATIONS_TABLE, "creating migrations table");
        let mut editor = SchemaEditor::new(self.connection);
        editor.create_model(&self.registry, &self.meta)
    }

    fn query(&self) -> Query {
        Query::new(Rc::clone(&self.registry), Rc::clone(&self.meta))
    }

    fn compiler(&self) -> SqlCompiler {
        SqlCompiler::new(self.connection.backend_type())
    }

    /// Every applied `(app, name)`. Empty when the table does not exist.
    pub fn applied_migrations(&self) -> OrmResult<BTreeSet<MigrationKey>> {
        if !self.has_table()? {
            return Ok(BTreeSet::new());
        }
        let mut query = self.query();
        query.set_values(&["app".to_string(), "name".to_string()])?;
        let (sql, params) = query.as_sql(self.connection.backend_type())?;
        self.connection
            .query(&sql, &params)?
            .iter()
            .map(|row| Ok((row.get_by_index::<String>(0)?, row.get_by_index::<String>(1)?)))
            .collect()
    }

    /// Marks a migration as applied.
    pub fn record_applied(&self, app_label: &str, name: &str) -> OrmResult<()> {
        self.ensure_schema()?;
        let values = vec![
            ("app".to_string(), Value::from(app_label)),
            ("name".to_string(), Value::from(name)),
            ("applied".to_string(), Value::from(chrono::Utc::now().naive_utc())),
        ];
        let (sql, params) = self.compiler().compile_insert(MIGRATIONS_TABLE, &values, None);
        self.connection.execute(&sql, &params)?;
        Ok(())
    }

    /// Marks a migration as not applied.
    pub fn record_unapplied(&self, app_label: &str, name: &str) -> OrmResult<()> {
        self.ensure_schema()?;
        let mut query = self.query();
        query.add_q(&(Q::new("app", app_label) & Q::new("name", name)))?;
        let (sql, params) = self.compiler().compile_delete(&query)?;
        self.connection.execute(&sql, &params)?;
        Ok(())
    }

    /// Deletes every record.
    pub fn flush(&self) -> OrmResult<()> {
        if !self.has_table()? {
            return Ok(());
        }
        let (sql, params) = self.compiler().compile_delete(&self.query())?;
        self.connection.execute(&sql, &params)?;
        Ok(())
    }
}
