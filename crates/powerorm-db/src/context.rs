//! The ORM context: settings, the populated model registry and the
//! connection, passed explicitly to everything that queries.

use std::fmt;
use std::rc::Rc;

use powerorm_core::{OrmError, OrmResult, Settings};

use crate::connection::Connection;
use crate::model::ModelInstance;
use crate::query::compiler::SqlCompiler;
use crate::query::queryset::QuerySet;
use crate::query::related_managers::RelatedManager;
use crate::registry::Registry;
use crate::value::Value;

/// Everything a queryset needs to run.
pub struct OrmContext {
    settings: Settings,
    registry: Rc<Registry>,
    connection: Box<dyn Connection>,
}

impl fmt::Debug for OrmContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrmContext")
            .field("vendor", &self.connection.vendor())
            .field("models", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl OrmContext {
    /// Builds a context, populating the registry first.
    pub fn new(
        settings: Settings,
        mut registry: Registry,
        connection: Box<dyn Connection>,
    ) -> OrmResult<Self> {
        if registry.db_prefix() != settings.db_prefix {
            return Err(OrmError::ImproperlyConfigured(format!(
                "Registry table prefix '{}' does not match the configured db_prefix '{}'",
                registry.db_prefix(),
                settings.db_prefix
            )));
        }
        registry.populate()?;
        tracing::debug!(
            vendor = connection.vendor(),
            models = registry.len(),
            "ORM context ready"
        );
        Ok(Self {
            settings,
            registry: Rc::new(registry),
            connection,
        })
    }

    /// The settings the context was built with.
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The populated model registry.
    pub const fn registry(&self) -> &Rc<Registry> {
        &self.registry
    }

    /// The database connection.
    pub fn connection(&self) -> &dyn Connection {
        self.connection.as_ref()
    }

    /// A queryset over every row of the model labelled `model`.
    pub fn objects(&self, model: &str) -> OrmResult<QuerySet<'_>> {
        Ok(QuerySet::new(self, self.registry.get_model(model)?))
    }

    /// The manager for a reverse relation or many-to-many field of
    /// `instance`.
    pub fn related(&self, instance: &ModelInstance, accessor: &str) -> OrmResult<RelatedManager<'_>> {
        RelatedManager::for_instance(self, instance, accessor)
    }

    /// The instance a foreign key of `instance` points at. `None` when the
    /// key is null.
    pub fn related_object(
        &self,
        instance: &ModelInstance,
        field_name: &str,
    ) -> OrmResult<Option<ModelInstance>> {
        let meta = Rc::clone(instance.meta());
        let field = meta.field_or_err(field_name)?;
        if !field.field_type.is_foreign_key() {
            return Err(OrmError::FieldError(format!(
                "'{}.{field_name}' is not a foreign key",
                meta.model_name
            )));
        }
        let value = instance.get(&field.name)?;
        if value.is_null() {
            return Ok(None);
        }
        let target = self.registry.resolve_relation(&meta, field)?;
        let key = field.to_field_name().unwrap_or("pk");
        QuerySet::new(self, target)
            .get((key, value))?
            .into_instance()
            .map(Some)
    }

    /// Writes `instance`: an UPDATE by primary key when it has one and the
    /// row exists, an INSERT otherwise.
    pub fn save(&self, instance: &mut ModelInstance) -> OrmResult<()> {
        let pk = instance.pk();
        if !pk.is_null() {
            let meta = Rc::clone(instance.meta());
            let values = meta
                .concrete_fields()
                .filter(|f| !f.primary_key)
                .map(|f| Ok((f.name.clone(), instance.get(&f.name)?)))
                .collect::<OrmResult<Vec<(String, Value)>>>()?;
            let rows = QuerySet::new(self, meta).filter(("pk", pk))?;
            let found = if values.is_empty() {
                rows.exists()?
            } else {
                rows.update(values)? > 0
            };
            if found {
                return Ok(());
            }
        }
        self.insert(instance)
    }

    /// Inserts `instance` and stores the generated primary key on it.
    pub fn insert(&self, instance: &mut ModelInstance) -> OrmResult<()> {
        let meta = Rc::clone(instance.meta());
        let pk = meta.pk_field()?;
        let values = instance.db_values();
        let (sql, params) = SqlCompiler::new(self.connection.backend_type()).compile_insert(
            &meta.db_table,
            &values,
            Some(&pk.column),
        );
        tracing::debug!(sql = %sql, params = ?params, "insert");
        let new_pk = self.connection.insert(&sql, &params)?;
        if instance.pk().is_null() {
            instance.set("pk", new_pk)?;
        }
        Ok(())
    }

    /// Deletes the row of `instance` and clears its primary key.
    pub fn delete(&self, instance: &mut ModelInstance) -> OrmResult<u64> {
        let pk = instance.pk();
        if pk.is_null() {
            return Err(OrmError::ValueError(format!(
                "{} object can't be deleted because its {} attribute is set to None.",
                instance.meta().model_name,
                instance.meta().pk_field()?.name
            )));
        }
        let deleted = QuerySet::new(self, Rc::clone(instance.meta()))
            .filter(("pk", pk))?
            .delete()?;
        instance.set("pk", Value::Null)?;
        Ok(deleted)
    }

    /// Reloads every field of `instance` from the database.
    pub fn refresh(&self, instance: &mut ModelInstance) -> OrmResult<()> {
        let fresh = QuerySet::new(self, Rc::clone(instance.meta()))
            .get(("pk", instance.pk()))?
            .into_instance()?;
        *instance = fresh;
        Ok(())
    }
}
