//! Model metadata and model instances.
//!
//! [`ModelMeta`] is the per-model field catalog: app label, table name,
//! default ordering, and the declared fields partitioned into local,
//! relation and inverse subsets. Metas are plain data built at start-up and
//! handed to the [`Registry`](crate::registry::Registry), which resolves
//! relations and installs inverse fields.
//!
//! [`ModelInstance`] is one row of a model as a typed field map, read and
//! written through [`get`](ModelInstance::get) / [`set`](ModelInstance::set).

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use powerorm_core::{OrmError, OrmResult};

use crate::fields::FieldDef;
use crate::value::Value;

/// Metadata about a model, the equivalent of Django's `Model._meta`.
///
/// # Examples
///
/// ```
/// use powerorm_db::model::ModelMeta;
/// use powerorm_db::fields::{FieldDef, FieldType, OnDelete};
///
/// let meta = ModelMeta::new("blog", "Post")
///     .field(FieldDef::new("title", FieldType::CharField).max_length(100))
///     .field(FieldDef::foreign_key("author", "Author", OnDelete::Cascade))
///     .ordering(&["-title"]);
/// assert_eq!(meta.label(), "blog.Post");
/// assert!(meta.get_field("author").is_some());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ModelMeta {
    /// The application label (e.g., "auth", "blog").
    pub app_label: String,
    /// The model name as declared (e.g., "Post").
    pub model_name: String,
    /// The database table name. Filled in by the registry when left empty.
    pub db_table: String,
    /// Default ordering for queries, in `order_by` syntax.
    pub ordering: Vec<String>,
    /// Sets of fields that must be unique together.
    pub unique_together: Vec<Vec<String>>,
    /// `true` for models synthesized by the ORM (many-to-many join tables).
    pub auto_created: bool,
    /// Declared fields, in declaration order.
    pub fields: Vec<FieldDef>,
    /// Reverse relations pointing at this model, installed by the registry.
    pub inverse_fields: Vec<InverseField>,
}

/// The reverse side of a relation, living on the related model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InverseField {
    /// Name used in filter paths (`related_query_name`).
    pub name: String,
    /// Name of the related manager (`related_name` or `<model>_set`).
    pub accessor: String,
    /// Label of the model declaring the forward field.
    pub related_model: String,
    /// Name of the forward field on `related_model`.
    pub field_name: String,
    /// `true` when the forward field is a many-to-many.
    pub many_to_many: bool,
    /// `true` when the forward field is one-to-one.
    pub one_to_one: bool,
}

/// A field looked up by name: either declared on the model or the reverse
/// side of a relation declared elsewhere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetaField<'a> {
    /// A declared field.
    Forward(&'a FieldDef),
    /// A reverse relation.
    Inverse(&'a InverseField),
}

impl MetaField<'_> {
    /// The name of the field.
    pub fn name(&self) -> &str {
        match self {
            Self::Forward(f) => &f.name,
            Self::Inverse(f) => &f.name,
        }
    }

    /// Returns `true` if following this field crosses into another model.
    pub const fn is_relation(&self) -> bool {
        match self {
            Self::Forward(f) => f.is_relation(),
            Self::Inverse(_) => true,
        }
    }
}

impl ModelMeta {
    /// Creates an empty meta for `app_label.model_name`.
    pub fn new(app_label: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            app_label: app_label.into(),
            model_name: model_name.into(),
            db_table: String::new(),
            ordering: Vec::new(),
            unique_together: Vec::new(),
            auto_created: false,
            fields: Vec::new(),
            inverse_fields: Vec::new(),
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Sets an explicit table name.
    #[must_use]
    pub fn db_table(mut self, table: impl Into<String>) -> Self {
        self.db_table = table.into();
        self
    }

    /// Sets the default ordering.
    #[must_use]
    pub fn ordering(mut self, ordering: &[&str]) -> Self {
        self.ordering = ordering.iter().map(|o| (*o).to_string()).collect();
        self
    }

    /// Adds a unique-together set.
    #[must_use]
    pub fn unique_together(mut self, fields: &[&str]) -> Self {
        self.unique_together
            .push(fields.iter().map(|f| (*f).to_string()).collect());
        self
    }

    /// `app_label.ModelName`.
    pub fn label(&self) -> String {
        format!("{}.{}", self.app_label, self.model_name)
    }

    /// `app_label.modelname`, the registry key.
    pub fn label_lower(&self) -> String {
        self.label().to_lowercase()
    }

    /// The table name the registry assigns when none was given.
    pub fn default_db_table(&self, prefix: &str) -> String {
        format!(
            "{prefix}{}_{}",
            self.app_label.to_lowercase(),
            self.model_name.to_lowercase()
        )
    }

    /// The primary key field.
    pub fn pk(&self) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.primary_key)
    }

    /// The primary key field, or a configuration error.
    pub fn pk_field(&self) -> OrmResult<&FieldDef> {
        self.pk().ok_or_else(|| {
            OrmError::ImproperlyConfigured(format!("{} has no primary key", self.label()))
        })
    }

    /// Fields that own a column on this model's table.
    pub fn concrete_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.is_concrete())
    }

    /// Concrete, non-relation fields.
    pub fn local_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| !f.is_relation())
    }

    /// Foreign key, one-to-one and many-to-many fields.
    pub fn relation_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.is_relation())
    }

    /// Many-to-many fields.
    pub fn many_to_many(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.is_many_to_many())
    }

    /// Looks a field up by name, declared fields first.
    pub fn get_field(&self, name: &str) -> Option<MetaField<'_>> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(MetaField::Forward)
            .or_else(|| {
                self.inverse_fields
                    .iter()
                    .find(|f| f.name == name)
                    .map(MetaField::Inverse)
            })
    }

    /// Looks a declared field up by name or by attname (`author_id`).
    pub fn get_forward_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .or_else(|| self.fields.iter().find(|f| f.attname() == name))
    }

    /// A declared field by name, or a FieldError naming the model.
    pub fn field_or_err(&self, name: &str) -> OrmResult<&FieldDef> {
        self.get_forward_field(name).ok_or_else(|| {
            OrmError::FieldError(format!("{} has no field named '{name}'", self.model_name))
        })
    }

    /// Every name usable in a filter path, sorted. Used in error messages.
    pub fn field_choices(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .fields
            .iter()
            .map(|f| f.name.clone())
            .chain(self.inverse_fields.iter().map(|f| f.name.clone()))
            .collect();
        names.sort();
        names
    }

    /// Finds an inverse field by its accessor name.
    pub fn inverse_by_accessor(&self, accessor: &str) -> Option<&InverseField> {
        self.inverse_fields.iter().find(|f| f.accessor == accessor)
    }
}

/// One row of a model, as a typed map of field name to value.
///
/// Field values are keyed by field name; the attname of a foreign key
/// (`author_id`) and the alias `pk` resolve to the same slot.
#[derive(Clone, PartialEq)]
pub struct ModelInstance {
    meta: Rc<ModelMeta>,
    values: BTreeMap<String, Value>,
    annotations: BTreeMap<String, Value>,
}

impl ModelInstance {
    /// An empty (unsaved) instance.
    pub fn new(meta: Rc<ModelMeta>) -> Self {
        Self {
            meta,
            values: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    /// Builds an instance from values in concrete-field order, converting
    /// each value from its database representation.
    pub fn from_db(meta: Rc<ModelMeta>, values: Vec<Value>) -> Self {
        let values = meta
            .concrete_fields()
            .zip(values)
            .map(|(field, value)| (field.name.clone(), field.from_db_value(value)))
            .collect();
        Self {
            meta,
            values,
            annotations: BTreeMap::new(),
        }
    }

    /// Attaches an annotation value computed by the query that loaded the
    /// instance.
    pub fn set_annotation(&mut self, alias: impl Into<String>, value: Value) {
        self.annotations.insert(alias.into(), value);
    }

    /// An annotation value, if the instance was loaded with it.
    pub fn annotation(&self, alias: &str) -> Option<&Value> {
        self.annotations.get(alias)
    }

    /// The model this instance belongs to.
    pub fn meta(&self) -> &Rc<ModelMeta> {
        &self.meta
    }

    fn resolve_name(&self, name: &str) -> OrmResult<String> {
        if name == "pk" {
            return Ok(self.meta.pk_field()?.name.clone());
        }
        match self.meta.get_forward_field(name) {
            Some(field) if field.is_concrete() => Ok(field.name.clone()),
            _ => Err(OrmError::FieldError(format!(
                "{} has no field named '{name}'",
                self.meta.model_name
            ))),
        }
    }

    /// Reads a field by name, attname or `pk`, then annotations. Unset
    /// fields read as `Null`.
    pub fn get(&self, name: &str) -> OrmResult<Value> {
        match self.resolve_name(name) {
            Ok(key) => Ok(self.values.get(&key).cloned().unwrap_or(Value::Null)),
            Err(err) => self.annotations.get(name).cloned().ok_or(err),
        }
    }

    /// Writes a field by name, attname or `pk`.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> OrmResult<()> {
        let key = self.resolve_name(name)?;
        self.values.insert(key, value.into());
        Ok(())
    }

    /// The primary key value (`Null` when unsaved).
    pub fn pk(&self) -> Value {
        self.get("pk").unwrap_or(Value::Null)
    }

    /// Concrete field values prepared for the database, pk excluded when
    /// it is unset and auto-generated.
    pub fn db_values(&self) -> Vec<(String, Value)> {
        self.meta
            .concrete_fields()
            .filter_map(|field| {
                let value = self.values.get(&field.name).cloned();
                match value {
                    None | Some(Value::Null) if field.primary_key && field.field_type.is_auto() => {
                        None
                    }
                    None => Some((
                        field.column.clone(),
                        field.get_db_prep_value(field.default.clone().unwrap_or(Value::Null)),
                    )),
                    Some(v) => Some((field.column.clone(), field.get_db_prep_value(v))),
                }
            })
            .collect()
    }
}

impl fmt::Debug for ModelInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(&self.meta.model_name)
            .field("values", &self.values)
            .field("annotations", &self.annotations)
            .finish()
    }
}

impl fmt::Display for ModelInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} object ({})", self.meta.model_name, self.pk())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{FieldType, OnDelete};

    fn post_meta() -> ModelMeta {
        ModelMeta::new("blog", "Post")
            .field(FieldDef::auto_pk())
            .field(FieldDef::new("title", FieldType::CharField).max_length(100))
            .field(FieldDef::foreign_key("author", "Author", OnDelete::Cascade))
            .field(FieldDef::many_to_many("tags", "Tag"))
    }

    #[test]
    fn test_labels_and_default_table() {
        let meta = post_meta();
        assert_eq!(meta.label(), "blog.Post");
        assert_eq!(meta.label_lower(), "blog.post");
        assert_eq!(meta.default_db_table(""), "blog_post");
        assert_eq!(meta.default_db_table("app_"), "app_blog_post");
    }

    #[test]
    fn test_field_partitions() {
        let meta = post_meta();
        let local: Vec<_> = meta.local_fields().map(|f| f.name.as_str()).collect();
        assert_eq!(local, vec!["id", "title"]);
        let relations: Vec<_> = meta.relation_fields().map(|f| f.name.as_str()).collect();
        assert_eq!(relations, vec!["author", "tags"]);
        assert_eq!(meta.concrete_fields().count(), 3);
    }

    #[test]
    fn test_get_field_by_attname() {
        let meta = post_meta();
        assert_eq!(meta.get_forward_field("author_id").map(|f| f.name.as_str()), Some("author"));
        assert!(meta.get_field("missing").is_none());
        assert!(matches!(meta.field_or_err("missing"), Err(OrmError::FieldError(_))));
    }

    #[test]
    fn test_instance_get_set() {
        let meta = Rc::new(post_meta());
        let mut post = ModelInstance::new(meta);
        post.set("title", "Hello").unwrap();
        post.set("author_id", 7).unwrap();
        assert_eq!(post.get("title").unwrap(), Value::from("Hello"));
        assert_eq!(post.get("author").unwrap(), Value::Int(7));
        assert_eq!(post.pk(), Value::Null);
        post.set("pk", 3).unwrap();
        assert_eq!(post.get("id").unwrap(), Value::Int(3));
    }

    #[test]
    fn test_instance_unknown_field() {
        let post = ModelInstance::new(Rc::new(post_meta()));
        let err = post.get("body").unwrap_err();
        assert!(err.to_string().contains("Post has no field named 'body'"));
        // many-to-many fields have no slot on the row
        assert!(post.get("tags").is_err());
    }

    #[test]
    fn test_db_values_skip_unset_auto_pk() {
        let mut post = ModelInstance::new(Rc::new(post_meta()));
        post.set("title", "x").unwrap();
        post.set("author", 1).unwrap();
        let cols: Vec<String> = post.db_values().into_iter().map(|(c, _)| c).collect();
        assert_eq!(cols, vec!["title".to_string(), "author_id".to_string()]);
    }

    #[test]
    fn test_from_db_converts_values() {
        let meta = Rc::new(
            ModelMeta::new("app", "Flag")
                .field(FieldDef::auto_pk())
                .field(FieldDef::new("on", FieldType::BooleanField)),
        );
        let flag = ModelInstance::from_db(meta, vec![Value::Int(1), Value::Int(0)]);
        assert_eq!(flag.get("on").unwrap(), Value::Bool(false));
        assert_eq!(flag.to_string(), "Flag object (1)");
    }

    #[test]
    fn test_annotations_are_readable_by_get() {
        let mut post = ModelInstance::new(Rc::new(post_meta()));
        post.set_annotation("n_tags", Value::Int(3));
        assert_eq!(post.get("n_tags").unwrap(), Value::Int(3));
        assert_eq!(post.annotation("n_tags"), Some(&Value::Int(3)));
        assert!(post.get("body").is_err());
    }
}
