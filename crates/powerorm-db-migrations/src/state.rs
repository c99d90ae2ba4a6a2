//! In-memory model state for migrations.
//!
//! A [`ProjectState`] is a snapshot of every model at one point of the
//! migration history. Operations mutate it through `state_forwards`, and
//! [`ProjectState::render`] turns it into a populated [`Registry`] so DDL can
//! be generated with fully resolved relations, synthesized join tables
//! included.

use std::collections::BTreeMap;

use powerorm_core::{OrmError, OrmResult};
use powerorm_db::fields::FieldDef;
use powerorm_db::model::ModelMeta;
use powerorm_db::Registry;
use serde::{Deserialize, Serialize};

/// Options for a model, equivalent to Django's `class Meta`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelOptions {
    /// The explicit database table name, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_table: Option<String>,
    /// Default ordering.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ordering: Vec<String>,
    /// Sets of fields that must be unique together.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unique_together: Vec<Vec<String>>,
}

/// The state of a single model at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelState {
    /// The application label this model belongs to.
    pub app_label: String,
    /// The model name as declared.
    pub name: String,
    /// The fields of this model, primary key included.
    pub fields: Vec<FieldDef>,
    /// Model-level options.
    pub options: ModelOptions,
}

impl ModelState {
    /// Creates a new model state.
    pub fn new(app_label: impl Into<String>, name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self {
            app_label: app_label.into(),
            name: name.into(),
            fields,
            options: ModelOptions::default(),
        }
    }

    /// Sets model options.
    pub fn with_options(mut self, options: ModelOptions) -> Self {
        self.options = options;
        self
    }

    /// Captures a registered model. The table name is kept only when it
    /// differs from the one the registry would derive.
    pub fn from_meta(meta: &ModelMeta, db_prefix: &str) -> Self {
        let db_table = (meta.db_table != meta.default_db_table(db_prefix)).then(|| meta.db_table.clone());
        Self {
            app_label: meta.app_label.clone(),
            name: meta.model_name.clone(),
            fields: meta.fields.clone(),
            options: ModelOptions {
                db_table,
                ordering: meta.ordering.clone(),
                unique_together: meta.unique_together.clone(),
            },
        }
    }

    /// The lowercase model name.
    pub fn name_lower(&self) -> String {
        self.name.to_lowercase()
    }

    /// `app.Model`.
    pub fn label(&self) -> String {
        format!("{}.{}", self.app_label, self.name)
    }

    /// Looks a field up by name.
    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Looks a field up by name, failing with a [`OrmError::FieldError`].
    pub fn field_or_err(&self, name: &str) -> OrmResult<&FieldDef> {
        self.get_field(name).ok_or_else(|| {
            OrmError::FieldError(format!("{} has no field named '{name}'", self.label()))
        })
    }

    /// Builds the model meta the registry will register.
    pub fn to_meta(&self) -> ModelMeta {
        let mut meta = ModelMeta::new(self.app_label.clone(), self.name.clone());
        meta.fields.clone_from(&self.fields);
        meta.ordering.clone_from(&self.options.ordering);
        meta.unique_together.clone_from(&self.options.unique_together);
        if let Some(ref table) = self.options.db_table {
            meta.db_table.clone_from(table);
        }
        meta
    }
}

/// A snapshot of the entire project's model state.
///
/// Models are keyed by `(app_label, lowercase model name)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectState {
    models: BTreeMap<(String, String), ModelState>,
    db_prefix: String,
}

impl ProjectState {
    /// Creates a new empty project state.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty state whose generated table names carry `prefix`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            models: BTreeMap::new(),
            db_prefix: prefix.into(),
        }
    }

    /// The state of the models declared in `registry`. Synthesized join
    /// models are left out; rendering recreates them.
    pub fn from_registry(registry: &Registry) -> Self {
        let mut state = Self::with_prefix(registry.db_prefix());
        for meta in registry.declared_models() {
            state.add_model(ModelState::from_meta(meta, registry.db_prefix()));
        }
        state
    }

    /// The table prefix.
    pub fn db_prefix(&self) -> &str {
        &self.db_prefix
    }

    /// Adds or replaces a model.
    pub fn add_model(&mut self, model: ModelState) {
        let key = (model.app_label.clone(), model.name_lower());
        self.models.insert(key, model);
    }

    /// Removes a model and returns it.
    pub fn remove_model(&mut self, app_label: &str, name: &str) -> OrmResult<ModelState> {
        self.models
            .remove(&(app_label.to_string(), name.to_lowercase()))
            .ok_or_else(|| missing_model(app_label, name))
    }

    /// Looks a model up.
    pub fn get_model(&self, app_label: &str, name: &str) -> OrmResult<&ModelState> {
        self.models
            .get(&(app_label.to_string(), name.to_lowercase()))
            .ok_or_else(|| missing_model(app_label, name))
    }

    /// Looks a model up for mutation.
    pub fn get_model_mut(&mut self, app_label: &str, name: &str) -> OrmResult<&mut ModelState> {
        self.models
            .get_mut(&(app_label.to_string(), name.to_lowercase()))
            .ok_or_else(|| missing_model(app_label, name))
    }

    /// Returns `true` if the model exists.
    pub fn contains(&self, app_label: &str, name: &str) -> bool {
        self.models
            .contains_key(&(app_label.to_string(), name.to_lowercase()))
    }

    /// Every model, ordered by app label and name.
    pub fn models(&self) -> impl Iterator<Item = &ModelState> {
        self.models.values()
    }

    /// Every model, for mutation.
    pub fn models_mut(&mut self) -> impl Iterator<Item = &mut ModelState> {
        self.models.values_mut()
    }

    /// Number of models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Returns `true` when the state holds no model.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Builds a populated registry from the state.
    pub fn render(&self) -> OrmResult<Registry> {
        let mut registry = Registry::with_prefix(self.db_prefix.clone());
        for model in self.models.values() {
            registry.register(model.to_meta())?;
        }
        registry.populate()?;
        Ok(registry)
    }
}

fn missing_model(app_label: &str, name: &str) -> OrmError {
    OrmError::ValueError(format!(
        "No model named '{app_label}.{name}' in the project state"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use powerorm_db::fields::{FieldType, OnDelete};

    fn author() -> ModelState {
        ModelState::new(
            "blog",
            "Author",
            vec![
                FieldDef::auto_pk(),
                FieldDef::new("name", FieldType::CharField).max_length(50),
            ],
        )
    }

    #[test]
    fn test_add_and_lookup_is_case_insensitive() {
        let mut state = ProjectState::new();
        state.add_model(author());
        assert!(state.contains("blog", "author"));
        assert_eq!(state.get_model("blog", "AUTHOR").unwrap().name, "Author");
        assert!(state.get_model("blog", "Post").is_err());
    }

    #[test]
    fn test_remove_model() {
        let mut state = ProjectState::new();
        state.add_model(author());
        let removed = state.remove_model("blog", "Author").unwrap();
        assert_eq!(removed.name, "Author");
        assert!(state.is_empty());
        assert!(matches!(
            state.remove_model("blog", "Author"),
            Err(OrmError::ValueError(_))
        ));
    }

    #[test]
    fn test_render_synthesizes_join_tables() {
        let mut state = ProjectState::with_prefix("pw_");
        state.add_model(author());
        state.add_model(ModelState::new(
            "blog",
            "Post",
            vec![
                FieldDef::auto_pk(),
                FieldDef::foreign_key("author", "Author", OnDelete::Cascade),
                FieldDef::many_to_many("fans", "Author"),
            ],
        ));
        let registry = state.render().unwrap();
        let post = registry.get_model("blog.Post").unwrap();
        assert_eq!(post.db_table, "pw_blog_post");
        let through = registry
            .through_model(&post, post.get_forward_field("fans").unwrap())
            .unwrap();
        assert_eq!(through.db_table, "pw_blog_post_fans");
    }

    #[test]
    fn test_from_registry_round_trip() {
        let mut registry = Registry::new();
        registry
            .register(
                ModelMeta::new("shop", "Item")
                    .field(FieldDef::new("sku", FieldType::CharField).max_length(12))
                    .db_table("items")
                    .unique_together(&["id", "sku"]),
            )
            .unwrap();
        registry.populate().unwrap();
        let state = ProjectState::from_registry(&registry);
        let item = state.get_model("shop", "Item").unwrap();
        assert_eq!(item.options.db_table.as_deref(), Some("items"));
        assert_eq!(item.fields.len(), 2);
        assert_eq!(state.render().unwrap().get_model("shop.Item").unwrap().db_table, "items");
    }

    #[test]
    fn test_default_table_not_captured() {
        let mut registry = Registry::new();
        registry.register(ModelMeta::new("shop", "Item")).unwrap();
        let state = ProjectState::from_registry(&registry);
        assert!(state.get_model("shop", "item").unwrap().options.db_table.is_none());
    }
}
