//! The model registry.
//!
//! Holds every registered [`ModelMeta`], keyed by lowercase `app.model`
//! label. [`Registry::populate`] finishes the metadata once all models are
//! known: it synthesizes join-table metas for many-to-many fields without an
//! explicit `through` model and installs inverse fields on related models.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use powerorm_core::{OrmError, OrmResult};

use crate::fields::{m2m_db_table, m2m_field_names, FieldDef, FieldType, OnDelete};
use crate::model::{InverseField, ModelMeta};

/// Registry of model metadata.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    models: BTreeMap<String, Rc<ModelMeta>>,
    /// `(model label, m2m field name)` to the label of its synthesized join model.
    auto_through: HashMap<(String, String), String>,
    db_prefix: String,
    ready: bool,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty registry prefixing generated table names with `prefix`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            db_prefix: prefix.into(),
            ..Self::default()
        }
    }

    /// Registers a model.
    ///
    /// Adds an `id` auto primary key when none is declared and fills in the
    /// default table name. Fails on duplicate field names, more than one
    /// primary key, or a model registered twice.
    pub fn register(&mut self, mut meta: ModelMeta) -> OrmResult<()> {
        let key = meta.label_lower();
        if self.models.contains_key(&key) {
            return Err(OrmError::ImproperlyConfigured(format!(
                "Model '{}' is already registered",
                meta.label()
            )));
        }

        let mut seen = HashSet::new();
        for field in &meta.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(OrmError::ImproperlyConfigured(format!(
                    "Duplicate field '{}' on model '{}'",
                    field.name,
                    meta.label()
                )));
            }
        }

        match meta.fields.iter().filter(|f| f.primary_key).count() {
            0 => meta.fields.insert(0, FieldDef::auto_pk()),
            1 => {}
            _ => {
                return Err(OrmError::ImproperlyConfigured(format!(
                    "Model '{}' can't have more than one primary key",
                    meta.label()
                )))
            }
        }

        if meta.db_table.is_empty() {
            meta.db_table = meta.default_db_table(&self.db_prefix);
        }

        tracing::debug!(model = %meta.label(), table = %meta.db_table, "registered model");
        self.models.insert(key, Rc::new(meta));
        self.ready = false;
        Ok(())
    }

    /// Returns `true` once [`populate`](Self::populate) has run since the
    /// last registration.
    pub const fn is_ready(&self) -> bool {
        self.ready
    }

    /// The table prefix.
    pub fn db_prefix(&self) -> &str {
        &self.db_prefix
    }

    /// Resolves relations, synthesizes join models and installs inverse
    /// fields. Safe to call more than once.
    pub fn populate(&mut self) -> OrmResult<()> {
        if self.ready {
            return Ok(());
        }

        self.models.retain(|_, m| !m.auto_created);
        self.auto_through.clear();
        for meta in self.models.values_mut() {
            Rc::make_mut(meta).inverse_fields.clear();
        }

        // Join models for many-to-many fields without an explicit `through`.
        let mut synthesized = Vec::new();
        for meta in self.models.values() {
            for field in meta.many_to_many() {
                if let FieldType::ManyToManyField { through: None, .. } = field.field_type {
                    let target = self.resolve_relation(meta, field)?;
                    let through = self.build_join_model(meta, field, &target);
                    self.auto_through
                        .insert((meta.label_lower(), field.name.clone()), through.label_lower());
                    synthesized.push(through);
                }
            }
        }
        for through in synthesized {
            self.models.insert(through.label_lower(), Rc::new(through));
        }

        // Inverse fields.
        let mut inverse: Vec<(String, InverseField)> = Vec::new();
        for meta in self.models.values() {
            if meta.auto_created {
                continue;
            }
            for field in meta.relation_fields() {
                let target = self.resolve_relation(meta, field)?;
                if field.is_reverse_hidden() {
                    continue;
                }
                let model_lower = meta.model_name.to_lowercase();
                let name = field
                    .related_query_name_value()
                    .or_else(|| field.related_name_value())
                    .map_or_else(|| model_lower.clone(), str::to_string);
                let accessor = field
                    .related_name_value()
                    .map_or_else(|| format!("{model_lower}_set"), str::to_string);
                inverse.push((
                    target.label_lower(),
                    InverseField {
                        name,
                        accessor,
                        related_model: meta.label_lower(),
                        field_name: field.name.clone(),
                        many_to_many: field.is_many_to_many(),
                        one_to_one: matches!(field.field_type, FieldType::OneToOneField { .. }),
                    },
                ));
            }
        }
        for (target, field) in inverse {
            if let Some(meta) = self.models.get_mut(&target) {
                Rc::make_mut(meta).inverse_fields.push(field);
            }
        }

        self.ready = true;
        tracing::debug!(models = self.models.len(), "model registry populated");
        Ok(())
    }

    fn build_join_model(&self, meta: &ModelMeta, field: &FieldDef, target: &ModelMeta) -> ModelMeta {
        let (from_name, to_name) = m2m_field_names(&meta.model_name, &target.model_name);
        let mut through = ModelMeta::new(
            meta.app_label.clone(),
            format!("{}_{}", meta.model_name, field.name),
        )
        .db_table(m2m_db_table(&meta.db_table, field))
        .field(FieldDef::auto_pk())
        .field(
            FieldDef::foreign_key(from_name.clone(), meta.label(), OnDelete::Cascade)
                .related_name(format!("{}_{}+", meta.model_name, field.name)),
        )
        .field(
            FieldDef::foreign_key(to_name.clone(), target.label(), OnDelete::Cascade)
                .related_name(format!("{}_{}+", meta.model_name, field.name)),
        )
        .unique_together(&[&from_name, &to_name]);
        through.auto_created = true;
        through
    }

    /// Looks a model up by `app.Model` label, or by bare model name when
    /// that name is unique across apps.
    pub fn get_model(&self, label: &str) -> OrmResult<Rc<ModelMeta>> {
        let lower = label.to_lowercase();
        if let Some(meta) = self.models.get(&lower) {
            return Ok(Rc::clone(meta));
        }
        if !lower.contains('.') {
            let mut matches = self
                .models
                .values()
                .filter(|m| m.model_name.to_lowercase() == lower);
            if let (Some(meta), None) = (matches.next(), matches.next()) {
                return Ok(Rc::clone(meta));
            }
        }
        Err(OrmError::ImproperlyConfigured(format!(
            "Model '{label}' is not registered"
        )))
    }

    /// The model a relation field points at. Unqualified targets resolve
    /// within the declaring model's app.
    pub fn resolve_relation(&self, meta: &ModelMeta, field: &FieldDef) -> OrmResult<Rc<ModelMeta>> {
        let target = field.related_model().ok_or_else(|| {
            OrmError::FieldError(format!("'{}' is not a relation field", field.name))
        })?;
        self.resolve_reference(meta, target).ok_or_else(|| {
            OrmError::FieldError(format!(
                "Field '{}.{}' defines a relation with model '{target}', which is not registered",
                meta.label(),
                field.name
            ))
        })
    }

    /// Resolves a model reference (`app.Model` or `Model`) relative to `meta`.
    pub fn resolve_reference(&self, meta: &ModelMeta, reference: &str) -> Option<Rc<ModelMeta>> {
        let key = if reference.contains('.') {
            reference.to_lowercase()
        } else {
            format!("{}.{}", meta.app_label, reference).to_lowercase()
        };
        self.models.get(&key).cloned()
    }

    /// The intermediate model of a many-to-many field, explicit or synthesized.
    pub fn through_model(&self, meta: &ModelMeta, field: &FieldDef) -> OrmResult<Rc<ModelMeta>> {
        match field.field_type {
            FieldType::ManyToManyField {
                through: Some(ref through),
                ..
            } => self.resolve_reference(meta, through).ok_or_else(|| {
                OrmError::FieldError(format!(
                    "Field '{}.{}' specifies a many-to-many relation through model '{through}', which is not registered",
                    meta.label(),
                    field.name
                ))
            }),
            FieldType::ManyToManyField { through: None, .. } => {
                let key = (meta.label_lower(), field.name.clone());
                let label = self.auto_through.get(&key).ok_or_else(|| {
                    OrmError::ImproperlyConfigured("Models aren't loaded yet.".into())
                })?;
                self.get_model(label)
            }
            _ => Err(OrmError::FieldError(format!(
                "'{}' is not a many-to-many field",
                field.name
            ))),
        }
    }

    /// Names of the (source, target) foreign keys on the intermediate model
    /// of a many-to-many field.
    pub fn through_fields(&self, meta: &ModelMeta, field: &FieldDef) -> OrmResult<(String, String)> {
        let through = self.through_model(meta, field)?;
        if let FieldType::ManyToManyField {
            through_fields: Some((ref source, ref target)),
            ..
        } = field.field_type
        {
            return Ok((source.clone(), target.clone()));
        }

        let target_meta = self.resolve_relation(meta, field)?;
        let points_at = |wanted: &ModelMeta, skip: Option<&str>| {
            through
                .fields
                .iter()
                .filter(|f| f.field_type.is_foreign_key())
                .filter(|f| Some(f.name.as_str()) != skip)
                .find(|f| {
                    self.resolve_relation(&through, f)
                        .is_ok_and(|m| m.label_lower() == wanted.label_lower())
                })
                .map(|f| f.name.clone())
        };
        let source = points_at(meta, None);
        let target = points_at(&target_meta, source.as_deref());
        match (source, target) {
            (Some(s), Some(t)) => Ok((s, t)),
            _ => Err(OrmError::FieldError(format!(
                "The model '{}' is used as an intermediate model by '{}.{}', but it does not have foreign keys to both ends",
                through.label(),
                meta.label(),
                field.name
            ))),
        }
    }

    /// All registered models, including synthesized join models.
    pub fn models(&self) -> impl Iterator<Item = &Rc<ModelMeta>> {
        self.models.values()
    }

    /// Models declared by the application, without synthesized join models.
    pub fn declared_models(&self) -> impl Iterator<Item = &Rc<ModelMeta>> {
        self.models.values().filter(|m| !m.auto_created)
    }

    /// Number of registered models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Returns `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::OnDelete;

    fn blog_registry() -> Registry {
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
                    .field(FieldDef::foreign_key("author", "Author", OnDelete::Cascade))
                    .field(FieldDef::many_to_many("tags", "Tag").related_name("posts")),
            )
            .unwrap();
        registry
            .register(
                ModelMeta::new("blog", "Tag")
                    .field(FieldDef::new("label", FieldType::CharField).max_length(20)),
            )
            .unwrap();
        registry.populate().unwrap();
        registry
    }

    #[test]
    fn test_register_adds_auto_pk_and_table() {
        let registry = blog_registry();
        let author = registry.get_model("blog.Author").unwrap();
        assert_eq!(author.pk().map(|f| f.name.as_str()), Some("id"));
        assert!(author.pk().is_some_and(|f| f.auto_created));
        assert_eq!(author.db_table, "blog_author");
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = Registry::new();
        let meta = ModelMeta::new("app", "A")
            .field(FieldDef::new("x", FieldType::IntegerField))
            .field(FieldDef::new("x", FieldType::IntegerField));
        assert!(registry.register(meta).is_err());

        let meta = ModelMeta::new("app", "B")
            .field(FieldDef::new("a", FieldType::IntegerField).primary_key())
            .field(FieldDef::new("b", FieldType::IntegerField).primary_key());
        assert!(registry.register(meta).is_err());
    }

    #[test]
    fn test_prefix_applies_to_default_table() {
        let mut registry = Registry::with_prefix("pw_");
        registry.register(ModelMeta::new("shop", "Item")).unwrap();
        assert_eq!(registry.get_model("Item").unwrap().db_table, "pw_shop_item");
    }

    #[test]
    fn test_inverse_fields_installed() {
        let registry = blog_registry();
        let author = registry.get_model("blog.Author").unwrap();
        let inverse = &author.inverse_fields[0];
        assert_eq!(inverse.name, "post");
        assert_eq!(inverse.accessor, "post_set");
        assert_eq!(inverse.related_model, "blog.post");
        assert!(!inverse.many_to_many);

        let tag = registry.get_model("blog.Tag").unwrap();
        let inverse = tag.inverse_by_accessor("posts").unwrap();
        assert_eq!(inverse.name, "posts");
        assert!(inverse.many_to_many);
    }

    #[test]
    fn test_join_model_synthesized() {
        let registry = blog_registry();
        let post = registry.get_model("blog.Post").unwrap();
        let tags = post.get_forward_field("tags").unwrap();
        let through = registry.through_model(&post, tags).unwrap();
        assert!(through.auto_created);
        assert_eq!(through.db_table, "blog_post_tags");
        assert_eq!(
            through.unique_together,
            vec![vec!["post".to_string(), "tag".to_string()]]
        );
        assert_eq!(
            registry.through_fields(&post, tags).unwrap(),
            ("post".to_string(), "tag".to_string())
        );
        // join models do not leak inverse fields onto the endpoints
        assert_eq!(post.inverse_fields.len(), 0);
        assert_eq!(registry.declared_models().count(), 3);
    }

    #[test]
    fn test_explicit_through_fields_detected() {
        let mut registry = Registry::new();
        registry.register(ModelMeta::new("club", "Person")).unwrap();
        registry
            .register(
                ModelMeta::new("club", "Group")
                    .field(FieldDef::many_to_many("members", "Person").through("Membership", None)),
            )
            .unwrap();
        registry
            .register(
                ModelMeta::new("club", "Membership")
                    .field(FieldDef::foreign_key("person", "Person", OnDelete::Cascade))
                    .field(FieldDef::foreign_key("group", "Group", OnDelete::Cascade)),
            )
            .unwrap();
        registry.populate().unwrap();

        let group = registry.get_model("club.Group").unwrap();
        let members = group.get_forward_field("members").unwrap();
        assert_eq!(
            registry.through_fields(&group, members).unwrap(),
            ("group".to_string(), "person".to_string())
        );
    }

    #[test]
    fn test_unknown_relation_target() {
        let mut registry = Registry::new();
        registry
            .register(
                ModelMeta::new("app", "A")
                    .field(FieldDef::foreign_key("b", "Missing", OnDelete::Cascade)),
            )
            .unwrap();
        assert!(matches!(registry.populate(), Err(OrmError::FieldError(_))));
    }

    #[test]
    fn test_populate_is_idempotent() {
        let mut registry = blog_registry();
        let before = registry.len();
        registry.populate().unwrap();
        assert_eq!(registry.len(), before);
        let author = registry.get_model("blog.Author").unwrap();
        assert_eq!(author.inverse_fields.len(), 1);
    }
}
