//! Model system checks.
//!
//! These run over model metadata and report declaration problems as
//! [`CheckMessage`]s. [`register_model_checks`] hooks them into a
//! [`CheckRegistry`] under the `models` tag.

use std::collections::HashMap;
use std::rc::Rc;

use powerorm_core::checks::{CheckMessage, CheckRegistry};

use crate::fields::FieldType;
use crate::model::ModelMeta;
use crate::registry::Registry;

/// Checks one model. Relation targets are resolved against `registry`.
pub fn check_model(meta: &ModelMeta, registry: &Registry) -> Vec<CheckMessage> {
    let mut messages = Vec::new();
    let label = meta.label();

    let primary_keys = meta.fields.iter().filter(|f| f.primary_key).count();
    if primary_keys > 1 {
        messages.push(CheckMessage::error(
            "The model cannot have more than one field with 'primary_key=True'.",
            None,
            Some(&label),
            Some("models.E026"),
        ));
    }

    for field in &meta.fields {
        let obj = format!("{label}.{}", field.name);

        if field.name == "id" && !field.primary_key {
            messages.push(CheckMessage::error(
                "'id' can only be used as a field name if the field also sets 'primary_key=True'.",
                None,
                Some(&label),
                Some("models.E004"),
            ));
        }
        if field.name.ends_with('_') {
            messages.push(CheckMessage::error(
                "Field names must not end with an underscore.",
                None,
                Some(&obj),
                Some("fields.E001"),
            ));
        }
        if field.name.contains("__") {
            messages.push(CheckMessage::error(
                "Field names must not contain \"__\".",
                None,
                Some(&obj),
                Some("fields.E002"),
            ));
        }
        if matches!(field.field_type, FieldType::CharField) && field.max_length.is_none() {
            messages.push(CheckMessage::error(
                "CharFields must define a 'max_length' attribute.",
                None,
                Some(&obj),
                Some("fields.E120"),
            ));
        }
        if let Some(target) = field.related_model() {
            if registry.resolve_reference(meta, target).is_none() {
                messages.push(CheckMessage::error(
                    format!(
                        "Field defines a relation with model '{target}', which is either not installed, or is abstract."
                    ),
                    None,
                    Some(&obj),
                    Some("fields.E300"),
                ));
            }
        }
        if field.is_many_to_many() && field.null {
            messages.push(CheckMessage::warning(
                "null has no effect on ManyToManyField.",
                None,
                Some(&obj),
                Some("fields.W340"),
            ));
        }
    }
    messages
}

/// Reports reverse accessors that two relations would install under the
/// same name on one model.
pub fn check_accessor_clashes(registry: &Registry) -> Vec<CheckMessage> {
    let mut seen: HashMap<(String, String), String> = HashMap::new();
    let mut messages = Vec::new();
    for meta in registry.declared_models() {
        for field in meta.relation_fields() {
            if field.is_reverse_hidden() {
                continue;
            }
            let Some(target) = field
                .related_model()
                .and_then(|t| registry.resolve_reference(meta, t))
            else {
                continue;
            };
            let accessor = field.related_name_value().map_or_else(
                || format!("{}_set", meta.model_name.to_lowercase()),
                str::to_string,
            );
            let obj = format!("{}.{}", meta.label(), field.name);
            let key = (target.label_lower(), accessor.clone());
            if let Some(other) = seen.get(&key) {
                messages.push(CheckMessage::error(
                    format!("Reverse accessor for '{obj}' clashes with reverse accessor for '{other}'."),
                    Some(&format!(
                        "Add or change a related_name argument to the definition for '{obj}' or '{other}'."
                    )),
                    Some(&obj),
                    Some("fields.E304"),
                ));
            } else {
                seen.insert(key, obj);
            }
        }
    }
    messages
}

/// Runs every model check over the declared models of `registry`.
pub fn check_models(registry: &Registry) -> Vec<CheckMessage> {
    let mut messages: Vec<CheckMessage> = registry
        .declared_models()
        .flat_map(|meta| check_model(meta, registry))
        .collect();
    messages.extend(check_accessor_clashes(registry));
    messages
}

/// Registers the model checks under the `models` tag.
pub fn register_model_checks(checks: &mut CheckRegistry, registry: Rc<Registry>) {
    checks.register(move |_settings| check_models(&registry), &["models"]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{FieldDef, OnDelete};

    fn ids(messages: &[CheckMessage]) -> Vec<&str> {
        messages.iter().filter_map(|m| m.id.as_deref()).collect()
    }

    #[test]
    fn test_field_name_checks() {
        let registry = Registry::new();
        let meta = ModelMeta::new("app", "Thing")
            .field(FieldDef::new("bad_", FieldType::IntegerField))
            .field(FieldDef::new("a__b", FieldType::IntegerField))
            .field(FieldDef::new("title", FieldType::CharField));
        let found = check_model(&meta, &registry);
        assert_eq!(ids(&found), vec!["fields.E001", "fields.E002", "fields.E120"]);
    }

    #[test]
    fn test_primary_key_checks() {
        let registry = Registry::new();
        let meta = ModelMeta::new("app", "Thing")
            .field(FieldDef::new("id", FieldType::IntegerField))
            .field(FieldDef::new("a", FieldType::IntegerField).primary_key())
            .field(FieldDef::new("b", FieldType::IntegerField).primary_key());
        let messages = check_model(&meta, &registry);
        let found = ids(&messages);
        assert!(found.contains(&"models.E026"));
        assert!(found.contains(&"models.E004"));
    }

    #[test]
    fn test_relation_checks() {
        let registry = Registry::new();
        let meta = ModelMeta::new("app", "Thing")
            .field(FieldDef::foreign_key("owner", "Missing", OnDelete::Cascade))
            .field(FieldDef::many_to_many("tags", "Missing").nullable());
        let messages = check_model(&meta, &registry);
        let found = ids(&messages);
        assert_eq!(found, vec!["fields.E300", "fields.E300", "fields.W340"]);
    }

    #[test]
    fn test_accessor_clash() {
        let mut registry = Registry::new();
        registry
            .register(ModelMeta::new("app", "Person").field(
                FieldDef::new("name", FieldType::CharField).max_length(20),
            ))
            .unwrap();
        registry
            .register(
                ModelMeta::new("app", "Letter")
                    .field(FieldDef::foreign_key("sender", "Person", OnDelete::Cascade))
                    .field(FieldDef::foreign_key("recipient", "Person", OnDelete::Cascade)),
            )
            .unwrap();
        let found = check_models(&registry);
        assert_eq!(ids(&found), vec!["fields.E304"]);
        assert!(found[0].msg.contains("app.Letter.recipient"));
    }

    #[test]
    fn test_registered_under_models_tag() {
        let mut registry = Registry::new();
        registry
            .register(ModelMeta::new("app", "Thing").field(FieldDef::new("bad_", FieldType::IntegerField)))
            .unwrap();
        let mut checks = CheckRegistry::new();
        register_model_checks(&mut checks, Rc::new(registry));
        let settings = powerorm_core::Settings::default();
        assert_eq!(checks.run_checks(Some(&["models"]), &settings).len(), 1);
        assert!(checks.run_checks(Some(&["database"]), &settings).is_empty());
    }
}
