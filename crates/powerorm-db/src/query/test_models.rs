//! Model graph shared by the query unit tests.
//!
//! `A` has a default ordering. `B` points at `A` twice, once through a
//! nullable key. `C` points at `B` and has a many-to-many to `A`.

use std::rc::Rc;

use crate::fields::{FieldDef, FieldType, OnDelete};
use crate::model::ModelMeta;
use crate::registry::Registry;

use super::builder::Query;

pub(crate) fn registry() -> Rc<Registry> {
    let mut registry = Registry::new();
    registry
        .register(
            ModelMeta::new("app", "A")
                .field(FieldDef::new("name", FieldType::CharField).max_length(50))
                .ordering(&["name"]),
        )
        .unwrap();
    registry
        .register(
            ModelMeta::new("app", "B")
                .field(FieldDef::new("score", FieldType::IntegerField))
                .field(FieldDef::foreign_key("a", "A", OnDelete::Cascade))
                .field(
                    FieldDef::foreign_key("maybe", "A", OnDelete::SetNull)
                        .nullable()
                        .related_name("optional_bs"),
                ),
        )
        .unwrap();
    registry
        .register(
            ModelMeta::new("app", "C")
                .field(FieldDef::foreign_key("b", "B", OnDelete::Cascade))
                .field(FieldDef::many_to_many("tags", "A").related_name("cs")),
        )
        .unwrap();
    registry.populate().unwrap();
    Rc::new(registry)
}

pub(crate) fn query(model: &str) -> Query {
    let registry = registry();
    let meta = registry.get_model(model).unwrap();
    Query::new(registry, meta)
}
