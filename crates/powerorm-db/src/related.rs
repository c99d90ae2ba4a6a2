//! Relation path descriptors.
//!
//! Following a relation from one model to another crosses one or more SQL
//! joins. Each hop is described by a [`PathInfo`]: the models on both ends,
//! the join columns, whether the hop is a forward (direct) foreign key and
//! whether it can multiply rows. The query engine walks these to build joins
//! and to trim joins whose target column already lives on the parent table.

use std::rc::Rc;

use powerorm_core::OrmResult;

use crate::fields::{FieldDef, FieldType};
use crate::model::{InverseField, MetaField, ModelMeta};
use crate::registry::Registry;

/// A concrete column a path resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetField {
    /// Label (lowercase) of the model owning the column.
    pub model: String,
    /// Field name.
    pub name: String,
    /// Column name.
    pub column: String,
    /// Whether the column is nullable.
    pub null: bool,
}

impl TargetField {
    /// Builds a target from a field of `meta`.
    pub fn of(meta: &ModelMeta, field: &FieldDef) -> Self {
        Self {
            model: meta.label_lower(),
            name: field.name.clone(),
            column: field.column.clone(),
            null: field.null,
        }
    }
}

/// The foreign key a join is made through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinField {
    /// Label of the model declaring the foreign key.
    pub model: String,
    /// Name of the foreign key.
    pub name: String,
    /// `true` when the join follows the key backwards.
    pub reverse: bool,
    /// `(parent column, joined column)` pairs for the ON clause.
    pub join_columns: Vec<(String, String)>,
    /// Whether the joined row may be missing.
    pub null: bool,
    /// `(local key column, foreign target column)` pairs of the foreign key.
    pub related_fields: Vec<(TargetField, TargetField)>,
}

impl JoinField {
    /// Two joins are the same join when they follow the same key the same way.
    pub fn same_as(&self, other: &Self) -> bool {
        self.model == other.model && self.name == other.name && self.reverse == other.reverse
    }
}

/// One hop of a relation path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfo {
    /// Label of the model the hop starts from.
    pub from_model: String,
    /// Label of the model the hop arrives at.
    pub to_model: String,
    /// Columns of `to_model` the hop points at.
    pub target_fields: Vec<TargetField>,
    /// The key the join is made through.
    pub join_field: JoinField,
    /// `true` when the hop can produce several rows per parent row.
    pub m2m: bool,
    /// `true` for forward foreign keys.
    pub direct: bool,
}

impl Registry {
    /// Path of a forward foreign key `field` declared on `meta`.
    pub fn forward_path(&self, meta: &ModelMeta, field: &FieldDef) -> OrmResult<PathInfo> {
        let target = self.resolve_relation(meta, field)?;
        let to_field = self.fk_target_field(&target, field)?;
        let local = TargetField::of(meta, field);
        let foreign = TargetField::of(&target, to_field);
        Ok(PathInfo {
            from_model: meta.label_lower(),
            to_model: target.label_lower(),
            target_fields: vec![foreign.clone()],
            join_field: JoinField {
                model: meta.label_lower(),
                name: field.name.clone(),
                reverse: false,
                join_columns: vec![(field.column.clone(), to_field.column.clone())],
                null: field.null,
                related_fields: vec![(local, foreign)],
            },
            m2m: false,
            direct: true,
        })
    }

    /// Path from the target of foreign key `field` (declared on `owner`)
    /// back to `owner`.
    pub fn reverse_path(&self, owner: &ModelMeta, field: &FieldDef) -> OrmResult<PathInfo> {
        let target = self.resolve_relation(owner, field)?;
        let to_field = self.fk_target_field(&target, field)?;
        let owner_pk = owner.pk_field()?;
        let one_to_one = field.unique;
        Ok(PathInfo {
            from_model: target.label_lower(),
            to_model: owner.label_lower(),
            target_fields: vec![TargetField::of(owner, owner_pk)],
            join_field: JoinField {
                model: owner.label_lower(),
                name: field.name.clone(),
                reverse: true,
                join_columns: vec![(to_field.column.clone(), field.column.clone())],
                null: true,
                related_fields: vec![(
                    TargetField::of(owner, field),
                    TargetField::of(&target, to_field),
                )],
            },
            m2m: !one_to_one,
            direct: false,
        })
    }

    fn fk_target_field<'m>(&self, target: &'m ModelMeta, field: &FieldDef) -> OrmResult<&'m FieldDef> {
        match field.field_type {
            FieldType::ForeignKey {
                to_field: Some(ref name),
                ..
            }
            | FieldType::OneToOneField {
                to_field: Some(ref name),
                ..
            } => target.field_or_err(name),
            _ => target.pk_field(),
        }
    }

    /// Path of many-to-many `field` on `meta`: into the join model, then out
    /// to the target.
    pub fn m2m_path(&self, meta: &ModelMeta, field: &FieldDef, reverse: bool) -> OrmResult<Vec<PathInfo>> {
        let through = self.through_model(meta, field)?;
        let (source, target) = self.through_fields(meta, field)?;
        let (into, out) = if reverse { (target, source) } else { (source, target) };
        let into_field = through.field_or_err(&into)?;
        let out_field = through.field_or_err(&out)?;
        Ok(vec![
            self.reverse_path(&through, into_field)?,
            self.forward_path(&through, out_field)?,
        ])
    }

    /// Path of an inverse field of some model.
    pub fn inverse_path(&self, inverse: &InverseField) -> OrmResult<Vec<PathInfo>> {
        let owner = self.get_model(&inverse.related_model)?;
        let field = owner.field_or_err(&inverse.field_name)?;
        if inverse.many_to_many {
            self.m2m_path(&owner, field, true)
        } else {
            Ok(vec![self.reverse_path(&owner, field)?])
        }
    }

    /// Path infos of a relation field of `meta`, or `None` when the field
    /// does not cross into another model.
    pub fn path_infos(&self, meta: &ModelMeta, field: MetaField<'_>) -> OrmResult<Option<Vec<PathInfo>>> {
        match field {
            MetaField::Forward(f) if f.is_many_to_many() => self.m2m_path(meta, f, false).map(Some),
            MetaField::Forward(f) if f.field_type.is_foreign_key() => {
                Ok(Some(vec![self.forward_path(meta, f)?]))
            }
            MetaField::Forward(_) => Ok(None),
            MetaField::Inverse(inv) => self.inverse_path(inv).map(Some),
        }
    }

    /// The model at the end of a path hop.
    pub fn path_target(&self, path: &PathInfo) -> OrmResult<Rc<ModelMeta>> {
        self.get_model(&path.to_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::OnDelete;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register(
                ModelMeta::new("app", "A").field(FieldDef::new("name", FieldType::CharField)),
            )
            .unwrap();
        registry
            .register(
                ModelMeta::new("app", "B")
                    .field(FieldDef::foreign_key("a", "A", OnDelete::Cascade))
                    .field(
                        FieldDef::foreign_key("maybe", "A", OnDelete::SetNull)
                            .nullable()
                            .related_name("optional_bs"),
                    )
                    .field(FieldDef::many_to_many("peers", "A").related_name("peer_of")),
            )
            .unwrap();
        registry.populate().unwrap();
        registry
    }

    #[test]
    fn test_forward_path() {
        let registry = registry();
        let b = registry.get_model("app.B").unwrap();
        let path = registry.forward_path(&b, b.field_or_err("a").unwrap()).unwrap();
        assert!(path.direct);
        assert!(!path.m2m);
        assert!(!path.join_field.null);
        assert_eq!(path.to_model, "app.a");
        assert_eq!(path.join_field.join_columns, vec![("a_id".to_string(), "id".to_string())]);
        assert_eq!(path.target_fields[0].column, "id");
    }

    #[test]
    fn test_reverse_path_is_nullable_and_multi_valued() {
        let registry = registry();
        let a = registry.get_model("app.A").unwrap();
        let Some(MetaField::Inverse(inv)) = a.get_field("b") else {
            panic!("expected inverse field 'b'");
        };
        let paths = registry.inverse_path(inv).unwrap();
        assert_eq!(paths.len(), 1);
        assert!(!paths[0].direct);
        assert!(paths[0].m2m);
        assert!(paths[0].join_field.null);
        assert_eq!(paths[0].join_field.join_columns, vec![("id".to_string(), "a_id".to_string())]);
    }

    #[test]
    fn test_m2m_path_has_two_hops() {
        let registry = registry();
        let b = registry.get_model("app.B").unwrap();
        let paths = registry
            .path_infos(&b, MetaField::Forward(b.field_or_err("peers").unwrap()))
            .unwrap()
            .unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].to_model, "app.b_peers");
        assert!(!paths[0].direct);
        assert!(paths[1].direct);
        assert_eq!(paths[1].to_model, "app.a");
    }

    #[test]
    fn test_local_field_has_no_path() {
        let registry = registry();
        let a = registry.get_model("app.A").unwrap();
        let name = a.get_field("name").unwrap();
        assert!(registry.path_infos(&a, name).unwrap().is_none());
    }
}
