//! Managers for the rows related to one instance.
//!
//! `ctx.related(&author, "post_set")` returns a [`RelatedManager`] whose
//! querysets are filtered on the author. Reverse foreign keys are filtered
//! on the key. Many-to-many relations are filtered through the join table,
//! and their managers also write to it.

use std::rc::Rc;

use powerorm_core::{OrmError, OrmResult};

use super::lookups::Q;
use super::queryset::{QuerySet, Record};
use crate::context::OrmContext;
use crate::fields::FieldDef;
use crate::model::{ModelInstance, ModelMeta};
use crate::value::Value;

#[derive(Debug, Clone)]
enum RelatedKind {
    /// `field` is a foreign key on the target model pointing at the owner.
    ReverseForeignKey { field: FieldDef },
    /// `source` points at the owner, `target` at the related rows.
    ManyToMany {
        through: Rc<ModelMeta>,
        source: String,
        target: String,
    },
}

/// The rows related to one instance through a reverse foreign key or a
/// many-to-many field.
#[derive(Debug, Clone)]
pub struct RelatedManager<'ctx> {
    ctx: &'ctx OrmContext,
    accessor: String,
    target: Rc<ModelMeta>,
    owner: Value,
    filter: Q,
    kind: RelatedKind,
}

impl<'ctx> RelatedManager<'ctx> {
    /// Resolves `accessor` on the instance's model: a many-to-many field
    /// name, or the accessor of a reverse relation.
    pub fn for_instance(
        ctx: &'ctx OrmContext,
        instance: &ModelInstance,
        accessor: &str,
    ) -> OrmResult<Self> {
        let meta = Rc::clone(instance.meta());
        let registry = Rc::clone(ctx.registry());

        if let Some(field) = meta
            .get_forward_field(accessor)
            .filter(|f| f.is_many_to_many())
        {
            let owner = owner_value(instance, "pk")?;
            let target = registry.resolve_relation(&meta, field)?;
            let through = registry.through_model(&meta, field)?;
            let (source, target_fk) = registry.through_fields(&meta, field)?;
            let inverse = target.inverse_fields.iter().find(|inv| {
                inv.many_to_many
                    && inv.field_name == field.name
                    && inv.related_model == meta.label_lower()
            });
            let filter = match inverse {
                Some(inv) => Q::new(inv.name.clone(), owner.clone()),
                None => {
                    let rows = QuerySet::new(ctx, Rc::clone(&through))
                        .filter((source.as_str(), owner.clone()))?
                        .as_array(&[target_fk.as_str()], true, true)?;
                    Q::new("pk__in", rows.as_subquery()?)
                }
            };
            return Ok(Self {
                ctx,
                accessor: accessor.to_string(),
                target,
                owner,
                filter,
                kind: RelatedKind::ManyToMany {
                    through,
                    source,
                    target: target_fk,
                },
            });
        }

        let Some(inverse) = meta.inverse_by_accessor(accessor) else {
            return Err(OrmError::FieldError(format!(
                "'{}' has no related manager named '{accessor}'",
                meta.model_name
            )));
        };
        let related = registry.get_model(&inverse.related_model)?;
        let field = related.field_or_err(&inverse.field_name)?.clone();

        if inverse.many_to_many {
            let owner = owner_value(instance, "pk")?;
            let through = registry.through_model(&related, &field)?;
            // The declaring side is the through model's source.
            let (declaring, owning) = registry.through_fields(&related, &field)?;
            return Ok(Self {
                ctx,
                accessor: accessor.to_string(),
                target: related,
                filter: Q::new(field.name.clone(), owner.clone()),
                owner,
                kind: RelatedKind::ManyToMany {
                    through,
                    source: owning,
                    target: declaring,
                },
            });
        }

        let owner = owner_value(instance, field.to_field_name().unwrap_or("pk"))?;
        Ok(Self {
            ctx,
            accessor: accessor.to_string(),
            target: related,
            filter: Q::new(field.name.clone(), owner.clone()),
            owner,
            kind: RelatedKind::ReverseForeignKey { field },
        })
    }

    /// The model of the related rows.
    pub fn model(&self) -> &Rc<ModelMeta> {
        &self.target
    }

    /// Every related row.
    pub fn all(&self) -> OrmResult<QuerySet<'ctx>> {
        QuerySet::new(self.ctx, Rc::clone(&self.target)).filter(self.filter.clone())
    }

    /// The related rows matching `q`.
    pub fn filter(&self, q: impl Into<Q>) -> OrmResult<QuerySet<'ctx>> {
        self.all()?.filter(q)
    }

    /// The number of related rows.
    pub fn count(&self) -> OrmResult<u64> {
        self.all()?.count()
    }

    /// Creates a row of the target model and relates it to the owner.
    pub fn create<S, V>(&self, values: impl IntoIterator<Item = (S, V)>) -> OrmResult<ModelInstance>
    where
        S: AsRef<str>,
        V: Into<Value>,
    {
        let mut instance = ModelInstance::new(Rc::clone(&self.target));
        for (name, value) in values {
            instance.set(name.as_ref(), value)?;
        }
        if let RelatedKind::ReverseForeignKey { ref field } = self.kind {
            instance.set(&field.name, self.owner.clone())?;
        }
        self.ctx.insert(&mut instance)?;
        if matches!(self.kind, RelatedKind::ManyToMany { .. }) {
            self.add([instance.pk()])?;
        }
        Ok(instance)
    }

    /// Relates the rows with the given primary keys to the owner. Pairs
    /// already present in a join table are skipped.
    pub fn add<V: Into<Value>>(&self, pks: impl IntoIterator<Item = V>) -> OrmResult<()> {
        let pks: Vec<Value> = pks.into_iter().map(Into::into).collect();
        if pks.is_empty() {
            return Ok(());
        }
        match &self.kind {
            RelatedKind::ReverseForeignKey { field } => {
                QuerySet::new(self.ctx, Rc::clone(&self.target))
                    .filter(("pk__in", pks))?
                    .update([(field.name.as_str(), self.owner.clone())])?;
            }
            RelatedKind::ManyToMany {
                through,
                source,
                target,
            } => {
                let existing: Vec<Value> = QuerySet::new(self.ctx, Rc::clone(through))
                    .filter(
                        Q::new(source.clone(), self.owner.clone())
                            & Q::new(format!("{target}__in"), pks.clone()),
                    )?
                    .as_array(&[target.as_str()], true, true)?
                    .iter()?
                    .flat_map(Record::values)
                    .collect();
                let mut added = 0;
                for pk in pks {
                    if existing.contains(&pk) {
                        continue;
                    }
                    let mut row = ModelInstance::new(Rc::clone(through));
                    row.set(source, self.owner.clone())?;
                    row.set(target, pk)?;
                    self.ctx.insert(&mut row)?;
                    added += 1;
                }
                tracing::debug!(accessor = %self.accessor, added, "related rows added");
            }
        }
        Ok(())
    }

    /// Unrelates the rows with the given primary keys. A reverse foreign
    /// key must be nullable; its rows are kept with the key cleared.
    pub fn remove<V: Into<Value>>(&self, pks: impl IntoIterator<Item = V>) -> OrmResult<u64> {
        let pks: Vec<Value> = pks.into_iter().map(Into::into).collect();
        if pks.is_empty() {
            return Ok(0);
        }
        match &self.kind {
            RelatedKind::ReverseForeignKey { .. } => {
                self.clear_foreign_key(Some(Q::new("pk__in", pks)))
            }
            RelatedKind::ManyToMany {
                through,
                source,
                target,
            } => QuerySet::new(self.ctx, Rc::clone(through))
                .filter(
                    Q::new(source.clone(), self.owner.clone())
                        & Q::new(format!("{target}__in"), pks),
                )?
                .delete(),
        }
    }

    /// Unrelates every row.
    pub fn clear(&self) -> OrmResult<u64> {
        match &self.kind {
            RelatedKind::ReverseForeignKey { .. } => self.clear_foreign_key(None),
            RelatedKind::ManyToMany {
                through, source, ..
            } => QuerySet::new(self.ctx, Rc::clone(through))
                .filter((source.as_str(), self.owner.clone()))?
                .delete(),
        }
    }

    fn clear_foreign_key(&self, only: Option<Q>) -> OrmResult<u64> {
        let RelatedKind::ReverseForeignKey { ref field } = self.kind else {
            return Ok(0);
        };
        if !field.null {
            return Err(OrmError::NotSupported(format!(
                "Cannot remove rows from '{}': '{}.{}' is not nullable.",
                self.accessor, self.target.model_name, field.name
            )));
        }
        let mut rows = self.all()?;
        if let Some(q) = only {
            rows = rows.filter(q)?;
        }
        rows.update([(field.name.as_str(), Value::Null)])
    }
}

fn owner_value(instance: &ModelInstance, name: &str) -> OrmResult<Value> {
    let value = instance.get(name)?;
    if value.is_null() {
        return Err(OrmError::ValueError(format!(
            "\"{instance}\" needs to have a value for field \"{name}\" before this relationship can be used."
        )));
    }
    Ok(value)
}
