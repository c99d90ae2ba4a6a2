//! The lazy queryset façade.
//!
//! A [`QuerySet`] wraps a [`Query`] bound to an [`OrmContext`]. Builder
//! methods return a new queryset over a copy of the query and never touch
//! the database. Terminal methods (`count()`, `get()`, `iter()`, ...) compile
//! and run it. The rows of an evaluated queryset are cached: iterating it a
//! second time does not query again, while derived querysets start with an
//! empty cache.
//!
//! ```ignore
//! let recent = ctx
//!     .objects("blog.Post")?
//!     .filter(("author__name__startswith", "A"))?
//!     .order_by(["-published"])?;
//! for post in recent.iter()? {
//!     println!("{}", post.get("title")?);
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use once_cell::unsync::OnceCell;
use powerorm_core::{OrmError, OrmResult};

use super::builder::{OrderBy, Query, LOOKUP_SEP};
use super::compiler::SqlCompiler;
use super::expressions::Expression;
use super::lookups::Q;
use crate::connection::{DatabaseBackendType, Row};
use crate::context::OrmContext;
use crate::fields::FieldDef;
use crate::model::{ModelInstance, ModelMeta};
use crate::value::Value;

/// The shape of the rows a queryset yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultKind {
    /// Model instances.
    Model,
    /// Name to value maps.
    Dict,
    /// Positional value lists.
    List,
    /// A single value per row.
    Flat,
}

/// One row produced by a queryset.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// A model instance, with any annotations attached.
    Instance(ModelInstance),
    /// Field name to value, in select order.
    Dict(Vec<(String, Value)>),
    /// Values in select order.
    List(Vec<Value>),
    /// The only selected value.
    Flat(Value),
}

impl Record {
    /// Reads a value by name from an instance or a dict row.
    pub fn get(&self, name: &str) -> OrmResult<Value> {
        match self {
            Self::Instance(instance) => instance.get(name),
            Self::Dict(pairs) => pairs
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
                .ok_or_else(|| OrmError::FieldError(format!("No value named '{name}' in row"))),
            Self::List(_) | Self::Flat(_) => Err(OrmError::TypeError(
                "Positional rows have no named values".into(),
            )),
        }
    }

    /// The instance, for model rows.
    pub const fn as_instance(&self) -> Option<&ModelInstance> {
        match self {
            Self::Instance(instance) => Some(instance),
            _ => None,
        }
    }

    /// Consumes the record into its instance.
    pub fn into_instance(self) -> OrmResult<ModelInstance> {
        match self {
            Self::Instance(instance) => Ok(instance),
            _ => Err(OrmError::TypeError(
                "Row was not loaded as a model instance".into(),
            )),
        }
    }

    /// The values of the row in select order.
    pub fn values(&self) -> Vec<Value> {
        match self {
            Self::Instance(instance) => instance
                .meta()
                .concrete_fields()
                .map(|f| instance.get(&f.name).unwrap_or(Value::Null))
                .collect(),
            Self::Dict(pairs) => pairs.iter().map(|(_, v)| v.clone()).collect(),
            Self::List(values) => values.clone(),
            Self::Flat(value) => vec![value.clone()],
        }
    }
}

/// A lazy, chainable query over one model.
pub struct QuerySet<'ctx> {
    ctx: &'ctx OrmContext,
    query: Query,
    kind: ResultKind,
    names: Vec<String>,
    converters: Vec<Option<FieldDef>>,
    cache: OnceCell<Vec<Record>>,
}

impl fmt::Debug for QuerySet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySet")
            .field("model", &self.query.model().label())
            .field("kind", &self.kind)
            .field("evaluated", &self.cache.get().is_some())
            .finish_non_exhaustive()
    }
}

impl<'ctx> QuerySet<'ctx> {
    /// A queryset over every row of `meta`.
    pub fn new(ctx: &'ctx OrmContext, meta: Rc<ModelMeta>) -> Self {
        Self::from_query(ctx, Query::new(Rc::clone(ctx.registry()), meta))
    }

    /// A queryset running an existing query.
    pub fn from_query(ctx: &'ctx OrmContext, query: Query) -> Self {
        Self {
            ctx,
            query,
            kind: ResultKind::Model,
            names: Vec::new(),
            converters: Vec::new(),
            cache: OnceCell::new(),
        }
    }

    /// A copy with the same query and an empty result cache.
    fn chain(&self) -> Self {
        Self {
            ctx: self.ctx,
            query: self.query.chain(),
            kind: self.kind,
            names: self.names.clone(),
            converters: self.converters.clone(),
            cache: OnceCell::new(),
        }
    }

    /// The underlying query.
    pub const fn query(&self) -> &Query {
        &self.query
    }

    /// The model queried.
    pub fn model(&self) -> &Rc<ModelMeta> {
        self.query.model()
    }

    fn backend(&self) -> DatabaseBackendType {
        self.ctx.connection().backend_type()
    }

    // ── builders ─────────────────────────────────────────────────────

    /// A copy of this queryset.
    #[must_use]
    pub fn all(&self) -> Self {
        self.chain()
    }

    /// A queryset matching nothing, without touching the database.
    #[must_use]
    pub fn none(&self) -> Self {
        let mut clone = self.chain();
        clone.query.set_empty();
        clone
    }

    /// Narrows the queryset to rows matching `q`.
    pub fn filter(&self, q: impl Into<Q>) -> OrmResult<Self> {
        self.filter_or_exclude(false, q.into())
    }

    /// Narrows the queryset to rows not matching `q`.
    pub fn exclude(&self, q: impl Into<Q>) -> OrmResult<Self> {
        self.filter_or_exclude(true, q.into())
    }

    fn filter_or_exclude(&self, negate: bool, q: Q) -> OrmResult<Self> {
        let mut clone = self.chain();
        if q.is_empty() {
            return Ok(clone);
        }
        if !self.query.is_filterable() {
            return Err(OrmError::NotSupported(
                "Cannot filter a query once a slice has been taken.".into(),
            ));
        }
        clone.query.add_q(&if negate { !q } else { q })?;
        Ok(clone)
    }

    /// Adds computed columns. An aggregate annotation groups the rows by
    /// the selected columns.
    pub fn annotate<S, E>(&self, annotations: impl IntoIterator<Item = (S, E)>) -> OrmResult<Self>
    where
        S: AsRef<str>,
        E: Into<Expression>,
    {
        let mut clone = self.chain();
        let meta = Rc::clone(self.query.model());
        for (alias, expr) in annotations {
            let alias = alias.as_ref();
            if meta.get_field(alias).is_some() || meta.get_forward_field(alias).is_some() {
                return Err(OrmError::ValueError(format!(
                    "The annotation '{alias}' conflicts with a field on the model."
                )));
            }
            let expr = expr.into();
            let is_aggregate = expr.contains_aggregate();
            clone.query.add_annotation(expr, alias, false)?;
            if is_aggregate {
                clone.query.set_group_by();
            }
            if clone.kind != ResultKind::Model {
                clone.names.push(alias.to_string());
                clone.converters.push(None);
            }
        }
        Ok(clone)
    }

    /// Replaces the ordering. `-name` sorts descending, `?` is rejected.
    pub fn order_by<O>(&self, ordering: impl IntoIterator<Item = O>) -> OrmResult<Self>
    where
        O: Into<OrderBy>,
    {
        if !self.query.is_filterable() {
            return Err(OrmError::NotSupported(
                "Cannot reorder a query once a slice has been taken.".into(),
            ));
        }
        let mut clone = self.chain();
        clone.query.clear_ordering(false);
        clone
            .query
            .add_ordering(ordering.into_iter().map(Into::into).collect())?;
        Ok(clone)
    }

    /// Slices the queryset: skip `low` rows, stop before row `high`.
    /// Successive slices are relative to each other.
    #[must_use]
    pub fn limit(&self, low: usize, high: Option<usize>) -> Self {
        let mut clone = self.chain();
        clone.query.set_limits(Some(low), high);
        clone
    }

    /// Removes duplicate rows. On PostgreSQL `fields` selects
    /// `DISTINCT ON` columns.
    pub fn distinct(&self, fields: &[&str]) -> OrmResult<Self> {
        if !fields.is_empty() && !self.query.is_filterable() {
            return Err(OrmError::NotSupported(
                "Cannot create distinct fields once a slice has been taken.".into(),
            ));
        }
        let mut clone = self.chain();
        clone.query.distinct = true;
        let fields: Vec<String> = fields.iter().map(|f| (*f).to_string()).collect();
        clone.query.add_distinct_fields(&fields);
        Ok(clone)
    }

    /// Switches the result shape: dict rows, or positional rows when
    /// `values_only` is set, or bare values when `flat` is also set.
    /// No `fields` selects every concrete column.
    pub fn as_array(&self, fields: &[&str], values_only: bool, flat: bool) -> OrmResult<Self> {
        if flat && !values_only {
            return Err(OrmError::TypeError(
                "'flat' is only valid when values_only is true.".into(),
            ));
        }
        if flat && fields.len() != 1 {
            return Err(OrmError::TypeError(
                "'flat' is valid only when as_array is called with a single field.".into(),
            ));
        }

        let mut clone = self.chain();
        let fields: Vec<String> = fields.iter().map(|f| (*f).to_string()).collect();
        clone.query.set_values(&fields)?;

        let meta = Rc::clone(clone.query.model());
        let mut names = Vec::new();
        let mut converters = Vec::new();
        for name in &clone.query.values_select {
            let parts: Vec<String> = name.split(LOOKUP_SEP).map(str::to_string).collect();
            let resolution = clone.query.names_to_path(&parts, &meta, true)?;
            names.push(name.clone());
            converters.push(Some(resolution.final_field));
        }
        for (alias, _) in clone.query.annotation_select() {
            names.push(alias.to_string());
            converters.push(None);
        }
        clone.names = names;
        clone.converters = converters;
        clone.kind = match (values_only, flat) {
            (false, _) => ResultKind::Dict,
            (true, false) => ResultKind::List,
            (true, true) => ResultKind::Flat,
        };
        Ok(clone)
    }

    // ── evaluation ───────────────────────────────────────────────────

    fn fetch(&self) -> OrmResult<Vec<Record>> {
        if self.query.is_empty() {
            return Ok(Vec::new());
        }
        let (sql, params) = self.query.as_sql(self.backend())?;
        tracing::debug!(sql = %sql, params = ?params, "evaluating queryset");
        let rows = self.ctx.connection().query(&sql, &params)?;
        Ok(rows.into_iter().map(|row| self.to_record(row)).collect())
    }

    fn to_record(&self, row: Row) -> Record {
        let mut values = row.into_values();
        match self.kind {
            ResultKind::Model => {
                let meta = Rc::clone(self.query.model());
                let n = meta.concrete_fields().count().min(values.len());
                let extra = values.split_off(n);
                let mut instance = ModelInstance::from_db(meta, values);
                for ((alias, _), value) in self.query.annotation_select().into_iter().zip(extra) {
                    instance.set_annotation(alias, value);
                }
                Record::Instance(instance)
            }
            ResultKind::Dict => Record::Dict(
                self.names
                    .iter()
                    .cloned()
                    .zip(self.convert(values))
                    .collect(),
            ),
            ResultKind::List => Record::List(self.convert(values)),
            ResultKind::Flat => {
                Record::Flat(self.convert(values).into_iter().next().unwrap_or(Value::Null))
            }
        }
    }

    fn convert(&self, values: Vec<Value>) -> Vec<Value> {
        values
            .into_iter()
            .enumerate()
            .map(|(i, value)| match self.converters.get(i) {
                Some(Some(field)) => field.from_db_value(value),
                _ => value,
            })
            .collect()
    }

    /// Runs the query once and returns the cached rows.
    pub fn fetch_all(&self) -> OrmResult<&[Record]> {
        self.cache
            .get_or_try_init(|| self.fetch())
            .map(Vec::as_slice)
    }

    /// Iterates over the rows, evaluating the queryset on first use.
    pub fn iter(&self) -> OrmResult<std::slice::Iter<'_, Record>> {
        Ok(self.fetch_all()?.iter())
    }

    /// Returns `true` once the rows have been fetched.
    pub fn is_evaluated(&self) -> bool {
        self.cache.get().is_some()
    }

    /// The number of rows, fetching them all.
    pub fn len(&self) -> OrmResult<usize> {
        Ok(self.fetch_all()?.len())
    }

    /// Returns `true` if the queryset has no rows, fetching them all.
    pub fn is_empty(&self) -> OrmResult<bool> {
        Ok(self.fetch_all()?.is_empty())
    }

    /// The number of rows: the cached length when evaluated, otherwise a
    /// `COUNT(*)` query.
    pub fn count(&self) -> OrmResult<u64> {
        if let Some(rows) = self.cache.get() {
            return Ok(rows.len() as u64);
        }
        if self.query.is_empty() {
            return Ok(0);
        }
        self.query.get_count(self.ctx.connection())
    }

    /// Returns `true` if at least one row matches.
    pub fn exists(&self) -> OrmResult<bool> {
        if let Some(rows) = self.cache.get() {
            return Ok(!rows.is_empty());
        }
        self.query.has_results(self.ctx.connection())
    }

    /// The single row matching `q`.
    pub fn get(&self, q: impl Into<Q>) -> OrmResult<Record> {
        let mut clone = self.filter(q)?;
        if clone.query.is_filterable() && clone.query.distinct_fields().is_empty() {
            clone.query.clear_ordering(true);
        }
        let rows = clone.fetch_all()?;
        match rows {
            [row] => Ok(row.clone()),
            [] => Err(OrmError::DoesNotExist(format!(
                "{} matching query does not exist.",
                self.model().model_name
            ))),
            _ => Err(OrmError::MultipleObjectsReturned(format!(
                "get() returned more than one {} -- it returned {}!",
                self.model().model_name,
                rows.len()
            ))),
        }
    }

    /// The first row, ordering by primary key when no ordering applies.
    pub fn first(&self) -> OrmResult<Option<Record>> {
        let ordered = if self.query.is_ordered() || !self.query.is_filterable() {
            self.chain()
        } else {
            self.order_by(["pk"])?
        };
        ordered.get_index(0)
    }

    /// The row at `index`, served from the cache when evaluated.
    pub fn get_index(&self, index: usize) -> OrmResult<Option<Record>> {
        if let Some(rows) = self.cache.get() {
            return Ok(rows.get(index).cloned());
        }
        let high = index
            .checked_add(1)
            .ok_or_else(|| OrmError::ValueError(format!("Index {index} is out of range.")))?;
        let slice = self.limit(index, Some(high));
        Ok(slice.fetch_all()?.first().cloned())
    }

    /// Computes aggregates over the whole queryset.
    pub fn aggregate<S, E>(
        &self,
        aggregates: impl IntoIterator<Item = (S, E)>,
    ) -> OrmResult<BTreeMap<String, Value>>
    where
        S: AsRef<str>,
        E: Into<Expression>,
    {
        if !self.query.distinct_fields().is_empty() {
            return Err(OrmError::NotSupported(
                "aggregate() + distinct(fields) not implemented.".into(),
            ));
        }
        let mut query = self.query.chain();
        let mut added = Vec::new();
        for (alias, expr) in aggregates {
            let alias = alias.as_ref();
            let expr = expr.into();
            if !expr.contains_aggregate() {
                return Err(OrmError::TypeError(format!(
                    "{alias} is not an aggregate expression"
                )));
            }
            query.add_annotation(expr, alias, true)?;
            added.push(alias.to_string());
        }
        query.get_aggregation(self.ctx.connection(), &added)
    }

    // ── writes ───────────────────────────────────────────────────────

    /// Inserts a new row with the given field values and returns it.
    pub fn create<S, V>(&self, values: impl IntoIterator<Item = (S, V)>) -> OrmResult<ModelInstance>
    where
        S: AsRef<str>,
        V: Into<Value>,
    {
        let mut instance = ModelInstance::new(Rc::clone(self.model()));
        for (name, value) in values {
            instance.set(name.as_ref(), value)?;
        }
        self.ctx.insert(&mut instance)?;
        Ok(instance)
    }

    /// Sets fields on every matched row and returns the number of rows
    /// changed. Values may be literals or expressions over local fields.
    pub fn update<S, E>(&self, values: impl IntoIterator<Item = (S, E)>) -> OrmResult<u64>
    where
        S: AsRef<str>,
        E: Into<Expression>,
    {
        if !self.query.is_filterable() {
            return Err(OrmError::NotSupported(
                "Cannot update a query once a slice has been taken.".into(),
            ));
        }
        let mut query = self.query.chain();
        let meta = Rc::clone(self.model());
        let mut assignments = Vec::new();
        for (name, expr) in values {
            let name = name.as_ref();
            let field = if name == "pk" {
                meta.pk_field()?
            } else {
                meta.get_forward_field(name).ok_or_else(|| {
                    OrmError::FieldError(format!(
                        "{} has no field named '{name}'",
                        meta.model_name
                    ))
                })?
            };
            if !field.is_concrete() {
                return Err(OrmError::FieldError(format!(
                    "Cannot update model field '{name}' (only non-relations and foreign keys permitted)."
                )));
            }
            let value = match expr.into() {
                Expression::Value(v) => Expression::Value(field.get_db_prep_value(v)),
                other => query.resolve_expression(other, false, None, false)?,
            };
            assignments.push((field.column.clone(), value));
        }
        if assignments.is_empty() || query.is_empty() {
            return Ok(0);
        }
        let (sql, params) = SqlCompiler::new(self.backend()).compile_update(&query, &assignments)?;
        tracing::debug!(sql = %sql, params = ?params, "update");
        self.ctx.connection().execute(&sql, &params)
    }

    /// Deletes every matched row and returns the number of rows removed.
    pub fn delete(&self) -> OrmResult<u64> {
        if !self.query.is_filterable() {
            return Err(OrmError::NotSupported(
                "Cannot use 'limit' or 'offset' with delete.".into(),
            ));
        }
        if self.query.is_empty() {
            return Ok(0);
        }
        let mut query = self.query.chain();
        query.clear_ordering(true);
        let (sql, params) = SqlCompiler::new(self.backend()).compile_delete(&query)?;
        tracing::debug!(sql = %sql, params = ?params, "delete");
        self.ctx.connection().execute(&sql, &params)
    }

    /// Querysets are read-only sequences.
    pub fn set_item(&self, _index: usize, _value: Record) -> OrmResult<()> {
        Err(OrmError::NotSupported(
            "QuerySet does not support item assignment.".into(),
        ))
    }

    /// Querysets are read-only sequences.
    pub fn remove_item(&self, _index: usize) -> OrmResult<()> {
        Err(OrmError::NotSupported(
            "QuerySet does not support item deletion.".into(),
        ))
    }

    // ── composition ──────────────────────────────────────────────────

    /// The query as a single-column subquery, for use as a filter value.
    pub fn as_subquery(&self) -> OrmResult<Expression> {
        let query = self.query.chain().into_filter_subquery()?;
        Ok(Expression::Subquery(Box::new(query)))
    }

    /// The SQL and parameters the queryset would run.
    pub fn as_sql(&self) -> OrmResult<(String, Vec<Value>)> {
        self.query.as_sql(self.backend())
    }

    /// The SQL with parameters inlined, for debugging only.
    pub fn sql(&self) -> OrmResult<String> {
        let (sql, params) = self.as_sql()?;
        Ok(interpolate(&sql, &params, self.backend()))
    }
}

fn render_param(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(_) | Value::Int(_) | Value::Float(_) => value.to_string(),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

fn interpolate(sql: &str, params: &[Value], backend: DatabaseBackendType) -> String {
    if backend == DatabaseBackendType::PostgreSQL {
        let mut out = sql.to_string();
        for (i, param) in params.iter().enumerate().rev() {
            out = out.replace(&format!("${}", i + 1), &render_param(param));
        }
        return out;
    }
    let mut out = String::with_capacity(sql.len());
    let mut params = params.iter();
    for ch in sql.chars() {
        if ch == '?' {
            match params.next() {
                Some(param) => out.push_str(&render_param(param)),
                None => out.push(ch),
            }
        } else {
            out.push(ch);
        }
    }
    out
}
