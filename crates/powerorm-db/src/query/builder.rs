//! The query builder.
//!
//! [`Query`] is the mutable description of one SELECT: the alias table
//! (base table plus joins, with a reference count per alias), the WHERE
//! tree, select list, annotations, grouping, ordering, limits and the
//! distinct flag. Querysets never mutate a shared `Query`; they clone it and
//! mutate the clone, so a derived queryset cannot affect the one it came
//! from.
//!
//! Field paths such as `author__profile__city` are resolved hop by hop
//! through the registry's path infos ([`Query::names_to_path`]), turned into
//! joins ([`Query::setup_joins`]) and trimmed where the last hops only
//! reach a column that already lives one table earlier
//! ([`Query::trim_joins`]).

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::rc::Rc;

use once_cell::sync::Lazy;
use powerorm_core::{OrmError, OrmResult};
use regex::Regex;

use super::compiler::SqlCompiler;
use super::expressions::Expression;
use super::joins::{Join, JoinPromoter, JoinType};
use super::lookups::{Lookup, LookupType, Q};
use super::where_node::{Connector, WhereNode};
use crate::connection::{Connection, DatabaseBackendType};
use crate::fields::FieldDef;
use crate::model::{MetaField, ModelMeta};
use crate::registry::Registry;
use crate::related::{PathInfo, TargetField};
use crate::value::Value;

/// Separator between the parts of a field path.
pub const LOOKUP_SEP: &str = "__";

static ORDER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-+]?[.\w]+$").expect("ORDER_PATTERN is a valid regex"));

/// An annotation stored on a query.
#[derive(Debug, Clone)]
pub struct Annotation {
    /// The resolved expression.
    pub expression: Expression,
    /// `true` for aggregates requested through `aggregate()`, which reduce
    /// the whole result to one row.
    pub is_summary: bool,
}

/// How a query is grouped.
#[derive(Debug, Clone, Default)]
pub enum GroupBy {
    /// No GROUP BY.
    #[default]
    None,
    /// Group by everything selected that is not an aggregate.
    Select,
    /// Group by the given expressions.
    Exprs(Vec<Expression>),
}

/// One `order_by` item.
#[derive(Debug, Clone)]
pub enum OrderBy {
    /// A field path or annotation name, `-` prefixed for descending order.
    Field(String),
    /// An expression.
    Expression {
        /// The expression to sort on.
        expression: Expression,
        /// Whether to sort in descending order.
        descending: bool,
    },
}

impl OrderBy {
    /// Ascending order on an expression.
    pub const fn asc(expression: Expression) -> Self {
        Self::Expression {
            expression,
            descending: false,
        }
    }

    /// Descending order on an expression.
    pub const fn desc(expression: Expression) -> Self {
        Self::Expression {
            expression,
            descending: true,
        }
    }
}

impl From<&str> for OrderBy {
    fn from(name: &str) -> Self {
        Self::Field(name.to_string())
    }
}

impl From<String> for OrderBy {
    fn from(name: String) -> Self {
        Self::Field(name)
    }
}

/// The result of resolving a field path against the model graph.
#[derive(Debug, Clone)]
pub struct PathResolution {
    /// One entry per relation hop.
    pub paths: Vec<PathInfo>,
    /// The last field reached. For a path ending on a relation this is the
    /// foreign key the last hop follows.
    pub final_field: FieldDef,
    /// The columns the path points at.
    pub targets: Vec<TargetField>,
    /// The model the path ends on.
    pub meta: Rc<ModelMeta>,
    /// Trailing names that are not fields (lookups).
    pub rest: Vec<String>,
}

/// The joins created for a field path.
#[derive(Debug, Clone)]
pub struct JoinInfo {
    /// See [`PathResolution::final_field`].
    pub final_field: FieldDef,
    /// The columns the path points at, on the last alias.
    pub targets: Vec<TargetField>,
    /// The model the path ends on.
    pub meta: Rc<ModelMeta>,
    /// The aliases of the path, base alias first.
    pub joins: Vec<String>,
    /// One entry per relation hop.
    pub paths: Vec<PathInfo>,
}

/// What to run to compute `aggregate()` results.
#[derive(Debug, Clone)]
pub enum AggregationPlan {
    /// The aggregates are selected by the query itself.
    Direct(Query),
    /// The query is wrapped: `SELECT <aggregates> FROM (<inner>) subquery`.
    Wrapped(AggregateQuery),
}

/// An outer query computing aggregates over a subquery.
#[derive(Debug, Clone)]
pub struct AggregateQuery {
    /// The wrapped query.
    pub inner: Query,
    /// The aggregates, referring to the inner select by alias.
    pub annotations: Vec<(String, Expression)>,
}

impl AggregationPlan {
    /// Compiles the plan.
    pub fn as_sql(&self, backend: DatabaseBackendType) -> OrmResult<(String, Vec<Value>)> {
        let compiler = SqlCompiler::new(backend);
        match self {
            Self::Direct(query) => compiler.compile_select(query),
            Self::Wrapped(aggregate) => compiler.compile_aggregate(aggregate),
        }
    }

    /// The aggregate aliases, in select order.
    pub fn aliases(&self) -> Vec<String> {
        match self {
            Self::Direct(query) => query
                .annotation_select()
                .into_iter()
                .map(|(alias, _)| alias.to_string())
                .collect(),
            Self::Wrapped(aggregate) => aggregate
                .annotations
                .iter()
                .map(|(alias, _)| alias.clone())
                .collect(),
        }
    }
}

enum Step {
    Relation(Vec<PathInfo>),
    Local(FieldDef),
}

/// A SELECT query under construction.
#[derive(Debug, Clone)]
pub struct Query {
    registry: Rc<Registry>,
    meta: Rc<ModelMeta>,
    pub(crate) alias_map: HashMap<String, Join>,
    pub(crate) alias_order: Vec<String>,
    pub(crate) alias_refcount: HashMap<String, usize>,
    table_map: HashMap<String, Vec<String>>,
    alias_prefix: char,
    used_aliases: HashSet<String>,
    pub(crate) where_: WhereNode,
    pub(crate) select: Vec<Expression>,
    pub(crate) default_cols: bool,
    pub(crate) values_select: Vec<String>,
    annotations: Vec<(String, Annotation)>,
    annotation_select_mask: Option<Vec<String>>,
    pub(crate) group_by: GroupBy,
    order_by: Vec<OrderBy>,
    default_ordering: bool,
    pub(crate) low_mark: usize,
    pub(crate) high_mark: Option<usize>,
    pub(crate) distinct: bool,
    distinct_fields: Vec<String>,
}

impl Query {
    /// A query selecting every row of `meta`.
    pub fn new(registry: Rc<Registry>, meta: Rc<ModelMeta>) -> Self {
        Self {
            registry,
            meta,
            alias_map: HashMap::new(),
            alias_order: Vec::new(),
            alias_refcount: HashMap::new(),
            table_map: HashMap::new(),
            alias_prefix: 'T',
            used_aliases: HashSet::new(),
            where_: WhereNode::default(),
            select: Vec::new(),
            default_cols: true,
            values_select: Vec::new(),
            annotations: Vec::new(),
            annotation_select_mask: None,
            group_by: GroupBy::None,
            order_by: Vec::new(),
            default_ordering: true,
            low_mark: 0,
            high_mark: None,
            distinct: false,
            distinct_fields: Vec::new(),
        }
    }

    /// A copy for a derived queryset. Multi-valued joins made by earlier
    /// `filter()` calls are not reused by later ones.
    #[must_use]
    pub fn chain(&self) -> Self {
        let mut clone = self.clone();
        clone.used_aliases.clear();
        clone
    }

    /// The model queried.
    pub fn model(&self) -> &Rc<ModelMeta> {
        &self.meta
    }

    /// The registry the query resolves fields against.
    pub fn registry(&self) -> &Rc<Registry> {
        &self.registry
    }

    // ── alias table ──────────────────────────────────────────────────

    /// The aliases in creation order, base alias first.
    pub fn aliases(&self) -> &[String] {
        &self.alias_order
    }

    /// The join registered under `alias`.
    pub fn alias_join(&self, alias: &str) -> Option<&Join> {
        self.alias_map.get(alias)
    }

    /// The reference count of `alias`.
    pub fn refcount(&self, alias: &str) -> usize {
        self.alias_refcount.get(alias).copied().unwrap_or(0)
    }

    /// Aliases currently used by the query (reference count above zero),
    /// excluding the base table.
    pub fn active_joins(&self) -> Vec<&Join> {
        self.alias_order
            .iter()
            .skip(1)
            .filter(|a| self.refcount(a) > 0)
            .filter_map(|a| self.alias_map.get(a))
            .collect()
    }

    fn ref_alias(&mut self, alias: &str) {
        *self.alias_refcount.entry(alias.to_string()).or_insert(0) += 1;
    }

    fn unref_alias(&mut self, alias: &str) {
        if let Some(count) = self.alias_refcount.get_mut(alias) {
            *count = count.saturating_sub(1);
        }
    }

    /// Allocates a new alias for `table_name`: the table name itself the
    /// first time, `T<n>` afterwards.
    fn table_alias(&mut self, table_name: &str) -> String {
        let alias = match self.table_map.get_mut(table_name) {
            Some(aliases) => {
                let alias = format!("{}{}", self.alias_prefix, self.alias_map.len() + 1);
                aliases.push(alias.clone());
                alias
            }
            None => {
                self.table_map
                    .insert(table_name.to_string(), vec![table_name.to_string()]);
                table_name.to_string()
            }
        };
        self.alias_refcount.insert(alias.clone(), 1);
        self.alias_order.push(alias.clone());
        alias
    }

    /// The base table alias, creating it on first use. Each call counts as
    /// a reference.
    pub fn get_initial_alias(&mut self) -> String {
        if let Some(alias) = self.alias_order.first().cloned() {
            self.ref_alias(&alias);
            alias
        } else {
            self.join(Join::base(self.meta.db_table.clone()), None)
        }
    }

    /// Adds `join` to the alias table, or reuses an equal join whose alias
    /// is in `reuse` (any equal join when `reuse` is `None`). Returns the
    /// alias.
    ///
    /// A new join is LEFT OUTER when its parent is LEFT OUTER or when it is
    /// nullable, INNER otherwise.
    pub fn join(&mut self, mut join: Join, reuse: Option<&HashSet<String>>) -> String {
        let existing = self
            .alias_order
            .iter()
            .filter(|a| reuse.map_or(true, |r| r.contains(*a)))
            .find(|a| self.alias_map.get(*a).is_some_and(|j| j.equals(&join)))
            .cloned();
        if let Some(alias) = existing {
            self.ref_alias(&alias);
            return alias;
        }

        let alias = self.table_alias(&join.table_name);
        if join.join_type.is_some() {
            let parent_louter = join
                .parent_alias
                .as_ref()
                .and_then(|p| self.alias_map.get(p))
                .is_some_and(Join::is_louter);
            join.join_type = Some(if parent_louter || join.nullable {
                JoinType::LeftOuter
            } else {
                JoinType::Inner
            });
        }
        join.table_alias = alias.clone();
        tracing::debug!(
            alias = %alias,
            table = %join.table_name,
            join_type = ?join.join_type,
            "allocated join alias"
        );
        self.alias_map.insert(alias.clone(), join);
        alias
    }

    /// Changes INNER joins to LEFT OUTER where the join is nullable or its
    /// parent is LEFT OUTER, then re-examines the joins hanging off every
    /// promoted alias.
    pub fn promote_joins(&mut self, aliases: impl IntoIterator<Item = String>) {
        let mut queue: VecDeque<String> = aliases.into_iter().collect();
        while let Some(alias) = queue.pop_front() {
            let Some(join) = self.alias_map.get(&alias) else {
                continue;
            };
            if join.is_base() {
                continue;
            }
            let parent_louter = join
                .parent_alias
                .as_ref()
                .and_then(|p| self.alias_map.get(p))
                .is_some_and(Join::is_louter);
            if (join.nullable || parent_louter) && !join.is_louter() {
                if let Some(join) = self.alias_map.get_mut(&alias) {
                    join.join_type = Some(JoinType::LeftOuter);
                }
                tracing::debug!(alias = %alias, "promoted join to LEFT OUTER");
                for child in &self.alias_order {
                    let is_child = self
                        .alias_map
                        .get(child)
                        .is_some_and(|j| j.parent_alias.as_deref() == Some(alias.as_str()));
                    if is_child && !queue.contains(child) {
                        queue.push_back(child.clone());
                    }
                }
            }
        }
    }

    /// Changes LEFT OUTER joins to INNER. The parent of a demoted join is
    /// demoted in turn only while it is INNER.
    pub fn demote_joins(&mut self, aliases: impl IntoIterator<Item = String>) {
        let mut queue: VecDeque<String> = aliases.into_iter().collect();
        while let Some(alias) = queue.pop_front() {
            let Some(join) = self.alias_map.get_mut(&alias) else {
                continue;
            };
            if !join.is_louter() {
                continue;
            }
            join.join_type = Some(JoinType::Inner);
            tracing::debug!(alias = %alias, "demoted join to INNER");
            if let Some(parent) = join.parent_alias.clone() {
                let parent_inner = self
                    .alias_map
                    .get(&parent)
                    .is_some_and(|p| p.join_type == Some(JoinType::Inner));
                if parent_inner {
                    queue.push_back(parent);
                }
            }
        }
    }

    // ── field path resolution ────────────────────────────────────────

    fn cannot_resolve(&self, meta: &ModelMeta, name: &str, with_annotations: bool) -> OrmError {
        let mut choices = meta.field_choices();
        if with_annotations {
            choices.extend(self.annotation_select().into_iter().map(|(a, _)| a.to_string()));
            choices.sort();
        }
        OrmError::FieldError(format!(
            "Cannot resolve keyword '{name}' into field. Choices are: {}",
            choices.join(", ")
        ))
    }

    /// Walks `names` through the model graph starting at `meta`.
    ///
    /// A relation segment extends the path, a local field ends it. An
    /// unknown first segment is an error; an unknown later segment ends the
    /// walk (the rest are lookups) unless `fail_on_missing` is set.
    pub fn names_to_path(
        &self,
        names: &[String],
        meta: &Rc<ModelMeta>,
        fail_on_missing: bool,
    ) -> OrmResult<PathResolution> {
        let mut meta = Rc::clone(meta);
        let mut paths: Vec<PathInfo> = Vec::new();
        let mut final_field: Option<FieldDef> = None;
        let mut targets: Vec<TargetField> = Vec::new();
        let mut consumed = 0;

        for (pos, raw) in names.iter().enumerate() {
            let name = if raw == "pk" {
                meta.pk_field()?.name.clone()
            } else {
                raw.clone()
            };
            let field = meta
                .get_field(&name)
                .or_else(|| meta.get_forward_field(&name).map(MetaField::Forward));
            let step = match field {
                None => None,
                Some(MetaField::Forward(f)) if !f.is_relation() => Some(Step::Local(f.clone())),
                Some(field) => {
                    let infos = self.registry.path_infos(&meta, field)?.ok_or_else(|| {
                        OrmError::FieldError(format!("Field '{name}' does not generate a join"))
                    })?;
                    Some(Step::Relation(infos))
                }
            };

            match step {
                None => {
                    if pos == 0 || fail_on_missing {
                        return Err(self.cannot_resolve(&meta, raw, pos == 0));
                    }
                    break;
                }
                Some(Step::Relation(infos)) => {
                    let last = infos.last().ok_or_else(|| {
                        OrmError::FieldError(format!("Field '{name}' has an empty path"))
                    })?;
                    let owner = self.registry.get_model(&last.join_field.model)?;
                    final_field = Some(owner.field_or_err(&last.join_field.name)?.clone());
                    targets.clone_from(&last.target_fields);
                    meta = self.registry.get_model(&last.to_model)?;
                    paths.extend(infos);
                    consumed = pos + 1;
                }
                Some(Step::Local(field)) => {
                    targets = vec![TargetField::of(&meta, &field)];
                    if fail_on_missing && pos + 1 != names.len() {
                        return Err(OrmError::FieldError(format!(
                            "Cannot resolve keyword '{}' into field. Join on '{name}' not permitted.",
                            names[pos + 1]
                        )));
                    }
                    final_field = Some(field);
                    consumed = pos + 1;
                    break;
                }
            }
        }

        let final_field = final_field.ok_or_else(|| {
            OrmError::FieldError(format!("Cannot resolve '{}' into a field", names.join(LOOKUP_SEP)))
        })?;
        Ok(PathResolution {
            paths,
            final_field,
            targets,
            meta,
            rest: names[consumed..].to_vec(),
        })
    }

    /// Creates (or reuses) one join per relation hop of `names`, starting at
    /// `alias`.
    ///
    /// A hop is nullable when it follows a key backwards or its key allows
    /// NULL. Multi-valued hops only reuse aliases from `can_reuse`;
    /// single-valued hops reuse any equal join.
    pub fn setup_joins(
        &mut self,
        names: &[String],
        meta: &Rc<ModelMeta>,
        alias: &str,
        can_reuse: Option<&HashSet<String>>,
    ) -> OrmResult<JoinInfo> {
        let resolution = self.names_to_path(names, meta, true)?;
        let mut alias = alias.to_string();
        let mut joins = vec![alias.clone()];
        for path in &resolution.paths {
            let target = self.registry.path_target(path)?;
            let nullable = if path.direct {
                path.join_field.null
            } else {
                true
            };
            let join = Join::new(
                target.db_table.clone(),
                alias.clone(),
                path.join_field.clone(),
                nullable,
            );
            let reuse = if path.m2m { can_reuse } else { None };
            alias = self.join(join, reuse);
            joins.push(alias.clone());
        }
        Ok(JoinInfo {
            final_field: resolution.final_field,
            targets: resolution.targets,
            meta: resolution.meta,
            joins,
            paths: resolution.paths,
        })
    }

    /// Drops trailing joins whose target columns are available on the
    /// previous alias through the foreign key itself (`author__id` becomes
    /// `author_id`).
    ///
    /// Walks the path backwards and stops at the first reverse hop, at the
    /// base alias, or when the targets are not all columns the hop's key
    /// points at. Returns the remapped targets, the alias they live on and
    /// the remaining joins. Trimming an already trimmed list changes nothing.
    pub fn trim_joins(
        &mut self,
        targets: Vec<TargetField>,
        joins: Vec<String>,
        paths: &[PathInfo],
    ) -> (Vec<TargetField>, String, Vec<String>) {
        let mut targets = targets;
        let mut joins = joins;
        for info in paths.iter().rev() {
            if joins.len() <= 1 || !info.direct {
                break;
            }
            let related = &info.join_field.related_fields;
            let covered = targets
                .iter()
                .all(|t| related.iter().any(|(_, foreign)| foreign.column == t.column));
            if !covered {
                break;
            }
            targets = targets
                .iter()
                .filter_map(|t| {
                    related
                        .iter()
                        .find(|(_, foreign)| foreign.column == t.column)
                        .map(|(local, _)| local.clone())
                })
                .collect();
            if let Some(alias) = joins.pop() {
                self.unref_alias(&alias);
            }
        }
        let alias = joins.last().cloned().unwrap_or_default();
        (targets, alias, joins)
    }

    // ── filters ──────────────────────────────────────────────────────

    /// Adds a Q tree to the WHERE clause, with join promotion.
    ///
    /// Joins that were INNER before the call stay INNER.
    pub fn add_q(&mut self, q: &Q) -> OrmResult<()> {
        let existing_inner: Vec<String> = self
            .alias_order
            .iter()
            .filter(|a| {
                self.alias_map
                    .get(*a)
                    .is_some_and(|j| j.join_type == Some(JoinType::Inner))
            })
            .cloned()
            .collect();
        let mut used = std::mem::take(&mut self.used_aliases);
        let result = self.add_q_node(q, &mut used, false, false, true);
        self.used_aliases = used;
        let (clause, _) = result?;
        if !clause.is_empty() {
            self.where_.add(clause, Connector::And);
        }
        self.demote_joins(existing_inner);
        Ok(())
    }

    fn add_q_node(
        &mut self,
        q: &Q,
        used_aliases: &mut HashSet<String>,
        branch_negated: bool,
        current_negated: bool,
        allow_joins: bool,
    ) -> OrmResult<(WhereNode, Vec<String>)> {
        let (connector, negated, children): (Connector, bool, Vec<&Q>) = match q {
            Q::And(children) => (Connector::And, false, children.iter().collect()),
            Q::Or(children) => (Connector::Or, false, children.iter().collect()),
            Q::Not(inner) => (Connector::And, true, vec![inner.as_ref()]),
            Q::Filter { .. } => (Connector::And, false, vec![q]),
        };
        let current_negated = current_negated ^ negated;
        let branch_negated = branch_negated || negated;

        let mut target = WhereNode::new(connector, negated);
        let mut promoter = JoinPromoter::new(connector, children.len(), current_negated);
        for child in children {
            let (clause, needed_inner) = match child {
                Q::Filter { field, value } => self.build_filter(
                    field,
                    value,
                    branch_negated,
                    current_negated,
                    used_aliases,
                    allow_joins,
                )?,
                node => self.add_q_node(
                    node,
                    used_aliases,
                    branch_negated,
                    current_negated,
                    allow_joins,
                )?,
            };
            promoter.add_votes(needed_inner);
            if !clause.is_empty() {
                target.add(clause, connector);
            }
        }
        let needed_inner = promoter.update_join_types(self);
        Ok((target, needed_inner))
    }

    /// Splits `path` into field parts and lookup names. A path starting with
    /// an annotation name resolves to that annotation.
    fn solve_lookup_type(
        &self,
        path: &str,
    ) -> OrmResult<(Vec<String>, Vec<String>, Option<Expression>)> {
        let names: Vec<String> = path.split(LOOKUP_SEP).map(str::to_string).collect();
        for n in 1..=names.len() {
            let prefix = names[..n].join(LOOKUP_SEP);
            if let Some(annotation) = self.annotation(&prefix) {
                return Ok((
                    names[n..].to_vec(),
                    Vec::new(),
                    Some(annotation.expression.clone()),
                ));
            }
        }
        let resolution = self.names_to_path(&names, &self.meta, false)?;
        let field_parts = names.len() - resolution.rest.len();
        Ok((resolution.rest, names[..field_parts].to_vec(), None))
    }

    /// Turns `value` into a right-hand side: `None` with `exact` becomes
    /// `isnull=True`, expressions are resolved against this query. Returns
    /// the value, the lookups and the aliases the value's expression used.
    fn prepare_lookup_value(
        &mut self,
        value: &Expression,
        mut lookups: Vec<String>,
        can_reuse: &mut HashSet<String>,
        allow_joins: bool,
    ) -> OrmResult<(Expression, Vec<String>, Vec<String>)> {
        if lookups.is_empty() {
            lookups.push("exact".to_string());
        }
        if value.is_null_literal() {
            match lookups.last_mut() {
                Some(last) if last == "exact" => *last = "isnull".to_string(),
                _ => {
                    return Err(OrmError::ValueError(
                        "Cannot use None as a query value".into(),
                    ))
                }
            }
            return Ok((Expression::Value(Value::Bool(true)), lookups, Vec::new()));
        }
        match value {
            Expression::Value(_) => Ok((value.clone(), lookups, Vec::new())),
            Expression::Subquery(query) => {
                let query = query.as_ref().clone().into_filter_subquery()?;
                Ok((Expression::Subquery(Box::new(query)), lookups, Vec::new()))
            }
            _ => {
                let before = self.alias_refcount.clone();
                let resolved =
                    self.resolve_expression(value.clone(), allow_joins, Some(can_reuse), false)?;
                let used = self
                    .alias_refcount
                    .iter()
                    .filter(|(alias, count)| **count > before.get(*alias).copied().unwrap_or(0))
                    .map(|(alias, _)| alias.clone())
                    .collect();
                Ok((resolved, lookups, used))
            }
        }
    }

    fn prep_rhs(kind: LookupType, rhs: Expression, field: Option<&FieldDef>) -> Expression {
        let Some(field) = field else {
            return rhs;
        };
        match (kind, rhs) {
            (LookupType::IsNull, rhs) => rhs,
            (k, rhs) if k.is_pattern() => rhs,
            (_, Expression::Value(Value::List(values))) => Expression::Value(Value::List(
                values
                    .into_iter()
                    .map(|v| field.get_db_prep_value(v))
                    .collect(),
            )),
            (_, Expression::Value(v)) => Expression::Value(field.get_db_prep_value(v)),
            (_, other) => other,
        }
    }

    /// Builds the lookup named by `lookups` between `lhs` and `rhs`.
    fn build_lookup(
        lookups: &[String],
        lhs: Expression,
        rhs: Expression,
        field: Option<&FieldDef>,
        field_name: &str,
        is_relation: bool,
    ) -> OrmResult<Lookup> {
        let name = lookups.first().map_or("exact", String::as_str);
        let kind = LookupType::from_name(name)
            .filter(|_| lookups.len() <= 1)
            .ok_or_else(|| {
                OrmError::FieldError(format!(
                    "Unsupported lookup '{name}' for field '{field_name}'"
                ))
            })?;
        if is_relation && !kind.allowed_on_relation() {
            return Err(OrmError::FieldError(format!(
                "Related Field got invalid lookup: {name}"
            )));
        }
        Lookup::new(lhs, kind, Self::prep_rhs(kind, rhs, field))
    }

    /// Builds the WHERE clause for one `path__lookup = value` condition.
    ///
    /// Returns the clause and the aliases that must stay INNER joins for it
    /// to hold. Under negation, a nullable column also gets an `IS NOT NULL`
    /// guard, and no alias is required to be INNER.
    pub fn build_filter(
        &mut self,
        path: &str,
        value: &Expression,
        branch_negated: bool,
        current_negated: bool,
        can_reuse: &mut HashSet<String>,
        allow_joins: bool,
    ) -> OrmResult<(WhereNode, Vec<String>)> {
        if path.is_empty() {
            return Err(OrmError::FieldError("Cannot parse keyword query ''".into()));
        }
        let (lookups, parts, reffed) = self.solve_lookup_type(path)?;
        if !allow_joins && parts.len() > 1 {
            return Err(OrmError::FieldError(
                "Joined field references are not permitted in this query".into(),
            ));
        }

        if branch_negated && reffed.is_none() {
            let meta = Rc::clone(&self.meta);
            let resolution = self.names_to_path(&parts, &meta, true)?;
            if resolution.paths.iter().any(|p| p.m2m) {
                return self.split_exclude(path, value, can_reuse);
            }
        }

        let (value, lookups, used_joins) =
            self.prepare_lookup_value(value, lookups, can_reuse, allow_joins)?;

        let mut clause = WhereNode::default();
        if let Some(expression) = reffed {
            let lookup = Self::build_lookup(&lookups, expression, value, None, path, false)?;
            clause.add(WhereNode::Lookup(lookup), Connector::And);
            return Ok((clause, Vec::new()));
        }

        let alias = self.get_initial_alias();
        let meta = Rc::clone(&self.meta);
        let info = self.setup_joins(&parts, &meta, &alias, Some(can_reuse))?;
        can_reuse.extend(info.joins.iter().cloned());
        let mut used: Vec<String> = used_joins;
        for alias in &info.joins {
            if !used.contains(alias) {
                used.push(alias.clone());
            }
        }

        let (targets, alias, join_list) =
            self.trim_joins(info.targets.clone(), info.joins.clone(), &info.paths);
        let target = targets.first().cloned().ok_or_else(|| {
            OrmError::FieldError(format!("'{path}' does not resolve to a column"))
        })?;

        let is_relation = info.final_field.is_relation();
        let lookup = Self::build_lookup(
            &lookups,
            Expression::col(&alias, &target.column),
            value,
            Some(&info.final_field),
            &info.final_field.name,
            is_relation,
        )?;
        let kind = lookup.kind;
        let isnull = lookup.isnull_value();
        clause.add(WhereNode::Lookup(lookup), Connector::And);

        let mut require_outer = kind == LookupType::IsNull && isnull == Some(true) && !current_negated;
        if current_negated && (kind != LookupType::IsNull || isnull == Some(false)) {
            require_outer = true;
            let last_louter = join_list
                .last()
                .and_then(|a| self.alias_map.get(a))
                .is_some_and(Join::is_louter);
            if kind != LookupType::IsNull && (target.null || last_louter) {
                // NOT (col = x AND col IS NOT NULL) keeps rows where col is NULL.
                clause.add(
                    WhereNode::Lookup(Lookup::is_null(
                        Expression::col(&alias, &target.column),
                        false,
                    )),
                    Connector::And,
                );
            }
        }
        Ok((clause, if require_outer { Vec::new() } else { used }))
    }

    /// A negated condition across a multi-valued relation becomes
    /// `pk NOT IN (SELECT pk ... WHERE condition)`, so that one matching
    /// related row excludes the parent row.
    fn split_exclude(
        &mut self,
        path: &str,
        value: &Expression,
        can_reuse: &mut HashSet<String>,
    ) -> OrmResult<(WhereNode, Vec<String>)> {
        let mut inner = Self::new(Rc::clone(&self.registry), Rc::clone(&self.meta));
        inner.add_q(&Q::new(path, value.clone()))?;
        inner.clear_ordering(true);
        let subquery = Expression::Subquery(Box::new(inner));
        self.build_filter("pk__in", &subquery, true, true, can_reuse, true)
    }

    /// Marks the query as matching nothing.
    pub fn set_empty(&mut self) {
        self.where_.add(WhereNode::Nothing, Connector::And);
    }

    /// Returns `true` if the query can return no rows.
    pub fn is_empty(&self) -> bool {
        match &self.where_ {
            WhereNode::Nothing => true,
            WhereNode::Node {
                connector: Connector::And,
                negated: false,
                children,
            } => children.iter().any(|c| matches!(c, WhereNode::Nothing)),
            _ => false,
        }
    }

    /// Returns `true` while no slice has been taken.
    pub const fn is_filterable(&self) -> bool {
        self.low_mark == 0 && self.high_mark.is_none()
    }

    // ── expressions ──────────────────────────────────────────────────

    /// Resolves field references in `expr` against this query, adding joins
    /// as needed.
    pub fn resolve_expression(
        &mut self,
        expr: Expression,
        allow_joins: bool,
        mut reuse: Option<&mut HashSet<String>>,
        summarize: bool,
    ) -> OrmResult<Expression> {
        match expr {
            Expression::F(name) => self.resolve_ref(&name, allow_joins, reuse, summarize),
            Expression::Aggregate { ref source, func, .. } if !summarize => {
                if source.contains_aggregate() || self.refers_to_aggregate(source) {
                    let name = match source.as_ref() {
                        Expression::F(name) => name.clone(),
                        other => other.to_string(),
                    };
                    return Err(OrmError::FieldError(format!(
                        "Cannot compute {}('{name}'): '{name}' is an aggregate",
                        func.display_name()
                    )));
                }
                expr.map_sources(|e| {
                    self.resolve_expression(e, allow_joins, reuse.as_deref_mut(), summarize)
                })
            }
            other => other.map_sources(|e| {
                self.resolve_expression(e, allow_joins, reuse.as_deref_mut(), summarize)
            }),
        }
    }

    fn refers_to_aggregate(&self, expr: &Expression) -> bool {
        match expr {
            Expression::F(name) => self
                .annotation(name)
                .is_some_and(|a| a.expression.contains_aggregate()),
            other => other.sources().into_iter().any(|e| self.refers_to_aggregate(e)),
        }
    }

    /// Resolves a field path or annotation name.
    ///
    /// Inside `aggregate()` (`summarize`) an annotation is referenced by its
    /// alias; otherwise its expression is inlined.
    pub fn resolve_ref(
        &mut self,
        name: &str,
        allow_joins: bool,
        reuse: Option<&mut HashSet<String>>,
        summarize: bool,
    ) -> OrmResult<Expression> {
        if !allow_joins && name.contains(LOOKUP_SEP) {
            return Err(OrmError::FieldError(
                "Joined field references are not permitted in this query".into(),
            ));
        }
        if let Some(annotation) = self.annotation(name) {
            return Ok(if summarize {
                Expression::Ref(name.to_string())
            } else {
                annotation.expression.clone()
            });
        }

        let parts: Vec<String> = name.split(LOOKUP_SEP).map(str::to_string).collect();
        let alias = self.get_initial_alias();
        let meta = Rc::clone(&self.meta);
        let info = self.setup_joins(&parts, &meta, &alias, reuse.as_deref())?;
        let (targets, alias, joins) = self.trim_joins(info.targets, info.joins, &info.paths);
        if targets.len() > 1 {
            return Err(OrmError::FieldError(
                "Referencing multicolumn fields with F() objects isn't supported".into(),
            ));
        }
        if let Some(reuse) = reuse {
            reuse.extend(joins);
        }
        let target = targets.first().ok_or_else(|| {
            OrmError::FieldError(format!("'{name}' does not resolve to a column"))
        })?;
        Ok(Expression::col(alias, &target.column))
    }

    // ── select list and annotations ──────────────────────────────────

    /// Adds the columns of `names` to the select list.
    pub fn add_fields(&mut self, names: &[String], allow_m2m: bool) -> OrmResult<()> {
        let alias = self.get_initial_alias();
        let meta = Rc::clone(&self.meta);
        for name in names {
            let parts: Vec<String> = name.split(LOOKUP_SEP).map(str::to_string).collect();
            if !allow_m2m {
                let resolution = self.names_to_path(&parts, &meta, true)?;
                if resolution.paths.iter().any(|p| p.m2m) {
                    return Err(OrmError::FieldError(format!("Invalid field name: '{name}'")));
                }
            }
            let info = self.setup_joins(&parts, &meta, &alias, None)?;
            let (targets, final_alias, _) = self.trim_joins(info.targets, info.joins, &info.paths);
            for target in targets {
                self.select.push(Expression::col(&final_alias, &target.column));
            }
        }
        Ok(())
    }

    /// Restricts the select list to `fields` (field paths or annotation
    /// names). No fields selects every concrete column.
    pub fn set_values(&mut self, fields: &[String]) -> OrmResult<()> {
        if matches!(self.group_by, GroupBy::Select) {
            let cols = self.group_by_expressions();
            self.group_by = GroupBy::Exprs(cols);
        }
        self.clear_select_fields();

        let field_names: Vec<String> = if fields.is_empty() {
            self.meta.concrete_fields().map(FieldDef::attname).collect()
        } else {
            let (annotation_names, field_names): (Vec<String>, Vec<String>) = fields
                .iter()
                .cloned()
                .partition(|f| self.annotation(f).is_some());
            self.set_annotation_mask(Some(annotation_names));
            field_names
        };
        self.default_cols = false;
        self.values_select.clone_from(&field_names);
        self.add_fields(&field_names, true)
    }

    /// Clears the explicit select list.
    pub fn clear_select_fields(&mut self) {
        self.select.clear();
        self.values_select.clear();
    }

    /// Clears the whole select clause, annotations included.
    pub fn clear_select_clause(&mut self) {
        self.clear_select_fields();
        self.default_cols = false;
        self.set_annotation_mask(Some(Vec::new()));
    }

    fn annotation(&self, alias: &str) -> Option<&Annotation> {
        self.annotations
            .iter()
            .find(|(a, _)| a == alias)
            .map(|(_, annotation)| annotation)
    }

    /// Every annotation, selected or not.
    pub fn annotations(&self) -> &[(String, Annotation)] {
        &self.annotations
    }

    /// The annotations that appear in the select list, in insertion order.
    pub fn annotation_select(&self) -> Vec<(&str, &Annotation)> {
        self.annotations
            .iter()
            .filter(|(alias, _)| {
                self.annotation_select_mask
                    .as_ref()
                    .map_or(true, |mask| mask.contains(alias))
            })
            .map(|(alias, annotation)| (alias.as_str(), annotation))
            .collect()
    }

    /// Limits the selected annotations to `names` (`None` selects all).
    pub fn set_annotation_mask(&mut self, names: Option<Vec<String>>) {
        self.annotation_select_mask = names;
    }

    fn append_annotation_mask(&mut self, names: &[String]) {
        if let Some(mask) = self.annotation_select_mask.as_mut() {
            for name in names {
                if !mask.contains(name) {
                    mask.push(name.clone());
                }
            }
        }
    }

    /// Resolves `expr` and stores it as annotation `alias`.
    pub fn add_annotation(&mut self, expr: Expression, alias: &str, is_summary: bool) -> OrmResult<()> {
        let expression = self.resolve_expression(expr, true, None, is_summary)?;
        self.append_annotation_mask(&[alias.to_string()]);
        let annotation = Annotation {
            expression,
            is_summary,
        };
        if let Some(slot) = self.annotations.iter_mut().find(|(a, _)| a == alias) {
            slot.1 = annotation;
        } else {
            self.annotations.push((alias.to_string(), annotation));
        }
        Ok(())
    }

    /// Groups by everything selected that is not an aggregate.
    pub fn set_group_by(&mut self) {
        self.group_by = GroupBy::Select;
    }

    /// The columns currently selected, default columns expanded.
    pub(crate) fn select_columns(&mut self) -> Vec<Expression> {
        if self.default_cols {
            let alias = self.get_initial_alias();
            self.meta
                .concrete_fields()
                .map(|f| Expression::col(&alias, &f.column))
                .collect()
        } else {
            self.select.clone()
        }
    }

    /// The GROUP BY expressions, before ordering columns are added.
    pub(crate) fn group_by_expressions(&mut self) -> Vec<Expression> {
        match &self.group_by {
            GroupBy::None => Vec::new(),
            GroupBy::Exprs(exprs) => exprs.clone(),
            GroupBy::Select => {
                let mut cols = self.select_columns();
                for (_, annotation) in self.annotation_select() {
                    cols.extend(annotation.expression.group_by_cols());
                }
                cols
            }
        }
    }

    // ── ordering, distinct and limits ────────────────────────────────

    /// Appends to the ordering. An empty list disables default ordering.
    pub fn add_ordering(&mut self, ordering: Vec<OrderBy>) -> OrmResult<()> {
        let mut errors = Vec::new();
        for item in &ordering {
            match item {
                OrderBy::Field(name) => {
                    if !ORDER_PATTERN.is_match(name) {
                        errors.push(format!("'{name}'"));
                        continue;
                    }
                    let bare = name.trim_start_matches(['-', '+']);
                    if !bare.contains('.') && self.annotation(bare).is_none() {
                        let parts: Vec<String> =
                            bare.split(LOOKUP_SEP).map(str::to_string).collect();
                        self.names_to_path(&parts, &self.meta, true)?;
                    }
                }
                OrderBy::Expression { expression, .. } => {
                    if expression.contains_aggregate() {
                        return Err(OrmError::FieldError(format!(
                            "Using an aggregate in order_by() without also including it in annotate() is not allowed: {expression}"
                        )));
                    }
                }
            }
        }
        if !errors.is_empty() {
            return Err(OrmError::FieldError(format!(
                "Invalid order_by arguments: [{}]",
                errors.join(", ")
            )));
        }
        if ordering.is_empty() {
            self.default_ordering = false;
        } else {
            self.order_by.extend(ordering);
        }
        Ok(())
    }

    /// Removes explicit ordering; `force_empty` also disables the model's
    /// default ordering.
    pub fn clear_ordering(&mut self, force_empty: bool) {
        self.order_by.clear();
        if force_empty {
            self.default_ordering = false;
        }
    }

    /// Returns `true` if the query will be ordered.
    pub fn is_ordered(&self) -> bool {
        !self.order_by.is_empty() || (self.default_ordering && !self.meta.ordering.is_empty())
    }

    /// The ordering as resolved expressions with their direction. May add
    /// joins.
    pub(crate) fn ordering_expressions(&mut self) -> OrmResult<Vec<(Expression, bool)>> {
        let items: Vec<OrderBy> = if !self.order_by.is_empty() || !self.default_ordering {
            self.order_by.clone()
        } else {
            self.meta.ordering.iter().cloned().map(OrderBy::Field).collect()
        };

        let mut result = Vec::new();
        let mut seen = HashSet::new();
        for item in items {
            match item {
                OrderBy::Expression {
                    expression,
                    descending,
                } => {
                    let resolved = self.resolve_expression(expression, true, None, false)?;
                    result.push((resolved, descending));
                }
                OrderBy::Field(name) => {
                    let (col, descending) = split_direction(&name);
                    if let Some((table, column)) = col.split_once('.') {
                        result.push((Expression::col(table, column), descending));
                    } else if self.annotation_select().iter().any(|(a, _)| *a == col) {
                        result.push((Expression::Ref(col.to_string()), descending));
                    } else if let Some(annotation) = self.annotation(col) {
                        result.push((annotation.expression.clone(), descending));
                    } else {
                        self.find_ordering_name(col, descending, &mut result, &mut seen)?;
                    }
                }
            }
        }
        Ok(result)
    }

    /// Ordering by a relation orders by the related model's default
    /// ordering, when it has one.
    fn find_ordering_name(
        &mut self,
        name: &str,
        descending: bool,
        out: &mut Vec<(Expression, bool)>,
        seen: &mut HashSet<(String, Vec<String>)>,
    ) -> OrmResult<()> {
        let parts: Vec<String> = name.split(LOOKUP_SEP).map(str::to_string).collect();
        let alias = self.get_initial_alias();
        let meta = Rc::clone(&self.meta);
        let info = self.setup_joins(&parts, &meta, &alias, None)?;

        let last = parts.last().map_or("", String::as_str);
        let names_column = last == "pk" || last == info.final_field.attname();
        if info.final_field.is_relation() && !names_column && !info.meta.ordering.is_empty() {
            if !seen.insert((info.meta.label_lower(), info.joins.clone())) {
                return Err(OrmError::FieldError("Infinite loop caused by ordering.".into()));
            }
            for item in info.meta.ordering.clone() {
                let (sub, sub_descending) = split_direction(&item);
                self.find_ordering_name(
                    &format!("{name}{LOOKUP_SEP}{sub}"),
                    descending ^ sub_descending,
                    out,
                    seen,
                )?;
            }
            return Ok(());
        }

        let (targets, alias, _) = self.trim_joins(info.targets, info.joins, &info.paths);
        for target in targets {
            out.push((Expression::col(&alias, &target.column), descending));
        }
        Ok(())
    }

    /// Makes the query SELECT DISTINCT, optionally `DISTINCT ON` the given
    /// fields.
    pub fn add_distinct_fields(&mut self, fields: &[String]) {
        self.distinct = true;
        self.distinct_fields = fields.to_vec();
    }

    /// Resolves the `DISTINCT ON` fields to columns.
    pub(crate) fn distinct_columns(&mut self) -> OrmResult<Vec<Expression>> {
        let alias = self.get_initial_alias();
        let meta = Rc::clone(&self.meta);
        let mut cols = Vec::new();
        for name in self.distinct_fields.clone() {
            let parts: Vec<String> = name.split(LOOKUP_SEP).map(str::to_string).collect();
            let info = self.setup_joins(&parts, &meta, &alias, None)?;
            let (targets, alias, _) = self.trim_joins(info.targets, info.joins, &info.paths);
            cols.extend(targets.iter().map(|t| Expression::col(&alias, &t.column)));
        }
        Ok(cols)
    }

    /// The `DISTINCT ON` field names.
    pub fn distinct_fields(&self) -> &[String] {
        &self.distinct_fields
    }

    /// Applies a slice relative to the current one.
    pub fn set_limits(&mut self, low: Option<usize>, high: Option<usize>) {
        if let Some(high) = high {
            self.high_mark = Some(match self.high_mark {
                Some(current) => current.min(self.low_mark + high),
                None => self.low_mark + high,
            });
        }
        if let Some(low) = low {
            self.low_mark = match self.high_mark {
                Some(high) => high.min(self.low_mark + low),
                None => self.low_mark + low,
            };
        }
        if Some(self.low_mark) == self.high_mark {
            self.set_empty();
        }
    }

    /// Removes any slice.
    pub fn clear_limits(&mut self) {
        self.low_mark = 0;
        self.high_mark = None;
    }

    // ── subqueries ───────────────────────────────────────────────────

    /// Prepares the query for use as the right-hand side of a filter: it
    /// must select a single column, the primary key by default.
    pub fn into_filter_subquery(mut self) -> OrmResult<Self> {
        if self.default_cols && self.values_select.is_empty() {
            let alias = self.get_initial_alias();
            let pk = self.meta.pk_field()?.column.clone();
            self.default_cols = false;
            self.select = vec![Expression::col(alias, pk)];
            self.set_annotation_mask(Some(Vec::new()));
        } else if self.select.len() + self.annotation_select().len() != 1 {
            return Err(OrmError::TypeError(
                "Cannot use multi-field values as a filter value.".into(),
            ));
        }
        if self.is_filterable() {
            self.clear_ordering(true);
        }
        Ok(self)
    }

    // ── aggregation ──────────────────────────────────────────────────

    /// Decides how to compute the selected annotations as one row.
    ///
    /// The query is wrapped in a subquery when it is grouped, sliced,
    /// distinct, or carries annotations other than `added`. Summary
    /// aggregates then move to the outer query and the columns they read
    /// are selected by the inner query as `__col<n>`.
    pub fn build_aggregation(&self, added: &[String]) -> OrmResult<Option<AggregationPlan>> {
        if self.annotation_select().is_empty() {
            return Ok(None);
        }
        let has_limit = !self.is_filterable();
        let has_existing = self.annotations.iter().any(|(alias, _)| !added.contains(alias));
        let grouped = !matches!(self.group_by, GroupBy::None);

        if !(grouped || has_limit || has_existing || self.distinct) {
            let mut query = self.clone();
            query.clear_select_fields();
            query.default_cols = false;
            query.clear_ordering(true);
            query.clear_limits();
            return Ok(Some(AggregationPlan::Direct(query)));
        }

        let mut inner = self.clone();
        if !has_limit && self.distinct_fields.is_empty() {
            inner.clear_ordering(true);
        }
        if !inner.distinct {
            if inner.default_cols && has_existing {
                let alias = inner.get_initial_alias();
                let pk = self.meta.pk_field()?.column.clone();
                inner.group_by = GroupBy::Exprs(vec![Expression::col(alias, pk)]);
            }
            inner.default_cols = false;
        }

        let mut outer = Vec::new();
        let mut col_cnt = 0;
        let selected: Vec<(String, Annotation)> = inner
            .annotation_select()
            .into_iter()
            .map(|(alias, annotation)| (alias.to_string(), annotation.clone()))
            .collect();
        for (alias, annotation) in selected {
            if annotation.is_summary {
                let expression = inner.rewrite_cols(annotation.expression, &mut col_cnt)?;
                outer.push((alias.clone(), expression));
                inner.annotations.retain(|(a, _)| *a != alias);
            }
        }

        if inner.select.is_empty() && !inner.default_cols && inner.annotation_select().is_empty() {
            let alias = inner.get_initial_alias();
            let pk = self.meta.pk_field()?.column.clone();
            inner.select = vec![Expression::col(alias, pk)];
        }
        Ok(Some(AggregationPlan::Wrapped(AggregateQuery {
            inner,
            annotations: outer,
        })))
    }

    /// Replaces the columns read by a summary aggregate with references to
    /// new `__col<n>` annotations selected by this (inner) query.
    fn rewrite_cols(&mut self, expr: Expression, col_cnt: &mut usize) -> OrmResult<Expression> {
        expr.map_sources(|source| match source {
            Expression::Ref(ref name) => {
                self.append_annotation_mask(&[name.clone()]);
                Ok(source)
            }
            Expression::Col { .. } | Expression::Aggregate { .. } => {
                *col_cnt += 1;
                let alias = format!("__col{col_cnt}");
                self.annotations.push((
                    alias.clone(),
                    Annotation {
                        expression: source,
                        is_summary: false,
                    },
                ));
                self.append_annotation_mask(&[alias.clone()]);
                Ok(Expression::Ref(alias))
            }
            other => self.rewrite_cols(other, col_cnt),
        })
    }

    /// Computes the selected annotations over the whole query.
    pub fn get_aggregation(
        &self,
        conn: &dyn Connection,
        added: &[String],
    ) -> OrmResult<BTreeMap<String, Value>> {
        let Some(plan) = self.build_aggregation(added)? else {
            return Ok(BTreeMap::new());
        };
        let (sql, params) = plan.as_sql(conn.backend_type())?;
        tracing::debug!(sql = %sql, params = ?params, "aggregate query");
        let aliases = plan.aliases();
        let values = conn
            .query(&sql, &params)?
            .into_iter()
            .next()
            .map_or_else(|| vec![Value::Null; aliases.len()], |row| row.into_values());
        Ok(aliases.into_iter().zip(values).collect())
    }

    /// `SELECT COUNT(*)` over the query.
    pub fn get_count(&self, conn: &dyn Connection) -> OrmResult<u64> {
        let mut query = self.clone();
        query.add_annotation(Expression::count_all(), "__count", true)?;
        let result = query.get_aggregation(conn, &["__count".to_string()])?;
        Ok(result
            .get("__count")
            .and_then(Value::as_int)
            .and_then(|n| u64::try_from(n).ok())
            .unwrap_or(0))
    }

    /// Returns `true` if the query matches at least one row.
    pub fn has_results(&self, conn: &dyn Connection) -> OrmResult<bool> {
        if self.is_empty() {
            return Ok(false);
        }
        let mut query = self.clone();
        if !query.distinct {
            if matches!(query.group_by, GroupBy::Select) {
                let cols = query.group_by_expressions();
                query.group_by = GroupBy::Exprs(cols);
            }
            query.clear_select_clause();
            query.select = vec![Expression::Value(Value::Int(1))];
        }
        query.clear_ordering(true);
        query.set_limits(None, Some(1));
        let (sql, params) = query.as_sql(conn.backend_type())?;
        Ok(!conn.query(&sql, &params)?.is_empty())
    }

    /// Compiles the query to SQL and parameters.
    pub fn as_sql(&self, backend: DatabaseBackendType) -> OrmResult<(String, Vec<Value>)> {
        SqlCompiler::new(backend).compile_select(self)
    }
}

fn split_direction(name: &str) -> (&str, bool) {
    if let Some(rest) = name.strip_prefix('-') {
        (rest, true)
    } else {
        (name.strip_prefix('+').unwrap_or(name), false)
    }
}
