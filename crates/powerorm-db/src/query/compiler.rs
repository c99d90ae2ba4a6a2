//! SQL compiler.
//!
//! [`SqlCompiler`] turns a [`Query`] into parameterized SQL for one backend.
//! PostgreSQL placeholders are numbered (`$1, $2, ...`), SQLite and MySQL
//! use `?`. Parameters are collected in textual order into one vector that
//! nested subqueries share, so numbering stays correct across nesting.
//!
//! This is the equivalent of Django's `django.db.models.sql.compiler`.

use powerorm_core::{OrmError, OrmResult};

use super::builder::{AggregateQuery, GroupBy, Query};
use super::expressions::Expression;
use super::lookups::{Lookup, LookupType};
use super::where_node::{Connector, WhereNode};
use crate::connection::DatabaseBackendType;
use crate::value::Value;

/// The result of compiling a where node.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Compiled {
    /// A condition.
    Sql(String),
    /// Matches every row; contributes nothing.
    Everything,
    /// Matches no row.
    Nothing,
}

/// The SQL compiler translates a [`Query`] into parameterized SQL.
///
/// Different backends use different placeholder styles:
/// - PostgreSQL: `$1, $2, $3, ...`
/// - SQLite / MySQL: `?, ?, ?, ...`
#[derive(Debug, Clone, Copy)]
pub struct SqlCompiler {
    backend: DatabaseBackendType,
}

impl SqlCompiler {
    /// Creates a new compiler for the given backend type.
    pub const fn new(backend: DatabaseBackendType) -> Self {
        Self { backend }
    }

    /// The backend this compiler targets.
    pub const fn backend(&self) -> DatabaseBackendType {
        self.backend
    }

    /// Returns a parameter placeholder for the given 1-based index.
    fn placeholder(&self, index: usize) -> String {
        match self.backend {
            DatabaseBackendType::PostgreSQL => format!("${index}"),
            DatabaseBackendType::SQLite | DatabaseBackendType::MySQL => "?".to_string(),
        }
    }

    fn push_param(&self, value: Value, params: &mut Vec<Value>) -> String {
        params.push(value);
        self.placeholder(params.len())
    }

    fn quote(&self, name: &str) -> String {
        self.backend.quote_name(name)
    }

    /// Compiles a SELECT query into SQL and parameters.
    pub fn compile_select(&self, query: &Query) -> OrmResult<(String, Vec<Value>)> {
        let mut params = Vec::new();
        let sql = self.select_sql(query, &mut params)?;
        Ok((sql, params))
    }

    /// Compiles `SELECT <aggregates> FROM (<inner>) subquery`.
    pub fn compile_aggregate(&self, aggregate: &AggregateQuery) -> OrmResult<(String, Vec<Value>)> {
        let mut params = Vec::new();
        let mut cols = Vec::with_capacity(aggregate.annotations.len());
        for (alias, expr) in &aggregate.annotations {
            let expr_sql = self.compile_expression(expr, &mut params)?;
            cols.push(format!("{expr_sql} AS {}", self.quote(alias)));
        }
        let inner = self.select_sql(&aggregate.inner, &mut params)?;
        Ok((
            format!("SELECT {} FROM ({inner}) subquery", cols.join(", ")),
            params,
        ))
    }

    fn select_sql(&self, query: &Query, params: &mut Vec<Value>) -> OrmResult<String> {
        // Work on a copy: resolving ordering and distinct fields may add joins.
        let mut query = query.clone();
        let base = query.get_initial_alias();
        let ordering = query.ordering_expressions()?;
        let distinct_cols = if query.distinct_fields().is_empty() {
            Vec::new()
        } else {
            query.distinct_columns()?
        };
        let select_cols = query.select_columns();
        let annotations: Vec<(String, Expression)> = query
            .annotation_select()
            .into_iter()
            .map(|(alias, a)| (alias.to_string(), a.expression.clone()))
            .collect();
        let (where_part, having_part) = query.where_.clone().split_having(false);

        let mut sql = String::from("SELECT ");
        if query.distinct {
            if distinct_cols.is_empty() {
                sql.push_str("DISTINCT ");
            } else if self.backend == DatabaseBackendType::PostgreSQL {
                let cols = distinct_cols
                    .iter()
                    .map(|c| self.compile_expression(c, params))
                    .collect::<OrmResult<Vec<_>>>()?;
                sql.push_str(&format!("DISTINCT ON ({}) ", cols.join(", ")));
            } else {
                return Err(OrmError::NotSupported(
                    "DISTINCT ON fields is not supported by this database backend".into(),
                ));
            }
        }

        let mut select_parts = Vec::new();
        for col in &select_cols {
            select_parts.push(self.compile_expression(col, params)?);
        }
        for (alias, expr) in &annotations {
            let expr_sql = self.compile_expression(expr, params)?;
            select_parts.push(format!("{expr_sql} AS {}", self.quote(alias)));
        }
        if select_parts.is_empty() {
            select_parts.push("*".to_string());
        }
        sql.push_str(&select_parts.join(", "));

        sql.push_str(" FROM ");
        sql.push_str(&self.from_clause(&query, &base));

        if let Some(node) = &where_part {
            let mark = params.len();
            match self.compile_where(node, params)? {
                Compiled::Sql(cond) => sql.push_str(&format!(" WHERE {cond}")),
                Compiled::Everything => params.truncate(mark),
                Compiled::Nothing => {
                    params.truncate(mark);
                    sql.push_str(" WHERE 1=0");
                }
            }
        }

        let group_by = self.group_by_exprs(&mut query, &ordering, having_part.as_ref());
        if !group_by.is_empty() {
            let mut seen: Vec<String> = Vec::new();
            for expr in &group_by {
                let mark = params.len();
                let expr_sql = self.compile_expression(expr, params)?;
                if seen.contains(&expr_sql) {
                    params.truncate(mark);
                } else {
                    seen.push(expr_sql);
                }
            }
            sql.push_str(&format!(" GROUP BY {}", seen.join(", ")));
        }

        if let Some(node) = &having_part {
            let mark = params.len();
            match self.compile_where(node, params)? {
                Compiled::Sql(cond) => sql.push_str(&format!(" HAVING {cond}")),
                Compiled::Everything => params.truncate(mark),
                Compiled::Nothing => {
                    params.truncate(mark);
                    sql.push_str(" HAVING 1=0");
                }
            }
        }

        if !ordering.is_empty() {
            let mut orders = Vec::with_capacity(ordering.len());
            for (expr, descending) in &ordering {
                let expr_sql = self.compile_expression(expr, params)?;
                let dir = if *descending { "DESC" } else { "ASC" };
                orders.push(format!("{expr_sql} {dir}"));
            }
            sql.push_str(&format!(" ORDER BY {}", orders.join(", ")));
        }

        sql.push_str(&self.limit_offset(query.low_mark, query.high_mark));
        Ok(sql)
    }

    /// The FROM clause: the base table followed by every join still in use.
    fn from_clause(&self, query: &Query, base: &str) -> String {
        let mut parts = Vec::new();
        for alias in query.aliases() {
            if alias != base && query.refcount(alias) == 0 {
                continue;
            }
            let Some(join) = query.alias_join(alias) else {
                continue;
            };
            let table = self.quote(&join.table_name);
            let alias_sql = if *alias == join.table_name {
                String::new()
            } else {
                format!(" {}", self.quote(alias))
            };
            match (&join.join_type, &join.join_field, &join.parent_alias) {
                (Some(join_type), Some(field), Some(parent)) => {
                    let on: Vec<String> = field
                        .join_columns
                        .iter()
                        .map(|(parent_col, joined_col)| {
                            format!(
                                "{}.{} = {}.{}",
                                self.quote(parent),
                                self.quote(parent_col),
                                self.quote(alias),
                                self.quote(joined_col)
                            )
                        })
                        .collect();
                    parts.push(format!(
                        "{} {table}{alias_sql} ON ({})",
                        join_type.sql_keyword(),
                        on.join(" AND ")
                    ));
                }
                _ => parts.push(format!("{table}{alias_sql}")),
            }
        }
        parts.join(" ")
    }

    /// GROUP BY expressions: the query's grouping plus the non-aggregate
    /// columns of the ordering and of HAVING.
    fn group_by_exprs(
        &self,
        query: &mut Query,
        ordering: &[(Expression, bool)],
        having: Option<&WhereNode>,
    ) -> Vec<Expression> {
        if matches!(query.group_by, GroupBy::None) {
            return Vec::new();
        }
        let mut exprs = query.group_by_expressions();
        for (expr, _) in ordering {
            match expr {
                Expression::Ref(name) => {
                    let annotation = query
                        .annotations()
                        .iter()
                        .find(|(alias, _)| alias == name)
                        .map(|(_, a)| a.expression.clone());
                    if let Some(annotation) = annotation {
                        exprs.extend(annotation.group_by_cols());
                    }
                }
                other => exprs.extend(other.group_by_cols()),
            }
        }
        if let Some(having) = having {
            collect_having_cols(having, &mut exprs);
        }
        exprs
    }

    fn limit_offset(&self, low: usize, high: Option<usize>) -> String {
        match (high, low) {
            (Some(high), 0) => format!(" LIMIT {high}"),
            (Some(high), low) => format!(" LIMIT {} OFFSET {low}", high.saturating_sub(low)),
            (None, 0) => String::new(),
            (None, low) => match self.backend {
                DatabaseBackendType::PostgreSQL => format!(" OFFSET {low}"),
                DatabaseBackendType::SQLite => format!(" LIMIT -1 OFFSET {low}"),
                DatabaseBackendType::MySQL => {
                    format!(" LIMIT 18446744073709551615 OFFSET {low}")
                }
            },
        }
    }

    /// Compiles an INSERT statement. An empty column list inserts a row of
    /// defaults. `returning` asks PostgreSQL for the generated key.
    pub fn compile_insert(
        &self,
        table: &str,
        fields: &[(String, Value)],
        returning: Option<&str>,
    ) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = if fields.is_empty() {
            match self.backend {
                DatabaseBackendType::MySQL => {
                    format!("INSERT INTO {} () VALUES ()", self.quote(table))
                }
                _ => format!("INSERT INTO {} DEFAULT VALUES", self.quote(table)),
            }
        } else {
            let columns: Vec<String> = fields.iter().map(|(name, _)| self.quote(name)).collect();
            let placeholders: Vec<String> = fields
                .iter()
                .map(|(_, val)| self.push_param(val.clone(), &mut params))
                .collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.quote(table),
                columns.join(", "),
                placeholders.join(", ")
            )
        };
        if let (Some(col), DatabaseBackendType::PostgreSQL) = (returning, self.backend) {
            sql.push_str(&format!(" RETURNING {}", self.quote(col)));
        }
        (sql, params)
    }

    /// Compiles an UPDATE of the rows matched by `query`.
    ///
    /// `values` pairs column names with resolved expressions. A query that
    /// joins other tables restricts by primary key through a subquery.
    pub fn compile_update(
        &self,
        query: &Query,
        values: &[(String, Expression)],
    ) -> OrmResult<(String, Vec<Value>)> {
        let mut params = Vec::new();
        let mut set_parts = Vec::with_capacity(values.len());
        for (column, expr) in values {
            let expr_sql = self.compile_expression(expr, &mut params)?;
            set_parts.push(format!("{} = {expr_sql}", self.quote(column)));
        }
        let mut sql = format!(
            "UPDATE {} SET {}",
            self.quote(&query.model().db_table),
            set_parts.join(", ")
        );
        sql.push_str(&self.restriction(query, &mut params)?);
        Ok((sql, params))
    }

    /// Compiles a DELETE of the rows matched by `query`.
    pub fn compile_delete(&self, query: &Query) -> OrmResult<(String, Vec<Value>)> {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", self.quote(&query.model().db_table));
        sql.push_str(&self.restriction(query, &mut params)?);
        Ok((sql, params))
    }

    /// The WHERE clause of an UPDATE or DELETE.
    fn restriction(&self, query: &Query, params: &mut Vec<Value>) -> OrmResult<String> {
        if query.active_joins().is_empty() {
            let mark = params.len();
            return Ok(match self.compile_where(&query.where_, params)? {
                Compiled::Sql(cond) => format!(" WHERE {cond}"),
                Compiled::Everything => {
                    params.truncate(mark);
                    String::new()
                }
                Compiled::Nothing => {
                    params.truncate(mark);
                    " WHERE 1=0".to_string()
                }
            });
        }

        let mut pks = query.clone();
        pks.clear_select_clause();
        pks.default_cols = true;
        pks.set_annotation_mask(None);
        pks.clear_ordering(true);
        let pks = pks.into_filter_subquery()?;
        let pk = query.model().pk_field()?.column.clone();
        let inner = self.select_sql(&pks, params)?;
        let inner = if self.backend == DatabaseBackendType::MySQL {
            // MySQL cannot select from the table being modified.
            format!("SELECT * FROM ({inner}) subquery")
        } else {
            inner
        };
        Ok(format!(" WHERE {} IN ({inner})", self.quote(&pk)))
    }

    /// Compiles a where node.
    ///
    /// A node is decided as soon as enough children match everything or
    /// nothing: an AND with one empty child matches nothing, an OR with one
    /// full child matches everything. Negation swaps the two outcomes.
    fn compile_where(&self, node: &WhereNode, params: &mut Vec<Value>) -> OrmResult<Compiled> {
        let (connector, negated, children) = match node {
            WhereNode::Lookup(lookup) => return self.compile_lookup(lookup, params),
            WhereNode::Nothing => return Ok(Compiled::Nothing),
            WhereNode::Node {
                connector,
                negated,
                children,
            } => (*connector, *negated, children),
        };

        let (mut full_needed, mut empty_needed) = match connector {
            Connector::And => (children.len(), 1),
            Connector::Or => (1, children.len()),
        };
        let mut parts = Vec::new();
        for child in children {
            let mark = params.len();
            match self.compile_where(child, params)? {
                Compiled::Sql(sql) => parts.push(sql),
                Compiled::Everything => {
                    params.truncate(mark);
                    full_needed = full_needed.saturating_sub(1);
                }
                Compiled::Nothing => {
                    params.truncate(mark);
                    empty_needed = empty_needed.saturating_sub(1);
                }
            }
            if empty_needed == 0 {
                return Ok(if negated {
                    Compiled::Everything
                } else {
                    Compiled::Nothing
                });
            }
            if full_needed == 0 {
                return Ok(if negated {
                    Compiled::Nothing
                } else {
                    Compiled::Everything
                });
            }
        }

        if parts.is_empty() {
            return Ok(Compiled::Everything);
        }
        let joined = parts.join(&format!(" {} ", connector.sql()));
        Ok(Compiled::Sql(if negated {
            format!("NOT ({joined})")
        } else if parts.len() > 1 {
            format!("({joined})")
        } else {
            joined
        }))
    }

    /// Compiles a single lookup into SQL.
    fn compile_lookup(&self, lookup: &Lookup, params: &mut Vec<Value>) -> OrmResult<Compiled> {
        let lhs = self.compile_expression(&lookup.lhs, params)?;
        let sql = match lookup.kind {
            LookupType::IsNull => {
                if lookup.isnull_value().unwrap_or(true) {
                    format!("{lhs} IS NULL")
                } else {
                    format!("{lhs} IS NOT NULL")
                }
            }
            LookupType::In => match &lookup.rhs {
                Expression::Value(Value::List(values)) if values.is_empty() => {
                    return Ok(Compiled::Nothing)
                }
                Expression::Value(Value::List(values)) => {
                    let placeholders: Vec<String> = values
                        .iter()
                        .map(|v| self.push_param(v.clone(), params))
                        .collect();
                    format!("{lhs} IN ({})", placeholders.join(", "))
                }
                Expression::Subquery(query) => {
                    format!("{lhs} IN ({})", self.select_sql(query, params)?)
                }
                other => format!("{lhs} IN ({})", self.compile_expression(other, params)?),
            },
            LookupType::Range => match &lookup.rhs {
                Expression::Value(Value::List(values)) if values.len() == 2 => {
                    let low = self.push_param(values[0].clone(), params);
                    let high = self.push_param(values[1].clone(), params);
                    format!("{lhs} BETWEEN {low} AND {high}")
                }
                _ => {
                    return Err(OrmError::ValueError(
                        "The 'range' lookup requires exactly two values".into(),
                    ))
                }
            },
            LookupType::Exact => format!("{lhs} = {}", self.compile_expression(&lookup.rhs, params)?),
            LookupType::IExact => {
                let rhs = self.compile_expression(&lookup.rhs, params)?;
                format!("LOWER({lhs}) = LOWER({rhs})")
            }
            LookupType::Gt => format!("{lhs} > {}", self.compile_expression(&lookup.rhs, params)?),
            LookupType::Gte => format!("{lhs} >= {}", self.compile_expression(&lookup.rhs, params)?),
            LookupType::Lt => format!("{lhs} < {}", self.compile_expression(&lookup.rhs, params)?),
            LookupType::Lte => format!("{lhs} <= {}", self.compile_expression(&lookup.rhs, params)?),
            kind => {
                let literal = matches!(lookup.rhs, Expression::Value(_));
                let rhs = self.pattern_rhs(kind, &lookup.rhs, params)?;
                let case_insensitive = matches!(
                    kind,
                    LookupType::IContains | LookupType::IStartsWith | LookupType::IEndsWith
                );
                let like = match (case_insensitive, self.backend) {
                    (false, _) => format!("{lhs} LIKE {rhs}"),
                    (true, DatabaseBackendType::PostgreSQL) => format!("{lhs} ILIKE {rhs}"),
                    (true, _) => format!("LOWER({lhs}) LIKE LOWER({rhs})"),
                };
                if literal {
                    format!("{like} ESCAPE {}", self.like_escape())
                } else {
                    like
                }
            }
        };
        Ok(Compiled::Sql(sql))
    }

    /// The right-hand side of a LIKE: a literal gets its wildcards added to
    /// the parameter, an expression is concatenated with them.
    fn pattern_rhs(
        &self,
        kind: LookupType,
        rhs: &Expression,
        params: &mut Vec<Value>,
    ) -> OrmResult<String> {
        let (prefix, suffix) = match kind {
            LookupType::Contains | LookupType::IContains => (true, true),
            LookupType::StartsWith | LookupType::IStartsWith => (false, true),
            _ => (true, false),
        };
        if let Expression::Value(value) = rhs {
            let text = escape_like(&value.as_str().map_or_else(|| value.to_string(), str::to_string));
            let pattern = format!(
                "{}{text}{}",
                if prefix { "%" } else { "" },
                if suffix { "%" } else { "" }
            );
            return Ok(self.push_param(Value::String(pattern), params));
        }

        let expr = self.compile_expression(rhs, params)?;
        let mut pieces = Vec::with_capacity(3);
        if prefix {
            pieces.push("'%'".to_string());
        }
        pieces.push(expr);
        if suffix {
            pieces.push("'%'".to_string());
        }
        Ok(match self.backend {
            DatabaseBackendType::MySQL => format!("CONCAT({})", pieces.join(", ")),
            _ => pieces.join(" || "),
        })
    }

    /// The `ESCAPE` character literal; MySQL reads backslashes in string
    /// literals, so it needs a doubled one.
    const fn like_escape(&self) -> &'static str {
        match self.backend {
            DatabaseBackendType::MySQL => r"'\\'",
            _ => r"'\'",
        }
    }

    /// Compiles an expression into SQL.
    fn compile_expression(&self, expr: &Expression, params: &mut Vec<Value>) -> OrmResult<String> {
        Ok(match expr {
            Expression::F(name) => {
                return Err(OrmError::FieldError(format!(
                    "F({name}) must be resolved before compilation"
                )))
            }
            Expression::Col { alias, column } => {
                format!("{}.{}", self.quote(alias), self.quote(column))
            }
            Expression::Ref(name) => self.quote(name),
            Expression::Value(Value::List(values)) => {
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| self.push_param(v.clone(), params))
                    .collect();
                format!("({})", placeholders.join(", "))
            }
            Expression::Value(val) => self.push_param(val.clone(), params),
            Expression::Star => "*".to_string(),
            Expression::Aggregate {
                func,
                source,
                distinct,
            } => {
                let source_sql = self.compile_expression(source, params)?;
                let distinct_str = if *distinct { "DISTINCT " } else { "" };
                format!("{}({distinct_str}{source_sql})", func.sql_name())
            }
            Expression::Subquery(query) => format!("({})", self.select_sql(query, params)?),
            Expression::Add(left, right) => self.binary(left, "+", right, params)?,
            Expression::Sub(left, right) => self.binary(left, "-", right, params)?,
            Expression::Mul(left, right) => self.binary(left, "*", right, params)?,
            Expression::Div(left, right) => self.binary(left, "/", right, params)?,
        })
    }

    fn binary(
        &self,
        left: &Expression,
        op: &str,
        right: &Expression,
        params: &mut Vec<Value>,
    ) -> OrmResult<String> {
        let l = self.compile_expression(left, params)?;
        let r = self.compile_expression(right, params)?;
        Ok(format!("({l} {op} {r})"))
    }
}

/// Escapes the LIKE wildcards and the escape character itself.
fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn collect_having_cols(node: &WhereNode, out: &mut Vec<Expression>) {
    match node {
        WhereNode::Lookup(lookup) => {
            for side in [&lookup.lhs, &lookup.rhs] {
                if !side.contains_aggregate() {
                    out.extend(side.group_by_cols());
                }
            }
        }
        WhereNode::Nothing => {}
        WhereNode::Node { children, .. } => {
            for child in children {
                collect_having_cols(child, out);
            }
        }
    }
}
