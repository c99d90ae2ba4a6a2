//! Query expressions, aggregates, and F-objects.
//!
//! Expressions are built unresolved (`F("author__name")`, literals,
//! aggregates over either) and resolved against a [`Query`], which turns
//! field paths into [`Expression::Col`] references on join aliases and
//! annotation names into the annotation they refer to.
//!
//! # Examples
//!
//! ```
//! use powerorm_db::query::expressions::{AggregateFunc, Expression};
//!
//! // F("price") * 1.1
//! let expr = Expression::f("price") * Expression::value(1.1);
//! assert!(!expr.contains_aggregate());
//!
//! // Count("tags", distinct=True)
//! let count = Expression::count("tags").distinct();
//! assert!(count.contains_aggregate());
//! assert_eq!(count.to_string(), "Count(DISTINCT F(tags))");
//! ```

use std::fmt;
use std::ops;

use crate::query::builder::Query;
use crate::value::Value;

/// A query expression that produces a value in the context of a SQL query.
#[derive(Debug, Clone)]
pub enum Expression {
    /// An unresolved reference to a field path or annotation.
    F(String),
    /// A resolved column on a table alias.
    Col {
        /// The table alias.
        alias: String,
        /// The column name.
        column: String,
    },
    /// A reference to a selected annotation by its alias.
    Ref(String),
    /// A literal value, bound as a parameter.
    Value(Value),
    /// `*`, the argument of `COUNT(*)`.
    Star,
    /// An aggregate function.
    Aggregate {
        /// The aggregate operation.
        func: AggregateFunc,
        /// The expression being aggregated.
        source: Box<Expression>,
        /// Whether to apply DISTINCT.
        distinct: bool,
    },
    /// Addition.
    Add(Box<Expression>, Box<Expression>),
    /// Subtraction.
    Sub(Box<Expression>, Box<Expression>),
    /// Multiplication.
    Mul(Box<Expression>, Box<Expression>),
    /// Division.
    Div(Box<Expression>, Box<Expression>),
    /// A nested query.
    Subquery(Box<Query>),
}

/// Aggregate function types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    /// COUNT.
    Count,
    /// SUM.
    Sum,
    /// AVG.
    Avg,
    /// MIN.
    Min,
    /// MAX.
    Max,
}

impl AggregateFunc {
    /// Returns the SQL function name for this aggregate.
    pub const fn sql_name(&self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }

    /// The name used when displaying the expression (`Count`).
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Count => "Count",
            Self::Sum => "Sum",
            Self::Avg => "Avg",
            Self::Min => "Min",
            Self::Max => "Max",
        }
    }
}

impl Expression {
    /// Creates an F-expression referencing a field path or annotation.
    pub fn f(name: impl Into<String>) -> Self {
        Self::F(name.into())
    }

    /// Creates a resolved column reference.
    pub fn col(alias: impl Into<String>, column: impl Into<String>) -> Self {
        Self::Col {
            alias: alias.into(),
            column: column.into(),
        }
    }

    /// Creates a literal value expression.
    pub fn value(v: impl Into<Value>) -> Self {
        Self::Value(v.into())
    }

    /// Creates an aggregate expression.
    pub fn aggregate(func: AggregateFunc, source: Self) -> Self {
        Self::Aggregate {
            func,
            source: Box::new(source),
            distinct: false,
        }
    }

    /// `Count(field)`.
    pub fn count(field: &str) -> Self {
        Self::aggregate(AggregateFunc::Count, Self::f(field))
    }

    /// `Count('*')`.
    pub fn count_all() -> Self {
        Self::aggregate(AggregateFunc::Count, Self::Star)
    }

    /// `Sum(field)`.
    pub fn sum(field: &str) -> Self {
        Self::aggregate(AggregateFunc::Sum, Self::f(field))
    }

    /// `Avg(field)`.
    pub fn avg(field: &str) -> Self {
        Self::aggregate(AggregateFunc::Avg, Self::f(field))
    }

    /// `Min(field)`.
    pub fn min(field: &str) -> Self {
        Self::aggregate(AggregateFunc::Min, Self::f(field))
    }

    /// `Max(field)`.
    pub fn max(field: &str) -> Self {
        Self::aggregate(AggregateFunc::Max, Self::f(field))
    }

    /// Marks an aggregate as DISTINCT. No effect on other expressions.
    #[must_use]
    pub fn distinct(self) -> Self {
        match self {
            Self::Aggregate { func, source, .. } => Self::Aggregate {
                func,
                source,
                distinct: true,
            },
            other => other,
        }
    }

    /// Returns `true` if the expression is or contains an aggregate.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Self::Aggregate { .. } => true,
            Self::Add(l, r) | Self::Sub(l, r) | Self::Mul(l, r) | Self::Div(l, r) => {
                l.contains_aggregate() || r.contains_aggregate()
            }
            _ => false,
        }
    }

    /// Returns `true` if the expression is a literal `NULL`.
    pub const fn is_null_literal(&self) -> bool {
        matches!(self, Self::Value(Value::Null))
    }

    /// Direct child expressions.
    pub fn sources(&self) -> Vec<&Self> {
        match self {
            Self::Aggregate { source, .. } => vec![source.as_ref()],
            Self::Add(l, r) | Self::Sub(l, r) | Self::Mul(l, r) | Self::Div(l, r) => {
                vec![l.as_ref(), r.as_ref()]
            }
            _ => Vec::new(),
        }
    }

    /// Rebuilds the expression with every direct child passed through `f`.
    pub fn map_sources<E>(self, mut f: impl FnMut(Self) -> Result<Self, E>) -> Result<Self, E> {
        Ok(match self {
            Self::Aggregate {
                func,
                source,
                distinct,
            } => Self::Aggregate {
                func,
                source: Box::new(f(*source)?),
                distinct,
            },
            Self::Add(l, r) => Self::Add(Box::new(f(*l)?), Box::new(f(*r)?)),
            Self::Sub(l, r) => Self::Sub(Box::new(f(*l)?), Box::new(f(*r)?)),
            Self::Mul(l, r) => Self::Mul(Box::new(f(*l)?), Box::new(f(*r)?)),
            Self::Div(l, r) => Self::Div(Box::new(f(*l)?), Box::new(f(*r)?)),
            other => other,
        })
    }

    /// Columns a GROUP BY must contain for this expression to be selectable.
    pub fn group_by_cols(&self) -> Vec<Self> {
        match self {
            Self::Col { .. } => vec![self.clone()],
            Self::Aggregate { .. } | Self::Value(_) | Self::Star | Self::Subquery(_) => Vec::new(),
            Self::Ref(_) | Self::F(_) => vec![self.clone()],
            _ if !self.contains_aggregate() => vec![self.clone()],
            _ => self
                .sources()
                .into_iter()
                .flat_map(Self::group_by_cols)
                .collect(),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::F(name) => write!(f, "F({name})"),
            Self::Col { alias, column } => write!(f, "Col({alias}, {column})"),
            Self::Ref(name) => write!(f, "Ref({name})"),
            Self::Value(v) => write!(f, "Value({v})"),
            Self::Star => write!(f, "'*'"),
            Self::Aggregate {
                func,
                source,
                distinct,
            } => {
                let distinct = if *distinct { "DISTINCT " } else { "" };
                write!(f, "{}({distinct}{source})", func.display_name())
            }
            Self::Add(l, r) => write!(f, "{l} + {r}"),
            Self::Sub(l, r) => write!(f, "{l} - {r}"),
            Self::Mul(l, r) => write!(f, "{l} * {r}"),
            Self::Div(l, r) => write!(f, "{l} / {r}"),
            Self::Subquery(q) => write!(f, "Subquery({})", q.model().label()),
        }
    }
}

macro_rules! impl_from_literal {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for Expression {
                fn from(v: $t) -> Self {
                    Self::Value(Value::from(v))
                }
            }
        )*
    };
}

impl_from_literal!(
    bool,
    i32,
    i64,
    f64,
    String,
    &str,
    Vec<Value>,
    uuid::Uuid,
    chrono::NaiveDate,
    chrono::NaiveDateTime,
    chrono::NaiveTime,
);

impl From<Value> for Expression {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl From<Query> for Expression {
    fn from(q: Query) -> Self {
        Self::Subquery(Box::new(q))
    }
}

impl ops::Add for Expression {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self::Add(Box::new(self), Box::new(rhs))
    }
}

impl ops::Sub for Expression {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self::Sub(Box::new(self), Box::new(rhs))
    }
}

impl ops::Mul for Expression {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self::Output {
        Self::Mul(Box::new(self), Box::new(rhs))
    }
}

impl ops::Div for Expression {
    type Output = Self;
    fn div(self, rhs: Self) -> Self::Output {
        Self::Div(Box::new(self), Box::new(rhs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic_builds_tree() {
        let expr = Expression::f("price") * Expression::value(2) + Expression::value(1);
        match expr {
            Expression::Add(left, right) => {
                assert!(matches!(*left, Expression::Mul(_, _)));
                assert!(matches!(*right, Expression::Value(Value::Int(1))));
            }
            other => panic!("expected Add, got {other:?}"),
        }
    }

    #[test]
    fn test_contains_aggregate_through_arithmetic() {
        let expr = Expression::sum("score") / Expression::value(2);
        assert!(expr.contains_aggregate());
        assert!(!Expression::f("score").contains_aggregate());
    }

    #[test]
    fn test_group_by_cols_skip_aggregates() {
        let col = Expression::col("t", "a");
        let expr = col.clone() + Expression::aggregate(AggregateFunc::Max, Expression::col("t", "b"));
        let cols = expr.group_by_cols();
        assert_eq!(cols.len(), 1);
        assert_eq!(cols[0].to_string(), "Col(t, a)");
    }

    #[test]
    fn test_display() {
        assert_eq!(Expression::count_all().to_string(), "Count('*')");
        assert_eq!(
            (Expression::f("a") + Expression::value(1)).to_string(),
            "F(a) + Value(1)"
        );
    }

    #[test]
    fn test_map_sources() {
        let expr = Expression::sum("x");
        let mapped = expr
            .map_sources(|_| Ok::<_, ()>(Expression::col("t", "x")))
            .unwrap();
        assert_eq!(mapped.to_string(), "Sum(Col(t, x))");
    }
}
