//! Query lookups and Q objects for building complex filters.
//!
//! A filter is written as `field__path__lookup = value`. [`Q`] holds such
//! pairs and combines them with `&` (AND), `|` (OR) and `!` (NOT). The query
//! builder splits each path into the field part and the [`LookupType`], and
//! produces a resolved [`Lookup`] the compiler turns into SQL.
//!
//! # Examples
//!
//! ```
//! use powerorm_db::query::lookups::Q;
//!
//! // name = "Alice"
//! let q = Q::from(("name", "Alice"));
//!
//! // name = "Alice" AND age > 25
//! let combined = q & Q::from(("age__gt", 25));
//!
//! // name = "Alice" OR name = "Bob"
//! let either = Q::from(("name", "Alice")) | Q::from(("name", "Bob"));
//!
//! // NOT(active = false)
//! let negated = !Q::from(("active", false));
//! # let _ = (combined, either, negated);
//! ```

use std::ops;

use powerorm_core::{OrmError, OrmResult};

use super::expressions::Expression;
use crate::value::Value;

/// A composable query filter, equivalent to Django's `Q` object.
#[derive(Debug, Clone)]
pub enum Q {
    /// A single `path__lookup = value` condition.
    Filter {
        /// The field path, optionally ending in a lookup name.
        field: String,
        /// The right-hand side.
        value: Expression,
    },
    /// Logical AND of multiple conditions.
    And(Vec<Q>),
    /// Logical OR of multiple conditions.
    Or(Vec<Q>),
    /// Logical negation of a condition.
    Not(Box<Q>),
}

impl Q {
    /// Creates a new filter Q object.
    pub fn new(field: impl Into<String>, value: impl Into<Expression>) -> Self {
        Self::Filter {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Returns `true` if this is an empty AND/OR (matches everything).
    pub fn is_empty(&self) -> bool {
        match self {
            Self::And(children) | Self::Or(children) => children.is_empty(),
            _ => false,
        }
    }
}

impl<V: Into<Expression>> From<(&str, V)> for Q {
    fn from((field, value): (&str, V)) -> Self {
        Self::new(field, value)
    }
}

impl ops::BitAnd for Q {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            // Flatten nested ANDs
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), other) => {
                left.push(other);
                Self::And(left)
            }
            (other, Self::And(mut right)) => {
                right.insert(0, other);
                Self::And(right)
            }
            (left, right) => Self::And(vec![left, right]),
        }
    }
}

impl ops::BitOr for Q {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            // Flatten nested ORs
            (Self::Or(mut left), Self::Or(right)) => {
                left.extend(right);
                Self::Or(left)
            }
            (Self::Or(mut left), other) => {
                left.push(other);
                Self::Or(left)
            }
            (other, Self::Or(mut right)) => {
                right.insert(0, other);
                Self::Or(right)
            }
            (left, right) => Self::Or(vec![left, right]),
        }
    }
}

impl ops::Not for Q {
    type Output = Self;

    fn not(self) -> Self::Output {
        // Double negation cancellation
        match self {
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }
}

/// The comparison a lookup performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupType {
    /// `field = value`
    Exact,
    /// Case-insensitive `=`.
    IExact,
    /// `LIKE '%value%'`
    Contains,
    /// Case-insensitive `contains`.
    IContains,
    /// `IN (...)`
    In,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `LIKE 'value%'`
    StartsWith,
    /// Case-insensitive `startswith`.
    IStartsWith,
    /// `LIKE '%value'`
    EndsWith,
    /// Case-insensitive `endswith`.
    IEndsWith,
    /// `BETWEEN low AND high`
    Range,
    /// `IS NULL` / `IS NOT NULL`
    IsNull,
}

impl LookupType {
    /// Parses a lookup name such as `icontains`.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "exact" => Self::Exact,
            "iexact" => Self::IExact,
            "contains" => Self::Contains,
            "icontains" => Self::IContains,
            "in" => Self::In,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "startswith" => Self::StartsWith,
            "istartswith" => Self::IStartsWith,
            "endswith" => Self::EndsWith,
            "iendswith" => Self::IEndsWith,
            "range" => Self::Range,
            "isnull" => Self::IsNull,
            _ => return None,
        })
    }

    /// The lookup name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::IExact => "iexact",
            Self::Contains => "contains",
            Self::IContains => "icontains",
            Self::In => "in",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::StartsWith => "startswith",
            Self::IStartsWith => "istartswith",
            Self::EndsWith => "endswith",
            Self::IEndsWith => "iendswith",
            Self::Range => "range",
            Self::IsNull => "isnull",
        }
    }

    /// Lookups usable directly on a relation field.
    pub const fn allowed_on_relation(self) -> bool {
        matches!(
            self,
            Self::Exact | Self::In | Self::Gt | Self::Gte | Self::Lt | Self::Lte | Self::Range | Self::IsNull
        )
    }

    /// Pattern-matching lookups, rendered with `LIKE`.
    pub const fn is_pattern(self) -> bool {
        matches!(
            self,
            Self::Contains
                | Self::IContains
                | Self::StartsWith
                | Self::IStartsWith
                | Self::EndsWith
                | Self::IEndsWith
        )
    }
}

/// A resolved comparison between a column expression and a right-hand side.
#[derive(Debug, Clone)]
pub struct Lookup {
    /// The left-hand side, usually a column.
    pub lhs: Expression,
    /// The comparison.
    pub kind: LookupType,
    /// The right-hand side: a literal, a list, a column or a subquery.
    pub rhs: Expression,
}

impl Lookup {
    /// Builds a lookup, validating the right-hand side for `in`, `range` and
    /// `isnull`.
    pub fn new(lhs: Expression, kind: LookupType, rhs: Expression) -> OrmResult<Self> {
        match (kind, &rhs) {
            (LookupType::In, Expression::Value(Value::List(_)) | Expression::Subquery(_)) => {}
            (LookupType::In, _) => {
                return Err(OrmError::ValueError(
                    "The 'in' lookup requires a list of values or a subquery".into(),
                ))
            }
            (LookupType::Range, Expression::Value(Value::List(values))) if values.len() == 2 => {}
            (LookupType::Range, Expression::Value(Value::List(values))) => {
                return Err(OrmError::ValueError(format!(
                    "The 'range' lookup requires exactly two values, got {}",
                    values.len()
                )))
            }
            (LookupType::Range, _) => {
                return Err(OrmError::ValueError(
                    "The 'range' lookup requires a list of two values".into(),
                ))
            }
            (LookupType::IsNull, Expression::Value(Value::Bool(_))) => {}
            (LookupType::IsNull, _) => {
                return Err(OrmError::ValueError(
                    "The 'isnull' lookup only accepts true or false".into(),
                ))
            }
            _ => {}
        }
        Ok(Self { lhs, kind, rhs })
    }

    /// `lhs IS NULL` / `lhs IS NOT NULL`.
    pub fn is_null(lhs: Expression, is_null: bool) -> Self {
        Self {
            lhs,
            kind: LookupType::IsNull,
            rhs: Expression::Value(Value::Bool(is_null)),
        }
    }

    /// The boolean operand of an `isnull` lookup.
    pub const fn isnull_value(&self) -> Option<bool> {
        match (self.kind, &self.rhs) {
            (LookupType::IsNull, Expression::Value(Value::Bool(b))) => Some(*b),
            _ => None,
        }
    }

    /// Returns `true` when either side contains an aggregate.
    pub fn contains_aggregate(&self) -> bool {
        self.lhs.contains_aggregate() || self.rhs.contains_aggregate()
    }
}
