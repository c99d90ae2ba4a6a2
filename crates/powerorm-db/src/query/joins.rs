//! Join descriptors and join-type promotion.
//!
//! Every table a query touches is an entry of the query's alias table: the
//! base table, or a [`Join`] hanging off a parent alias. Join types start
//! as INNER and are promoted to LEFT OUTER where a NULL-extended row must
//! survive (nullable keys, OR branches that do not need the join), and
//! demoted back where every branch needs the joined row. [`JoinPromoter`]
//! collects the votes of one boolean node and applies them.

use std::collections::BTreeMap;

use super::builder::Query;
use super::where_node::Connector;
use crate::related::JoinField;

/// SQL JOIN types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    /// INNER JOIN.
    Inner,
    /// LEFT OUTER JOIN.
    LeftOuter,
}

impl JoinType {
    /// Returns the SQL keyword for this join type.
    pub const fn sql_keyword(&self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::LeftOuter => "LEFT OUTER JOIN",
        }
    }
}

/// An entry of a query's alias table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    /// The table joined.
    pub table_name: String,
    /// The alias the join hangs off. `None` for the base table.
    pub parent_alias: Option<String>,
    /// The alias assigned by the query.
    pub table_alias: String,
    /// The join type. `None` for the base table.
    pub join_type: Option<JoinType>,
    /// The key the join follows. `None` for the base table.
    pub join_field: Option<JoinField>,
    /// Whether the joined row may be missing.
    pub nullable: bool,
}

impl Join {
    /// The base table of a query.
    pub fn base(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            parent_alias: None,
            table_alias: String::new(),
            join_type: None,
            join_field: None,
            nullable: false,
        }
    }

    /// A new INNER join of `table_name` onto `parent_alias`.
    pub fn new(
        table_name: impl Into<String>,
        parent_alias: impl Into<String>,
        join_field: JoinField,
        nullable: bool,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            parent_alias: Some(parent_alias.into()),
            table_alias: String::new(),
            join_type: Some(JoinType::Inner),
            join_field: Some(join_field),
            nullable,
        }
    }

    /// Returns `true` for the base table entry.
    pub const fn is_base(&self) -> bool {
        self.join_type.is_none()
    }

    /// Two joins are interchangeable when they join the same table onto the
    /// same parent through the same key. The join type is not compared.
    pub fn equals(&self, other: &Self) -> bool {
        self.table_name == other.table_name
            && self.parent_alias == other.parent_alias
            && match (&self.join_field, &other.join_field) {
                (Some(a), Some(b)) => a.same_as(b),
                (None, None) => true,
                _ => false,
            }
    }

    /// Returns `true` when the join is a LEFT OUTER join.
    pub fn is_louter(&self) -> bool {
        self.join_type == Some(JoinType::LeftOuter)
    }
}

/// Collects, for the children of one boolean node, which aliases each child
/// needs as INNER joins, and promotes or demotes accordingly.
#[derive(Debug)]
pub struct JoinPromoter {
    effective_connector: Connector,
    num_children: usize,
    votes: BTreeMap<String, usize>,
}

impl JoinPromoter {
    /// A promoter for a node with `num_children` children. Under negation
    /// AND behaves like OR and vice versa.
    pub fn new(connector: Connector, num_children: usize, negated: bool) -> Self {
        let effective_connector = if negated {
            connector.flipped()
        } else {
            connector
        };
        Self {
            effective_connector,
            num_children,
            votes: BTreeMap::new(),
        }
    }

    /// Records that a child needs the given aliases to be INNER joins.
    pub fn add_votes<I, S>(&mut self, aliases: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for alias in aliases {
            *self.votes.entry(alias.into()).or_insert(0) += 1;
        }
    }

    /// Applies the votes to `query`.
    ///
    /// Under OR an alias not voted by every child may see NULL-extended
    /// rows and is promoted; under AND (or a unanimous OR) it is demoted.
    /// Returns the demoted aliases, which the parent node counts as votes.
    pub fn update_join_types(self, query: &mut Query) -> Vec<String> {
        let mut to_promote = Vec::new();
        let mut to_demote = Vec::new();
        for (alias, votes) in self.votes {
            if self.effective_connector == Connector::Or && votes < self.num_children {
                to_promote.push(alias.clone());
            }
            if self.effective_connector == Connector::And
                || (self.effective_connector == Connector::Or && votes == self.num_children)
            {
                to_demote.push(alias);
            }
        }
        query.promote_joins(to_promote);
        query.demote_joins(to_demote.clone());
        to_demote
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str) -> JoinField {
        JoinField {
            model: "app.b".into(),
            name: name.into(),
            reverse: false,
            join_columns: vec![(format!("{name}_id"), "id".into())],
            null: false,
            related_fields: Vec::new(),
        }
    }

    #[test]
    fn test_join_equality_ignores_type() {
        let a = Join::new("app_a", "app_b", field("a"), false);
        let mut b = a.clone();
        b.join_type = Some(JoinType::LeftOuter);
        b.table_alias = "T3".into();
        assert!(a.equals(&b));
        let c = Join::new("app_a", "app_b", field("other"), false);
        assert!(!a.equals(&c));
    }

    #[test]
    fn test_promoter_effective_connector_flips_under_negation() {
        let promoter = JoinPromoter::new(Connector::And, 2, true);
        assert_eq!(promoter.effective_connector, Connector::Or);
        let promoter = JoinPromoter::new(Connector::Or, 2, true);
        assert_eq!(promoter.effective_connector, Connector::And);
    }

    #[test]
    fn test_keywords() {
        assert_eq!(JoinType::Inner.sql_keyword(), "INNER JOIN");
        assert_eq!(JoinType::LeftOuter.sql_keyword(), "LEFT OUTER JOIN");
    }
}
