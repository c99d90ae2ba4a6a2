//! The WHERE tree.
//!
//! Leaves are resolved [`Lookup`]s; internal nodes carry a connector and a
//! negation flag. Aggregate conditions are split off into HAVING before
//! compilation.

use super::lookups::Lookup;

/// Boolean connector of a where node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    /// All children must match.
    And,
    /// At least one child must match.
    Or,
}

impl Connector {
    /// The SQL keyword.
    pub const fn sql(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }

    /// The connector with AND and OR swapped.
    pub const fn flipped(self) -> Self {
        match self {
            Self::And => Self::Or,
            Self::Or => Self::And,
        }
    }
}

/// A node of the WHERE/HAVING tree.
#[derive(Debug, Clone)]
pub enum WhereNode {
    /// A single condition.
    Lookup(Lookup),
    /// A condition that never matches.
    Nothing,
    /// A group of conditions.
    Node {
        /// How the children combine.
        connector: Connector,
        /// Whether the whole group is negated.
        negated: bool,
        /// The children.
        children: Vec<WhereNode>,
    },
}

impl Default for WhereNode {
    fn default() -> Self {
        Self::new(Connector::And, false)
    }
}

impl WhereNode {
    /// An empty group.
    pub const fn new(connector: Connector, negated: bool) -> Self {
        Self::Node {
            connector,
            negated,
            children: Vec::new(),
        }
    }

    /// Returns `true` for a group without children.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Node { children, .. } if children.is_empty())
    }

    /// Returns `true` if any condition in the tree involves an aggregate.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Self::Lookup(lookup) => lookup.contains_aggregate(),
            Self::Nothing => false,
            Self::Node { children, .. } => children.iter().any(Self::contains_aggregate),
        }
    }

    /// Adds `child` under `connector`.
    ///
    /// A non-negated group with a matching connector (or a single child) is
    /// flattened into this node. When `connector` differs from this node's
    /// connector, the current content is pushed down one level.
    pub fn add(&mut self, child: Self, connector: Connector) {
        let Self::Node {
            connector: own_connector,
            negated,
            children,
        } = self
        else {
            let previous = std::mem::take(self);
            *self = Self::Node {
                connector,
                negated: false,
                children: vec![previous, child],
            };
            return;
        };

        if *own_connector == connector {
            match child {
                Self::Node {
                    connector: child_connector,
                    negated: false,
                    children: grandchildren,
                } if child_connector == connector || grandchildren.len() == 1 => {
                    children.extend(grandchildren);
                }
                other => children.push(other),
            }
        } else {
            let pushed_down = Self::Node {
                connector: *own_connector,
                negated: *negated,
                children: std::mem::take(children),
            };
            *own_connector = connector;
            *negated = false;
            children.push(pushed_down);
            children.push(child);
        }
    }

    /// Splits the tree into a WHERE part and a HAVING part.
    ///
    /// Conditions on aggregates go to HAVING. A group whose semantics would
    /// change if split (an OR, or a negated AND) goes to HAVING whole.
    pub fn split_having(self, negated: bool) -> (Option<Self>, Option<Self>) {
        if !self.contains_aggregate() {
            return (Some(self), None);
        }
        let Self::Node {
            connector,
            negated: own_negated,
            children,
        } = self
        else {
            return (None, Some(self));
        };

        let in_negated = negated ^ own_negated;
        let may_need_split = (in_negated && connector == Connector::And)
            || (!in_negated && connector == Connector::Or);
        if may_need_split {
            return (
                None,
                Some(Self::Node {
                    connector,
                    negated: own_negated,
                    children,
                }),
            );
        }

        let mut where_parts = Vec::new();
        let mut having_parts = Vec::new();
        for child in children {
            let (w, h) = child.split_having(in_negated);
            where_parts.extend(w);
            having_parts.extend(h);
        }
        let build = |parts: Vec<Self>| {
            (!parts.is_empty()).then(|| Self::Node {
                connector,
                negated: own_negated,
                children: parts,
            })
        };
        (build(where_parts), build(having_parts))
    }
}
