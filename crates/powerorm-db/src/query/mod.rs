//! Query building, compilation, and execution.
//!
//! This module contains the complete query pipeline:
//!
//! - [`lookups`] - Q objects and lookup types for filtering
//! - [`expressions`] - F-objects, aggregates, and computed expressions
//! - [`where_node`] - The WHERE/HAVING tree
//! - [`joins`] - Join descriptors and join promotion
//! - [`builder`] - The [`Query`] under construction: path resolution, filters,
//!   ordering, annotations and aggregation
//! - [`compiler`] - SQL generation per backend
//! - [`queryset`] - The lazy [`QuerySet`] façade and its row shapes
//! - [`related_managers`] - Querysets over the rows related to one instance

pub mod builder;
pub mod compiler;
pub mod expressions;
pub mod joins;
pub mod lookups;
pub mod queryset;
pub mod related_managers;
pub mod where_node;

#[cfg(test)]
pub(crate) mod test_models;

pub use builder::{AggregationPlan, Annotation, GroupBy, OrderBy, Query, LOOKUP_SEP};
pub use compiler::SqlCompiler;
pub use expressions::{AggregateFunc, Expression};
pub use joins::{Join, JoinPromoter, JoinType};
pub use lookups::{Lookup, LookupType, Q};
pub use queryset::{QuerySet, Record};
pub use related_managers::RelatedManager;
pub use where_node::{Connector, WhereNode};
