//! Query expressions and aggregates.
//!
//! This module provides the [`Expression`] enum for building computed values,
//! annotations, and aggregates in queries.

pub mod core;

pub use self::core::{AggregateFunc, Expression};
