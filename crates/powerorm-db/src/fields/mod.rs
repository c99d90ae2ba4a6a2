//! Field definitions and types for the ORM.
//!
//! This module provides the [`FieldDef`] struct and [`FieldType`] enum that
//! describe model fields and their database column mappings, plus the
//! naming rules for synthesized many-to-many join tables.

pub mod types;

pub use types::{FieldDef, FieldType, OnDelete};

/// Maximum identifier length used when naming synthesized join tables.
pub const MAX_JOIN_TABLE_NAME: usize = 30;

/// Table name of the join table behind a many-to-many field.
///
/// `<model table>_<field>` cut to [`MAX_JOIN_TABLE_NAME`] characters, unless
/// the field names its own table.
pub fn m2m_db_table(model_table: &str, field: &FieldDef) -> String {
    if let FieldType::ManyToManyField {
        db_table: Some(ref table),
        ..
    } = field.field_type
    {
        return table.clone();
    }
    format!("{model_table}_{}", field.name)
        .chars()
        .take(MAX_JOIN_TABLE_NAME)
        .collect()
}

/// Field names of the two foreign keys on a synthesized join table.
///
/// Lowercased endpoint model names, prefixed with `from_`/`to_` for
/// self-referential relations.
pub fn m2m_field_names(from_model: &str, to_model: &str) -> (String, String) {
    let from = from_model.to_lowercase();
    let to = to_model.to_lowercase();
    if from == to {
        (format!("from_{from}"), format!("to_{to}"))
    } else {
        (from, to)
    }
}
