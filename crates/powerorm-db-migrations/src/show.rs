//! Listing of migrations with their applied status.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use powerorm_core::OrmResult;

use crate::loader::MigrationLoader;

/// One migration in the listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    /// The migration name.
    pub name: String,
    /// Whether it is recorded as applied.
    pub applied: bool,
}

/// Every app's migrations in dependency order, restricted to the app's own
/// nodes, with their status.
pub fn show_migrations(loader: &MigrationLoader) -> OrmResult<BTreeMap<String, Vec<MigrationStatus>>> {
    let graph = loader.graph();
    let mut listing = BTreeMap::new();
    for app in graph.apps() {
        let mut entries: Vec<MigrationStatus> = Vec::new();
        for leaf in graph.leaf_nodes(Some(&app)) {
            for key in graph.forwards_plan(&leaf)? {
                if key.0 != app || entries.iter().any(|e| e.name == key.1) {
                    continue;
                }
                entries.push(MigrationStatus {
                    applied: loader.is_applied(&key),
                    name: key.1,
                });
            }
        }
        listing.insert(app, entries);
    }
    Ok(listing)
}

/// Renders the listing as text, one block per app:
///
/// ```text
/// Blog
///   (applied) 0001_initial
///   (pending) 0002_body
/// ```
pub fn render_show_migrations(listing: &BTreeMap<String, Vec<MigrationStatus>>) -> String {
    let mut out = String::new();
    for (app, entries) in listing {
        let mut chars = app.chars();
        let title: String = chars
            .next()
            .map(|c| c.to_uppercase().chain(chars).collect())
            .unwrap_or_default();
        let _ = writeln!(out, "{title}");
        for entry in entries {
            let status = if entry.applied { "(applied)" } else { "(pending)" };
            let _ = writeln!(out, "  {status} {}", entry.name);
        }
    }
    out
}
