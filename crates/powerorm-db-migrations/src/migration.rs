//! Migration structs and dependency graph.
//!
//! A [`Migration`] is a named unit of schema change containing a sequence of
//! [`Operation`]s. The [`MigrationGraph`] manages the dependency DAG between
//! migrations across all apps and answers the ancestor, descendant, root and
//! leaf questions the loader and the executor ask.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use powerorm_core::{OrmError, OrmResult};

use crate::operations::Operation;
use crate::schema_editor::SchemaEditor;
use crate::state::ProjectState;

/// `(app_label, migration name)`.
pub type MigrationKey = (String, String);

/// A single migration containing a sequence of operations.
///
/// Migrations are identified by `(app_label, name)` and may declare
/// dependencies on other migrations. Operations within a migration
/// are applied in order.
#[derive(Debug)]
pub struct Migration {
    /// The migration name (e.g., "0001_initial").
    pub name: String,
    /// The application label this migration belongs to.
    pub app_label: String,
    /// Dependencies on other migrations: `(app_label, migration_name)`.
    pub dependencies: Vec<MigrationKey>,
    /// The operations to apply, in order.
    pub operations: Vec<Box<dyn Operation>>,
    /// Whether this is the initial migration for the app.
    pub initial: bool,
}

impl Migration {
    /// Creates a new migration.
    pub fn new(app_label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            app_label: app_label.into(),
            dependencies: Vec::new(),
            operations: Vec::new(),
            initial: false,
        }
    }

    /// Marks this migration as the initial migration.
    #[must_use]
    pub const fn initial(mut self) -> Self {
        self.initial = true;
        self
    }

    /// Adds a dependency on another migration.
    #[must_use]
    pub fn depends_on(mut self, app_label: impl Into<String>, name: impl Into<String>) -> Self {
        self.dependencies.push((app_label.into(), name.into()));
        self
    }

    /// Adds an operation to this migration.
    #[must_use]
    pub fn add_operation(mut self, op: impl Operation + 'static) -> Self {
        self.operations.push(Box::new(op));
        self
    }

    /// Returns the `(app_label, name)` key for this migration.
    pub fn key(&self) -> MigrationKey {
        (self.app_label.clone(), self.name.clone())
    }

    /// The state after this migration, without touching the database.
    pub fn mutate_state(&self, state: &ProjectState) -> OrmResult<ProjectState> {
        let mut state = state.clone();
        for op in &self.operations {
            op.state_forwards(&self.app_label, &mut state)?;
        }
        Ok(state)
    }

    /// Runs every operation forwards against `editor`, starting from
    /// `state`, and returns the resulting state.
    pub fn apply(&self, state: &ProjectState, editor: &mut SchemaEditor<'_>) -> OrmResult<ProjectState> {
        let mut state = state.clone();
        for op in &self.operations {
            let old_state = state.clone();
            op.state_forwards(&self.app_label, &mut state)?;
            op.database_forwards(&self.app_label, editor, &old_state, &state)?;
        }
        Ok(state)
    }

    /// Reverses every operation, last first. `state` is the state before
    /// this migration; each operation is undone between its own before and
    /// after states. Returns `state`.
    pub fn unapply(&self, state: &ProjectState, editor: &mut SchemaEditor<'_>) -> OrmResult<ProjectState> {
        if let Some(op) = self.operations.iter().find(|op| !op.reversible()) {
            return Err(OrmError::IrreversibleError(format!(
                "Operation {} in {self} is not reversible",
                op.describe()
            )));
        }

        let mut steps = Vec::with_capacity(self.operations.len());
        let mut current = state.clone();
        for op in &self.operations {
            let before = current.clone();
            op.state_forwards(&self.app_label, &mut current)?;
            steps.push((op, before, current.clone()));
        }
        for (op, before, after) in steps.iter().rev() {
            op.database_backwards(&self.app_label, editor, after, before)?;
        }
        Ok(state.clone())
    }
}

impl fmt::Display for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_label, self.name)
    }
}

fn missing(key: &MigrationKey, origin: &str) -> OrmError {
    OrmError::node_not_found(&key.0, &key.1, origin)
}

/// A directed acyclic graph (DAG) of migrations.
///
/// Edges point from a migration to the migrations it depends on (parents)
/// and back (children). Every traversal is ordered so the same graph always
/// yields the same plan.
#[derive(Debug, Default)]
pub struct MigrationGraph {
    nodes: BTreeMap<MigrationKey, Rc<Migration>>,
    parents: BTreeMap<MigrationKey, BTreeSet<MigrationKey>>,
    children: BTreeMap<MigrationKey, BTreeSet<MigrationKey>>,
}

impl MigrationGraph {
    /// Creates a new empty migration graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a graph from migrations, wiring their declared dependencies.
    pub fn from_migrations(migrations: impl IntoIterator<Item = Migration>) -> OrmResult<Self> {
        let mut graph = Self::new();
        let mut edges = Vec::new();
        for migration in migrations {
            let key = migration.key();
            edges.extend(migration.dependencies.iter().map(|dep| (key.clone(), dep.clone())));
            graph.add_node(migration)?;
        }
        for (child, parent) in edges {
            graph.add_dependency(&child, &parent)?;
        }
        graph.validate()?;
        Ok(graph)
    }

    /// Adds a migration to the graph.
    pub fn add_node(&mut self, migration: Migration) -> OrmResult<()> {
        let key = migration.key();
        if self.nodes.contains_key(&key) {
            return Err(OrmError::ValueError(format!(
                "Duplicate migration {}.{}",
                key.0, key.1
            )));
        }
        self.parents.entry(key.clone()).or_default();
        self.children.entry(key.clone()).or_default();
        self.nodes.insert(key, Rc::new(migration));
        Ok(())
    }

    /// Adds a dependency edge: `child` depends on `parent`.
    ///
    /// Both nodes must have been added previously.
    pub fn add_dependency(&mut self, child: &MigrationKey, parent: &MigrationKey) -> OrmResult<()> {
        if !self.nodes.contains_key(child) {
            return Err(missing(child, &format!("dependency on {}.{}", parent.0, parent.1)));
        }
        if !self.nodes.contains_key(parent) {
            return Err(missing(parent, &format!("{}.{}", child.0, child.1)));
        }
        self.parents.entry(child.clone()).or_default().insert(parent.clone());
        self.children.entry(parent.clone()).or_default().insert(child.clone());
        Ok(())
    }

    /// The migration stored under `key`.
    pub fn get_migration(&self, key: &MigrationKey) -> OrmResult<Rc<Migration>> {
        self.nodes
            .get(key)
            .cloned()
            .ok_or_else(|| missing(key, "migration graph"))
    }

    /// Post-order walk along `edges` from `start`, `start` last.
    fn walk(
        &self,
        start: &MigrationKey,
        edges: &BTreeMap<MigrationKey, BTreeSet<MigrationKey>>,
    ) -> OrmResult<Vec<MigrationKey>> {
        if !self.nodes.contains_key(start) {
            return Err(missing(start, "migration graph"));
        }
        let mut visited = BTreeSet::new();
        let mut order = Vec::new();
        let mut stack = vec![(start.clone(), false)];
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                order.push(node);
                continue;
            }
            if !visited.insert(node.clone()) {
                continue;
            }
            stack.push((node.clone(), true));
            if let Some(next) = edges.get(&node) {
                stack.extend(
                    next.iter()
                        .rev()
                        .filter(|n| !visited.contains(*n))
                        .map(|n| (n.clone(), false)),
                );
            }
        }
        Ok(order)
    }

    /// `target` and everything it depends on, dependencies first.
    pub fn forwards_plan(&self, target: &MigrationKey) -> OrmResult<Vec<MigrationKey>> {
        self.walk(target, &self.parents)
    }

    /// `target` and everything depending on it, deepest dependents first.
    pub fn backwards_plan(&self, target: &MigrationKey) -> OrmResult<Vec<MigrationKey>> {
        self.walk(target, &self.children)
    }

    /// Returns all migrations in topological order (dependencies first).
    ///
    /// Returns an error if the graph contains a cycle.
    pub fn topological_order(&self) -> OrmResult<Vec<MigrationKey>> {
        let mut in_degree: BTreeMap<&MigrationKey, usize> = self
            .nodes
            .keys()
            .map(|k| (k, self.parents.get(k).map_or(0, BTreeSet::len)))
            .collect();

        let mut queue: VecDeque<MigrationKey> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(k, _)| (*k).clone())
            .collect();

        let mut result = Vec::new();
        while let Some(node) = queue.pop_front() {
            if let Some(children) = self.children.get(&node) {
                for child in children {
                    if let Some(deg) = in_degree.get_mut(child) {
                        *deg -= 1;
                        if *deg == 0 {
                            queue.push_back(child.clone());
                        }
                    }
                }
            }
            result.push(node);
        }

        if result.len() != self.nodes.len() {
            return Err(OrmError::InconsistentMigrationHistory(
                "Circular dependency detected in migration graph".to_string(),
            ));
        }
        Ok(result)
    }

    /// Migrations with no dependency inside their own app. All apps when
    /// `app_label` is `None`.
    pub fn root_nodes(&self, app_label: Option<&str>) -> Vec<MigrationKey> {
        self.edge_free(app_label, &self.parents)
    }

    /// Migrations nothing in their own app depends on. All apps when
    /// `app_label` is `None`.
    pub fn leaf_nodes(&self, app_label: Option<&str>) -> Vec<MigrationKey> {
        self.edge_free(app_label, &self.children)
    }

    fn edge_free(
        &self,
        app_label: Option<&str>,
        edges: &BTreeMap<MigrationKey, BTreeSet<MigrationKey>>,
    ) -> Vec<MigrationKey> {
        self.nodes
            .keys()
            .filter(|k| app_label.map_or(true, |app| k.0 == app))
            .filter(|k| {
                edges
                    .get(*k)
                    .map_or(true, |next| next.iter().all(|n| n.0 != k.0))
            })
            .cloned()
            .collect()
    }

    /// Every app label with at least one migration.
    pub fn apps(&self) -> BTreeSet<String> {
        self.nodes.keys().map(|k| k.0.clone()).collect()
    }

    /// Returns all node keys in the graph, in key order.
    pub fn node_keys(&self) -> Vec<MigrationKey> {
        self.nodes.keys().cloned().collect()
    }

    /// Returns the number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns whether the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns whether the graph contains a given node.
    pub fn contains(&self, key: &MigrationKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// Returns the direct dependencies of a node.
    pub fn dependencies(&self, key: &MigrationKey) -> Vec<MigrationKey> {
        self.parents
            .get(key)
            .map(|p| p.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the direct dependents of a node.
    pub fn dependents(&self, key: &MigrationKey) -> Vec<MigrationKey> {
        self.children
            .get(key)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Validates that the graph has no cycles.
    pub fn validate(&self) -> OrmResult<()> {
        self.topological_order().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::RunSql;

    fn key(app: &str, name: &str) -> MigrationKey {
        (app.into(), name.into())
    }

    /// blog: 0001 <- 0002 <- 0003; auth: 0001; blog.0002 depends on auth.0001.
    fn sample() -> MigrationGraph {
        MigrationGraph::from_migrations([
            Migration::new("blog", "0001_initial").initial(),
            Migration::new("blog", "0002_post")
                .depends_on("blog", "0001_initial")
                .depends_on("auth", "0001_initial"),
            Migration::new("blog", "0003_tags").depends_on("blog", "0002_post"),
            Migration::new("auth", "0001_initial").initial(),
        ])
        .unwrap()
    }

    // ── Migration tests ─────────────────────────────────────────────

    #[test]
    fn test_migration_new() {
        let m = Migration::new("blog", "0001_initial");
        assert_eq!(m.app_label, "blog");
        assert_eq!(m.name, "0001_initial");
        assert!(!m.initial);
        assert!(m.dependencies.is_empty());
        assert!(m.operations.is_empty());
    }

    #[test]
    fn test_migration_depends_on() {
        let m = Migration::new("blog", "0002_add_author")
            .depends_on("blog", "0001_initial")
            .depends_on("auth", "0001_initial");
        assert_eq!(m.dependencies.len(), 2);
        assert_eq!(m.key(), key("blog", "0002_add_author"));
        assert_eq!(m.to_string(), "blog.0002_add_author");
    }

    #[test]
    fn test_unapply_irreversible() {
        let m = Migration::new("blog", "0001_initial").add_operation(RunSql::new(["SELECT 1"]));
        let mut editor =
            SchemaEditor::collect_only(powerorm_db::DatabaseBackendType::SQLite);
        let err = m.unapply(&ProjectState::new(), &mut editor).unwrap_err();
        assert!(matches!(err, OrmError::IrreversibleError(_)));
        assert!(editor.collected_sql().is_empty());
    }

    #[test]
    fn test_unapply_runs_operations_in_reverse() {
        let m = Migration::new("blog", "0001_initial")
            .add_operation(RunSql::new(["A1"]).reverse(["A2"]))
            .add_operation(RunSql::new(["B1"]).reverse(["B2"]));
        let mut editor =
            SchemaEditor::collect_only(powerorm_db::DatabaseBackendType::SQLite);
        m.apply(&ProjectState::new(), &mut editor).unwrap();
        m.unapply(&ProjectState::new(), &mut editor).unwrap();
        assert_eq!(editor.collected_sql(), ["A1", "B1", "B2", "A2"]);
    }

    // ── MigrationGraph tests ────────────────────────────────────────

    #[test]
    fn test_graph_new() {
        let g = MigrationGraph::new();
        assert!(g.is_empty());
        assert_eq!(g.len(), 0);
    }

    #[test]
    fn test_graph_duplicate_node() {
        let mut g = MigrationGraph::new();
        g.add_node(Migration::new("blog", "0001_initial")).unwrap();
        assert!(g.add_node(Migration::new("blog", "0001_initial")).is_err());
    }

    #[test]
    fn test_graph_missing_dependency() {
        let err = MigrationGraph::from_migrations([
            Migration::new("blog", "0002_post").depends_on("blog", "0001_initial"),
        ])
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Node not found: blog.0001_initial (referenced by blog.0002_post)"
        );
    }

    #[test]
    fn test_graph_forwards_plan() {
        let g = sample();
        assert_eq!(
            g.forwards_plan(&key("blog", "0003_tags")).unwrap(),
            vec![
                key("auth", "0001_initial"),
                key("blog", "0001_initial"),
                key("blog", "0002_post"),
                key("blog", "0003_tags"),
            ]
        );
    }

    #[test]
    fn test_graph_backwards_plan() {
        let g = sample();
        assert_eq!(
            g.backwards_plan(&key("auth", "0001_initial")).unwrap(),
            vec![
                key("blog", "0003_tags"),
                key("blog", "0002_post"),
                key("auth", "0001_initial"),
            ]
        );
    }

    #[test]
    fn test_graph_plan_unknown_node() {
        let g = sample();
        assert!(matches!(
            g.forwards_plan(&key("blog", "0009_nope")),
            Err(OrmError::NodeNotFound { .. })
        ));
    }

    #[test]
    fn test_graph_diamond_visits_once() {
        let g = MigrationGraph::from_migrations([
            Migration::new("a", "0001"),
            Migration::new("a", "0002").depends_on("a", "0001"),
            Migration::new("a", "0003").depends_on("a", "0001"),
            Migration::new("a", "0004")
                .depends_on("a", "0002")
                .depends_on("a", "0003"),
        ])
        .unwrap();
        let plan = g.forwards_plan(&key("a", "0004")).unwrap();
        assert_eq!(plan.len(), 4);
        assert_eq!(plan[0], key("a", "0001"));
        assert_eq!(plan[3], key("a", "0004"));
    }

    #[test]
    fn test_graph_roots_and_leaves_are_per_app() {
        let g = sample();
        assert_eq!(g.root_nodes(Some("blog")), vec![key("blog", "0001_initial")]);
        assert_eq!(g.leaf_nodes(Some("blog")), vec![key("blog", "0003_tags")]);
        assert_eq!(g.leaf_nodes(Some("auth")), vec![key("auth", "0001_initial")]);
        assert_eq!(g.root_nodes(None).len(), 2);
        assert_eq!(g.leaf_nodes(None).len(), 2);
    }

    #[test]
    fn test_graph_topological_order() {
        let order = sample().topological_order().unwrap();
        let pos = |k: MigrationKey| order.iter().position(|o| *o == k).unwrap();
        assert!(pos(key("auth", "0001_initial")) < pos(key("blog", "0002_post")));
        assert!(pos(key("blog", "0002_post")) < pos(key("blog", "0003_tags")));
    }

    #[test]
    fn test_graph_cycle_detected() {
        let err = MigrationGraph::from_migrations([
            Migration::new("a", "0001").depends_on("a", "0002"),
            Migration::new("a", "0002").depends_on("a", "0001"),
        ])
        .unwrap_err();
        assert!(matches!(err, OrmError::InconsistentMigrationHistory(_)));
    }

    #[test]
    fn test_graph_dependencies_and_dependents() {
        let g = sample();
        let post = key("blog", "0002_post");
        assert_eq!(g.dependencies(&post).len(), 2);
        assert_eq!(g.dependents(&post), vec![key("blog", "0003_tags")]);
        assert_eq!(g.apps().len(), 2);
        assert_eq!(g.get_migration(&post).unwrap().name, "0002_post");
    }
}
