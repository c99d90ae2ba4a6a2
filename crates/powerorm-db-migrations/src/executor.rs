//! Migration execution engine.
//!
//! The [`MigrationExecutor`] computes a [`MigrationPlan`] from per-app
//! targets and the applied set, then runs it in two phases:
//!
//! 1. The full plan a brand-new database would run is replayed in memory to
//!    snapshot the [`ProjectState`] right before every migration in the real
//!    plan. Operations need the whole historical schema, not just their own
//!    delta, to produce correct DDL.
//! 2. The real plan is executed against the live schema editor, each
//!    migration inside its own transaction together with its recorder write.
//!
//! The first failure aborts the rest of the plan. Migrations already run in
//! the same invocation stay applied.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::Write;
use std::rc::Rc;

use powerorm_core::logging::migration_span;
use powerorm_core::{OrmError, OrmResult};
use powerorm_db::connection::Connection;

use crate::loader::MigrationLoader;
use crate::migration::{Migration, MigrationKey};
use crate::recorder::MigrationRecorder;
use crate::schema_editor::SchemaEditor;
use crate::state::ProjectState;

/// Where an app should end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationTarget {
    /// Unwind every migration.
    Zero,
    /// Migrate (forwards or backwards) to exactly this migration.
    Name(String),
}

impl MigrationTarget {
    /// `"zero"` is [`MigrationTarget::Zero`], anything else a name.
    pub fn parse(s: &str) -> Self {
        if s == "zero" {
            Self::Zero
        } else {
            Self::Name(s.to_string())
        }
    }
}

impl fmt::Display for MigrationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zero => f.write_str("zero"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// A single step in a migration plan.
#[derive(Debug, Clone)]
pub struct MigrationStep {
    /// The migration to run.
    pub migration: Rc<Migration>,
    /// If `true`, this step reverses the migration.
    pub backwards: bool,
}

impl MigrationStep {
    /// The migration's `(app_label, name)`.
    pub fn key(&self) -> MigrationKey {
        self.migration.key()
    }
}

/// An ordered list of steps; nothing still applied ever depends on a
/// migration unapplied before it.
#[derive(Debug, Clone, Default)]
pub struct MigrationPlan {
    /// The ordered steps to execute.
    pub steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    /// Returns whether the plan is empty.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// `(app, name, backwards)` for every step.
    pub fn keys(&self) -> Vec<(String, String, bool)> {
        self.steps
            .iter()
            .map(|s| (s.migration.app_label.clone(), s.migration.name.clone(), s.backwards))
            .collect()
    }
}

/// Plans and runs migrations against one connection.
pub struct MigrationExecutor<'a> {
    connection: &'a dyn Connection,
    loader: MigrationLoader,
    recorder: MigrationRecorder<'a>,
}

impl fmt::Debug for MigrationExecutor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationExecutor")
            .field("vendor", &self.connection.vendor())
            .field("loader", &self.loader)
            .finish_non_exhaustive()
    }
}

impl<'a> MigrationExecutor<'a> {
    /// An executor over `loader`'s graph. The applied set is read from the
    /// database.
    pub fn new(connection: &'a dyn Connection, mut loader: MigrationLoader) -> OrmResult<Self> {
        let recorder = MigrationRecorder::new(connection)?;
        loader.load_applied(&recorder)?;
        Ok(Self {
            connection,
            loader,
            recorder,
        })
    }

    /// The loader, with the applied set kept current by [`migrate`](Self::migrate).
    pub const fn loader(&self) -> &MigrationLoader {
        &self.loader
    }

    /// The recorder.
    pub const fn recorder(&self) -> &MigrationRecorder<'a> {
        &self.recorder
    }

    /// Computes the steps that bring every app to its target.
    ///
    /// With `clean_start` the applied set is taken to be empty.
    pub fn migration_plan(
        &self,
        targets: &[(String, MigrationTarget)],
        clean_start: bool,
    ) -> OrmResult<MigrationPlan> {
        let graph = self.loader.graph();
        let mut applied: BTreeSet<MigrationKey> = if clean_start {
            BTreeSet::new()
        } else {
            self.loader.applied().clone()
        };
        let mut plan = MigrationPlan::default();
        let unapply = |plan: &mut MigrationPlan, applied: &mut BTreeSet<MigrationKey>, from: &MigrationKey| {
            for key in graph.backwards_plan(from)? {
                if applied.remove(&key) {
                    plan.steps.push(MigrationStep {
                        migration: graph.get_migration(&key)?,
                        backwards: true,
                    });
                }
            }
            Ok::<_, OrmError>(())
        };

        for (app_label, target) in targets {
            match target {
                MigrationTarget::Zero => {
                    for root in graph.root_nodes(None) {
                        unapply(&mut plan, &mut applied, &root)?;
                    }
                }
                MigrationTarget::Name(name) => {
                    let key = (app_label.clone(), name.clone());
                    if !graph.contains(&key) {
                        return Err(OrmError::node_not_found(app_label, name, "migration target"));
                    }
                    if applied.contains(&key) {
                        for child in graph.dependents(&key) {
                            unapply(&mut plan, &mut applied, &child)?;
                        }
                    } else {
                        for key in graph.forwards_plan(&key)? {
                            if applied.insert(key.clone()) {
                                plan.steps.push(MigrationStep {
                                    migration: graph.get_migration(&key)?,
                                    backwards: false,
                                });
                            }
                        }
                    }
                }
            }
        }
        Ok(plan)
    }

    /// Targets putting every app at its latest migration(s).
    pub fn leaf_targets(&self) -> Vec<(String, MigrationTarget)> {
        self.loader
            .graph()
            .leaf_nodes(None)
            .into_iter()
            .map(|(app, name)| (app, MigrationTarget::Name(name)))
            .collect()
    }

    /// The state right before each migration of `plan`, taken from the
    /// clean-start replay of the whole graph.
    fn pre_migration_states(&self, plan: &MigrationPlan) -> OrmResult<BTreeMap<MigrationKey, ProjectState>> {
        let full_plan = self.migration_plan(&self.leaf_targets(), true)?;
        let mut pending: BTreeSet<MigrationKey> = plan.steps.iter().map(MigrationStep::key).collect();
        let mut states = BTreeMap::new();
        let mut state = self.loader.empty_state();
        for step in &full_plan.steps {
            if pending.is_empty() {
                break;
            }
            let key = step.key();
            if pending.remove(&key) {
                states.insert(key, state.clone());
            }
            state = step.migration.mutate_state(&state)?;
        }
        Ok(states)
    }

    /// Runs `plan` (computed from `targets` when `None`), writing a status
    /// line per migration to `out`. A `fake` run only updates the recorder.
    pub fn migrate(
        &mut self,
        targets: &[(String, MigrationTarget)],
        plan: Option<MigrationPlan>,
        fake: bool,
        out: &mut dyn Write,
    ) -> OrmResult<()> {
        self.loader.check_consistent_history()?;
        let plan = match plan {
            Some(plan) => plan,
            None => self.migration_plan(targets, false)?,
        };
        if plan.is_empty() {
            tracing::info!("no migrations to apply");
            return Ok(());
        }
        self.recorder.ensure_schema()?;

        let states = self.pre_migration_states(&plan)?;
        for step in &plan.steps {
            let key = step.key();
            let state = states
                .get(&key)
                .ok_or_else(|| OrmError::node_not_found(&key.0, &key.1, "migration plan"))?;
            if step.backwards {
                self.unapply_migration(state, &step.migration, fake, out)?;
                self.loader.mark_unapplied(&key);
            } else {
                self.apply_migration(state, &step.migration, fake, out)?;
                self.loader.mark_applied(key);
            }
        }
        Ok(())
    }

    /// Applies one migration from `state`, the state right before it.
    pub fn apply_migration(
        &self,
        state: &ProjectState,
        migration: &Migration,
        fake: bool,
        out: &mut dyn Write,
    ) -> OrmResult<()> {
        let span = migration_span(&migration.app_label, &migration.name);
        let _enter = span.enter();
        write!(out, " Applying {migration}...")?;
        out.flush()?;
        if fake {
            self.recorder.record_applied(&migration.app_label, &migration.name)?;
        } else {
            let mut editor = SchemaEditor::new(self.connection);
            editor.atomic(|editor| {
                migration.apply(state, editor)?;
                self.recorder.record_applied(&migration.app_label, &migration.name)
            })?;
        }
        writeln!(out, "{}", if fake { "FAKED" } else { "OK" })?;
        tracing::info!(fake, "applied migration");
        Ok(())
    }

    /// Unapplies one migration. `state` is the state right before it.
    pub fn unapply_migration(
        &self,
        state: &ProjectState,
        migration: &Migration,
        fake: bool,
        out: &mut dyn Write,
    ) -> OrmResult<()> {
        let span = migration_span(&migration.app_label, &migration.name);
        let _enter = span.enter();
        write!(out, " UnApplying {migration}...")?;
        out.flush()?;
        if fake {
            self.recorder.record_unapplied(&migration.app_label, &migration.name)?;
        } else {
            let mut editor = SchemaEditor::new(self.connection);
            editor.atomic(|editor| {
                migration.unapply(state, editor)?;
                self.recorder.record_unapplied(&migration.app_label, &migration.name)
            })?;
        }
        writeln!(out, "{}", if fake { "FAKED" } else { "OK" })?;
        tracing::info!(fake, "unapplied migration");
        Ok(())
    }

    /// The statements `plan` would execute. Nothing runs.
    pub fn sql_for_plan(&self, plan: &MigrationPlan) -> OrmResult<Vec<String>> {
        let mut statements = Vec::new();
        for step in &plan.steps {
            let state = self.loader.project_state(&[step.key()], false)?;
            let mut editor = SchemaEditor::collect_only(self.connection.backend_type());
            if step.backwards {
                step.migration.unapply(&state, &mut editor)?;
            } else {
                step.migration.apply(&state, &mut editor)?;
            }
            statements.extend(editor.into_collected());
        }
        Ok(statements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::{AddField, CreateModel, RunSql};
    use powerorm_db::fields::{FieldDef, FieldType, OnDelete};
    use powerorm_db_backends::SqliteConnection;

    fn key(app: &str, name: &str) -> MigrationKey {
        (app.into(), name.into())
    }

    fn name(app: &str, name: &str) -> (String, MigrationTarget) {
        (app.into(), MigrationTarget::Name(name.into()))
    }

    /// auth: 0001; blog: 0001 -> 0002, blog.0001 depends on auth.0001.
    fn loader() -> MigrationLoader {
        MigrationLoader::new(vec![
            Migration::new("auth", "0001_initial").initial().add_operation(CreateModel::new(
                "User",
                vec![FieldDef::new("username", FieldType::CharField).max_length(150)],
            )),
            Migration::new("blog", "0001_initial")
                .initial()
                .depends_on("auth", "0001_initial")
                .add_operation(CreateModel::new(
                    "Post",
                    vec![
                        FieldDef::new("title", FieldType::CharField).max_length(100),
                        FieldDef::foreign_key("author", "auth.User", OnDelete::Cascade),
                    ],
                )),
            Migration::new("blog", "0002_body")
                .depends_on("blog", "0001_initial")
                .add_operation(AddField::new(
                    "Post",
                    FieldDef::new("body", FieldType::TextField).nullable(),
                )),
        ])
        .unwrap()
    }

    #[test]
    fn test_target_parse() {
        assert_eq!(MigrationTarget::parse("zero"), MigrationTarget::Zero);
        assert_eq!(
            MigrationTarget::parse("0001_initial"),
            MigrationTarget::Name("0001_initial".into())
        );
        assert_eq!(MigrationTarget::Zero.to_string(), "zero");
    }

    #[test]
    fn test_forward_plan_includes_dependencies() {
        let conn = SqliteConnection::memory().unwrap();
        let executor = MigrationExecutor::new(&conn, loader()).unwrap();
        let plan = executor.migration_plan(&[name("blog", "0002_body")], false).unwrap();
        assert_eq!(
            plan.keys(),
            vec![
                ("auth".into(), "0001_initial".into(), false),
                ("blog".into(), "0001_initial".into(), false),
                ("blog".into(), "0002_body".into(), false),
            ]
        );
    }

    #[test]
    fn test_unknown_target() {
        let conn = SqliteConnection::memory().unwrap();
        let executor = MigrationExecutor::new(&conn, loader()).unwrap();
        let err = executor.migration_plan(&[name("blog", "0009_nope")], false).unwrap_err();
        assert!(matches!(err, OrmError::NodeNotFound { .. }));
    }

    #[test]
    fn test_migrate_and_rollback() {
        let conn = SqliteConnection::memory().unwrap();
        let mut executor = MigrationExecutor::new(&conn, loader()).unwrap();
        let mut out = Vec::new();
        executor
            .migrate(&[name("blog", "0002_body")], None, false, &mut out)
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            " Applying auth.0001_initial...OK\n \
             Applying blog.0001_initial...OK\n \
             Applying blog.0002_body...OK\n"
        );
        assert_eq!(executor.loader().applied().len(), 3);
        assert_eq!(executor.recorder().applied_migrations().unwrap().len(), 3);

        let plan = executor.migration_plan(&[name("blog", "0001_initial")], false).unwrap();
        assert_eq!(plan.keys(), vec![("blog".into(), "0002_body".into(), true)]);

        let mut out = Vec::new();
        executor.migrate(&[], Some(plan), false, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), " UnApplying blog.0002_body...OK\n");
        assert!(!executor.loader().is_applied(&key("blog", "0002_body")));
        assert!(conn.table_names().unwrap().contains(&"blog_post".to_string()));
    }

    #[test]
    fn test_zero_unwinds_dependents_first() {
        let conn = SqliteConnection::memory().unwrap();
        let mut executor = MigrationExecutor::new(&conn, loader()).unwrap();
        let targets = executor.leaf_targets();
        executor.migrate(&targets, None, false, &mut Vec::new()).unwrap();
        let plan = executor
            .migration_plan(&[("auth".into(), MigrationTarget::Zero)], false)
            .unwrap();
        assert_eq!(
            plan.keys(),
            vec![
                ("blog".into(), "0002_body".into(), true),
                ("blog".into(), "0001_initial".into(), true),
                ("auth".into(), "0001_initial".into(), true),
            ]
        );
        executor.migrate(&[], Some(plan), false, &mut Vec::new()).unwrap();
        assert!(executor.loader().applied().is_empty());
        assert_eq!(conn.table_names().unwrap(), vec!["powerorm_migrations".to_string()]);
    }

    #[test]
    fn test_fake_records_without_ddl() {
        let conn = SqliteConnection::memory().unwrap();
        let mut executor = MigrationExecutor::new(&conn, loader()).unwrap();
        let mut out = Vec::new();
        executor
            .migrate(&[name("auth", "0001_initial")], None, true, &mut out)
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), " Applying auth.0001_initial...FAKED\n");
        assert!(!conn.table_names().unwrap().contains(&"auth_user".to_string()));
        assert!(executor.loader().is_applied(&key("auth", "0001_initial")));
    }

    #[test]
    fn test_sql_for_plan_executes_nothing() {
        let conn = SqliteConnection::memory().unwrap();
        let executor = MigrationExecutor::new(&conn, loader()).unwrap();
        let plan = executor.migration_plan(&[name("auth", "0001_initial")], false).unwrap();
        let sql = executor.sql_for_plan(&plan).unwrap();
        assert_eq!(
            sql,
            vec![
                "CREATE TABLE \"auth_user\" (\"id\" INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT, \
                 \"username\" TEXT NOT NULL)"
                    .to_string()
            ]
        );
        assert!(conn.table_names().unwrap().is_empty());
    }

    #[test]
    fn test_failure_aborts_remaining_plan() {
        let conn = SqliteConnection::memory().unwrap();
        let loader = MigrationLoader::new(vec![
            Migration::new("app", "0001_ok").add_operation(RunSql::new(["CREATE TABLE a (x INTEGER)"])),
            Migration::new("app", "0002_bad")
                .depends_on("app", "0001_ok")
                .add_operation(RunSql::new(["CREATE TABLE a (x INTEGER)"])),
            Migration::new("app", "0003_never")
                .depends_on("app", "0002_bad")
                .add_operation(RunSql::new(["CREATE TABLE c (x INTEGER)"])),
        ])
        .unwrap();
        let mut executor = MigrationExecutor::new(&conn, loader).unwrap();
        let mut out = Vec::new();
        let result = executor.migrate(&[name("app", "0003_never")], None, false, &mut out);
        assert!(result.is_err());
        let applied = executor.recorder().applied_migrations().unwrap();
        assert_eq!(applied, BTreeSet::from([key("app", "0001_ok")]));
        assert!(!conn.table_names().unwrap().contains(&"c".to_string()));
    }
}
