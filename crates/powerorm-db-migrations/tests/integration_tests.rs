//! Integration tests for the migration pipeline.
//!
//! These tests run migrations against in-memory SQLite databases and check
//! that:
//! - Tables, columns and join tables are created and dropped
//! - The `powerorm_migrations` table tracks applied migrations
//! - Forward, rollback and zero plans run in the right order
//! - Fake runs record without executing DDL
//! - Rows survive the SQLite table rebuilds
//! - Auto-detected migrations written to disk load back and apply cleanly

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use powerorm_core::{OrmError, Settings};
use powerorm_db::connection::Connection;
use powerorm_db::{FieldDef, FieldType, ModelMeta, OnDelete, Registry};
use powerorm_db_backends::SqliteConnection;
use powerorm_db_migrations::operations::{
    AddField, AlterField, CreateModel, RenameField, RenameModel, RunSql,
};
use powerorm_db_migrations::{
    render_show_migrations, show_migrations, Migration, MigrationAutodetector, MigrationExecutor,
    MigrationLoader, MigrationTarget, MigrationWriter, ProjectState, MIGRATIONS_TABLE,
};

// ── Fixtures ──────────────────────────────────────────────────────────

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn create_temp_dir() -> PathBuf {
    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "powerorm_integration_migrations_{}_{}",
        std::process::id(),
        id
    ));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn target(app: &str, name: &str) -> (String, MigrationTarget) {
    (app.into(), MigrationTarget::parse(name))
}

fn blog_migrations() -> Vec<Migration> {
    vec![
        Migration::new("blog", "0001_initial")
            .initial()
            .add_operation(CreateModel::new(
                "Author",
                vec![FieldDef::new("name", FieldType::CharField).max_length(50)],
            ))
            .add_operation(CreateModel::new(
                "Tag",
                vec![FieldDef::new("label", FieldType::CharField).max_length(30)],
            ))
            .add_operation(CreateModel::new(
                "Post",
                vec![
                    FieldDef::new("title", FieldType::CharField).max_length(100),
                    FieldDef::foreign_key("author", "Author", OnDelete::Cascade),
                    FieldDef::many_to_many("tags", "Tag"),
                ],
            )),
        Migration::new("blog", "0002_summary")
            .depends_on("blog", "0001_initial")
            .add_operation(AddField::new(
                "Post",
                FieldDef::new("summary", FieldType::TextField).nullable(),
            ))
            .add_operation(AlterField::new(
                "Post",
                FieldDef::new("title", FieldType::CharField).max_length(200),
            )),
        Migration::new("blog", "0003_headline")
            .depends_on("blog", "0002_summary")
            .add_operation(RenameField::new("Post", "title", "headline")),
    ]
}

fn executor(conn: &SqliteConnection) -> MigrationExecutor<'_> {
    MigrationExecutor::new(conn, MigrationLoader::new(blog_migrations()).unwrap()).unwrap()
}

fn columns(conn: &SqliteConnection, table: &str) -> Vec<String> {
    conn.query(&format!("PRAGMA table_info(\"{table}\")"), &[])
        .unwrap()
        .iter()
        .map(|row| row.get::<String>("name").unwrap())
        .collect()
}

fn tables(conn: &SqliteConnection) -> BTreeSet<String> {
    conn.table_names().unwrap().into_iter().collect()
}

fn count(conn: &SqliteConnection, table: &str) -> i64 {
    conn.query_one(&format!("SELECT COUNT(*) FROM \"{table}\""), &[])
        .unwrap()
        .get_by_index::<i64>(0)
        .unwrap()
}

// ── Forward ───────────────────────────────────────────────────────────

#[test]
fn test_migrate_creates_tables_and_join_table() {
    let conn = SqliteConnection::memory().unwrap();
    let mut executor = executor(&conn);
    executor
        .migrate(&[target("blog", "0001_initial")], None, false, &mut Vec::new())
        .unwrap();

    let expected: BTreeSet<String> = [
        "blog_author",
        "blog_post",
        "blog_post_tags",
        "blog_tag",
        MIGRATIONS_TABLE,
    ]
    .into_iter()
    .map(String::from)
    .collect();
    assert_eq!(tables(&conn), expected);
    assert_eq!(columns(&conn, "blog_post"), vec!["id", "title", "author_id"]);
    assert_eq!(columns(&conn, "blog_post_tags"), vec!["id", "post_id", "tag_id"]);
}

#[test]
fn test_migrate_to_leaf_keeps_rows() {
    let conn = SqliteConnection::memory().unwrap();
    let mut executor = executor(&conn);
    executor
        .migrate(&[target("blog", "0001_initial")], None, false, &mut Vec::new())
        .unwrap();
    conn.execute("INSERT INTO blog_author (name) VALUES ('Ann')", &[]).unwrap();
    conn.execute(
        "INSERT INTO blog_post (title, author_id) VALUES ('Hello', 1)",
        &[],
    )
    .unwrap();

    let mut out = Vec::new();
    executor
        .migrate(&[target("blog", "0003_headline")], None, false, &mut out)
        .unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        " Applying blog.0002_summary...OK\n Applying blog.0003_headline...OK\n"
    );
    assert_eq!(
        columns(&conn, "blog_post"),
        vec!["id", "headline", "author_id", "summary"]
    );
    let row = conn
        .query_one("SELECT headline, author_id FROM blog_post", &[])
        .unwrap();
    assert_eq!(row.get::<String>("headline").unwrap(), "Hello");
    assert_eq!(row.get::<i64>("author_id").unwrap(), 1);
}

#[test]
fn test_empty_plan_is_noop() {
    let conn = SqliteConnection::memory().unwrap();
    let mut executor = executor(&conn);
    let targets = executor.leaf_targets();
    executor.migrate(&targets, None, false, &mut Vec::new()).unwrap();
    let plan = executor.migration_plan(&targets, false).unwrap();
    assert!(plan.is_empty());

    let mut out = Vec::new();
    executor.migrate(&targets, None, false, &mut out).unwrap();
    assert!(out.is_empty());
}

// ── Backward ──────────────────────────────────────────────────────────

#[test]
fn test_rollback_to_target_restores_schema() {
    let conn = SqliteConnection::memory().unwrap();
    let mut executor = executor(&conn);
    executor
        .migrate(&[target("blog", "0003_headline")], None, false, &mut Vec::new())
        .unwrap();
    conn.execute("INSERT INTO blog_author (name) VALUES ('Ann')", &[]).unwrap();
    conn.execute(
        "INSERT INTO blog_post (headline, author_id, summary) VALUES ('Hello', 1, 'short')",
        &[],
    )
    .unwrap();

    let mut out = Vec::new();
    executor
        .migrate(&[target("blog", "0001_initial")], None, false, &mut out)
        .unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        " UnApplying blog.0003_headline...OK\n UnApplying blog.0002_summary...OK\n"
    );
    assert_eq!(columns(&conn, "blog_post"), vec!["id", "title", "author_id"]);
    assert_eq!(count(&conn, "blog_post"), 1);

    let applied = executor.recorder().applied_migrations().unwrap();
    assert_eq!(
        applied,
        BTreeSet::from([("blog".to_string(), "0001_initial".to_string())])
    );
}

#[test]
fn test_zero_unwinds_everything() {
    let conn = SqliteConnection::memory().unwrap();
    let mut executor = executor(&conn);
    let targets = executor.leaf_targets();
    executor.migrate(&targets, None, false, &mut Vec::new()).unwrap();

    executor
        .migrate(&[target("blog", "zero")], None, false, &mut Vec::new())
        .unwrap();
    assert_eq!(tables(&conn), BTreeSet::from([MIGRATIONS_TABLE.to_string()]));
    assert!(executor.loader().applied().is_empty());
    assert!(executor.recorder().applied_migrations().unwrap().is_empty());
}

#[test]
fn test_irreversible_migration_stops_rollback() {
    let conn = SqliteConnection::memory().unwrap();
    let loader = MigrationLoader::new(vec![
        Migration::new("app", "0001_initial")
            .add_operation(RunSql::new(["CREATE TABLE app_log (msg TEXT)"])),
    ])
    .unwrap();
    let mut executor = MigrationExecutor::new(&conn, loader).unwrap();
    executor
        .migrate(&[target("app", "0001_initial")], None, false, &mut Vec::new())
        .unwrap();

    let err = executor
        .migrate(&[target("app", "zero")], None, false, &mut Vec::new())
        .unwrap_err();
    assert!(matches!(err, OrmError::IrreversibleError(_)));
    assert!(tables(&conn).contains("app_log"));
    assert_eq!(executor.recorder().applied_migrations().unwrap().len(), 1);
}

#[test]
fn test_rename_model_keeps_relations() {
    let conn = SqliteConnection::memory().unwrap();
    let mut migrations = blog_migrations();
    migrations.push(
        Migration::new("blog", "0004_writer")
            .depends_on("blog", "0003_headline")
            .add_operation(RenameModel::new("Author", "Writer")),
    );
    let mut executor = MigrationExecutor::new(&conn, MigrationLoader::new(migrations).unwrap()).unwrap();
    let targets = executor.leaf_targets();
    executor.migrate(&targets, None, false, &mut Vec::new()).unwrap();
    assert!(tables(&conn).contains("blog_writer"));
    assert!(!tables(&conn).contains("blog_author"));

    let end = executor.loader().end_state().unwrap();
    let post = end.get_model("blog", "Post").unwrap();
    assert_eq!(post.get_field("author").unwrap().related_model(), Some("Writer"));

    executor
        .migrate(&[target("blog", "0003_headline")], None, false, &mut Vec::new())
        .unwrap();
    assert!(tables(&conn).contains("blog_author"));
}

// ── Fake / SQL preview / listing ─────────────────────────────────────

#[test]
fn test_fake_records_only() {
    let conn = SqliteConnection::memory().unwrap();
    let mut executor = executor(&conn);
    let mut out = Vec::new();
    executor
        .migrate(&[target("blog", "0002_summary")], None, true, &mut out)
        .unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        " Applying blog.0001_initial...FAKED\n Applying blog.0002_summary...FAKED\n"
    );
    assert_eq!(tables(&conn), BTreeSet::from([MIGRATIONS_TABLE.to_string()]));
    assert_eq!(executor.recorder().applied_migrations().unwrap().len(), 2);

    let mut out = Vec::new();
    executor
        .migrate(&[target("blog", "0001_initial")], None, true, &mut out)
        .unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        " UnApplying blog.0002_summary...FAKED\n"
    );
}

#[test]
fn test_sql_for_plan_collects_without_executing() {
    let conn = SqliteConnection::memory().unwrap();
    let executor = executor(&conn);
    let plan = executor
        .migration_plan(&[target("blog", "0001_initial")], false)
        .unwrap();
    let sql = executor.sql_for_plan(&plan).unwrap();
    assert!(sql[0].starts_with("CREATE TABLE \"blog_author\""));
    assert!(sql.iter().any(|s| s.starts_with("CREATE TABLE \"blog_post_tags\"")));
    assert!(conn.table_names().unwrap().is_empty());
}

#[test]
fn test_show_migrations_after_partial_migrate() {
    let conn = SqliteConnection::memory().unwrap();
    let mut executor = executor(&conn);
    executor
        .migrate(&[target("blog", "0001_initial")], None, false, &mut Vec::new())
        .unwrap();
    let text = render_show_migrations(&show_migrations(executor.loader()).unwrap());
    assert_eq!(
        text,
        "Blog\n  (applied) 0001_initial\n  (pending) 0002_summary\n  (pending) 0003_headline\n"
    );
}

#[test]
fn test_applied_set_survives_new_executor() {
    let conn = SqliteConnection::memory().unwrap();
    executor(&conn)
        .migrate(&[target("blog", "0002_summary")], None, false, &mut Vec::new())
        .unwrap();
    let again = executor(&conn);
    assert!(again
        .loader()
        .is_applied(&("blog".to_string(), "0002_summary".to_string())));
    let plan = again.migration_plan(&again.leaf_targets(), false).unwrap();
    assert_eq!(plan.keys(), vec![("blog".into(), "0003_headline".into(), false)]);
}

// ── Auto-detection round trip ─────────────────────────────────────────

fn shop_registry(with_price: bool) -> Registry {
    let mut item = ModelMeta::new("shop", "Item")
        .field(FieldDef::new("name", FieldType::CharField).max_length(80))
        .field(FieldDef::foreign_key("category", "Category", OnDelete::Protect));
    if with_price {
        item = item.field(FieldDef::new("price", FieldType::FloatField).nullable());
    }
    let mut registry = Registry::new();
    registry.register(item).unwrap();
    registry
        .register(
            ModelMeta::new("shop", "Category")
                .field(FieldDef::new("title", FieldType::CharField).max_length(40).unique()),
        )
        .unwrap();
    registry.populate().unwrap();
    registry
}

fn detect_and_write(settings: &Settings, registry: &Registry) -> usize {
    let loader = MigrationLoader::from_settings(settings, Vec::new()).unwrap();
    let detector =
        MigrationAutodetector::new(loader.end_state().unwrap(), ProjectState::from_registry(registry));
    let migrations = detector.changes(loader.graph()).unwrap();
    let dir = settings.migration_path.clone().unwrap();
    for migration in &migrations {
        MigrationWriter::new(migration).write(&dir).unwrap();
    }
    migrations.len()
}

#[test]
fn test_autodetected_migrations_round_trip_through_disk() {
    let dir = create_temp_dir();
    let settings = Settings {
        migration_path: Some(dir.clone()),
        ..Settings::in_memory()
    };
    let conn = SqliteConnection::memory().unwrap();

    assert_eq!(detect_and_write(&settings, &shop_registry(false)), 1);
    assert!(dir.join("shop/0001_initial.json").is_file());

    let loader = MigrationLoader::from_settings(&settings, Vec::new()).unwrap();
    let mut executor = MigrationExecutor::new(&conn, loader).unwrap();
    let targets = executor.leaf_targets();
    executor.migrate(&targets, None, false, &mut Vec::new()).unwrap();
    assert_eq!(columns(&conn, "shop_item"), vec!["id", "name", "category_id"]);

    // No model change, nothing to write.
    assert_eq!(detect_and_write(&settings, &shop_registry(false)), 0);

    assert_eq!(detect_and_write(&settings, &shop_registry(true)), 1);
    assert!(dir.join("shop/0002_auto.json").is_file());
    let loader = MigrationLoader::from_settings(&settings, Vec::new()).unwrap();
    let mut executor = MigrationExecutor::new(&conn, loader).unwrap();
    let targets = executor.leaf_targets();
    executor.migrate(&targets, None, false, &mut Vec::new()).unwrap();
    assert_eq!(
        columns(&conn, "shop_item"),
        vec!["id", "name", "category_id", "price"]
    );

    let _ = fs::remove_dir_all(&dir);
}
