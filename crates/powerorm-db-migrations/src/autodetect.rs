//! Migration auto-detection.
//!
//! The [`MigrationAutodetector`] compares two [`ProjectState`]s (usually the
//! loader's end state and the state of the live model registry) and produces
//! the operations that turn the first into the second, grouped by app.
//! [`MigrationAutodetector::arrange`] then turns those groups into named
//! migrations with dependencies on the existing graph.
//!
//! Detected changes:
//! - New models (`CreateModel`), ordered so relation targets come first
//! - Deleted models (`DeleteModel`), referencing models first
//! - Table renames (`AlterModelTable`)
//! - Added, removed and altered fields
//! - Renamed fields (one removed and one added field with the same definition)
//! - Changed `unique_together` (`AlterUniqueTogether`)

use std::collections::{BTreeMap, BTreeSet};

use powerorm_core::OrmResult;
use powerorm_db::fields::FieldDef;

use crate::migration::{Migration, MigrationGraph, MigrationKey};
use crate::operations::{
    AddField, AlterField, AlterModelTable, AlterUniqueTogether, CreateModel, DeleteModel, Operation,
    OperationSpec, RemoveField, RenameField,
};
use crate::state::{ModelState, ProjectState};

/// Operations per app label.
pub type Changes = BTreeMap<String, Vec<Box<dyn Operation>>>;

/// Detects changes between two project states and generates operations.
#[derive(Debug)]
pub struct MigrationAutodetector {
    /// The old project state (before changes).
    pub from_state: ProjectState,
    /// The new project state (after changes).
    pub to_state: ProjectState,
}

/// `(app, model)` a relation reference points at, lowercased.
fn target_of(owner_app: &str, reference: &str) -> (String, String) {
    match reference.split_once('.') {
        Some((app, model)) => (app.to_string(), model.to_lowercase()),
        None => (owner_app.to_string(), reference.to_lowercase()),
    }
}

fn relation_targets(owner_app: &str, field: &FieldDef) -> Vec<(String, String)> {
    let mut targets: Vec<(String, String)> = field
        .related_model()
        .map(|to| target_of(owner_app, to))
        .into_iter()
        .collect();
    if let powerorm_db::fields::FieldType::ManyToManyField {
        through: Some(ref through),
        ..
    } = field.field_type
    {
        targets.push(target_of(owner_app, through));
    }
    targets
}

/// Same definition apart from the name, with columns that follow the name.
fn is_rename(old: &FieldDef, new: &FieldDef) -> bool {
    if old.column != old.attname() || new.column != new.attname() {
        return false;
    }
    let mut renamed = old.clone();
    renamed.name.clone_from(&new.name);
    renamed.column.clone_from(&new.column);
    renamed == *new
}

fn declared_fields(model: &ModelState) -> Vec<FieldDef> {
    model.fields.iter().filter(|f| !f.auto_created).cloned().collect()
}

impl MigrationAutodetector {
    /// Creates a new autodetector with from and to states.
    pub fn new(from_state: ProjectState, to_state: ProjectState) -> Self {
        Self {
            from_state,
            to_state,
        }
    }

    /// Detects differences between the two states and returns operations
    /// grouped by app label. Apps without changes are absent.
    pub fn detect_changes(&self) -> Changes {
        let mut changes = Changes::new();
        self.generate_created_models(&mut changes);
        self.generate_deleted_models(&mut changes);
        for new_model in self.to_state.models() {
            if let Ok(old_model) = self.from_state.get_model(&new_model.app_label, &new_model.name) {
                Self::generate_model_changes(old_model, new_model, &mut changes);
            }
        }
        changes
    }

    fn generate_created_models(&self, changes: &mut Changes) {
        let mut pending: Vec<&ModelState> = self
            .to_state
            .models()
            .filter(|m| !self.from_state.contains(&m.app_label, &m.name))
            .collect();
        let is_pending = |pending: &[&ModelState], target: &(String, String)| {
            pending
                .iter()
                .any(|m| m.app_label == target.0 && m.name_lower() == target.1)
        };
        let mut deferred: Vec<(String, AddField)> = Vec::new();

        while !pending.is_empty() {
            let ready = pending.iter().position(|m| {
                m.fields.iter().all(|f| {
                    relation_targets(&m.app_label, f).iter().all(|t| {
                        (t.0 == m.app_label && t.1 == m.name_lower()) || !is_pending(&pending, t)
                    })
                })
            });
            let model = pending.remove(ready.unwrap_or(0));
            let mut fields = Vec::new();
            for field in declared_fields(model) {
                let blocked = ready.is_none()
                    && relation_targets(&model.app_label, &field).iter().any(|t| {
                        !(t.0 == model.app_label && t.1 == model.name_lower()) && is_pending(&pending, t)
                    });
                if blocked {
                    deferred.push((model.app_label.clone(), AddField::new(model.name.clone(), field)));
                } else {
                    fields.push(field);
                }
            }
            changes.entry(model.app_label.clone()).or_default().push(Box::new(
                CreateModel::new(model.name.clone(), fields).options(model.options.clone()),
            ));
        }
        for (app_label, op) in deferred {
            changes.entry(app_label).or_default().push(Box::new(op));
        }
    }

    fn generate_deleted_models(&self, changes: &mut Changes) {
        let mut pending: Vec<&ModelState> = self
            .from_state
            .models()
            .filter(|m| !self.to_state.contains(&m.app_label, &m.name))
            .collect();
        while !pending.is_empty() {
            // A model nothing else pending points at can go first.
            let free = pending.iter().position(|candidate| {
                !pending.iter().any(|other| {
                    other.name_lower() != candidate.name_lower()
                        && other.fields.iter().any(|f| {
                            relation_targets(&other.app_label, f)
                                .contains(&(candidate.app_label.clone(), candidate.name_lower()))
                        })
                })
            });
            let model = pending.remove(free.unwrap_or(0));
            changes
                .entry(model.app_label.clone())
                .or_default()
                .push(Box::new(DeleteModel::new(model.name.clone())));
        }
    }

    fn generate_model_changes(old_model: &ModelState, new_model: &ModelState, changes: &mut Changes) {
        let mut ops: Vec<Box<dyn Operation>> = Vec::new();
        let name = &new_model.name;

        if old_model.options.db_table != new_model.options.db_table {
            ops.push(Box::new(AlterModelTable {
                name: name.clone(),
                table: new_model.options.db_table.clone(),
            }));
        }

        let removed: Vec<&FieldDef> = old_model
            .fields
            .iter()
            .filter(|f| new_model.get_field(&f.name).is_none())
            .collect();
        let added: Vec<&FieldDef> = new_model
            .fields
            .iter()
            .filter(|f| old_model.get_field(&f.name).is_none())
            .collect();

        let mut renamed_old: BTreeSet<&str> = BTreeSet::new();
        let mut renamed_new: BTreeSet<&str> = BTreeSet::new();
        for new_field in &added {
            let candidate = removed
                .iter()
                .find(|old| !renamed_old.contains(old.name.as_str()) && is_rename(old, new_field));
            if let Some(old_field) = candidate {
                ops.push(Box::new(RenameField::new(
                    name.clone(),
                    old_field.name.clone(),
                    new_field.name.clone(),
                )));
                renamed_old.insert(&old_field.name);
                renamed_new.insert(&new_field.name);
            }
        }

        for field in added.iter().filter(|f| !renamed_new.contains(f.name.as_str())) {
            ops.push(Box::new(AddField::new(name.clone(), (*field).clone())));
        }
        for field in removed.iter().filter(|f| !renamed_old.contains(f.name.as_str())) {
            ops.push(Box::new(RemoveField::new(name.clone(), field.name.clone())));
        }
        for new_field in &new_model.fields {
            if let Some(old_field) = old_model.get_field(&new_field.name) {
                if old_field != new_field {
                    ops.push(Box::new(AlterField::new(name.clone(), new_field.clone())));
                }
            }
        }

        if old_model.options.unique_together != new_model.options.unique_together {
            ops.push(Box::new(AlterUniqueTogether {
                name: name.clone(),
                unique_together: new_model.options.unique_together.clone(),
            }));
        }

        if !ops.is_empty() {
            changes.entry(new_model.app_label.clone()).or_default().extend(ops);
        }
    }

    /// Turns detected changes into migrations numbered after each app's
    /// current leaf, depending on that leaf and on whatever other apps the
    /// operations point at.
    pub fn arrange(changes: Changes, graph: &MigrationGraph) -> OrmResult<Vec<Migration>> {
        let mut names: BTreeMap<String, String> = BTreeMap::new();
        for app in changes.keys() {
            let leaves = graph.leaf_nodes(Some(app));
            let number = leaves
                .iter()
                .filter_map(|(_, name)| {
                    let digits: String = name.chars().take_while(char::is_ascii_digit).collect();
                    digits.parse::<u32>().ok()
                })
                .max()
                .map_or(1, |n| n + 1);
            let name = if number == 1 {
                "0001_initial".to_string()
            } else {
                format!("{number:04}_auto")
            };
            names.insert(app.clone(), name);
        }

        let mut migrations = Vec::new();
        for (app, operations) in changes {
            let Some(name) = names.get(&app).cloned() else {
                continue;
            };
            let leaves = graph.leaf_nodes(Some(&app));
            let mut migration = Migration::new(app.clone(), name);
            migration.initial = leaves.is_empty();

            let mut dependencies: BTreeSet<MigrationKey> = leaves.into_iter().collect();
            for other in referenced_apps(&app, &operations) {
                match names.get(&other) {
                    Some(new_name) => {
                        dependencies.insert((other, new_name.clone()));
                    }
                    None => dependencies.extend(graph.leaf_nodes(Some(&other))),
                }
            }
            migration.dependencies = dependencies.into_iter().collect();
            migration.operations = operations;
            tracing::debug!(migration = %migration, operations = migration.operations.len(), "arranged migration");
            migrations.push(migration);
        }
        Ok(migrations)
    }

    /// Detects the changes and arranges them in one go.
    pub fn changes(&self, graph: &MigrationGraph) -> OrmResult<Vec<Migration>> {
        Self::arrange(self.detect_changes(), graph)
    }
}

/// Apps other than `app` that the operations' relation fields point at.
fn referenced_apps(app: &str, operations: &[Box<dyn Operation>]) -> BTreeSet<String> {
    let mut apps = BTreeSet::new();
    for op in operations {
        let fields = match op.deconstruct() {
            OperationSpec::CreateModel(op) => op.fields,
            OperationSpec::AddField(op) => vec![op.field],
            OperationSpec::AlterField(op) => vec![op.field],
            _ => Vec::new(),
        };
        for field in &fields {
            apps.extend(
                relation_targets(app, field)
                    .into_iter()
                    .map(|(target_app, _)| target_app)
                    .filter(|target_app| target_app != app),
            );
        }
    }
    apps
}

#[cfg(test)]
mod tests {
    use super::*;
    use powerorm_db::fields::{FieldType, OnDelete};

    fn model(app: &str, name: &str, fields: Vec<FieldDef>) -> ModelState {
        let mut all = vec![FieldDef::auto_pk()];
        all.extend(fields);
        ModelState::new(app, name, all)
    }

    fn state(models: Vec<ModelState>) -> ProjectState {
        let mut state = ProjectState::new();
        for m in models {
            state.add_model(m);
        }
        state
    }

    fn describe(changes: &Changes, app: &str) -> Vec<String> {
        changes[app].iter().map(|op| op.describe()).collect()
    }

    fn title() -> FieldDef {
        FieldDef::new("title", FieldType::CharField).max_length(200)
    }

    #[test]
    fn test_detect_no_changes() {
        let s = state(vec![model("blog", "Post", vec![title()])]);
        let changes = MigrationAutodetector::new(s.clone(), s).detect_changes();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_created_models_in_dependency_order() {
        let to = state(vec![
            model(
                "blog",
                "Comment",
                vec![FieldDef::foreign_key("post", "Post", OnDelete::Cascade)],
            ),
            model("blog", "Post", vec![title()]),
        ]);
        let changes = MigrationAutodetector::new(ProjectState::new(), to).detect_changes();
        assert_eq!(
            describe(&changes, "blog"),
            vec!["Create model Post", "Create model Comment"]
        );
    }

    #[test]
    fn test_created_model_omits_auto_pk() {
        let to = state(vec![model("blog", "Post", vec![title()])]);
        let changes = MigrationAutodetector::new(ProjectState::new(), to).detect_changes();
        let OperationSpec::CreateModel(op) = changes["blog"][0].deconstruct() else {
            panic!("expected CreateModel");
        };
        assert_eq!(op.fields, vec![title()]);
    }

    #[test]
    fn test_circular_relations_are_deferred() {
        let to = state(vec![
            model(
                "blog",
                "Author",
                vec![FieldDef::foreign_key("favorite", "Post", OnDelete::SetNull).nullable()],
            ),
            model(
                "blog",
                "Post",
                vec![FieldDef::foreign_key("author", "Author", OnDelete::Cascade)],
            ),
        ]);
        let changes = MigrationAutodetector::new(ProjectState::new(), to).detect_changes();
        assert_eq!(
            describe(&changes, "blog"),
            vec![
                "Create model Author",
                "Create model Post",
                "Add field favorite to Author"
            ]
        );
    }

    #[test]
    fn test_deleted_models_referencing_first() {
        let from = state(vec![
            model("blog", "Post", vec![title()]),
            model(
                "blog",
                "Comment",
                vec![FieldDef::foreign_key("post", "Post", OnDelete::Cascade)],
            ),
        ]);
        let changes = MigrationAutodetector::new(from, ProjectState::new()).detect_changes();
        assert_eq!(
            describe(&changes, "blog"),
            vec!["Delete model Comment", "Delete model Post"]
        );
    }

    #[test]
    fn test_field_changes() {
        let from = state(vec![model(
            "blog",
            "Post",
            vec![title(), FieldDef::new("draft", FieldType::BooleanField)],
        )]);
        let to = state(vec![model(
            "blog",
            "Post",
            vec![
                FieldDef::new("title", FieldType::CharField).max_length(300),
                FieldDef::new("views", FieldType::IntegerField).default(0),
            ],
        )]);
        let changes = MigrationAutodetector::new(from, to).detect_changes();
        assert_eq!(
            describe(&changes, "blog"),
            vec![
                "Add field views to Post",
                "Remove field draft from Post",
                "Alter field title on Post"
            ]
        );
    }

    #[test]
    fn test_detect_renamed_field() {
        let from = state(vec![model("blog", "Post", vec![title()])]);
        let to = state(vec![model(
            "blog",
            "Post",
            vec![FieldDef::new("headline", FieldType::CharField).max_length(200)],
        )]);
        let changes = MigrationAutodetector::new(from, to).detect_changes();
        assert_eq!(describe(&changes, "blog"), vec!["Rename field title on Post to headline"]);
    }

    #[test]
    fn test_different_definition_is_not_rename() {
        let from = state(vec![model("blog", "Post", vec![title()])]);
        let to = state(vec![model(
            "blog",
            "Post",
            vec![FieldDef::new("headline", FieldType::TextField)],
        )]);
        let changes = MigrationAutodetector::new(from, to).detect_changes();
        assert_eq!(
            describe(&changes, "blog"),
            vec!["Add field headline to Post", "Remove field title from Post"]
        );
    }

    #[test]
    fn test_unique_together_and_table() {
        let from = state(vec![model("blog", "Post", vec![title()])]);
        let mut post = model("blog", "Post", vec![title()]);
        post.options.unique_together = vec![vec!["title".into()]];
        post.options.db_table = Some("posts".into());
        let changes = MigrationAutodetector::new(from, state(vec![post])).detect_changes();
        assert_eq!(
            describe(&changes, "blog"),
            vec![
                "Rename table for Post to posts",
                "Alter unique_together for Post (1 constraint(s))"
            ]
        );
    }

    #[test]
    fn test_arrange_numbers_and_dependencies() {
        let graph = MigrationGraph::from_migrations([
            Migration::new("auth", "0001_initial"),
            Migration::new("blog", "0001_initial"),
            Migration::new("blog", "0002_tags").depends_on("blog", "0001_initial"),
        ])
        .unwrap();
        let from = state(vec![
            model("auth", "User", vec![]),
            model("blog", "Post", vec![title()]),
        ]);
        let to = state(vec![
            model("auth", "User", vec![]),
            model(
                "blog",
                "Post",
                vec![
                    title(),
                    FieldDef::foreign_key("author", "auth.User", OnDelete::Cascade).nullable(),
                ],
            ),
            model("shop", "Item", vec![title()]),
        ]);
        let migrations = MigrationAutodetector::new(from, to).changes(&graph).unwrap();
        assert_eq!(migrations.len(), 2);

        let blog = &migrations[0];
        assert_eq!(blog.name, "0003_auto");
        assert!(!blog.initial);
        assert_eq!(
            blog.dependencies,
            vec![
                ("auth".to_string(), "0001_initial".to_string()),
                ("blog".to_string(), "0002_tags".to_string()),
            ]
        );

        let shop = &migrations[1];
        assert_eq!(shop.name, "0001_initial");
        assert!(shop.initial);
        assert!(shop.dependencies.is_empty());
    }
}
