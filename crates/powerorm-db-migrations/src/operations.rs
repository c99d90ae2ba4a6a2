//! Migration operations that describe schema changes.
//!
//! Each operation knows how to change the in-memory [`ProjectState`] and how
//! to bring the database along, forwards and backwards, through a
//! [`SchemaEditor`]. Backwards methods receive the state after the operation
//! as `from_state` and the state before it as `to_state`.
//!
//! Operations deconstruct into an [`OperationSpec`], the serde form stored
//! in migration files.

use std::fmt;
use std::rc::Rc;

use powerorm_core::{OrmError, OrmResult};
use powerorm_db::fields::{FieldDef, FieldType};
use powerorm_db::model::ModelMeta;
use powerorm_db::Registry;
use serde::{Deserialize, Serialize};

use crate::schema_editor::SchemaEditor;
use crate::state::{ModelOptions, ModelState, ProjectState};

/// A single migration operation that can be applied forwards or backwards.
pub trait Operation: fmt::Debug {
    /// Returns a human-readable description of this operation.
    fn describe(&self) -> String;

    /// Applies this operation to the in-memory project state.
    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> OrmResult<()>;

    /// Changes the database from `from_state` to `to_state`.
    fn database_forwards(
        &self,
        app_label: &str,
        editor: &mut SchemaEditor<'_>,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> OrmResult<()>;

    /// Undoes the change: `from_state` is the state after the operation,
    /// `to_state` the state before it.
    fn database_backwards(
        &self,
        app_label: &str,
        editor: &mut SchemaEditor<'_>,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> OrmResult<()>;

    /// Returns whether this operation can be undone.
    fn reversible(&self) -> bool {
        true
    }

    /// The serializable form of this operation.
    fn deconstruct(&self) -> OperationSpec;
}

/// Every operation in serializable form, tagged by its type name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OperationSpec {
    /// See [`CreateModel`].
    CreateModel(CreateModel),
    /// See [`DeleteModel`].
    DeleteModel(DeleteModel),
    /// See [`RenameModel`].
    RenameModel(RenameModel),
    /// See [`AlterModelTable`].
    AlterModelTable(AlterModelTable),
    /// See [`AlterUniqueTogether`].
    AlterUniqueTogether(AlterUniqueTogether),
    /// See [`AddField`].
    AddField(AddField),
    /// See [`RemoveField`].
    RemoveField(RemoveField),
    /// See [`AlterField`].
    AlterField(AlterField),
    /// See [`RenameField`].
    RenameField(RenameField),
    /// See [`RunSql`].
    RunSql(RunSql),
}

impl OperationSpec {
    /// Builds the operation.
    pub fn into_operation(self) -> Box<dyn Operation> {
        match self {
            Self::CreateModel(op) => Box::new(op),
            Self::DeleteModel(op) => Box::new(op),
            Self::RenameModel(op) => Box::new(op),
            Self::AlterModelTable(op) => Box::new(op),
            Self::AlterUniqueTogether(op) => Box::new(op),
            Self::AddField(op) => Box::new(op),
            Self::RemoveField(op) => Box::new(op),
            Self::AlterField(op) => Box::new(op),
            Self::RenameField(op) => Box::new(op),
            Self::RunSql(op) => Box::new(op),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn model_of(registry: &Registry, app_label: &str, name: &str) -> OrmResult<Rc<ModelMeta>> {
    registry.get_model(&format!("{app_label}.{name}"))
}

fn default_column(name: &str, field: &FieldDef) -> String {
    if field.field_type.is_foreign_key() {
        format!("{name}_id")
    } else {
        name.to_string()
    }
}

/// Points a model reference at `new` when it names `app.old`.
fn retarget(reference: &mut String, owner_app: &str, app: &str, old: &str, new: &str) {
    let (target_app, target_model) = reference
        .split_once('.')
        .unwrap_or((owner_app, reference.as_str()));
    if target_app == app && target_model.eq_ignore_ascii_case(old) {
        *reference = if reference.contains('.') {
            format!("{app}.{new}")
        } else {
            new.to_string()
        };
    }
}

/// Renames the synthesized join tables (and their key columns) whose
/// names changed between two renderings. `renamed` maps a model that
/// changed name: `(app, old name, new name)`.
fn rename_join_tables(
    editor: &mut SchemaEditor<'_>,
    old_registry: &Registry,
    new_registry: &Registry,
    renamed: Option<(&str, &str, &str)>,
) -> OrmResult<()> {
    for old_owner in old_registry.declared_models() {
        let new_label = match renamed {
            Some((app, old, new))
                if old_owner.app_label == app && old_owner.model_name.eq_ignore_ascii_case(old) =>
            {
                format!("{app}.{new}")
            }
            _ => old_owner.label(),
        };
        let Ok(new_owner) = new_registry.get_model(&new_label) else {
            continue;
        };
        for old_field in old_owner.many_to_many() {
            let Some(new_field) = new_owner.get_forward_field(&old_field.name) else {
                continue;
            };
            let old_through = old_registry.through_model(old_owner, old_field)?;
            let new_through = new_registry.through_model(&new_owner, new_field)?;
            if !(old_through.auto_created && new_through.auto_created) {
                continue;
            }
            editor.alter_db_table(&old_through.db_table, &new_through.db_table)?;
            for (old_col, new_col) in old_through
                .concrete_fields()
                .zip(new_through.concrete_fields())
            {
                editor.rename_column(&new_through.db_table, &old_col.column, &new_col.column)?;
            }
        }
    }
    Ok(())
}

/// Moves the field `from_field` of `model` in `from_state` to `to_field`
/// in `to_state`.
fn alter_field_between(
    editor: &mut SchemaEditor<'_>,
    app_label: &str,
    model: &str,
    from_state: &ProjectState,
    from_field: &str,
    to_state: &ProjectState,
    to_field: &str,
) -> OrmResult<()> {
    let from_registry = from_state.render()?;
    let to_registry = to_state.render()?;
    let from_meta = model_of(&from_registry, app_label, model)?;
    let to_meta = model_of(&to_registry, app_label, model)?;
    editor.alter_field(
        &from_registry,
        &from_meta,
        from_meta.field_or_err(from_field)?,
        &to_registry,
        &to_meta,
        to_meta.field_or_err(to_field)?,
    )
}

// ── Models ───────────────────────────────────────────────────────────────

/// Creates a new model and its table.
///
/// An auto-incrementing `id` is added to the state when no field is the
/// primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateModel {
    /// The model name.
    pub name: String,
    /// The fields for the new table.
    pub fields: Vec<FieldDef>,
    /// Model-level options.
    #[serde(default)]
    pub options: ModelOptions,
}

impl CreateModel {
    /// A model with `fields` and default options.
    pub fn new(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
            options: ModelOptions::default(),
        }
    }

    /// Sets model options.
    #[must_use]
    pub fn options(mut self, options: ModelOptions) -> Self {
        self.options = options;
        self
    }
}

impl Operation for CreateModel {
    fn describe(&self) -> String {
        format!("Create model {}", self.name)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> OrmResult<()> {
        let mut fields = self.fields.clone();
        if !fields.iter().any(|f| f.primary_key) {
            fields.insert(0, FieldDef::auto_pk());
        }
        state.add_model(
            ModelState::new(app_label, self.name.clone(), fields).with_options(self.options.clone()),
        );
        Ok(())
    }

    fn database_forwards(
        &self,
        app_label: &str,
        editor: &mut SchemaEditor<'_>,
        _from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> OrmResult<()> {
        let registry = to_state.render()?;
        let meta = model_of(&registry, app_label, &self.name)?;
        editor.create_model(&registry, &meta)
    }

    fn database_backwards(
        &self,
        app_label: &str,
        editor: &mut SchemaEditor<'_>,
        from_state: &ProjectState,
        _to_state: &ProjectState,
    ) -> OrmResult<()> {
        let registry = from_state.render()?;
        let meta = model_of(&registry, app_label, &self.name)?;
        editor.delete_model(&registry, &meta)
    }

    fn deconstruct(&self) -> OperationSpec {
        OperationSpec::CreateModel(self.clone())
    }
}

/// Drops a model and its table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteModel {
    /// The model name to delete.
    pub name: String,
}

impl DeleteModel {
    /// Deletes `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Operation for DeleteModel {
    fn describe(&self) -> String {
        format!("Delete model {}", self.name)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> OrmResult<()> {
        state.remove_model(app_label, &self.name).map(|_| ())
    }

    fn database_forwards(
        &self,
        app_label: &str,
        editor: &mut SchemaEditor<'_>,
        from_state: &ProjectState,
        _to_state: &ProjectState,
    ) -> OrmResult<()> {
        let registry = from_state.render()?;
        let meta = model_of(&registry, app_label, &self.name)?;
        editor.delete_model(&registry, &meta)
    }

    fn database_backwards(
        &self,
        app_label: &str,
        editor: &mut SchemaEditor<'_>,
        _from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> OrmResult<()> {
        let registry = to_state.render()?;
        let meta = model_of(&registry, app_label, &self.name)?;
        editor.create_model(&registry, &meta)
    }

    fn deconstruct(&self) -> OperationSpec {
        OperationSpec::DeleteModel(self.clone())
    }
}

/// Renames a model. Relations pointing at it follow, and tables named after
/// it are renamed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameModel {
    /// The current model name.
    pub old_name: String,
    /// The new model name.
    pub new_name: String,
}

impl RenameModel {
    /// Renames `old_name` to `new_name`.
    pub fn new(old_name: impl Into<String>, new_name: impl Into<String>) -> Self {
        Self {
            old_name: old_name.into(),
            new_name: new_name.into(),
        }
    }

    fn rename(
        app_label: &str,
        editor: &mut SchemaEditor<'_>,
        from_state: &ProjectState,
        to_state: &ProjectState,
        old: &str,
        new: &str,
    ) -> OrmResult<()> {
        let from_registry = from_state.render()?;
        let to_registry = to_state.render()?;
        let old_meta = model_of(&from_registry, app_label, old)?;
        let new_meta = model_of(&to_registry, app_label, new)?;
        editor.alter_db_table(&old_meta.db_table, &new_meta.db_table)?;
        rename_join_tables(editor, &from_registry, &to_registry, Some((app_label, old, new)))
    }
}

impl Operation for RenameModel {
    fn describe(&self) -> String {
        format!("Rename model {} to {}", self.old_name, self.new_name)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> OrmResult<()> {
        let mut model = state.remove_model(app_label, &self.old_name)?;
        model.name.clone_from(&self.new_name);
        state.add_model(model);
        for model in state.models_mut() {
            let owner_app = model.app_label.clone();
            for field in &mut model.fields {
                match field.field_type {
                    FieldType::ForeignKey { ref mut to, .. }
                    | FieldType::OneToOneField { ref mut to, .. } => {
                        retarget(to, &owner_app, app_label, &self.old_name, &self.new_name);
                    }
                    FieldType::ManyToManyField {
                        ref mut to,
                        ref mut through,
                        ..
                    } => {
                        retarget(to, &owner_app, app_label, &self.old_name, &self.new_name);
                        if let Some(through) = through {
                            retarget(through, &owner_app, app_label, &self.old_name, &self.new_name);
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn database_forwards(
        &self,
        app_label: &str,
        editor: &mut SchemaEditor<'_>,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> OrmResult<()> {
        Self::rename(app_label, editor, from_state, to_state, &self.old_name, &self.new_name)
    }

    fn database_backwards(
        &self,
        app_label: &str,
        editor: &mut SchemaEditor<'_>,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> OrmResult<()> {
        Self::rename(app_label, editor, from_state, to_state, &self.new_name, &self.old_name)
    }

    fn deconstruct(&self) -> OperationSpec {
        OperationSpec::RenameModel(self.clone())
    }
}

/// Sets or clears the explicit table name of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlterModelTable {
    /// The model name.
    pub name: String,
    /// The new table name; `None` restores the derived name.
    pub table: Option<String>,
}

impl AlterModelTable {
    fn alter(
        &self,
        app_label: &str,
        editor: &mut SchemaEditor<'_>,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> OrmResult<()> {
        let from_registry = from_state.render()?;
        let to_registry = to_state.render()?;
        let old = model_of(&from_registry, app_label, &self.name)?;
        let new = model_of(&to_registry, app_label, &self.name)?;
        editor.alter_db_table(&old.db_table, &new.db_table)?;
        rename_join_tables(editor, &from_registry, &to_registry, None)
    }
}

impl Operation for AlterModelTable {
    fn describe(&self) -> String {
        format!(
            "Rename table for {} to {}",
            self.name,
            self.table.as_deref().unwrap_or("(default)")
        )
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> OrmResult<()> {
        state.get_model_mut(app_label, &self.name)?.options.db_table.clone_from(&self.table);
        Ok(())
    }

    fn database_forwards(
        &self,
        app_label: &str,
        editor: &mut SchemaEditor<'_>,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> OrmResult<()> {
        self.alter(app_label, editor, from_state, to_state)
    }

    fn database_backwards(
        &self,
        app_label: &str,
        editor: &mut SchemaEditor<'_>,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> OrmResult<()> {
        self.alter(app_label, editor, from_state, to_state)
    }

    fn deconstruct(&self) -> OperationSpec {
        OperationSpec::AlterModelTable(self.clone())
    }
}

/// Replaces the unique-together sets of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlterUniqueTogether {
    /// The model name.
    pub name: String,
    /// The new sets of field names.
    pub unique_together: Vec<Vec<String>>,
}

impl AlterUniqueTogether {
    fn alter(
        &self,
        app_label: &str,
        editor: &mut SchemaEditor<'_>,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> OrmResult<()> {
        let before = &from_state.get_model(app_label, &self.name)?.options.unique_together;
        let registry = to_state.render()?;
        let meta = model_of(&registry, app_label, &self.name)?;
        editor.alter_unique_together(&meta, before, &meta.unique_together)
    }
}

impl Operation for AlterUniqueTogether {
    fn describe(&self) -> String {
        format!(
            "Alter unique_together for {} ({} constraint(s))",
            self.name,
            self.unique_together.len()
        )
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> OrmResult<()> {
        state
            .get_model_mut(app_label, &self.name)?
            .options
            .unique_together
            .clone_from(&self.unique_together);
        Ok(())
    }

    fn database_forwards(
        &self,
        app_label: &str,
        editor: &mut SchemaEditor<'_>,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> OrmResult<()> {
        self.alter(app_label, editor, from_state, to_state)
    }

    fn database_backwards(
        &self,
        app_label: &str,
        editor: &mut SchemaEditor<'_>,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> OrmResult<()> {
        self.alter(app_label, editor, from_state, to_state)
    }

    fn deconstruct(&self) -> OperationSpec {
        OperationSpec::AlterUniqueTogether(self.clone())
    }
}

// ── Fields ───────────────────────────────────────────────────────────────

/// Adds a field to a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddField {
    /// The model name the field is being added to.
    pub model_name: String,
    /// The field to add.
    pub field: FieldDef,
}

impl AddField {
    /// Adds `field` to `model_name`.
    pub fn new(model_name: impl Into<String>, field: FieldDef) -> Self {
        Self {
            model_name: model_name.into(),
            field,
        }
    }
}

impl Operation for AddField {
    fn describe(&self) -> String {
        format!("Add field {} to {}", self.field.name, self.model_name)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> OrmResult<()> {
        let model = state.get_model_mut(app_label, &self.model_name)?;
        if model.get_field(&self.field.name).is_some() {
            return Err(OrmError::FieldError(format!(
                "{} already has a field named '{}'",
                model.label(),
                self.field.name
            )));
        }
        model.fields.push(self.field.clone());
        Ok(())
    }

    fn database_forwards(
        &self,
        app_label: &str,
        editor: &mut SchemaEditor<'_>,
        _from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> OrmResult<()> {
        let registry = to_state.render()?;
        let meta = model_of(&registry, app_label, &self.model_name)?;
        editor.add_field(&registry, &meta, meta.field_or_err(&self.field.name)?)
    }

    fn database_backwards(
        &self,
        app_label: &str,
        editor: &mut SchemaEditor<'_>,
        from_state: &ProjectState,
        _to_state: &ProjectState,
    ) -> OrmResult<()> {
        let registry = from_state.render()?;
        let meta = model_of(&registry, app_label, &self.model_name)?;
        editor.remove_field(&registry, &meta, meta.field_or_err(&self.field.name)?)
    }

    fn deconstruct(&self) -> OperationSpec {
        OperationSpec::AddField(self.clone())
    }
}

/// Removes a field from a model, along with the unique sets and ordering
/// entries that mention it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveField {
    /// The model name.
    pub model_name: String,
    /// The field to remove.
    pub name: String,
}

impl RemoveField {
    /// Removes `name` from `model_name`.
    pub fn new(model_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            name: name.into(),
        }
    }
}

impl Operation for RemoveField {
    fn describe(&self) -> String {
        format!("Remove field {} from {}", self.name, self.model_name)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> OrmResult<()> {
        let model = state.get_model_mut(app_label, &self.model_name)?;
        model.field_or_err(&self.name)?;
        model.fields.retain(|f| f.name != self.name);
        model
            .options
            .unique_together
            .retain(|set| !set.contains(&self.name));
        model
            .options
            .ordering
            .retain(|o| o.trim_start_matches('-') != self.name);
        Ok(())
    }

    fn database_forwards(
        &self,
        app_label: &str,
        editor: &mut SchemaEditor<'_>,
        from_state: &ProjectState,
        _to_state: &ProjectState,
    ) -> OrmResult<()> {
        let registry = from_state.render()?;
        let meta = model_of(&registry, app_label, &self.model_name)?;
        editor.remove_field(&registry, &meta, meta.field_or_err(&self.name)?)
    }

    fn database_backwards(
        &self,
        app_label: &str,
        editor: &mut SchemaEditor<'_>,
        _from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> OrmResult<()> {
        let registry = to_state.render()?;
        let meta = model_of(&registry, app_label, &self.model_name)?;
        editor.add_field(&registry, &meta, meta.field_or_err(&self.name)?)
    }

    fn deconstruct(&self) -> OperationSpec {
        OperationSpec::RemoveField(self.clone())
    }
}

/// Replaces the definition of a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlterField {
    /// The model name.
    pub model_name: String,
    /// The field being altered.
    pub name: String,
    /// The new definition.
    pub field: FieldDef,
}

impl AlterField {
    /// Alters `field.name` on `model_name`.
    pub fn new(model_name: impl Into<String>, field: FieldDef) -> Self {
        Self {
            model_name: model_name.into(),
            name: field.name.clone(),
            field,
        }
    }
}

impl Operation for AlterField {
    fn describe(&self) -> String {
        format!("Alter field {} on {}", self.name, self.model_name)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> OrmResult<()> {
        let model = state.get_model_mut(app_label, &self.model_name)?;
        model.field_or_err(&self.name)?;
        let mut field = self.field.clone();
        field.name.clone_from(&self.name);
        if let Some(slot) = model.fields.iter_mut().find(|f| f.name == self.name) {
            *slot = field;
        }
        Ok(())
    }

    fn database_forwards(
        &self,
        app_label: &str,
        editor: &mut SchemaEditor<'_>,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> OrmResult<()> {
        alter_field_between(
            editor,
            app_label,
            &self.model_name,
            from_state,
            &self.name,
            to_state,
            &self.name,
        )
    }

    fn database_backwards(
        &self,
        app_label: &str,
        editor: &mut SchemaEditor<'_>,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> OrmResult<()> {
        self.database_forwards(app_label, editor, from_state, to_state)
    }

    fn deconstruct(&self) -> OperationSpec {
        OperationSpec::AlterField(self.clone())
    }
}

/// Renames a field. A column derived from the old name follows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameField {
    /// The model name.
    pub model_name: String,
    /// The current field name.
    pub old_name: String,
    /// The new field name.
    pub new_name: String,
}

impl RenameField {
    /// Renames `old_name` on `model_name` to `new_name`.
    pub fn new(
        model_name: impl Into<String>,
        old_name: impl Into<String>,
        new_name: impl Into<String>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            old_name: old_name.into(),
            new_name: new_name.into(),
        }
    }
}

impl Operation for RenameField {
    fn describe(&self) -> String {
        format!(
            "Rename field {} on {} to {}",
            self.old_name, self.model_name, self.new_name
        )
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> OrmResult<()> {
        let model = state.get_model_mut(app_label, &self.model_name)?;
        if model.get_field(&self.new_name).is_some() {
            return Err(OrmError::FieldError(format!(
                "{} already has a field named '{}'",
                model.label(),
                self.new_name
            )));
        }
        let label = model.label();
        let field = model
            .fields
            .iter_mut()
            .find(|f| f.name == self.old_name)
            .ok_or_else(|| {
                OrmError::FieldError(format!("{label} has no field named '{}'", self.old_name))
            })?;
        if field.column == default_column(&self.old_name, field) {
            field.column = default_column(&self.new_name, field);
        }
        field.name.clone_from(&self.new_name);

        for set in &mut model.options.unique_together {
            for name in set.iter_mut().filter(|n| **n == self.old_name) {
                name.clone_from(&self.new_name);
            }
        }
        for entry in &mut model.options.ordering {
            let descending = entry.starts_with('-');
            if entry.trim_start_matches('-') == self.old_name {
                *entry = format!("{}{}", if descending { "-" } else { "" }, self.new_name);
            }
        }
        Ok(())
    }

    fn database_forwards(
        &self,
        app_label: &str,
        editor: &mut SchemaEditor<'_>,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> OrmResult<()> {
        alter_field_between(
            editor,
            app_label,
            &self.model_name,
            from_state,
            &self.old_name,
            to_state,
            &self.new_name,
        )
    }

    fn database_backwards(
        &self,
        app_label: &str,
        editor: &mut SchemaEditor<'_>,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> OrmResult<()> {
        alter_field_between(
            editor,
            app_label,
            &self.model_name,
            from_state,
            &self.new_name,
            to_state,
            &self.old_name,
        )
    }

    fn deconstruct(&self) -> OperationSpec {
        OperationSpec::RenameField(self.clone())
    }
}

// ── Raw SQL ──────────────────────────────────────────────────────────────

/// Runs raw SQL statements. Reversible only with reverse statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSql {
    /// Statements run forwards.
    pub sql: Vec<String>,
    /// Statements run backwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse_sql: Option<Vec<String>>,
}

impl RunSql {
    /// Irreversible raw SQL.
    pub fn new<I, S>(sql: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sql: sql.into_iter().map(Into::into).collect(),
            reverse_sql: None,
        }
    }

    /// Sets the statements that undo this operation.
    #[must_use]
    pub fn reverse<I, S>(mut self, sql: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reverse_sql = Some(sql.into_iter().map(Into::into).collect());
        self
    }
}

impl Operation for RunSql {
    fn describe(&self) -> String {
        "Raw SQL operation".to_string()
    }

    fn state_forwards(&self, _app_label: &str, _state: &mut ProjectState) -> OrmResult<()> {
        Ok(())
    }

    fn database_forwards(
        &self,
        _app_label: &str,
        editor: &mut SchemaEditor<'_>,
        _from_state: &ProjectState,
        _to_state: &ProjectState,
    ) -> OrmResult<()> {
        for sql in &self.sql {
            editor.execute(sql.clone())?;
        }
        Ok(())
    }

    fn database_backwards(
        &self,
        _app_label: &str,
        editor: &mut SchemaEditor<'_>,
        _from_state: &ProjectState,
        _to_state: &ProjectState,
    ) -> OrmResult<()> {
        let reverse = self
            .reverse_sql
            .as_ref()
            .ok_or_else(|| OrmError::IrreversibleError(self.describe()))?;
        for sql in reverse {
            editor.execute(sql.clone())?;
        }
        Ok(())
    }

    fn reversible(&self) -> bool {
        self.reverse_sql.is_some()
    }

    fn deconstruct(&self) -> OperationSpec {
        OperationSpec::RunSql(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use powerorm_db::fields::OnDelete;
    use powerorm_db::DatabaseBackendType;

    fn author_op() -> CreateModel {
        CreateModel::new(
            "Author",
            vec![FieldDef::new("name", FieldType::CharField).max_length(50)],
        )
    }

    fn post_op() -> CreateModel {
        CreateModel::new(
            "Post",
            vec![
                FieldDef::new("title", FieldType::CharField).max_length(100),
                FieldDef::foreign_key("author", "Author", OnDelete::Cascade),
                FieldDef::many_to_many("fans", "Author"),
            ],
        )
    }

    fn state_with(ops: &[&dyn Operation]) -> ProjectState {
        let mut state = ProjectState::new();
        for op in ops {
            op.state_forwards("blog", &mut state).unwrap();
        }
        state
    }

    /// Runs `op` forwards on `before` and returns (after, forwards SQL,
    /// backwards SQL).
    fn run(op: &dyn Operation, before: &ProjectState) -> (ProjectState, Vec<String>, Vec<String>) {
        let mut after = before.clone();
        op.state_forwards("blog", &mut after).unwrap();
        let mut forwards = SchemaEditor::collect_only(DatabaseBackendType::SQLite);
        op.database_forwards("blog", &mut forwards, before, &after).unwrap();
        let mut backwards = SchemaEditor::collect_only(DatabaseBackendType::SQLite);
        op.database_backwards("blog", &mut backwards, &after, before).unwrap();
        (after, forwards.into_collected(), backwards.into_collected())
    }

    #[test]
    fn test_create_model_adds_auto_pk() {
        let state = state_with(&[&author_op()]);
        let author = state.get_model("blog", "Author").unwrap();
        assert_eq!(author.fields[0].name, "id");
        assert!(author.fields[0].primary_key);
    }

    #[test]
    fn test_create_model_sql() {
        let before = state_with(&[&author_op()]);
        let (_, forwards, backwards) = run(&post_op(), &before);
        assert!(forwards[0].starts_with("CREATE TABLE \"blog_post\""));
        assert!(forwards.iter().any(|s| s.starts_with("CREATE TABLE \"blog_post_fans\"")));
        assert_eq!(
            backwards,
            vec!["DROP TABLE \"blog_post_fans\"", "DROP TABLE \"blog_post\""]
        );
    }

    #[test]
    fn test_delete_model_reverses_to_create() {
        let before = state_with(&[&author_op()]);
        let (after, forwards, backwards) = run(&DeleteModel::new("Author"), &before);
        assert!(after.is_empty());
        assert_eq!(forwards, vec!["DROP TABLE \"blog_author\""]);
        assert!(backwards[0].starts_with("CREATE TABLE \"blog_author\""));
    }

    #[test]
    fn test_rename_model_retargets_relations() {
        let before = state_with(&[&author_op(), &post_op()]);
        let (after, forwards, backwards) = run(&RenameModel::new("Author", "Writer"), &before);
        let post = after.get_model("blog", "Post").unwrap();
        let author = post.get_field("author").unwrap();
        assert_eq!(author.related_model(), Some("Writer"));
        assert_eq!(
            forwards,
            vec![
                "ALTER TABLE \"blog_author\" RENAME TO \"blog_writer\"",
                "ALTER TABLE \"blog_post_fans\" RENAME COLUMN \"author_id\" TO \"writer_id\"",
            ]
        );
        assert_eq!(
            backwards,
            vec![
                "ALTER TABLE \"blog_writer\" RENAME TO \"blog_author\"",
                "ALTER TABLE \"blog_post_fans\" RENAME COLUMN \"writer_id\" TO \"author_id\"",
            ]
        );
    }

    #[test]
    fn test_alter_model_table_renames_join_tables() {
        let before = state_with(&[&author_op(), &post_op()]);
        let op = AlterModelTable {
            name: "Post".into(),
            table: Some("articles".into()),
        };
        let (_, forwards, backwards) = run(&op, &before);
        assert_eq!(
            forwards,
            vec![
                "ALTER TABLE \"blog_post\" RENAME TO \"articles\"",
                "ALTER TABLE \"blog_post_fans\" RENAME TO \"articles_fans\"",
            ]
        );
        assert_eq!(backwards[0], "ALTER TABLE \"articles\" RENAME TO \"blog_post\"");
    }

    #[test]
    fn test_alter_unique_together_sql() {
        let before = state_with(&[&author_op(), &post_op()]);
        let op = AlterUniqueTogether {
            name: "Post".into(),
            unique_together: vec![vec!["title".into(), "author".into()]],
        };
        let (_, forwards, backwards) = run(&op, &before);
        assert_eq!(
            forwards,
            vec!["CREATE UNIQUE INDEX \"blog_post_title_author_id_uniq\" ON \"blog_post\" (\"title\", \"author_id\")"]
        );
        assert_eq!(backwards, vec!["DROP INDEX \"blog_post_title_author_id_uniq\""]);
    }

    #[test]
    fn test_add_and_remove_field() {
        let before = state_with(&[&author_op()]);
        let op = AddField::new("Author", FieldDef::new("bio", FieldType::TextField).nullable());
        let (after, forwards, backwards) = run(&op, &before);
        assert!(after.get_model("blog", "Author").unwrap().get_field("bio").is_some());
        assert_eq!(
            forwards,
            vec!["ALTER TABLE \"blog_author\" ADD COLUMN \"bio\" TEXT NULL"]
        );
        assert!(backwards[0].starts_with("CREATE TABLE \"new__blog_author\""));

        let (after, forwards, _) = run(&RemoveField::new("Author", "bio"), &after);
        assert!(after.get_model("blog", "Author").unwrap().get_field("bio").is_none());
        assert_eq!(forwards.len(), 4);
    }

    #[test]
    fn test_add_existing_field_fails() {
        let mut state = state_with(&[&author_op()]);
        let op = AddField::new("Author", FieldDef::new("name", FieldType::TextField));
        assert!(matches!(
            op.state_forwards("blog", &mut state),
            Err(OrmError::FieldError(_))
        ));
    }

    #[test]
    fn test_add_m2m_field_creates_join_table() {
        let before = state_with(&[&author_op(), &post_op()]);
        let op = AddField::new("Post", FieldDef::many_to_many("editors", "Author"));
        let (_, forwards, backwards) = run(&op, &before);
        assert!(forwards[0].starts_with("CREATE TABLE \"blog_post_editors\""));
        assert_eq!(backwards, vec!["DROP TABLE \"blog_post_editors\""]);
    }

    #[test]
    fn test_remove_field_cleans_options() {
        let mut state = state_with(&[&author_op(), &post_op()]);
        let model = state.get_model_mut("blog", "Post").unwrap();
        model.options.unique_together = vec![vec!["title".into(), "author".into()]];
        model.options.ordering = vec!["-title".into()];
        RemoveField::new("Post", "title")
            .state_forwards("blog", &mut state)
            .unwrap();
        let post = state.get_model("blog", "Post").unwrap();
        assert!(post.options.unique_together.is_empty());
        assert!(post.options.ordering.is_empty());
    }

    #[test]
    fn test_alter_field_sqlite_remakes() {
        let before = state_with(&[&author_op()]);
        let op = AlterField::new(
            "Author",
            FieldDef::new("name", FieldType::CharField).max_length(50).nullable(),
        );
        let (after, forwards, _) = run(&op, &before);
        assert!(after.get_model("blog", "Author").unwrap().get_field("name").unwrap().null);
        assert_eq!(
            forwards[1],
            "INSERT INTO \"new__blog_author\" (\"id\", \"name\") SELECT \"id\", \"name\" FROM \"blog_author\""
        );
    }

    #[test]
    fn test_rename_field() {
        let mut before = state_with(&[&author_op(), &post_op()]);
        before.get_model_mut("blog", "Post").unwrap().options.ordering = vec!["-author".into()];
        let (after, forwards, backwards) = run(&RenameField::new("Post", "author", "writer"), &before);
        let post = after.get_model("blog", "Post").unwrap();
        assert_eq!(post.get_field("writer").unwrap().column, "writer_id");
        assert_eq!(post.options.ordering, vec!["-writer".to_string()]);
        assert_eq!(
            forwards,
            vec!["ALTER TABLE \"blog_post\" RENAME COLUMN \"author_id\" TO \"writer_id\""]
        );
        assert_eq!(
            backwards,
            vec!["ALTER TABLE \"blog_post\" RENAME COLUMN \"writer_id\" TO \"author_id\""]
        );
    }

    #[test]
    fn test_rename_m2m_field_renames_join_table() {
        let before = state_with(&[&author_op(), &post_op()]);
        let (_, forwards, _) = run(&RenameField::new("Post", "fans", "readers"), &before);
        assert_eq!(
            forwards,
            vec!["ALTER TABLE \"blog_post_fans\" RENAME TO \"blog_post_readers\""]
        );
    }

    #[test]
    fn test_run_sql_irreversible() {
        let op = RunSql::new(["INSERT INTO t VALUES (1)"]);
        assert!(!op.reversible());
        let mut editor = SchemaEditor::collect_only(DatabaseBackendType::SQLite);
        let state = ProjectState::new();
        assert!(matches!(
            op.database_backwards("app", &mut editor, &state, &state),
            Err(OrmError::IrreversibleError(_))
        ));
    }

    #[test]
    fn test_describe() {
        assert_eq!(author_op().describe(), "Create model Author");
        assert_eq!(
            RenameField::new("Post", "a", "b").describe(),
            "Rename field a on Post to b"
        );
        assert_eq!(RemoveField::new("Post", "a").describe(), "Remove field a from Post");
    }

    #[test]
    fn test_deconstruct_json_shape() {
        let json = serde_json::to_value(DeleteModel::new("Post").deconstruct()).unwrap();
        assert_eq!(json, serde_json::json!({"type": "DeleteModel", "name": "Post"}));
        let spec: OperationSpec = serde_json::from_value(
            serde_json::json!({"type": "RunSql", "sql": ["SELECT 1"], "reverse_sql": ["SELECT 2"]}),
        )
        .unwrap();
        assert!(spec.into_operation().reversible());
    }
}
