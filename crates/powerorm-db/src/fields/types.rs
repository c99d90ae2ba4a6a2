//! Field type definitions for the ORM.
//!
//! Each [`FieldType`] variant corresponds to a PowerORM field class, and
//! [`FieldDef`] captures everything the registry, the query engine and the
//! migration engine need to know about one model field.

use crate::value::Value;

/// The type of a model field, determining its SQL column type and behavior.
///
/// Relational fields (`ForeignKey`, `OneToOneField`, `ManyToManyField`) carry
/// the relation descriptor.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum FieldType {
    /// Auto-incrementing 32-bit integer primary key.
    AutoField,
    /// Auto-incrementing 64-bit integer primary key.
    BigAutoField,
    /// Variable-length string with a max length.
    CharField,
    /// Unlimited-length text.
    TextField,
    /// 32-bit signed integer.
    IntegerField,
    /// 64-bit signed integer.
    BigIntegerField,
    /// 16-bit signed integer.
    SmallIntegerField,
    /// 64-bit floating-point number.
    FloatField,
    /// Fixed-precision decimal number.
    DecimalField {
        /// Maximum total digits.
        max_digits: u32,
        /// Digits after the decimal point.
        decimal_places: u32,
    },
    /// Boolean (true/false).
    BooleanField,
    /// Date without time.
    DateField,
    /// Date and time.
    DateTimeField,
    /// Time without date.
    TimeField,
    /// UUID stored as 32 hex characters.
    UuidField,
    /// Raw binary data.
    BinaryField,
    /// JSON data.
    JsonField,
    /// Email address.
    EmailField,
    /// Slug (URL-friendly string).
    SlugField,
    /// Many-to-one relationship.
    ForeignKey {
        /// The target model (`app.Model`, or `Model` within the same app).
        to: String,
        /// Behavior when the referenced object is deleted.
        on_delete: OnDelete,
        /// Accessor name for the reverse relation; a trailing `+` hides it.
        #[serde(default)]
        related_name: Option<String>,
        /// Name used for the reverse relation in filters.
        #[serde(default)]
        related_query_name: Option<String>,
        /// The field on the target model the key points at (defaults to its pk).
        #[serde(default)]
        to_field: Option<String>,
    },
    /// One-to-one relationship (unique foreign key).
    OneToOneField {
        /// The target model.
        to: String,
        /// Behavior when the referenced object is deleted.
        on_delete: OnDelete,
        /// Accessor name for the reverse relation.
        #[serde(default)]
        related_name: Option<String>,
        /// Name used for the reverse relation in filters.
        #[serde(default)]
        related_query_name: Option<String>,
        /// The field on the target model the key points at.
        #[serde(default)]
        to_field: Option<String>,
    },
    /// Many-to-many relationship (via intermediate table).
    ManyToManyField {
        /// The target model.
        to: String,
        /// Optional explicit intermediate ("through") model.
        #[serde(default)]
        through: Option<String>,
        /// On an explicit through model: the (source, target) foreign key names.
        #[serde(default)]
        through_fields: Option<(String, String)>,
        /// Explicit join table name for the synthesized intermediate model.
        #[serde(default)]
        db_table: Option<String>,
        /// Accessor name for the reverse relation.
        #[serde(default)]
        related_name: Option<String>,
        /// Name used for the reverse relation in filters.
        #[serde(default)]
        related_query_name: Option<String>,
    },
}

/// Behavior when a referenced object is deleted (ON DELETE action).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OnDelete {
    /// Delete all related objects (CASCADE).
    Cascade,
    /// Prevent deletion if related objects exist (PROTECT).
    Protect,
    /// Set the foreign key to NULL.
    SetNull,
    /// Set the foreign key to its default value.
    SetDefault,
    /// Take no action (may cause integrity errors).
    DoNothing,
}

/// Complete definition of a model field.
///
/// Cloneable and serializable: the registry owns one copy per model and the
/// migration engine keeps its own copies inside each `ProjectState`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FieldDef {
    /// The attribute name of this field.
    pub name: String,
    /// The database column name. `<name>_id` for foreign keys.
    pub column: String,
    /// The type of this field.
    pub field_type: FieldType,
    /// Whether this field is the primary key.
    #[serde(default)]
    pub primary_key: bool,
    /// Whether NULL is allowed in the database.
    #[serde(default)]
    pub null: bool,
    /// Default value for new rows.
    #[serde(default)]
    pub default: Option<Value>,
    /// Whether a UNIQUE constraint is applied.
    #[serde(default)]
    pub unique: bool,
    /// Whether a database index should be created.
    #[serde(default)]
    pub db_index: bool,
    /// Maximum character length (for CharField and similar).
    #[serde(default)]
    pub max_length: Option<usize>,
    /// Set on fields the ORM added itself (the implicit `id`).
    #[serde(default)]
    pub auto_created: bool,
}

impl FieldDef {
    /// Creates a new `FieldDef` with sensible defaults.
    ///
    /// Only the field name and type are required. Foreign keys get an
    /// `<name>_id` column; `UuidField` gets a max length of 32.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        let column = if field_type.is_foreign_key() {
            format!("{name}_id")
        } else {
            name.clone()
        };
        let max_length = match field_type {
            FieldType::UuidField => Some(32),
            FieldType::EmailField => Some(254),
            FieldType::SlugField => Some(50),
            _ => None,
        };
        let unique = matches!(field_type, FieldType::OneToOneField { .. });
        Self {
            name,
            column,
            field_type,
            primary_key: false,
            null: false,
            default: None,
            unique,
            db_index: false,
            max_length,
            auto_created: false,
        }
    }

    /// A `ForeignKey` to `to`.
    pub fn foreign_key(name: impl Into<String>, to: impl Into<String>, on_delete: OnDelete) -> Self {
        Self::new(
            name,
            FieldType::ForeignKey {
                to: to.into(),
                on_delete,
                related_name: None,
                related_query_name: None,
                to_field: None,
            },
        )
    }

    /// A `OneToOneField` to `to`.
    pub fn one_to_one(name: impl Into<String>, to: impl Into<String>, on_delete: OnDelete) -> Self {
        Self::new(
            name,
            FieldType::OneToOneField {
                to: to.into(),
                on_delete,
                related_name: None,
                related_query_name: None,
                to_field: None,
            },
        )
    }

    /// A `ManyToManyField` to `to` with a synthesized join table.
    pub fn many_to_many(name: impl Into<String>, to: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldType::ManyToManyField {
                to: to.into(),
                through: None,
                through_fields: None,
                db_table: None,
                related_name: None,
                related_query_name: None,
            },
        )
    }

    /// The implicit `id` primary key added to models that declare none.
    pub fn auto_pk() -> Self {
        let mut field = Self::new("id", FieldType::AutoField).primary_key();
        field.auto_created = true;
        field
    }

    /// Sets the database column name.
    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Marks this field as the primary key.
    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Allows NULL values in the database.
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.null = true;
        self
    }

    /// Sets the maximum character length.
    #[must_use]
    pub const fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Marks this field as having a database index.
    #[must_use]
    pub const fn db_index(mut self) -> Self {
        self.db_index = true;
        self
    }

    /// Marks this field as having a UNIQUE constraint.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets the default value for this field.
    #[must_use]
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Sets the reverse accessor name of a relation field.
    #[must_use]
    pub fn related_name(mut self, name: impl Into<String>) -> Self {
        match self.field_type {
            FieldType::ForeignKey { ref mut related_name, .. }
            | FieldType::OneToOneField { ref mut related_name, .. }
            | FieldType::ManyToManyField { ref mut related_name, .. } => {
                *related_name = Some(name.into());
            }
            _ => {}
        }
        self
    }

    /// Sets the reverse query name of a relation field.
    #[must_use]
    pub fn related_query_name(mut self, name: impl Into<String>) -> Self {
        match self.field_type {
            FieldType::ForeignKey { ref mut related_query_name, .. }
            | FieldType::OneToOneField { ref mut related_query_name, .. }
            | FieldType::ManyToManyField { ref mut related_query_name, .. } => {
                *related_query_name = Some(name.into());
            }
            _ => {}
        }
        self
    }

    /// Points a foreign key at a non-pk field of its target.
    #[must_use]
    pub fn to_field(mut self, field: impl Into<String>) -> Self {
        if let FieldType::ForeignKey { ref mut to_field, .. }
        | FieldType::OneToOneField { ref mut to_field, .. } = self.field_type
        {
            *to_field = Some(field.into());
        }
        self
    }

    /// Uses an explicit intermediate model for a many-to-many field.
    #[must_use]
    pub fn through(mut self, model: impl Into<String>, fields: Option<(&str, &str)>) -> Self {
        if let FieldType::ManyToManyField {
            ref mut through,
            ref mut through_fields,
            ..
        } = self.field_type
        {
            *through = Some(model.into());
            *through_fields = fields.map(|(a, b)| (a.to_string(), b.to_string()));
        }
        self
    }

    /// Names the synthesized join table of a many-to-many field.
    #[must_use]
    pub fn db_table(mut self, table: impl Into<String>) -> Self {
        if let FieldType::ManyToManyField { ref mut db_table, .. } = self.field_type {
            *db_table = Some(table.into());
        }
        self
    }

    /// Returns `true` if this field represents a relational field.
    pub const fn is_relation(&self) -> bool {
        self.field_type.is_foreign_key() || self.is_many_to_many()
    }

    /// Returns `true` for many-to-many fields.
    pub const fn is_many_to_many(&self) -> bool {
        matches!(self.field_type, FieldType::ManyToManyField { .. })
    }

    /// Returns `true` if the field has a column on its model's table.
    pub const fn is_concrete(&self) -> bool {
        !self.is_many_to_many()
    }

    /// The attribute name holding the raw value: `<name>_id` for foreign keys.
    pub fn attname(&self) -> String {
        if self.field_type.is_foreign_key() {
            format!("{}_id", self.name)
        } else {
            self.name.clone()
        }
    }

    /// The model a relation field points at.
    pub fn related_model(&self) -> Option<&str> {
        match self.field_type {
            FieldType::ForeignKey { ref to, .. }
            | FieldType::OneToOneField { ref to, .. }
            | FieldType::ManyToManyField { ref to, .. } => Some(to),
            _ => None,
        }
    }

    /// The reverse accessor name, if explicitly set.
    pub fn related_name_value(&self) -> Option<&str> {
        match self.field_type {
            FieldType::ForeignKey { ref related_name, .. }
            | FieldType::OneToOneField { ref related_name, .. }
            | FieldType::ManyToManyField { ref related_name, .. } => related_name.as_deref(),
            _ => None,
        }
    }

    /// The reverse query name, if explicitly set.
    pub fn related_query_name_value(&self) -> Option<&str> {
        match self.field_type {
            FieldType::ForeignKey { ref related_query_name, .. }
            | FieldType::OneToOneField { ref related_query_name, .. }
            | FieldType::ManyToManyField { ref related_query_name, .. } => {
                related_query_name.as_deref()
            }
            _ => None,
        }
    }

    /// The field a foreign key points at, when it is not the primary key.
    pub fn to_field_name(&self) -> Option<&str> {
        match self.field_type {
            FieldType::ForeignKey { ref to_field, .. }
            | FieldType::OneToOneField { ref to_field, .. } => to_field.as_deref(),
            _ => None,
        }
    }

    /// Returns `true` when the reverse relation is hidden (`related_name` ends in `+`).
    pub fn is_reverse_hidden(&self) -> bool {
        self.related_name_value().is_some_and(|n| n.ends_with('+'))
    }

    /// Converts a value fetched from the database into its natural type.
    pub fn from_db_value(&self, value: Value) -> Value {
        match (&self.field_type, value) {
            (_, Value::Null) => Value::Null,
            (FieldType::BooleanField, Value::Int(i)) => Value::Bool(i != 0),
            (FieldType::UuidField, Value::String(s)) => uuid::Uuid::parse_str(&s)
                .map_or(Value::String(s), Value::Uuid),
            (FieldType::JsonField, Value::String(s)) => serde_json::from_str(&s)
                .map_or(Value::String(s), Value::Json),
            (FieldType::DateField, Value::String(s)) => {
                chrono::NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_or(Value::String(s), Value::Date)
            }
            (FieldType::DateTimeField, Value::String(s)) => {
                chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S%.f")
                    .or_else(|_| chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S%.f"))
                    .map_or(Value::String(s), Value::DateTime)
            }
            (FieldType::TimeField, Value::String(s)) => {
                chrono::NaiveTime::parse_from_str(&s, "%H:%M:%S%.f").map_or(Value::String(s), Value::Time)
            }
            (_, other) => other,
        }
    }

    /// Prepares a value for binding as a query or insert parameter.
    pub fn get_db_prep_value(&self, value: Value) -> Value {
        match (&self.field_type, value) {
            (_, Value::Uuid(u)) => Value::String(u.simple().to_string()),
            (_, Value::Json(j)) => Value::String(j.to_string()),
            (FieldType::BooleanField, Value::Int(i)) => Value::Bool(i != 0),
            (_, other) => other,
        }
    }
}

impl FieldType {
    /// Returns `true` for `ForeignKey` and `OneToOneField`.
    pub const fn is_foreign_key(&self) -> bool {
        matches!(self, Self::ForeignKey { .. } | Self::OneToOneField { .. })
    }

    /// Returns `true` for auto-incrementing keys.
    pub const fn is_auto(&self) -> bool {
        matches!(self, Self::AutoField | Self::BigAutoField)
    }

    /// The type a foreign key column takes when it points at a field of this type.
    pub fn rel_db_type(&self) -> Self {
        match self {
            Self::AutoField => Self::IntegerField,
            Self::BigAutoField => Self::BigIntegerField,
            other => other.clone(),
        }
    }

    /// Short name used in check messages and migration descriptions.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AutoField => "AutoField",
            Self::BigAutoField => "BigAutoField",
            Self::CharField => "CharField",
            Self::TextField => "TextField",
            Self::IntegerField => "IntegerField",
            Self::BigIntegerField => "BigIntegerField",
            Self::SmallIntegerField => "SmallIntegerField",
            Self::FloatField => "FloatField",
            Self::DecimalField { .. } => "DecimalField",
            Self::BooleanField => "BooleanField",
            Self::DateField => "DateField",
            Self::DateTimeField => "DateTimeField",
            Self::TimeField => "TimeField",
            Self::UuidField => "UuidField",
            Self::BinaryField => "BinaryField",
            Self::JsonField => "JsonField",
            Self::EmailField => "EmailField",
            Self::SlugField => "SlugField",
            Self::ForeignKey { .. } => "ForeignKey",
            Self::OneToOneField { .. } => "OneToOneField",
            Self::ManyToManyField { .. } => "ManyToManyField",
        }
    }

    /// Returns `true` for string types that require `max_length`.
    pub const fn requires_max_length(&self) -> bool {
        matches!(self, Self::CharField)
    }
}
