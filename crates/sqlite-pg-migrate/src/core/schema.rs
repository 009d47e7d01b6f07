//! Table contract types.
//!
//! A [`TableSpec`] declares how one table moves from the source to the
//! target: its dependencies, its column mapping, which columns carry naive
//! timestamps or structured text, and how its foreign keys are repaired.
//! Specs are loaded from configuration and never change once planning starts.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::value::SqlValue;

/// Represents a primary key value.
///
/// SQLite is loosely typed, so foreign keys that reference integer keys are
/// sometimes stored as text. [`PkValue::from_value`] folds those back into
/// integers so lookups match.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PkValue {
    /// Integer primary key.
    Int(i64),
    /// Text primary key.
    String(String),
}

impl PkValue {
    /// Extract a key from a row value. Absent values yield `None`.
    pub fn from_value(value: &SqlValue) -> Option<PkValue> {
        match value {
            SqlValue::Int(i) => Some(PkValue::Int(*i)),
            SqlValue::Float(f) if f.fract() == 0.0 && f.is_finite() => {
                Some(PkValue::Int(*f as i64))
            }
            SqlValue::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
                    None
                } else if let Ok(i) = trimmed.parse::<i64>() {
                    Some(PkValue::Int(i))
                } else {
                    Some(PkValue::String(trimmed.to_string()))
                }
            }
            SqlValue::Bool(b) => Some(PkValue::Int(i64::from(*b))),
            _ => None,
        }
    }

    /// Convert back to a row value.
    pub fn to_value(&self) -> SqlValue {
        match self {
            PkValue::Int(i) => SqlValue::Int(*i),
            PkValue::String(s) => SqlValue::Text(s.clone()),
        }
    }

    /// Convert to a SQL literal string for use in queries.
    ///
    /// Single quotes are doubled. Only used for key lists the engine built
    /// itself from committed rows.
    pub fn to_sql_literal(&self) -> String {
        match self {
            PkValue::Int(v) => v.to_string(),
            PkValue::String(v) => format!("'{}'", v.replace('\'', "''")),
        }
    }
}

impl fmt::Display for PkValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PkValue::Int(v) => write!(f, "{}", v),
            PkValue::String(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for PkValue {
    fn from(v: i64) -> Self {
        PkValue::Int(v)
    }
}

impl From<i32> for PkValue {
    fn from(v: i32) -> Self {
        PkValue::Int(v as i64)
    }
}

impl From<String> for PkValue {
    fn from(v: String) -> Self {
        PkValue::String(v)
    }
}

impl From<&str> for PkValue {
    fn from(v: &str) -> Self {
        PkValue::String(v.to_string())
    }
}

/// A column as reported by a store at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Declared type, lowercased. Empty when the store has none.
    pub data_type: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into().to_lowercase(),
        }
    }

    /// Whether the target column is a PostgreSQL array type.
    pub fn is_array(&self) -> bool {
        self.data_type.ends_with("[]") || self.data_type == "array"
    }
}

/// What to do with a foreign key whose referenced row is not in the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferencePolicy {
    /// Write NULL and log a warning.
    #[default]
    NullOut,
    /// Write the configured fallback key.
    Default,
    /// Drop the row and count it as rejected.
    RejectRow,
}

/// How a table's primary keys relate between source and target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    /// Source keys are written as-is.
    #[default]
    Preserve,
    /// The target assigns new keys; rows are matched back through a natural key.
    Remap,
}

/// Expected shape of a structured-text column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuredShape {
    #[default]
    Object,
    Array,
}

impl StructuredShape {
    /// The substitute written when the text does not parse.
    pub fn empty(&self) -> serde_json::Value {
        match self {
            StructuredShape::Object => serde_json::Value::Object(Default::default()),
            StructuredShape::Array => serde_json::Value::Array(Vec::new()),
        }
    }

    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            StructuredShape::Object => value.is_object(),
            StructuredShape::Array => value.is_array(),
        }
    }
}

/// One entry of a column mapping: a column kept under its own name, a
/// source column written to a differently named target column, or a target
/// column filled from the first non-null of several source columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnMapping {
    Same(String),
    Renamed { source: String, target: String },
    Coalesced { sources: Vec<String>, target: String },
}

impl ColumnMapping {
    /// Source columns in order of preference.
    pub fn sources(&self) -> &[String] {
        match self {
            ColumnMapping::Same(name) => std::slice::from_ref(name),
            ColumnMapping::Renamed { source, .. } => std::slice::from_ref(source),
            ColumnMapping::Coalesced { sources, .. } => sources,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            ColumnMapping::Same(name) => name,
            ColumnMapping::Renamed { target, .. } => target,
            ColumnMapping::Coalesced { target, .. } => target,
        }
    }
}

/// A structured-text column declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StructuredColumn {
    Named(String),
    Shaped {
        name: String,
        #[serde(default)]
        shape: StructuredShape,
    },
}

impl StructuredColumn {
    pub fn name(&self) -> &str {
        match self {
            StructuredColumn::Named(name) => name,
            StructuredColumn::Shaped { name, .. } => name,
        }
    }

    pub fn shape(&self) -> StructuredShape {
        match self {
            StructuredColumn::Named(_) => StructuredShape::Object,
            StructuredColumn::Shaped { shape, .. } => *shape,
        }
    }
}

/// A foreign-key column and the table it references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeySpec {
    /// Target-side column name.
    pub column: String,

    /// Referenced table (by spec name).
    pub references: String,

    /// Per-column override of the migration-wide policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<ReferencePolicy>,

    /// Fallback key for the `default` policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<PkValue>,
}

/// Declarative contract for migrating one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table name in the source (and the target unless `target_name` is set).
    pub name: String,

    /// Table name in the target when it differs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,

    /// Tables that must be fully migrated first.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Primary key column (default: "id").
    #[serde(default = "default_primary_key")]
    pub primary_key: String,

    /// Whether primary keys are preserved or reassigned by the target.
    #[serde(default)]
    pub key_mode: KeyMode,

    /// Natural key used to match rows when keys are reassigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub natural_key: Option<String>,

    /// Ordered column mapping. Empty means every source column that also
    /// exists in the target.
    #[serde(default)]
    pub columns: Vec<ColumnMapping>,

    /// Columns holding naive timestamps in the reference zone (target names).
    #[serde(default)]
    pub timezone_columns: Vec<String>,

    /// Columns holding structured text (target names).
    #[serde(default)]
    pub structured_columns: Vec<StructuredColumn>,

    /// Foreign-key columns.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeySpec>,

    /// Values substituted when a column is absent.
    #[serde(default)]
    pub defaults: BTreeMap<String, serde_json::Value>,

    /// Take this table's keys from the target instead of copying its rows.
    #[serde(default)]
    pub seed_from_target: bool,
}

impl TableSpec {
    /// Minimal spec with a preserved `id` key.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_name: None,
            depends_on: Vec::new(),
            primary_key: default_primary_key(),
            key_mode: KeyMode::Preserve,
            natural_key: None,
            columns: Vec::new(),
            timezone_columns: Vec::new(),
            structured_columns: Vec::new(),
            foreign_keys: Vec::new(),
            defaults: BTreeMap::new(),
            seed_from_target: false,
        }
    }

    /// Name of the table in the target store.
    pub fn target_table(&self) -> &str {
        self.target_name.as_deref().unwrap_or(&self.name)
    }

    /// Declared dependencies plus every table referenced by a foreign key,
    /// in declaration order without duplicates.
    pub fn all_dependencies(&self) -> Vec<String> {
        let mut deps: Vec<String> = Vec::new();
        let fk_refs = self.foreign_keys.iter().map(|fk| &fk.references);
        for dep in self.depends_on.iter().chain(fk_refs) {
            if !deps.contains(dep) {
                deps.push(dep.clone());
            }
        }
        deps
    }

    pub fn foreign_key(&self, column: &str) -> Option<&ForeignKeySpec> {
        self.foreign_keys.iter().find(|fk| fk.column == column)
    }

    pub fn is_timezone_column(&self, column: &str) -> bool {
        self.timezone_columns.iter().any(|c| c == column)
    }

    pub fn structured_shape(&self, column: &str) -> Option<StructuredShape> {
        self.structured_columns
            .iter()
            .find(|c| c.name() == column)
            .map(StructuredColumn::shape)
    }

    pub fn default_for(&self, column: &str) -> Option<SqlValue> {
        self.defaults.get(column).map(SqlValue::from_json)
    }

    // Builder helpers, mostly for tests and programmatic plans.

    pub fn depends_on(mut self, table: impl Into<String>) -> Self {
        self.depends_on.push(table.into());
        self
    }

    pub fn column(mut self, mapping: ColumnMapping) -> Self {
        self.columns.push(mapping);
        self
    }

    pub fn timezone_column(mut self, column: impl Into<String>) -> Self {
        self.timezone_columns.push(column.into());
        self
    }

    pub fn structured_column(mut self, column: impl Into<String>, shape: StructuredShape) -> Self {
        self.structured_columns.push(StructuredColumn::Shaped {
            name: column.into(),
            shape,
        });
        self
    }

    pub fn foreign_key_to(mut self, column: impl Into<String>, references: impl Into<String>) -> Self {
        self.foreign_keys.push(ForeignKeySpec {
            column: column.into(),
            references: references.into(),
            policy: None,
            fallback: None,
        });
        self
    }

    pub fn foreign_key_with(mut self, fk: ForeignKeySpec) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    pub fn default_value(mut self, column: impl Into<String>, value: serde_json::Value) -> Self {
        self.defaults.insert(column.into(), value);
        self
    }

    pub fn remap_by(mut self, natural_key: impl Into<String>) -> Self {
        self.key_mode = KeyMode::Remap;
        self.natural_key = Some(natural_key.into());
        self
    }

    pub fn seeded_from_target(mut self) -> Self {
        self.seed_from_target = true;
        self
    }
}

fn default_primary_key() -> String {
    "id".to_string()
}
