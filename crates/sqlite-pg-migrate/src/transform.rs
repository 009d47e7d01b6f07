//! Row transformation.
//!
//! Turns a source row into a target-ready row: default substitution,
//! timestamp normalization, structured-text parsing and reference
//! validation. Data-quality problems degrade the value and are reported as
//! [`Degradation`]s; only a broken table contract is an error.

use tracing::{debug, warn};

use crate::core::row::Row;
use crate::core::schema::{KeyMode, PkValue, StructuredShape, TableSpec};
use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result};
use crate::introspect::ColumnBinding;
use crate::reference::{ReferenceValidator, ValidatedValue};
use crate::timestamp::{is_null_marker, TimestampNormalizer};

/// A value the transformer had to repair.
#[derive(Debug, Clone, PartialEq)]
pub enum Degradation {
    /// A timezone column held text that is not a timestamp; written as NULL.
    UnparsableTimestamp { column: String, raw: String },
    /// A structured column did not parse to the declared shape; written empty.
    UnparsableStructure { column: String },
    /// A dangling reference was nulled.
    ReferenceNulled { column: String, key: PkValue },
    /// A dangling reference was replaced by the fallback key.
    ReferenceDefaulted {
        column: String,
        key: PkValue,
        fallback: PkValue,
    },
}

/// A row ready for the target.
#[derive(Debug, Clone)]
pub struct TransformedRow {
    /// Values keyed by target column, in binding order.
    pub row: Row,
    /// Primary key on the source side.
    pub source_key: Option<PkValue>,
    /// Natural key when keys are remapped.
    pub natural_key: Option<PkValue>,
    /// Repairs applied to this row.
    pub degradations: Vec<Degradation>,
}

/// Result of transforming one row.
#[derive(Debug, Clone)]
pub enum RowOutcome {
    Ready(TransformedRow),
    /// A reference failed under the reject-row policy.
    Rejected { column: String, key: PkValue },
}

/// Applies a table's column conversions.
pub struct RowTransformer<'a> {
    spec: &'a TableSpec,
    binding: &'a ColumnBinding,
    normalizer: TimestampNormalizer,
    validator: ReferenceValidator,
}

impl<'a> RowTransformer<'a> {
    pub fn new(
        spec: &'a TableSpec,
        binding: &'a ColumnBinding,
        normalizer: TimestampNormalizer,
        validator: ReferenceValidator,
    ) -> Self {
        Self {
            spec,
            binding,
            normalizer,
            validator,
        }
    }

    /// Transform one source row.
    ///
    /// Errors only when the row cannot satisfy the table contract, e.g. a
    /// preserved primary key is missing.
    pub fn transform(&self, source: &Row) -> Result<RowOutcome> {
        let table = &self.spec.name;
        let mut row = Row::with_capacity(self.binding.columns.len());
        let mut degradations = Vec::new();

        for col in &self.binding.columns {
            // First non-null source wins; otherwise keep the primary source's value.
            let candidates = col
                .source
                .iter()
                .chain(&col.fallbacks)
                .filter_map(|s| source.get(s));
            let raw = candidates
                .clone()
                .find(|v| !is_null_marker(v))
                .or_else(|| candidates.clone().next())
                .cloned()
                .unwrap_or(SqlValue::Null);
            row.set(col.target.name.clone(), raw);
        }

        // Defaults first so substituted values go through the same checks.
        for col in &self.binding.columns {
            let name = &col.target.name;
            if let Some(default) = self.spec.default_for(name) {
                if row.get(name).map_or(true, is_null_marker) {
                    row.set(name.clone(), default);
                }
            }
        }

        for name in &self.spec.timezone_columns {
            let Some(raw) = row.get(name) else { continue };
            let normalized = match self.normalizer.normalize(raw) {
                Some(ts) => SqlValue::Timestamp(ts),
                None => {
                    if !is_null_marker(raw) {
                        debug!("{}.{}: unparsable timestamp {:?}", table, name, raw);
                        degradations.push(Degradation::UnparsableTimestamp {
                            column: name.clone(),
                            raw: raw.to_string(),
                        });
                    }
                    SqlValue::Null
                }
            };
            row.set(name.clone(), normalized);
        }

        for structured in &self.spec.structured_columns {
            let name = structured.name();
            let Some(raw) = row.get(name) else { continue };
            let (value, ok) = parse_structured(raw, structured.shape());
            if !ok {
                debug!("{}.{}: unparsable structured text", table, name);
                degradations.push(Degradation::UnparsableStructure {
                    column: name.to_string(),
                });
            }
            row.set(name.to_string(), SqlValue::Json(value));
        }

        for fk in &self.spec.foreign_keys {
            let raw = row.get(&fk.column).cloned().unwrap_or(SqlValue::Null);
            let validated = self.validator.validate(fk, &raw);
            match &validated {
                ValidatedValue::Rejected { original } => {
                    warn!(
                        "{}.{}: {} has no row in {}, row rejected",
                        table, fk.column, original, fk.references
                    );
                    return Ok(RowOutcome::Rejected {
                        column: fk.column.clone(),
                        key: original.clone(),
                    });
                }
                ValidatedValue::NulledOut { original } => {
                    warn!(
                        "{}.{}: {} has no row in {}, set to NULL",
                        table, fk.column, original, fk.references
                    );
                    degradations.push(Degradation::ReferenceNulled {
                        column: fk.column.clone(),
                        key: original.clone(),
                    });
                }
                ValidatedValue::Defaulted { original, fallback } => {
                    warn!(
                        "{}.{}: {} has no row in {}, using {}",
                        table, fk.column, original, fk.references, fallback
                    );
                    degradations.push(Degradation::ReferenceDefaulted {
                        column: fk.column.clone(),
                        key: original.clone(),
                        fallback: fallback.clone(),
                    });
                }
                ValidatedValue::Null | ValidatedValue::Valid(_) => {}
            }
            if let Some(value) = validated.to_value() {
                row.set(fk.column.clone(), value);
            }
        }

        let source_key = self
            .binding
            .source_key
            .as_deref()
            .and_then(|k| source.get(k))
            .and_then(PkValue::from_value);

        let natural_key = match self.spec.key_mode {
            KeyMode::Preserve => {
                if source_key.is_none() {
                    return Err(MigrateError::row_transform(
                        table.clone(),
                        format!("primary key {} is NULL", self.binding.primary_key),
                    ));
                }
                None
            }
            KeyMode::Remap => {
                let natural = self
                    .binding
                    .natural_key
                    .as_deref()
                    .and_then(|nk| row.get(nk))
                    .and_then(PkValue::from_value);
                if natural.is_none() {
                    return Err(MigrateError::row_transform(
                        table.clone(),
                        format!(
                            "natural key {} is NULL",
                            self.binding.natural_key.as_deref().unwrap_or_default()
                        ),
                    ));
                }
                natural
            }
        };

        Ok(RowOutcome::Ready(TransformedRow {
            row,
            source_key,
            natural_key,
            degradations,
        }))
    }
}

/// Parse structured text into the expected shape.
///
/// Returns the value and whether it parsed. Null markers become the empty
/// structure without counting as a failure.
pub fn parse_structured(raw: &SqlValue, shape: StructuredShape) -> (serde_json::Value, bool) {
    if is_null_marker(raw) {
        return (shape.empty(), true);
    }
    let parsed = match raw {
        SqlValue::Json(v) => Some(v.clone()),
        SqlValue::Text(s) => serde_json::from_str::<serde_json::Value>(s).ok(),
        SqlValue::Bytes(b) => serde_json::from_slice::<serde_json::Value>(b).ok(),
        _ => None,
    };
    match parsed {
        Some(v) if shape.matches(&v) => (v, true),
        _ => (shape.empty(), false),
    }
}
