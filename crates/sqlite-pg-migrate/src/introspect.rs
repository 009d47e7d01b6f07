//! Schema introspection.
//!
//! Column lists are read from both stores at runtime and bound against the
//! table spec. Binding is where contract violations surface: a spec that
//! names a target column the target does not have fails here, before any row
//! is read.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::core::schema::{ColumnInfo, KeyMode, TableSpec};
use crate::core::traits::{with_timeout, SourceStore, TargetStore};
use crate::error::{MigrateError, Result};

/// One target column and where its value comes from.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundColumn {
    /// Source column, or `None` when the source has no such column.
    pub source: Option<String>,
    /// Further source columns read, in order, while the value is still null.
    pub fallbacks: Vec<String>,
    /// Target column.
    pub target: ColumnInfo,
}

/// A table spec resolved against the live schemas of both stores.
#[derive(Debug, Clone)]
pub struct ColumnBinding {
    /// Spec (and source) table name.
    pub table: String,
    /// Target table name.
    pub target_table: String,
    /// Target columns with their sources, in mapping order.
    pub columns: Vec<BoundColumn>,
    /// Source column carrying the primary key.
    pub source_key: Option<String>,
    /// Target primary key column.
    pub primary_key: String,
    /// Natural key column when keys are remapped.
    pub natural_key: Option<String>,
}

impl ColumnBinding {
    /// Source columns to read, without duplicates.
    pub fn source_columns(&self) -> Vec<String> {
        let mut cols: Vec<String> = Vec::new();
        let sources = self
            .columns
            .iter()
            .flat_map(|c| c.source.iter().chain(&c.fallbacks).cloned())
            .chain(self.source_key.clone());
        for col in sources {
            if !cols.contains(&col) {
                cols.push(col);
            }
        }
        cols
    }

    /// Target columns written on insert.
    pub fn insert_columns(&self) -> Vec<ColumnInfo> {
        self.columns.iter().map(|c| c.target.clone()).collect()
    }

    pub fn has_target_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.target.name == name)
    }
}

/// Reads column metadata from the source and target stores.
pub struct SchemaIntrospector {
    source: Arc<dyn SourceStore>,
    target: Arc<dyn TargetStore>,
    timeout: Duration,
}

impl SchemaIntrospector {
    pub fn new(
        source: Arc<dyn SourceStore>,
        target: Arc<dyn TargetStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            target,
            timeout,
        }
    }

    /// Ordered column names of a source table.
    pub async fn source_columns(&self, table: &str) -> Result<Vec<String>> {
        let cols =
            with_timeout("read source columns", self.timeout, self.source.columns(table)).await?;
        Ok(cols.into_iter().map(|c| c.name).collect())
    }

    /// Ordered columns of a target table.
    pub async fn target_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        with_timeout("read target columns", self.timeout, self.target.columns(table)).await
    }

    /// Resolve a spec against both schemas.
    pub async fn bind(&self, spec: &TableSpec) -> Result<ColumnBinding> {
        let source_cols = self.source_columns(&spec.name).await?;
        let target_cols = self.target_columns(spec.target_table()).await?;
        let binding = bind_columns(spec, &source_cols, &target_cols)?;
        debug!(
            "{}: bound {} columns ({} from source)",
            spec.name,
            binding.columns.len(),
            binding.columns.iter().filter(|c| c.source.is_some()).count()
        );
        Ok(binding)
    }

    /// Check that a seeded table and its key column exist in the target.
    pub async fn check_seed_table(&self, spec: &TableSpec) -> Result<()> {
        let target_cols = self.target_columns(spec.target_table()).await?;
        if !target_cols.iter().any(|c| c.name == spec.primary_key) {
            return Err(MigrateError::UnknownColumn {
                table: spec.target_table().to_string(),
                column: spec.primary_key.clone(),
            });
        }
        Ok(())
    }
}

fn find_column<'a>(cols: &'a [String], name: &str) -> Option<&'a String> {
    cols.iter()
        .find(|c| *c == name)
        .or_else(|| cols.iter().find(|c| c.eq_ignore_ascii_case(name)))
}

fn find_target<'a>(cols: &'a [ColumnInfo], name: &str) -> Option<&'a ColumnInfo> {
    cols.iter()
        .find(|c| c.name == name)
        .or_else(|| cols.iter().find(|c| c.name.eq_ignore_ascii_case(name)))
}

/// Bind a spec against known column lists.
pub fn bind_columns(
    spec: &TableSpec,
    source_cols: &[String],
    target_cols: &[ColumnInfo],
) -> Result<ColumnBinding> {
    let unknown = |column: &str| MigrateError::UnknownColumn {
        table: spec.target_table().to_string(),
        column: column.to_string(),
    };

    let mut columns: Vec<BoundColumn> = Vec::new();

    if spec.columns.is_empty() {
        for src in source_cols {
            if let Some(target) = find_target(target_cols, src) {
                columns.push(BoundColumn {
                    source: Some(src.clone()),
                    fallbacks: Vec::new(),
                    target: target.clone(),
                });
            } else {
                debug!("{}: source column {} has no target column, skipped", spec.name, src);
            }
        }
    } else {
        for mapping in &spec.columns {
            let target = find_target(target_cols, mapping.target())
                .ok_or_else(|| unknown(mapping.target()))?;
            let mut found = mapping
                .sources()
                .iter()
                .filter_map(|name| find_column(source_cols, name).cloned());
            let source = found.next();
            let fallbacks: Vec<String> = found.collect();
            if source.is_none() {
                warn!(
                    "{}: source column {} does not exist, {} will be written as NULL",
                    spec.name,
                    mapping.sources().join(" / "),
                    target.name
                );
            }
            columns.push(BoundColumn {
                source,
                fallbacks,
                target: target.clone(),
            });
        }
    }

    // Columns that only have a declared default.
    for column in spec.defaults.keys() {
        if columns.iter().any(|c| c.target.name == *column) {
            continue;
        }
        let target = find_target(target_cols, column).ok_or_else(|| unknown(column))?;
        columns.push(BoundColumn {
            source: None,
            fallbacks: Vec::new(),
            target: target.clone(),
        });
    }

    let bound = |name: &str| columns.iter().any(|c| c.target.name == name);
    let declared = spec
        .timezone_columns
        .iter()
        .map(String::as_str)
        .chain(spec.structured_columns.iter().map(|c| c.name()))
        .chain(spec.foreign_keys.iter().map(|fk| fk.column.as_str()));
    for column in declared {
        if !bound(column) {
            return Err(unknown(column));
        }
    }

    // Where the primary key comes from in the source.
    let pk_source = columns
        .iter()
        .find(|c| c.target.name == spec.primary_key)
        .and_then(|c| c.source.clone())
        .or_else(|| find_column(source_cols, &spec.primary_key).cloned());

    let natural_key = match spec.key_mode {
        KeyMode::Preserve => {
            if !bound(&spec.primary_key) {
                return Err(unknown(&spec.primary_key));
            }
            None
        }
        KeyMode::Remap => {
            let natural = spec
                .natural_key
                .clone()
                .ok_or_else(|| MigrateError::Config(format!(
                    "table '{}': key_mode remap requires natural_key",
                    spec.name
                )))?;
            if !bound(&natural) {
                return Err(unknown(&natural));
            }
            if pk_source.is_none() {
                return Err(MigrateError::UnknownColumn {
                    table: spec.name.clone(),
                    column: spec.primary_key.clone(),
                });
            }
            // The target assigns the key.
            columns.retain(|c| c.target.name != spec.primary_key);
            Some(natural)
        }
    };

    Ok(ColumnBinding {
        table: spec.name.clone(),
        target_table: spec.target_table().to_string(),
        columns,
        source_key: pk_source,
        primary_key: spec.primary_key.clone(),
        natural_key,
    })
}
