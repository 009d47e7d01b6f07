//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
///
/// Data-quality problems (orphaned references, unparsable timestamps) are not
/// errors: they surface as typed outcomes on the row and table results.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source database connection or query error
    #[error("Source database error: {0}")]
    Source(#[from] sqlx::Error),

    /// Target database connection or query error
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Table does not exist in the queried store
    #[error("Table {table} not found in {store} store")]
    SchemaLookup { store: String, table: String },

    /// A declared column does not exist in the target table
    #[error("Column {column} not found in table {table}")]
    UnknownColumn { table: String, column: String },

    /// The declared table dependencies contain a cycle
    #[error("Cyclic table dependency: {}", tables.join(" -> "))]
    CyclicDependency { tables: Vec<String> },

    /// A table depends on a table that is not part of the plan
    #[error("Table {table} depends on unknown table {dependency}")]
    UnknownDependency { table: String, dependency: String },

    /// A row could not be shaped into the table contract
    #[error("Row transform failed for table {table}: {message}")]
    RowTransform { table: String, message: String },

    /// A batch could not be committed to the target
    #[error("Batch commit failed for table {table}: {message}")]
    BatchCommit { table: String, message: String },

    /// A table exceeded its failure threshold or could not be migrated
    #[error("Migration failed for table {table}: {message}")]
    TableMigrationFailed { table: String, message: String },

    /// A store operation exceeded the configured timeout
    #[error("Operation timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a SchemaLookup error
    pub fn schema_lookup(store: impl Into<String>, table: impl Into<String>) -> Self {
        MigrateError::SchemaLookup {
            store: store.into(),
            table: table.into(),
        }
    }

    /// Create a RowTransform error
    pub fn row_transform(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::RowTransform {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a BatchCommit error
    pub fn batch_commit(table: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::BatchCommit {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a TableMigrationFailed error
    pub fn table_failed(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::TableMigrationFailed {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Whether the error aborts the whole run before or during planning.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(
            self,
            MigrateError::Config(_)
                | MigrateError::SchemaLookup { .. }
                | MigrateError::UnknownColumn { .. }
                | MigrateError::CyclicDependency { .. }
                | MigrateError::UnknownDependency { .. }
                | MigrateError::Cancelled
        )
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 2,
            MigrateError::CyclicDependency { .. } | MigrateError::UnknownDependency { .. } => 3,
            MigrateError::SchemaLookup { .. } | MigrateError::UnknownColumn { .. } => 4,
            MigrateError::Source(_) | MigrateError::Target(_) | MigrateError::Pool { .. } => 5,
            MigrateError::TableMigrationFailed { .. } | MigrateError::BatchCommit { .. } => 6,
            MigrateError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cyclic_dependency_message() {
        let err = MigrateError::CyclicDependency {
            tables: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Cyclic table dependency: a -> b -> a");
        assert!(err.is_fatal_for_run());
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_table_failure_is_not_fatal_for_run() {
        let err = MigrateError::table_failed("orders", "too many failures");
        assert!(!err.is_fatal_for_run());
        assert_eq!(err.exit_code(), 6);
    }

    #[test]
    fn test_format_detailed_includes_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.yaml");
        let err = MigrateError::from(io);
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: IO error: missing.yaml"));
    }
}
