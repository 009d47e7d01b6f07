//! Configuration type definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::schema::{ReferencePolicy, TableSpec};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (SQLite).
    pub source: SourceConfig,

    /// Target database configuration (PostgreSQL).
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Tables to migrate, in declaration order.
    #[serde(default)]
    pub tables: Vec<TableSpec>,

    /// Post-migration checks.
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
}

/// Source database (SQLite) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database type (always "sqlite" for now).
    #[serde(default = "default_sqlite")]
    pub r#type: String,

    /// Path to the database file.
    pub path: String,

    /// Maximum pooled connections (default: 4).
    #[serde(default = "default_source_connections")]
    pub max_connections: u32,
}

/// Target database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database type (always "postgres" for now).
    #[serde(default = "default_postgres")]
    pub r#type: String,

    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Target schema (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// What happens to the rest of the plan when a table fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Stop scheduling further tables.
    #[default]
    Abort,
    /// Keep migrating tables that do not depend on a failed table.
    BestEffort,
}

/// Per-table failure limits for the batch writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorThreshold {
    /// Consecutive row failures that fail the table (default: 10).
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: usize,

    /// Cumulative failed/attempted ratio that fails the table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_failure_ratio: Option<f64>,

    /// Rows attempted before the ratio applies (default: 100).
    #[serde(default = "default_min_rows_for_ratio")]
    pub min_rows_for_ratio: usize,
}

impl Default for ErrorThreshold {
    fn default() -> Self {
        Self {
            max_consecutive_failures: default_max_consecutive_failures(),
            max_failure_ratio: None,
            min_rows_for_ratio: default_min_rows_for_ratio(),
        }
    }
}

/// Migration behavior configuration.
///
/// Tunables use `Option<T>` to distinguish "not set" from "explicitly set";
/// the `get_*` accessors apply the defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MigrationConfig {
    /// Rows per batch transaction (default: 1000).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// Tables migrated concurrently (default: 1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Batches buffered between reader and writer (default: 4).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_ahead_batches: Option<usize>,

    /// Maximum PostgreSQL connections (default: workers + 2).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pg_connections: Option<usize>,

    /// Timeout for a single store operation in seconds (default: 60).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_timeout_secs: Option<u64>,

    /// Default policy for foreign keys that fail validation.
    #[serde(default)]
    pub reference_policy: ReferencePolicy,

    /// UTC offset naive timestamps are recorded in, e.g. "+02:00".
    #[serde(default = "default_reference_offset")]
    pub reference_offset: String,

    /// Plan behavior after a table fails.
    #[serde(default)]
    pub failure_mode: FailureMode,

    /// Row failure limits.
    #[serde(default)]
    pub error_threshold: ErrorThreshold,
}

impl MigrationConfig {
    pub fn get_batch_size(&self) -> usize {
        self.batch_size.unwrap_or(1_000)
    }

    pub fn get_workers(&self) -> usize {
        self.workers.unwrap_or(1)
    }

    pub fn get_read_ahead_batches(&self) -> usize {
        self.read_ahead_batches.unwrap_or(4)
    }

    pub fn get_max_pg_connections(&self) -> usize {
        self.max_pg_connections
            .unwrap_or_else(|| self.get_workers() + 2)
    }

    pub fn get_operation_timeout_secs(&self) -> u64 {
        self.operation_timeout_secs.unwrap_or(60)
    }
}

/// A representative query run against the target after migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationQuery {
    /// Label used in the report.
    pub name: String,

    /// Read-only SQL; its row count is reported.
    pub sql: String,

    /// The query must return as many rows as this table has in the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_rows_of: Option<String>,

    /// The query must return exactly this many rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_count: Option<i64>,
}

/// Reconciliation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Representative join queries.
    #[serde(default)]
    pub queries: Vec<ReconciliationQuery>,

    /// Count orphaned references for every declared foreign key (default: true).
    #[serde(default = "default_true")]
    pub check_references: bool,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            queries: Vec::new(),
            check_references: true,
        }
    }
}

// Default value functions for serde
fn default_sqlite() -> String {
    "sqlite".to_string()
}

fn default_postgres() -> String {
    "postgres".to_string()
}

fn default_source_connections() -> u32 {
    4
}

fn default_pg_port() -> u16 {
    5432
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_require() -> String {
    "require".to_string()
}

fn default_reference_offset() -> String {
    "+00:00".to_string()
}

fn default_max_consecutive_failures() -> usize {
    10
}

fn default_min_rows_for_ratio() -> usize {
    100
}

fn default_true() -> bool {
    true
}
