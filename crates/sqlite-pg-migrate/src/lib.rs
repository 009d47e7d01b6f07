//! # sqlite-pg-migrate
//!
//! Dependency-ordered SQLite to PostgreSQL data migration.
//!
//! Tables are migrated in an order where every table comes after the tables
//! it references. Rows pass through a transformation step that:
//!
//! - **Normalizes timestamps** from mixed textual formats to UTC
//! - **Repairs references** that point at rows missing from the target
//! - **Reshapes structured text** columns into JSON or arrays
//!
//! and are written in batch transactions with per-row isolation, so reruns
//! are idempotent and one bad row never poisons a batch.
//!
//! ## Example
//!
//! ```rust,no_run
//! use sqlite_pg_migrate::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> sqlite_pg_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let result = orchestrator.run(CancellationToken::new()).await?;
//!     println!("Migrated {} rows", result.rows_written);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod introspect;
pub mod orchestrator;
pub mod planner;
pub mod reconcile;
pub mod reference;
pub mod timestamp;
pub mod transform;
pub mod writer;

// Re-exports for convenient access
pub use config::{Config, FailureMode, MigrationConfig, SourceConfig, TargetConfig};
pub use crate::core::{Row, SqlValue, TableSpec};
pub use error::{MigrateError, Result};
pub use orchestrator::{MigrationResult, Orchestrator, RunStatus};
pub use planner::MigrationPlan;
pub use reconcile::ValidationReport;
pub use writer::{TableMigrationResult, TableStatus};
