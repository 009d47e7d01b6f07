//! Store implementations.
//!
//! - [`sqlite`]: SQLite source over an SQLx pool
//! - [`postgres`]: PostgreSQL target over a deadpool-postgres pool
//! - [`memory`]: in-memory source and target with the same transactional
//!   behavior, for running the pipeline without a database server

pub mod memory;
pub mod postgres;
pub mod sqlite;

pub use memory::{MemoryStore, MemoryTable};
pub use postgres::PostgresTarget;
pub use sqlite::SqliteSource;
