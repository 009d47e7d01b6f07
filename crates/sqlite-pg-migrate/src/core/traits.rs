//! Store traits for the migration engine.
//!
//! - [`SourceStore`]: read-only access to the store being migrated from
//! - [`TargetStore`]: the store being migrated into
//! - [`TargetTransaction`]: one open transaction on the target
//!
//! The engine never issues DDL. Tables are expected to exist on both sides.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{MigrateError, Result};

use super::row::Row;
use super::schema::{ColumnInfo, PkValue};
use super::value::SqlValue;

/// Options for reading rows from a table.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Table name.
    pub table: String,
    /// Columns to read. Every one must exist in the table.
    pub columns: Vec<String>,
    /// Column to order by for a stable read order.
    pub order_by: Option<String>,
    /// Number of rows per batch.
    pub batch_size: usize,
    /// Batches buffered ahead of the consumer.
    pub read_ahead: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            table: String::new(),
            columns: Vec::new(),
            order_by: None,
            batch_size: 1_000,
            read_ahead: 4,
        }
    }
}

/// Read data from the source store.
///
/// # Streaming
///
/// [`SourceStore::read_table`] returns a channel receiver for streaming
/// batches, so the reader runs ahead of the writer by at most the channel
/// capacity.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// List user tables.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Check if a table exists.
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Columns of a table in definition order.
    ///
    /// Fails with [`MigrateError::SchemaLookup`] if the table does not exist.
    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>>;

    /// Get the row count for a table.
    async fn count_rows(&self, table: &str) -> Result<i64>;

    /// Start streaming rows from a table.
    ///
    /// The store spawns a background task that fills the channel; the
    /// receiver yields batches until the table is exhausted or an error is
    /// sent.
    fn read_table(&self, opts: ReadOptions) -> mpsc::Receiver<Result<Vec<Row>>>;

    /// Get the database type identifier (e.g., "sqlite").
    fn db_type(&self) -> &str;

    /// Close the connection pool.
    async fn close(&self);
}

/// A request to insert rows into one target table.
#[derive(Debug, Clone)]
pub struct InsertRequest {
    /// Target table name.
    pub table: String,
    /// Target columns, in the order of each row's values.
    pub columns: Vec<ColumnInfo>,
}

impl InsertRequest {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// A foreign-key relationship to check in the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceCheck {
    pub table: String,
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// Result of a [`ReferenceCheck`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReferenceCount {
    /// Rows with a non-null reference.
    pub non_null: i64,
    /// Rows whose reference has no matching row.
    pub orphaned: i64,
}

/// Write data to the target store.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Check if a table exists.
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Columns of a table in definition order.
    ///
    /// Fails with [`MigrateError::SchemaLookup`] if the table does not exist.
    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>>;

    /// Open a transaction.
    async fn begin(&self) -> Result<Box<dyn TargetTransaction>>;

    /// Get the row count for a table.
    async fn count_rows(&self, table: &str) -> Result<i64>;

    /// All non-null values of `key_column` currently in `table`.
    async fn fetch_keys(&self, table: &str, key_column: &str) -> Result<Vec<PkValue>>;

    /// Count non-null and orphaned references for a foreign key.
    async fn count_references(&self, check: &ReferenceCheck) -> Result<ReferenceCount>;

    /// Run a query in a read-only transaction and return its row count.
    async fn query_count(&self, sql: &str) -> Result<i64>;

    /// Get the database type identifier (e.g., "postgres").
    fn db_type(&self) -> &str;

    /// Close the connection pool.
    async fn close(&self);
}

/// An open target transaction.
///
/// Dropping a transaction without calling [`commit`](TargetTransaction::commit)
/// must discard its writes.
#[async_trait]
pub trait TargetTransaction: Send {
    /// Insert rows, skipping rows that collide with an existing key.
    ///
    /// The statement is atomic: on error no row of the call is applied, and
    /// the transaction is unusable until rolled back to a savepoint.
    /// Returns the number of rows actually inserted.
    async fn insert_rows(&mut self, req: &InsertRequest, rows: &[Vec<SqlValue>]) -> Result<u64>;

    async fn savepoint(&mut self, name: &str) -> Result<()>;

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()>;

    async fn release_savepoint(&mut self, name: &str) -> Result<()>;

    /// The subset of `keys` present in `table.key_column`, as seen by this
    /// transaction.
    async fn existing_keys(
        &mut self,
        table: &str,
        key_column: &str,
        keys: &[PkValue],
    ) -> Result<Vec<PkValue>>;

    /// Map natural keys to the target's primary keys, as seen by this
    /// transaction. Unknown natural keys are omitted.
    async fn resolve_keys(
        &mut self,
        table: &str,
        natural_key: &str,
        primary_key: &str,
        keys: &[PkValue],
    ) -> Result<Vec<(PkValue, PkValue)>>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Bound a store operation by `limit`, mapping expiry to
/// [`MigrateError::Timeout`].
pub async fn with_timeout<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(MigrateError::Timeout {
            operation: operation.to_string(),
            seconds: limit.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_options_default() {
        let opts = ReadOptions::default();
        assert_eq!(opts.batch_size, 1_000);
        assert!(opts.columns.is_empty());
        assert!(opts.order_by.is_none());
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: Result<()> = with_timeout("sleep", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(MigrateError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result() {
        let result = with_timeout("fast", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
