//! SQLite source store.
//!
//! Opens the database file read-only through an SQLx pool and streams rows in
//! batches. Values are decoded by the storage class of each cell, not the
//! declared column type, since SQLite does not enforce declared types.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row as _, TypeInfo, ValueRef};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::SourceConfig;
use crate::core::row::Row;
use crate::core::schema::ColumnInfo;
use crate::core::traits::{ReadOptions, SourceStore};
use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// SQLite source store.
pub struct SqliteSource {
    pool: SqlitePool,
}

impl SqliteSource {
    /// Open the configured database file.
    pub async fn new(config: &SourceConfig) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .read_only(true)
            .create_if_missing(false);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| MigrateError::pool(e, "opening SQLite source"))?;

        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| MigrateError::pool(e, "testing SQLite source connection"))?;

        info!("Opened SQLite source: {}", config.path);
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn quote_ident(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Decode one cell by its storage class.
    fn cell(row: &SqliteRow, idx: usize) -> Result<SqlValue> {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(SqlValue::Null);
        }
        let class = raw.type_info().name().to_string();
        let value = match class.as_str() {
            "INTEGER" => SqlValue::Int(row.try_get::<i64, _>(idx)?),
            "REAL" => SqlValue::Float(row.try_get::<f64, _>(idx)?),
            "BLOB" => SqlValue::Bytes(row.try_get::<Vec<u8>, _>(idx)?),
            _ => match row.try_get::<String, _>(idx) {
                Ok(s) => SqlValue::Text(s),
                Err(_) => SqlValue::Bytes(row.try_get::<Vec<u8>, _>(idx)?),
            },
        };
        Ok(value)
    }
}

#[async_trait]
impl SourceStore for SqliteSource {
    async fn list_tables(&self) -> Result<Vec<String>> {
        let rows: Vec<SqliteRow> = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| -> Result<String> { Ok(r.try_get::<String, _>("name")?) })
            .collect()
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let row: SqliteRow =
            sqlx::query("SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.try_get::<i64, _>("n")? > 0)
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let sql = format!("PRAGMA table_info({})", Self::quote_ident(table));
        let rows: Vec<SqliteRow> = sqlx::query(&sql).fetch_all(&self.pool).await?;
        if rows.is_empty() {
            return Err(MigrateError::schema_lookup("sqlite", table));
        }
        rows.iter()
            .map(|r| -> Result<ColumnInfo> {
                Ok(ColumnInfo::new(
                    r.try_get::<String, _>("name")?,
                    r.try_get::<String, _>("type")?,
                ))
            })
            .collect()
    }

    async fn count_rows(&self, table: &str) -> Result<i64> {
        if !self.table_exists(table).await? {
            return Err(MigrateError::schema_lookup("sqlite", table));
        }
        let sql = format!("SELECT COUNT(*) FROM {}", Self::quote_ident(table));
        let row: SqliteRow = sqlx::query(&sql).fetch_one(&self.pool).await?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    fn read_table(&self, opts: ReadOptions) -> mpsc::Receiver<Result<Vec<Row>>> {
        let (tx, rx) = mpsc::channel(opts.read_ahead.max(1));
        let pool = self.pool.clone();

        tokio::spawn(async move {
            let col_list: Vec<String> = opts.columns.iter().map(|c| Self::quote_ident(c)).collect();
            let mut sql = format!(
                "SELECT {} FROM {}",
                col_list.join(", "),
                Self::quote_ident(&opts.table)
            );
            if let Some(order_by) = &opts.order_by {
                sql.push_str(&format!(" ORDER BY {}", Self::quote_ident(order_by)));
            }
            debug!("{}: {}", opts.table, sql);

            let batch_size = opts.batch_size.max(1);
            let mut stream = sqlx::query(&sql).fetch(&pool);
            let mut batch: Vec<Row> = Vec::with_capacity(batch_size);

            loop {
                let next = match stream.try_next().await {
                    Ok(next) => next,
                    Err(e) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                };
                let Some(sqlite_row) = next else { break };

                let values: Result<Vec<SqlValue>> = (0..opts.columns.len())
                    .map(|i| Self::cell(&sqlite_row, i))
                    .collect();
                match values {
                    Ok(values) => batch.push(Row::from_parts(&opts.columns, values)),
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }

                if batch.len() >= batch_size {
                    let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                    if tx.send(Ok(full)).await.is_err() {
                        return;
                    }
                }
            }

            if !batch.is_empty() {
                let _ = tx.send(Ok(batch)).await;
            }
        });

        rx
    }

    fn db_type(&self) -> &str {
        "sqlite"
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn source() -> SqliteSource {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE machines (id INTEGER PRIMARY KEY, name TEXT, rate REAL, photo BLOB, installed_at TEXT)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO machines VALUES (1, 'press', 2.5, x'0102', '2024-03-01 08:30:00'), (2, NULL, NULL, NULL, ''), (3, 'lathe', 7, NULL, NULL)",
        )
        .execute(&pool)
        .await
        .unwrap();
        SqliteSource::from_pool(pool)
    }

    #[tokio::test]
    async fn test_introspection() {
        let src = source().await;
        assert_eq!(src.list_tables().await.unwrap(), vec!["machines"]);
        assert!(src.table_exists("machines").await.unwrap());
        assert!(!src.table_exists("ghosts").await.unwrap());

        let cols = src.columns("machines").await.unwrap();
        assert_eq!(cols[0], ColumnInfo::new("id", "integer"));
        assert_eq!(cols.len(), 5);

        let err = src.columns("ghosts").await.unwrap_err();
        assert!(matches!(err, MigrateError::SchemaLookup { store, .. } if store == "sqlite"));
        assert_eq!(src.count_rows("machines").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_read_table_decodes_storage_classes() {
        let src = source().await;
        let columns: Vec<String> = ["id", "name", "rate", "photo", "installed_at"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut rx = src.read_table(ReadOptions {
            table: "machines".into(),
            columns,
            order_by: Some("id".into()),
            batch_size: 2,
            ..ReadOptions::default()
        });

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].get("id"), Some(&SqlValue::Int(1)));
        assert_eq!(first[0].get("rate"), Some(&SqlValue::Float(2.5)));
        assert_eq!(first[0].get("photo"), Some(&SqlValue::Bytes(vec![1, 2])));
        assert_eq!(first[1].get("name"), Some(&SqlValue::Null));
        assert_eq!(first[1].get("installed_at"), Some(&SqlValue::from("")));

        let second = rx.recv().await.unwrap().unwrap();
        // REAL affinity stores 7 as 7.0
        assert_eq!(second[0].get("rate"), Some(&SqlValue::Float(7.0)));
        assert!(rx.recv().await.is_none());
    }
}
