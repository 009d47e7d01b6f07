//! PostgreSQL target store.
//!
//! Uses deadpool-postgres for connection pooling. Batches are staged into a
//! temporary table with text COPY and moved into the target with
//! `INSERT ... SELECT ... ON CONFLICT DO NOTHING`, so re-running a batch is
//! harmless.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use futures::SinkExt;
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info};

use super::copy::encode_row;
use super::tls::SslMode;
use crate::config::TargetConfig;
use crate::core::schema::{ColumnInfo, PkValue};
use crate::core::traits::{
    InsertRequest, ReferenceCheck, ReferenceCount, TargetStore, TargetTransaction,
};
use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest identifier PostgreSQL keeps.
const MAX_IDENT_LEN: usize = 63;

/// Quote a PostgreSQL identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Qualify a table name with schema.
fn qualify_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

fn staging_table(table: &str) -> String {
    let mut name = format!("_stage_{}", table);
    while name.len() > MAX_IDENT_LEN {
        name.pop();
    }
    quote_ident(&name)
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_keys(rows: &[tokio_postgres::Row]) -> Vec<PkValue> {
    rows.iter()
        .filter_map(|r| r.get::<_, Option<String>>(0))
        .filter_map(|s| PkValue::from_value(&SqlValue::Text(s)))
        .collect()
}

/// PostgreSQL target store.
pub struct PostgresTarget {
    pool: Pool,
    schema: String,
}

impl PostgresTarget {
    /// Connect and verify the configured database.
    pub async fn new(config: &TargetConfig, max_conns: usize) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.application_name("sqlite-pg-migrate");

        // Connection options for reliability
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = match SslMode::parse(&config.ssl_mode)?.connector()? {
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
            None => Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config),
        };
        let pool = Pool::builder(mgr)
            .max_size(max_conns.max(1))
            .build()
            .map_err(|e| MigrateError::pool(e, "creating PostgreSQL target pool"))?;

        // Test connection
        let client = pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "testing PostgreSQL target connection"))?;
        client.simple_query("SELECT 1").await?;

        info!(
            "Connected to PostgreSQL target: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self {
            pool,
            schema: config.schema.clone(),
        })
    }

    async fn client(&self) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "getting PostgreSQL connection"))
    }
}

#[async_trait]
impl TargetStore for PostgresTarget {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_schema = $1 AND table_name = $2)",
                &[&self.schema, &table],
            )
            .await?;
        Ok(row.get::<_, bool>(0))
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let client = self.client().await?;
        let rows = client
            .query(
                r#"
                SELECT column_name::text, data_type::text, udt_name::text
                FROM information_schema.columns
                WHERE table_schema = $1 AND table_name = $2
                ORDER BY ordinal_position
                "#,
                &[&self.schema, &table],
            )
            .await?;
        if rows.is_empty() {
            return Err(MigrateError::schema_lookup("postgres", table));
        }
        Ok(rows
            .iter()
            .map(|r| {
                let name: String = r.get(0);
                let data_type: String = r.get(1);
                let udt: String = r.get(2);
                if data_type.eq_ignore_ascii_case("ARRAY") {
                    ColumnInfo::new(name, format!("{}[]", udt.trim_start_matches('_')))
                } else {
                    ColumnInfo::new(name, data_type)
                }
            })
            .collect())
    }

    async fn begin(&self) -> Result<Box<dyn TargetTransaction>> {
        let client = self.client().await?;
        client.batch_execute("BEGIN").await?;
        Ok(Box::new(PgTransaction {
            client: Some(client),
            schema: self.schema.clone(),
        }))
    }

    async fn count_rows(&self, table: &str) -> Result<i64> {
        let client = self.client().await?;
        let sql = format!("SELECT COUNT(*)::int8 FROM {}", qualify_table(&self.schema, table));
        let row = client.query_one(&sql, &[]).await?;
        Ok(row.get::<_, i64>(0))
    }

    async fn fetch_keys(&self, table: &str, key_column: &str) -> Result<Vec<PkValue>> {
        let client = self.client().await?;
        let key = quote_ident(key_column);
        let sql = format!(
            "SELECT DISTINCT {}::text FROM {} WHERE {} IS NOT NULL",
            key,
            qualify_table(&self.schema, table),
            key
        );
        let rows = client.query(&sql, &[]).await?;
        Ok(parse_keys(&rows))
    }

    async fn count_references(&self, check: &ReferenceCheck) -> Result<ReferenceCount> {
        let client = self.client().await?;
        let col = format!("c.{}", quote_ident(&check.column));
        let referenced = format!("p.{}", quote_ident(&check.referenced_column));
        let sql = format!(
            "SELECT COUNT({col})::int8, (COUNT({col}) FILTER (WHERE {referenced} IS NULL))::int8 \
             FROM {child} c LEFT JOIN {parent} p ON {referenced}::text = {col}::text",
            col = col,
            referenced = referenced,
            child = qualify_table(&self.schema, &check.table),
            parent = qualify_table(&self.schema, &check.referenced_table),
        );
        let row = client.query_one(&sql, &[]).await?;
        Ok(ReferenceCount {
            non_null: row.get(0),
            orphaned: row.get(1),
        })
    }

    async fn query_count(&self, sql: &str) -> Result<i64> {
        let mut client = self.client().await?;
        let tx = client.build_transaction().read_only(true).start().await?;
        let wrapped = format!(
            "SELECT COUNT(*)::int8 FROM ({}) AS q",
            sql.trim().trim_end_matches(';')
        );
        let row = tx.query_one(&wrapped, &[]).await?;
        tx.rollback().await?;
        Ok(row.get::<_, i64>(0))
    }

    fn db_type(&self) -> &str {
        "postgres"
    }

    async fn close(&self) {
        self.pool.close();
    }
}

/// An open transaction holding one pooled connection.
///
/// A transaction dropped before commit or rollback detaches its connection
/// from the pool; closing the connection makes the server roll back.
struct PgTransaction {
    client: Option<Object>,
    schema: String,
}

impl PgTransaction {
    fn client(&self) -> Result<&Object> {
        self.client
            .as_ref()
            .ok_or_else(|| MigrateError::pool("transaction already finished", "using PostgreSQL transaction"))
    }

    async fn finish(mut self: Box<Self>, statement: &str) -> Result<()> {
        self.client()?.batch_execute(statement).await?;
        // Back to the pool only once the transaction is closed.
        drop(self.client.take());
        Ok(())
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            debug!("discarding connection with an open transaction");
            drop(Object::take(client));
        }
    }
}

#[async_trait]
impl TargetTransaction for PgTransaction {
    async fn insert_rows(&mut self, req: &InsertRequest, rows: &[Vec<SqlValue>]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let client = self.client()?;
        let target = qualify_table(&self.schema, &req.table);
        let stage = staging_table(&req.table);
        let cols = column_list(&req.column_names());

        // The staging table copies the target's column types.
        client
            .batch_execute(&format!(
                "CREATE TEMP TABLE IF NOT EXISTS {stage} ON COMMIT DROP AS SELECT {cols} FROM {target} WITH NO DATA; \
                 TRUNCATE {stage}",
                stage = stage,
                cols = cols,
                target = target,
            ))
            .await?;

        let mut text = String::with_capacity(rows.len() * 128);
        for row in rows {
            encode_row(&mut text, &req.columns, row);
        }
        let copy_sql = format!("COPY {} ({}) FROM STDIN WITH (FORMAT TEXT)", stage, cols);
        let sink = client.copy_in::<_, Bytes>(&copy_sql).await?;
        tokio::pin!(sink);
        sink.send(Bytes::from(text)).await?;
        sink.finish().await?;

        let insert_sql = format!(
            "INSERT INTO {} ({}) SELECT {} FROM {} ON CONFLICT DO NOTHING",
            target, cols, cols, stage
        );
        let inserted = client.execute(&insert_sql, &[]).await?;
        debug!("{}: {} of {} rows inserted", req.table, inserted, rows.len());
        Ok(inserted)
    }

    async fn savepoint(&mut self, name: &str) -> Result<()> {
        let sql = format!("SAVEPOINT {}", quote_ident(name));
        self.client()?.batch_execute(&sql).await?;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        let sql = format!("ROLLBACK TO SAVEPOINT {}", quote_ident(name));
        self.client()?.batch_execute(&sql).await?;
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        let sql = format!("RELEASE SAVEPOINT {}", quote_ident(name));
        self.client()?.batch_execute(&sql).await?;
        Ok(())
    }

    async fn existing_keys(
        &mut self,
        table: &str,
        key_column: &str,
        keys: &[PkValue],
    ) -> Result<Vec<PkValue>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let key = quote_ident(key_column);
        let sql = format!(
            "SELECT DISTINCT {}::text FROM {} WHERE {}::text = ANY($1)",
            key,
            qualify_table(&self.schema, table),
            key
        );
        let texts: Vec<String> = keys.iter().map(PkValue::to_string).collect();
        let rows = self.client()?.query(&sql, &[&texts]).await?;
        Ok(parse_keys(&rows))
    }

    async fn resolve_keys(
        &mut self,
        table: &str,
        natural_key: &str,
        primary_key: &str,
        keys: &[PkValue],
    ) -> Result<Vec<(PkValue, PkValue)>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let natural = quote_ident(natural_key);
        let sql = format!(
            "SELECT {}::text, {}::text FROM {} WHERE {}::text = ANY($1)",
            natural,
            quote_ident(primary_key),
            qualify_table(&self.schema, table),
            natural
        );
        let texts: Vec<String> = keys.iter().map(PkValue::to_string).collect();
        let rows = self.client()?.query(&sql, &[&texts]).await?;
        Ok(rows
            .iter()
            .filter_map(|r| {
                let nk = PkValue::from_value(&SqlValue::Text(r.get::<_, Option<String>>(0)?))?;
                let pk = PkValue::from_value(&SqlValue::Text(r.get::<_, Option<String>>(1)?))?;
                Some((nk, pk))
            })
            .collect())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("orders"), "\"orders\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(qualify_table("public", "orders"), "\"public\".\"orders\"");
    }

    #[test]
    fn test_staging_table_fits_identifier_limit() {
        assert_eq!(staging_table("orders"), "\"_stage_orders\"");
        let long = "x".repeat(80);
        assert_eq!(staging_table(&long).len(), MAX_IDENT_LEN + 2);
    }

    #[test]
    fn test_column_list() {
        let cols = vec!["id".to_string(), "machine_id".to_string()];
        assert_eq!(column_list(&cols), "\"id\", \"machine_id\"");
    }
}
