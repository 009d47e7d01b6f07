//! In-memory stores.
//!
//! [`MemoryStore`] implements both [`SourceStore`] and [`TargetStore`] with
//! the transactional behavior the pipeline relies on: statement atomicity,
//! savepoints, conflict-skip inserts, and discard-on-drop transactions. It is
//! used to exercise the pipeline without a database server.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::row::Row;
use crate::core::schema::{ColumnInfo, PkValue};
use crate::core::traits::{
    InsertRequest, ReadOptions, ReferenceCheck, ReferenceCount, SourceStore, TargetStore,
    TargetTransaction,
};
use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result};

type QueryFn = Arc<dyn Fn(&HashMap<String, MemoryTable>) -> i64 + Send + Sync>;
type RowCheck = Arc<dyn Fn(&str, &Row) -> Option<String> + Send + Sync>;

/// A table held in memory.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    name: String,
    columns: Vec<ColumnInfo>,
    primary_key: Option<String>,
    auto_increment: bool,
    unique: Vec<String>,
    not_null: Vec<String>,
    rows: Vec<Row>,
    next_id: i64,
}

impl MemoryTable {
    /// Table with untyped (`text`) columns and no constraints.
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| ColumnInfo::new(*c, "text")).collect(),
            primary_key: None,
            auto_increment: false,
            unique: Vec::new(),
            not_null: Vec::new(),
            rows: Vec::new(),
            next_id: 1,
        }
    }

    /// Override a column's declared type.
    pub fn typed(mut self, column: &str, data_type: &str) -> Self {
        if let Some(col) = self.columns.iter_mut().find(|c| c.name == column) {
            *col = ColumnInfo::new(column, data_type);
        }
        self
    }

    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        self.not_null.push(column.clone());
        self.primary_key = Some(column);
        self
    }

    /// Assign keys to rows inserted without one.
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn unique(mut self, column: impl Into<String>) -> Self {
        self.unique.push(column.into());
        self
    }

    pub fn not_null(mut self, column: impl Into<String>) -> Self {
        self.not_null.push(column.into());
        self
    }

    pub fn row(mut self, row: Row) -> Self {
        self.bump_next_id(&row);
        self.rows.push(row);
        self
    }

    pub fn rows(mut self, rows: impl IntoIterator<Item = Row>) -> Self {
        for row in rows {
            self = self.row(row);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Committed rows.
    pub fn data(&self) -> &[Row] {
        &self.rows
    }

    fn bump_next_id(&mut self, row: &Row) {
        if let Some(PkValue::Int(id)) = self
            .primary_key
            .as_deref()
            .and_then(|pk| row.get(pk))
            .and_then(PkValue::from_value)
        {
            self.next_id = self.next_id.max(id + 1);
        }
    }

    fn key_of(row: &Row, column: &str) -> Option<PkValue> {
        row.get(column).and_then(PkValue::from_value)
    }

    fn conflicts(&self, row: &Row) -> bool {
        let keyed = self.primary_key.iter().chain(self.unique.iter());
        for column in keyed {
            if let Some(key) = Self::key_of(row, column) {
                if self
                    .rows
                    .iter()
                    .any(|r| Self::key_of(r, column).as_ref() == Some(&key))
                {
                    return true;
                }
            }
        }
        false
    }

    fn keys(&self, column: &str) -> HashSet<PkValue> {
        self.rows
            .iter()
            .filter_map(|r| Self::key_of(r, column))
            .collect()
    }
}

#[derive(Default)]
struct Inner {
    tables: Mutex<HashMap<String, MemoryTable>>,
    queries: Mutex<HashMap<String, QueryFn>>,
    row_checks: Mutex<Vec<RowCheck>>,
    insert_delay: Mutex<Option<Duration>>,
    stalled: Mutex<HashSet<&'static str>>,
    failing_commits: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

impl Inner {
    fn tables(&self) -> std::sync::MutexGuard<'_, HashMap<String, MemoryTable>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Never returns if `operation` has been stalled.
    async fn stall_point(&self, operation: &str) {
        let stalled = self
            .stalled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(operation);
        if stalled {
            std::future::pending::<()>().await;
        }
    }
}

/// An in-memory relational store.
#[derive(Clone)]
pub struct MemoryStore {
    db_type: String,
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create an empty store reporting `db_type` (used in error messages).
    pub fn new(db_type: impl Into<String>) -> Self {
        Self {
            db_type: db_type.into(),
            inner: Arc::new(Inner::default()),
        }
    }

    /// Add or replace a table.
    pub fn create_table(&self, table: MemoryTable) {
        self.inner.tables().insert(table.name.clone(), table);
    }

    /// Snapshot of a table's committed rows.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.inner
            .tables()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Number of committed rows.
    pub fn row_count(&self, table: &str) -> usize {
        self.inner.tables().get(table).map_or(0, |t| t.rows.len())
    }

    /// Register the row count returned for an exact SQL string.
    pub fn register_query<F>(&self, sql: impl Into<String>, f: F)
    where
        F: Fn(&HashMap<String, MemoryTable>) -> i64 + Send + Sync + 'static,
    {
        self.inner
            .queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(sql.into(), Arc::new(f));
    }

    /// Fail inserts of rows whose `column` equals `value`.
    pub fn fail_rows_where(&self, table: &str, column: &str, value: SqlValue) {
        let (table, column) = (table.to_string(), column.to_string());
        let check: RowCheck = Arc::new(move |t: &str, row: &Row| {
            (t == table && row.get(&column) == Some(&value))
                .then(|| format!("check constraint on {}.{} violated", table, column))
        });
        self.inner
            .row_checks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(check);
    }

    /// Make the next `count` commits fail.
    pub fn fail_commits(&self, count: usize) {
        self.inner.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Delay every insert statement.
    pub fn set_insert_delay(&self, delay: Option<Duration>) {
        *self
            .inner
            .insert_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Make every call of a store operation hang. Recognized names are
    /// `columns`, `count_rows`, `count_references`, `query_count`,
    /// `savepoint`, `release_savepoint`, `rollback_to_savepoint` and
    /// `rollback`.
    pub fn stall(&self, operation: &'static str) {
        self.inner
            .stalled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(operation);
    }

    pub fn commit_count(&self) -> usize {
        self.inner.commits.load(Ordering::SeqCst)
    }

    pub fn rollback_count(&self) -> usize {
        self.inner.rollbacks.load(Ordering::SeqCst)
    }

    fn lookup_error(&self, table: &str) -> MigrateError {
        MigrateError::schema_lookup(self.db_type.clone(), table)
    }

    fn with_table<T>(&self, table: &str, f: impl FnOnce(&MemoryTable) -> T) -> Result<T> {
        let tables = self.inner.tables();
        let t = tables.get(table).ok_or_else(|| self.lookup_error(table))?;
        Ok(f(t))
    }
}

#[async_trait]
impl SourceStore for MemoryStore {
    async fn list_tables(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.inner.tables().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.inner.tables().contains_key(table))
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        self.inner.stall_point("columns").await;
        self.with_table(table, |t| t.columns.clone())
    }

    async fn count_rows(&self, table: &str) -> Result<i64> {
        self.inner.stall_point("count_rows").await;
        self.with_table(table, |t| t.rows.len() as i64)
    }

    fn read_table(&self, opts: ReadOptions) -> mpsc::Receiver<Result<Vec<Row>>> {
        let (tx, rx) = mpsc::channel(opts.read_ahead.max(1));
        let snapshot = self.with_table(&opts.table, |t| (t.columns.clone(), t.rows.clone()));

        tokio::spawn(async move {
            let (columns, mut rows) = match snapshot {
                Ok(s) => s,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };
            if let Some(missing) = opts
                .columns
                .iter()
                .find(|c| !columns.iter().any(|col| col.name == **c))
            {
                let _ = tx
                    .send(Err(MigrateError::UnknownColumn {
                        table: opts.table.clone(),
                        column: missing.clone(),
                    }))
                    .await;
                return;
            }
            if let Some(order_by) = &opts.order_by {
                rows.sort_by_key(|r| MemoryTable::key_of(r, order_by));
            }
            for chunk in rows.chunks(opts.batch_size.max(1)) {
                let batch = chunk
                    .iter()
                    .map(|r| Row::from_parts(&opts.columns, r.values_for(&opts.columns)))
                    .collect();
                if tx.send(Ok(batch)).await.is_err() {
                    return;
                }
            }
        });

        rx
    }

    fn db_type(&self) -> &str {
        &self.db_type
    }

    async fn close(&self) {}
}

#[async_trait]
impl TargetStore for MemoryStore {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.inner.tables().contains_key(table))
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        self.inner.stall_point("columns").await;
        self.with_table(table, |t| t.columns.clone())
    }

    async fn begin(&self) -> Result<Box<dyn TargetTransaction>> {
        Ok(Box::new(MemoryTransaction {
            db_type: self.db_type.clone(),
            inner: Arc::clone(&self.inner),
            work: HashMap::new(),
            savepoints: Vec::new(),
        }))
    }

    async fn count_rows(&self, table: &str) -> Result<i64> {
        self.inner.stall_point("count_rows").await;
        self.with_table(table, |t| t.rows.len() as i64)
    }

    async fn fetch_keys(&self, table: &str, key_column: &str) -> Result<Vec<PkValue>> {
        let mut keys: Vec<PkValue> = self.with_table(table, |t| t.keys(key_column))?.into_iter().collect();
        keys.sort();
        Ok(keys)
    }

    async fn count_references(&self, check: &ReferenceCheck) -> Result<ReferenceCount> {
        self.inner.stall_point("count_references").await;
        let referenced =
            self.with_table(&check.referenced_table, |t| t.keys(&check.referenced_column))?;
        self.with_table(&check.table, |t| {
            let mut count = ReferenceCount::default();
            for key in t.rows.iter().filter_map(|r| MemoryTable::key_of(r, &check.column)) {
                count.non_null += 1;
                if !referenced.contains(&key) {
                    count.orphaned += 1;
                }
            }
            count
        })
    }

    async fn query_count(&self, sql: &str) -> Result<i64> {
        self.inner.stall_point("query_count").await;
        let handler = self
            .inner
            .queries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sql.trim())
            .cloned()
            .ok_or_else(|| MigrateError::Config(format!("no handler registered for query: {}", sql)))?;
        let tables = self.inner.tables();
        Ok(handler(&tables))
    }

    fn db_type(&self) -> &str {
        &self.db_type
    }

    async fn close(&self) {}
}

/// Transaction over a [`MemoryStore`]. Touched tables are copied on first
/// write and swapped in on commit.
struct MemoryTransaction {
    db_type: String,
    inner: Arc<Inner>,
    work: HashMap<String, MemoryTable>,
    savepoints: Vec<(String, HashMap<String, MemoryTable>)>,
}

impl MemoryTransaction {
    fn table_mut(&mut self, table: &str) -> Result<&mut MemoryTable> {
        if !self.work.contains_key(table) {
            let committed = self
                .inner
                .tables()
                .get(table)
                .cloned()
                .ok_or_else(|| MigrateError::schema_lookup(self.db_type.clone(), table))?;
            self.work.insert(table.to_string(), committed);
        }
        self.work
            .get_mut(table)
            .ok_or_else(|| MigrateError::schema_lookup(self.db_type.clone(), table))
    }

    fn view<T>(&self, table: &str, f: impl FnOnce(&MemoryTable) -> T) -> Result<T> {
        if let Some(t) = self.work.get(table) {
            return Ok(f(t));
        }
        let tables = self.inner.tables();
        let t = tables
            .get(table)
            .ok_or_else(|| MigrateError::schema_lookup(self.db_type.clone(), table))?;
        Ok(f(t))
    }

    fn savepoint_index(&self, name: &str) -> Result<usize> {
        self.savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| MigrateError::Config(format!("savepoint {} does not exist", name)))
    }
}

#[async_trait]
impl TargetTransaction for MemoryTransaction {
    async fn insert_rows(&mut self, req: &InsertRequest, rows: &[Vec<SqlValue>]) -> Result<u64> {
        let delay = *self
            .inner
            .insert_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let checks: Vec<RowCheck> = self
            .inner
            .row_checks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let names = req.column_names();
        let table_name = req.table.clone();
        let table = self.table_mut(&table_name)?;

        if let Some(unknown) = names
            .iter()
            .find(|n| !table.columns.iter().any(|c| c.name == **n))
        {
            return Err(MigrateError::UnknownColumn {
                table: table_name,
                column: unknown.clone(),
            });
        }

        // Apply to a copy so a failing row leaves the statement without effect.
        let mut staged = table.clone();
        let mut inserted = 0u64;
        for values in rows {
            let mut row = Row::from_parts(&names, values.clone());
            if let (true, Some(pk)) = (staged.auto_increment, staged.primary_key.clone()) {
                if row.get(&pk).map_or(true, SqlValue::is_null) {
                    row.set(pk, SqlValue::Int(staged.next_id));
                }
            }
            for column in &staged.not_null {
                if row.get(column).map_or(true, SqlValue::is_null) {
                    return Err(MigrateError::batch_commit(
                        table_name.clone(),
                        format!("null value in column \"{}\" violates not-null constraint", column),
                    ));
                }
            }
            if let Some(message) = checks.iter().find_map(|check| check(&table_name, &row)) {
                return Err(MigrateError::batch_commit(table_name.clone(), message));
            }
            if staged.conflicts(&row) {
                continue;
            }
            staged.bump_next_id(&row);
            staged.rows.push(row);
            inserted += 1;
        }

        *table = staged;
        Ok(inserted)
    }

    async fn savepoint(&mut self, name: &str) -> Result<()> {
        self.inner.stall_point("savepoint").await;
        self.savepoints.push((name.to_string(), self.work.clone()));
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        self.inner.stall_point("rollback_to_savepoint").await;
        let idx = self.savepoint_index(name)?;
        self.savepoints.truncate(idx + 1);
        self.work = self.savepoints[idx].1.clone();
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        self.inner.stall_point("release_savepoint").await;
        let idx = self.savepoint_index(name)?;
        self.savepoints.truncate(idx);
        Ok(())
    }

    async fn existing_keys(
        &mut self,
        table: &str,
        key_column: &str,
        keys: &[PkValue],
    ) -> Result<Vec<PkValue>> {
        let present = self.view(table, |t| t.keys(key_column))?;
        Ok(keys.iter().filter(|k| present.contains(k)).cloned().collect())
    }

    async fn resolve_keys(
        &mut self,
        table: &str,
        natural_key: &str,
        primary_key: &str,
        keys: &[PkValue],
    ) -> Result<Vec<(PkValue, PkValue)>> {
        let wanted: HashSet<&PkValue> = keys.iter().collect();
        self.view(table, |t| {
            t.rows
                .iter()
                .filter_map(|r| {
                    let nk = MemoryTable::key_of(r, natural_key)?;
                    let pk = MemoryTable::key_of(r, primary_key)?;
                    wanted.contains(&nk).then_some((nk, pk))
                })
                .collect()
        })
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction { inner, work, .. } = *self;
        let pending = inner.failing_commits.load(Ordering::SeqCst);
        if pending > 0 {
            inner.failing_commits.store(pending - 1, Ordering::SeqCst);
            inner.rollbacks.fetch_add(1, Ordering::SeqCst);
            return Err(MigrateError::batch_commit(
                work.keys().next().cloned().unwrap_or_default(),
                "could not serialize access due to concurrent update",
            ));
        }
        {
            let mut tables = inner.tables();
            for (name, table) in work {
                tables.insert(name, table);
            }
        }
        inner.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.inner.stall_point("rollback").await;
        self.inner.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
