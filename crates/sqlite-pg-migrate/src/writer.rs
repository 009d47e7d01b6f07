//! Batch writing and transaction control.
//!
//! Every batch is written inside one target transaction. A batch that fails
//! as a whole is retried row by row under savepoints so one bad row does not
//! cost its neighbours. Keys are confirmed against the target before commit
//! and published to the [`IdMap`] once the whole table is done.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ErrorThreshold;
use crate::core::row::Row;
use crate::core::schema::{KeyMode, PkValue, TableSpec};
use crate::core::traits::{with_timeout, InsertRequest, TargetStore, TargetTransaction};
use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result};
use crate::introspect::ColumnBinding;
use crate::reference::{IdMap, TableKeys};
use crate::transform::{Degradation, RowOutcome, RowTransformer, TransformedRow};

const BATCH_SAVEPOINT: &str = "batch";
const ROW_SAVEPOINT: &str = "row";
const MAX_WARNINGS: usize = 20;

/// Final state of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Success,
    /// Completed with some failed rows.
    Partial,
    Failed,
    /// Not attempted.
    Skipped,
    /// Keys loaded from the target instead of migrating.
    Seeded,
}

/// Outcome of migrating one table.
#[derive(Debug, Clone, Serialize)]
pub struct TableMigrationResult {
    pub table: String,
    pub status: TableStatus,
    pub rows_read: u64,
    pub rows_written: u64,
    /// Rows already present in the target.
    pub rows_existing: u64,
    pub rows_rejected: u64,
    pub rows_failed: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
    pub references_nulled: u64,
    pub references_defaulted: u64,
    pub timestamps_unparsed: u64,
    pub structures_replaced: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_seconds: f64,
}

impl TableMigrationResult {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            status: TableStatus::Success,
            rows_read: 0,
            rows_written: 0,
            rows_existing: 0,
            rows_rejected: 0,
            rows_failed: 0,
            batches_committed: 0,
            batches_failed: 0,
            references_nulled: 0,
            references_defaulted: 0,
            timestamps_unparsed: 0,
            structures_replaced: 0,
            warnings: Vec::new(),
            error: None,
            duration_seconds: 0.0,
        }
    }

    pub fn skipped(table: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut result = Self::new(table);
        result.status = TableStatus::Skipped;
        result.error = Some(reason.into());
        result
    }

    pub fn seeded(table: impl Into<String>) -> Self {
        let mut result = Self::new(table);
        result.status = TableStatus::Seeded;
        result
    }

    pub fn failed(table: impl Into<String>, error: &MigrateError) -> Self {
        let mut result = Self::new(table);
        result.status = TableStatus::Failed;
        result.error = Some(error.to_string());
        result
    }

    pub fn is_failed(&self) -> bool {
        self.status == TableStatus::Failed
    }

    fn warn(&mut self, message: String) {
        if self.warnings.len() < MAX_WARNINGS {
            self.warnings.push(message);
        }
    }

    fn record(&mut self, degradations: &[Degradation]) {
        for d in degradations {
            match d {
                Degradation::UnparsableTimestamp { .. } => self.timestamps_unparsed += 1,
                Degradation::UnparsableStructure { .. } => self.structures_replaced += 1,
                Degradation::ReferenceNulled { .. } => self.references_nulled += 1,
                Degradation::ReferenceDefaulted { .. } => self.references_defaulted += 1,
            }
        }
    }
}

/// Batch writer settings.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub batch_size: usize,
    pub threshold: ErrorThreshold,
    /// Limit for any single store operation.
    pub timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 1_000,
            threshold: ErrorThreshold::default(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Counts row failures against the configured threshold.
#[derive(Debug)]
struct FailureTracker {
    threshold: ErrorThreshold,
    consecutive: usize,
    attempted: usize,
    failed: usize,
}

impl FailureTracker {
    fn new(threshold: ErrorThreshold) -> Self {
        Self {
            threshold,
            consecutive: 0,
            attempted: 0,
            failed: 0,
        }
    }

    fn succeeded(&mut self, rows: usize) {
        self.attempted += rows;
        if rows > 0 {
            self.consecutive = 0;
        }
    }

    /// Record failed rows; returns the reason when the threshold is crossed.
    fn failed(&mut self, rows: usize) -> Option<String> {
        self.attempted += rows;
        self.lost(rows)
    }

    /// Rows counted as succeeded whose batch then failed to commit.
    fn lost(&mut self, rows: usize) -> Option<String> {
        self.failed += rows;
        self.consecutive += rows;
        self.breach()
    }

    fn breach(&self) -> Option<String> {
        if self.consecutive >= self.threshold.max_consecutive_failures {
            return Some(format!(
                "{} consecutive row failures (limit {})",
                self.consecutive, self.threshold.max_consecutive_failures
            ));
        }
        if let Some(ratio) = self.threshold.max_failure_ratio {
            if self.attempted >= self.threshold.min_rows_for_ratio {
                let actual = self.failed as f64 / self.attempted as f64;
                if actual > ratio {
                    return Some(format!(
                        "failure ratio {:.3} exceeds {:.3} after {} rows",
                        actual, ratio, self.attempted
                    ));
                }
            }
        }
        None
    }
}

/// Rows of a batch that made it into the transaction.
struct WrittenBatch {
    inserted: u64,
    /// Inserted or already present.
    succeeded: usize,
    keys: TableKeys,
    /// Repairs carried by the rows that were written.
    degradations: Vec<Degradation>,
}

/// How a batch left its transaction.
enum BatchFill {
    /// Ready to commit.
    Written(WrittenBatch),
    /// The threshold was crossed while isolating rows.
    Breached(String),
}

enum BatchError {
    Breached(String),
    Store(MigrateError),
}

/// Writes transformed batches to the target store.
pub struct BatchWriter {
    target: Arc<dyn TargetStore>,
    config: WriterConfig,
}

impl BatchWriter {
    pub fn new(target: Arc<dyn TargetStore>, config: WriterConfig) -> Self {
        Self { target, config }
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    /// Migrate one table from a stream of source batches.
    ///
    /// Threshold breaches end with a [`TableStatus::Failed`] result, not an
    /// error; errors are reserved for source failures and cancellation. The
    /// table's confirmed keys are published unless it failed.
    pub async fn write_table(
        &self,
        spec: &TableSpec,
        binding: &ColumnBinding,
        transformer: &RowTransformer<'_>,
        mut batches: mpsc::Receiver<Result<Vec<Row>>>,
        id_map: &IdMap,
        cancel: &CancellationToken,
    ) -> Result<TableMigrationResult> {
        let started = Instant::now();
        let mut result = TableMigrationResult::new(&spec.name);
        let mut tracker = FailureTracker::new(self.config.threshold.clone());
        let mut confirmed: Option<TableKeys> = None;
        let request = InsertRequest {
            table: binding.target_table.clone(),
            columns: binding.insert_columns(),
        };

        info!("{}: migrating into {}", spec.name, binding.target_table);

        loop {
            let recv = async { Ok(batches.recv().await) };
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(MigrateError::Cancelled),
                next = with_timeout("read source batch", self.config.timeout, recv) => next?,
            };
            let Some(batch) = next else { break };
            let batch = batch?;
            result.rows_read += batch.len() as u64;

            let mut prepared: Vec<TransformedRow> = Vec::with_capacity(batch.len());
            for source_row in &batch {
                match transformer.transform(source_row) {
                    Ok(RowOutcome::Ready(row)) => prepared.push(row),
                    Ok(RowOutcome::Rejected { column, key }) => {
                        result.rows_rejected += 1;
                        result.warn(format!("row rejected: {} = {} has no referenced row", column, key));
                    }
                    Err(e) => {
                        warn!("{}", e);
                        result.rows_failed += 1;
                        result.warn(e.to_string());
                    }
                }
            }
            if prepared.is_empty() {
                continue;
            }

            match self
                .write_batch(&request, binding, spec.key_mode, &prepared, &mut tracker, &mut result)
                .await
            {
                Ok(written) => {
                    result.batches_committed += 1;
                    result.rows_written += written.inserted;
                    result.rows_existing += (written.succeeded as u64).saturating_sub(written.inserted);
                    result.record(&written.degradations);
                    match confirmed.as_mut() {
                        Some(existing) => existing.extend(written.keys),
                        None => confirmed = Some(written.keys),
                    }
                    debug!(
                        "{}: batch {} committed ({} inserted, {} read so far)",
                        spec.name, result.batches_committed, written.inserted, result.rows_read
                    );
                }
                Err(BatchError::Breached(reason)) => {
                    result.batches_failed += 1;
                    return Ok(self.fail(result, reason, started));
                }
                Err(BatchError::Store(e)) => {
                    result.batches_failed += 1;
                    let failed = prepared.len() as u64;
                    warn!("{}: batch of {} rows rolled back: {}", spec.name, failed, e);
                    result.warn(e.to_string());
                    result.rows_failed += failed;
                    if let Some(reason) = tracker.lost(prepared.len()) {
                        return Ok(self.fail(result, reason, started));
                    }
                }
            }
        }

        result.status = if result.rows_failed > 0 {
            TableStatus::Partial
        } else {
            TableStatus::Success
        };
        result.duration_seconds = started.elapsed().as_secs_f64();

        let keys = confirmed.unwrap_or_else(|| match spec.key_mode {
            KeyMode::Preserve => TableKeys::Preserved(Default::default()),
            KeyMode::Remap => TableKeys::Remapped(Default::default()),
        });
        debug!("{}: publishing {} confirmed keys", spec.name, keys.len());
        id_map.publish(spec.name.clone(), keys);

        info!(
            "{}: {} rows read, {} written, {} existing, {} rejected, {} failed ({:.1}s)",
            spec.name,
            result.rows_read,
            result.rows_written,
            result.rows_existing,
            result.rows_rejected,
            result.rows_failed,
            result.duration_seconds
        );
        Ok(result)
    }

    fn fail(&self, mut result: TableMigrationResult, reason: String, started: Instant) -> TableMigrationResult {
        warn!("{}: error threshold exceeded: {}", result.table, reason);
        result.status = TableStatus::Failed;
        result.error = Some(reason);
        result.duration_seconds = started.elapsed().as_secs_f64();
        result
    }

    /// Write one batch in its own transaction. Degradations are only reported
    /// for rows that were committed.
    async fn write_batch(
        &self,
        request: &InsertRequest,
        binding: &ColumnBinding,
        key_mode: KeyMode,
        rows: &[TransformedRow],
        tracker: &mut FailureTracker,
        result: &mut TableMigrationResult,
    ) -> std::result::Result<WrittenBatch, BatchError> {
        let timeout = self.config.timeout;
        let mut tx = with_timeout("begin transaction", timeout, self.target.begin())
            .await
            .map_err(BatchError::Store)?;

        let filled = self
            .fill(tx.as_mut(), request, binding, key_mode, rows, tracker, result)
            .await;
        let written = match filled {
            Ok(BatchFill::Written(written)) => written,
            Ok(BatchFill::Breached(reason)) => {
                discard(tx, timeout).await;
                return Err(BatchError::Breached(reason));
            }
            Err(e) => {
                discard(tx, timeout).await;
                return Err(BatchError::Store(e));
            }
        };

        with_timeout("commit batch", timeout, tx.commit())
            .await
            .map_err(|e| BatchError::Store(MigrateError::batch_commit(request.table.clone(), e)))?;
        Ok(written)
    }

    #[allow(clippy::too_many_arguments)]
    async fn fill(
        &self,
        tx: &mut dyn TargetTransaction,
        request: &InsertRequest,
        binding: &ColumnBinding,
        key_mode: KeyMode,
        rows: &[TransformedRow],
        tracker: &mut FailureTracker,
        result: &mut TableMigrationResult,
    ) -> Result<BatchFill> {
        let timeout = self.config.timeout;
        let names = request.column_names();
        let values: Vec<Vec<SqlValue>> = rows.iter().map(|r| r.row.values_for(&names)).collect();

        with_timeout("create savepoint", timeout, tx.savepoint(BATCH_SAVEPOINT)).await?;
        let whole = with_timeout("insert batch", timeout, tx.insert_rows(request, &values)).await;

        let (inserted, ok_rows): (u64, Vec<&TransformedRow>) = match whole {
            Ok(inserted) => {
                with_timeout("release savepoint", timeout, tx.release_savepoint(BATCH_SAVEPOINT))
                    .await?;
                tracker.succeeded(rows.len());
                (inserted, rows.iter().collect())
            }
            Err(e) => {
                debug!("{}: batch insert failed ({}), isolating rows", binding.table, e);
                with_timeout(
                    "rollback to savepoint",
                    timeout,
                    tx.rollback_to_savepoint(BATCH_SAVEPOINT),
                )
                .await?;
                with_timeout("release savepoint", timeout, tx.release_savepoint(BATCH_SAVEPOINT))
                    .await?;

                let mut inserted = 0;
                let mut ok_rows = Vec::with_capacity(rows.len());
                for (row, row_values) in rows.iter().zip(&values) {
                    with_timeout("create savepoint", timeout, tx.savepoint(ROW_SAVEPOINT)).await?;
                    let single = with_timeout(
                        "insert row",
                        timeout,
                        tx.insert_rows(request, std::slice::from_ref(row_values)),
                    )
                    .await;
                    match single {
                        Ok(n) => {
                            with_timeout(
                                "release savepoint",
                                timeout,
                                tx.release_savepoint(ROW_SAVEPOINT),
                            )
                            .await?;
                            inserted += n;
                            ok_rows.push(row);
                            tracker.succeeded(1);
                        }
                        Err(e) => {
                            with_timeout(
                                "rollback to savepoint",
                                timeout,
                                tx.rollback_to_savepoint(ROW_SAVEPOINT),
                            )
                            .await?;
                            with_timeout(
                                "release savepoint",
                                timeout,
                                tx.release_savepoint(ROW_SAVEPOINT),
                            )
                            .await?;
                            let key = row
                                .source_key
                                .as_ref()
                                .map_or_else(|| "?".to_string(), PkValue::to_string);
                            warn!("{}: row {} failed: {}", binding.table, key, e);
                            result.rows_failed += 1;
                            result.warn(format!("row {}: {}", key, e));
                            if let Some(reason) = tracker.failed(1) {
                                return Ok(BatchFill::Breached(reason));
                            }
                        }
                    }
                }
                (inserted, ok_rows)
            }
        };

        let keys = self.confirm_keys(tx, binding, key_mode, &ok_rows).await?;
        Ok(BatchFill::Written(WrittenBatch {
            inserted,
            succeeded: ok_rows.len(),
            keys,
            degradations: ok_rows
                .iter()
                .flat_map(|r| r.degradations.iter().cloned())
                .collect(),
        }))
    }

    /// Read back which of the written rows exist in the target.
    async fn confirm_keys(
        &self,
        tx: &mut dyn TargetTransaction,
        binding: &ColumnBinding,
        key_mode: KeyMode,
        rows: &[&TransformedRow],
    ) -> Result<TableKeys> {
        let timeout = self.config.timeout;
        match (key_mode, binding.natural_key.as_deref()) {
            (KeyMode::Remap, Some(natural_key)) => {
                let naturals: Vec<PkValue> =
                    rows.iter().filter_map(|r| r.natural_key.clone()).collect();
                let resolved = with_timeout(
                    "resolve keys",
                    timeout,
                    tx.resolve_keys(&binding.target_table, natural_key, &binding.primary_key, &naturals),
                )
                .await?;
                let by_natural: HashMap<PkValue, PkValue> = resolved.into_iter().collect();
                Ok(rows
                    .iter()
                    .filter_map(|r| {
                        let target = by_natural.get(r.natural_key.as_ref()?)?;
                        Some((r.source_key.clone()?, target.clone()))
                    })
                    .collect())
            }
            _ => {
                let keys: Vec<PkValue> = rows.iter().filter_map(|r| r.source_key.clone()).collect();
                let existing = with_timeout(
                    "confirm keys",
                    timeout,
                    tx.existing_keys(&binding.target_table, &binding.primary_key, &keys),
                )
                .await?;
                Ok(existing.into_iter().collect())
            }
        }
    }
}

/// Roll back an abandoned batch. Failures are logged; the transaction is
/// gone either way.
async fn discard(tx: Box<dyn TargetTransaction>, timeout: Duration) {
    if let Err(e) = with_timeout("rollback batch", timeout, tx.rollback()).await {
        debug!("rollback failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::ReferencePolicy;
    use crate::core::traits::{ReadOptions, SourceStore};
    use crate::drivers::memory::{MemoryStore, MemoryTable};
    use crate::introspect::bind_columns;
    use crate::reference::ReferenceValidator;
    use crate::timestamp::TimestampNormalizer;

    struct Fixture {
        source: MemoryStore,
        target: MemoryStore,
        spec: TableSpec,
        binding: ColumnBinding,
        id_map: IdMap,
    }

    fn fixture(ids: impl IntoIterator<Item = i64>) -> Fixture {
        let source = MemoryStore::new("sqlite");
        source.create_table(
            MemoryTable::new("machines", &["id", "name"])
                .rows(ids.into_iter().map(|i| Row::new().with("id", i).with("name", format!("m{}", i)))),
        );
        let target = MemoryStore::new("postgres");
        target.create_table(MemoryTable::new("machines", &["id", "name"]).primary_key("id"));
        let spec = TableSpec::new("machines");
        let binding = bind_columns(
            &spec,
            &["id".to_string(), "name".to_string()],
            &[
                crate::core::schema::ColumnInfo::new("id", "integer"),
                crate::core::schema::ColumnInfo::new("name", "text"),
            ],
        )
        .unwrap();
        Fixture {
            source,
            target,
            spec,
            binding,
            id_map: IdMap::new(),
        }
    }

    fn config(batch_size: usize, max_consecutive: usize) -> WriterConfig {
        WriterConfig {
            batch_size,
            threshold: ErrorThreshold {
                max_consecutive_failures: max_consecutive,
                ..ErrorThreshold::default()
            },
            timeout: Duration::from_secs(5),
        }
    }

    async fn run(f: &Fixture, config: WriterConfig) -> Result<TableMigrationResult> {
        let writer = BatchWriter::new(Arc::new(f.target.clone()), config);
        let transformer = RowTransformer::new(
            &f.spec,
            &f.binding,
            TimestampNormalizer::utc(),
            ReferenceValidator::new(Default::default(), ReferencePolicy::NullOut),
        );
        let rx = f.source.read_table(ReadOptions {
            table: "machines".into(),
            columns: f.binding.source_columns(),
            order_by: Some("id".into()),
            batch_size: writer.batch_size(),
            ..ReadOptions::default()
        });
        writer
            .write_table(&f.spec, &f.binding, &transformer, rx, &f.id_map, &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_writes_and_publishes_keys() {
        let f = fixture(1..=5);
        let result = run(&f, config(2, 10)).await.unwrap();
        assert_eq!(result.status, TableStatus::Success);
        assert_eq!(result.rows_written, 5);
        assert_eq!(result.batches_committed, 3);
        assert_eq!(f.target.row_count("machines"), 5);
        assert_eq!(f.id_map.get("machines").map(|k| k.len()), Some(5));
    }

    #[tokio::test]
    async fn test_rerun_counts_existing_rows() {
        let f = fixture(1..=3);
        run(&f, config(10, 10)).await.unwrap();
        let again = run(&f, config(10, 10)).await.unwrap();
        assert_eq!(again.rows_written, 0);
        assert_eq!(again.rows_existing, 3);
        assert_eq!(f.target.row_count("machines"), 3);
        assert_eq!(f.id_map.get("machines").map(|k| k.len()), Some(3));
    }

    #[tokio::test]
    async fn test_bad_row_is_isolated() {
        let f = fixture(1..=4);
        f.target.fail_rows_where("machines", "name", SqlValue::from("m3"));
        let result = run(&f, config(10, 10)).await.unwrap();
        assert_eq!(result.status, TableStatus::Partial);
        assert_eq!(result.rows_written, 3);
        assert_eq!(result.rows_failed, 1);
        let keys = f.id_map.get("machines").unwrap();
        assert!(keys.resolve(&PkValue::Int(3)).is_none());
        assert!(keys.resolve(&PkValue::Int(4)).is_some());
    }

    #[tokio::test]
    async fn test_consecutive_failures_fail_table() {
        let f = fixture(1..=6);
        for i in 2..=4 {
            f.target.fail_rows_where("machines", "name", SqlValue::from(format!("m{}", i)));
        }
        let result = run(&f, config(10, 3)).await.unwrap();
        assert_eq!(result.status, TableStatus::Failed);
        assert!(result.error.unwrap().contains("consecutive"));
        // The breaching batch is rolled back and nothing is published.
        assert_eq!(f.target.row_count("machines"), 0);
        assert!(!f.id_map.contains_table("machines"));
    }

    #[tokio::test]
    async fn test_commit_failure_counts_batch() {
        let f = fixture(1..=4);
        f.target.fail_commits(1);
        let result = run(&f, config(2, 10)).await.unwrap();
        assert_eq!(result.status, TableStatus::Partial);
        assert_eq!(result.batches_failed, 1);
        assert_eq!(result.rows_failed, 2);
        assert_eq!(f.target.row_count("machines"), 2);
    }

    #[tokio::test]
    async fn test_stalled_savepoint_fails_batch() {
        let f = fixture(1..=2);
        f.target.stall("savepoint");
        let config = WriterConfig {
            timeout: Duration::from_millis(50),
            ..config(10, 1)
        };
        let result = run(&f, config).await.unwrap();
        assert_eq!(result.status, TableStatus::Failed);
        assert_eq!(result.batches_failed, 1);
        assert_eq!(result.rows_failed, 2);
        assert!(result.warnings.iter().any(|w| w.contains("create savepoint")));
        assert_eq!(f.target.commit_count(), 0);
        assert!(!f.id_map.contains_table("machines"));
    }

    #[tokio::test]
    async fn test_slow_insert_fails_rows() {
        let f = fixture(1..=3);
        f.target.set_insert_delay(Some(Duration::from_millis(200)));
        let config = WriterConfig {
            timeout: Duration::from_millis(20),
            ..config(10, 2)
        };
        let result = run(&f, config).await.unwrap();
        assert_eq!(result.status, TableStatus::Failed);
        assert_eq!(result.rows_failed, 2);
        assert!(result.warnings.iter().all(|w| w.contains("insert row")));
        assert_eq!(f.target.commit_count(), 0);
        assert_eq!(f.target.row_count("machines"), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let f = fixture(1..=2);
        let writer = BatchWriter::new(Arc::new(f.target.clone()), config(10, 10));
        let transformer = RowTransformer::new(
            &f.spec,
            &f.binding,
            TimestampNormalizer::utc(),
            ReferenceValidator::new(Default::default(), ReferencePolicy::NullOut),
        );
        let (_tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = writer
            .write_table(&f.spec, &f.binding, &transformer, rx, &f.id_map, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Cancelled));
    }

    #[test]
    fn test_failure_ratio() {
        let mut tracker = FailureTracker::new(ErrorThreshold {
            max_consecutive_failures: 100,
            max_failure_ratio: Some(0.35),
            min_rows_for_ratio: 10,
        });
        tracker.succeeded(5);
        assert!(tracker.failed(2).is_none());
        tracker.succeeded(2);
        assert!(tracker.failed(1).is_none());
        assert!(tracker.failed(1).is_some());
    }
}
