//! Migration orchestrator - main workflow coordinator.
//!
//! A run goes through five phases: plan the table order, bind every spec to
//! the live schemas, seed keys of target-owned tables, migrate tables in
//! dependency order with a bounded number of workers, and reconcile.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, FailureMode};
use crate::core::schema::{ReferencePolicy, TableSpec};
use crate::core::traits::{with_timeout, ReadOptions, SourceStore, TargetStore};
use crate::drivers::{PostgresTarget, SqliteSource};
use crate::error::{MigrateError, Result};
use crate::introspect::{ColumnBinding, SchemaIntrospector};
use crate::planner::{self, MigrationPlan};
use crate::reconcile::{ReconciliationReporter, ValidationReport};
use crate::reference::{IdMap, ReferenceValidator, TableKeys};
use crate::timestamp::TimestampNormalizer;
use crate::transform::RowTransformer;
use crate::writer::{BatchWriter, TableMigrationResult, TableStatus, WriterConfig};

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every table migrated without failed rows.
    Completed,
    /// Every table finished, some with failed rows.
    CompletedWithErrors,
    /// A table failed or was skipped, or reconciliation found differences.
    Failed,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Fingerprint of the configuration used.
    pub config_hash: String,

    /// Final status.
    pub status: RunStatus,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Table names in migration order.
    pub plan: Vec<String>,

    /// Per-table results, in plan order.
    pub tables: Vec<TableMigrationResult>,

    /// Tables that failed.
    pub failed_tables: Vec<String>,

    /// Tables that were not attempted.
    pub skipped_tables: Vec<String>,

    /// Total rows read from the source.
    pub rows_read: u64,

    /// Total rows inserted into the target.
    pub rows_written: u64,

    /// Reconciliation report.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ValidationReport>,
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn table(&self, name: &str) -> Option<&TableMigrationResult> {
        self.tables.iter().find(|t| t.table == name)
    }
}

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn SourceStore>,
    target: Arc<dyn TargetStore>,
}

impl Orchestrator {
    /// Connect to the configured SQLite source and PostgreSQL target.
    pub async fn new(config: Config) -> Result<Self> {
        let source = SqliteSource::new(&config.source).await?;
        let target =
            PostgresTarget::new(&config.target, config.migration.get_max_pg_connections()).await?;
        Ok(Self::with_stores(config, Arc::new(source), Arc::new(target)))
    }

    /// Use already constructed stores.
    pub fn with_stores(
        config: Config,
        source: Arc<dyn SourceStore>,
        target: Arc<dyn TargetStore>,
    ) -> Self {
        Self {
            config,
            source,
            target,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Order the configured tables.
    pub fn plan(&self) -> Result<MigrationPlan> {
        planner::plan(&self.config.tables)
    }

    /// Run the migration.
    ///
    /// Table failures are reported in the result, not as an error. Errors
    /// are reserved for problems that stop the run before or between tables:
    /// invalid plans, schema contract violations, lost connections and
    /// cancellation.
    pub async fn run(&self, cancel: CancellationToken) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let started = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("Starting migration run: {}", run_id);

        // Phase 1: Plan
        info!("Phase 1: Planning table order");
        let plan = self.plan()?;
        info!("Migration order: {}", plan.names().join(", "));

        // Phase 2: Bind specs to the live schemas
        info!("Phase 2: Reading source and target schemas");
        let bindings = self.bind_all(&plan).await?;

        // Phase 3: Seed keys of tables owned by the target
        let id_map = Arc::new(IdMap::new());
        let mut results: HashMap<String, TableMigrationResult> = HashMap::new();
        let seeded: Vec<&TableSpec> = plan.tables().iter().filter(|s| s.seed_from_target).collect();
        if !seeded.is_empty() {
            info!("Phase 3: Seeding keys for {} tables from target", seeded.len());
            for spec in seeded {
                let keys = with_timeout(
                    "fetch target keys",
                    self.config.migration.operation_timeout(),
                    self.target.fetch_keys(spec.target_table(), &spec.primary_key),
                )
                .await?;
                info!("{}: seeded {} keys from target", spec.name, keys.len());
                id_map.publish(spec.name.clone(), keys.into_iter().collect::<TableKeys>());
                results.insert(spec.name.clone(), TableMigrationResult::seeded(&spec.name));
            }
        }

        // Phase 4: Migrate
        info!(
            "Phase 4: Migrating {} tables with {} workers",
            bindings.len(),
            self.config.migration.get_workers()
        );
        self.migrate_tables(&plan, bindings, Arc::clone(&id_map), &mut results, &cancel)
            .await?;

        let tables: Vec<TableMigrationResult> = plan
            .tables()
            .iter()
            .filter_map(|s| results.remove(&s.name))
            .collect();
        let failed_tables: Vec<String> = tables
            .iter()
            .filter(|t| t.status == TableStatus::Failed)
            .map(|t| t.table.clone())
            .collect();
        let skipped_tables: Vec<String> = tables
            .iter()
            .filter(|t| t.status == TableStatus::Skipped)
            .map(|t| t.table.clone())
            .collect();

        // Phase 5: Reconcile
        info!("Phase 5: Reconciling source and target");
        let report = match self.reporter().reconcile(&plan).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Reconciliation failed: {}", e);
                None
            }
        };

        let reconciled = report.as_ref().is_some_and(|r| r.passed);
        let status = if !failed_tables.is_empty() || !skipped_tables.is_empty() || !reconciled {
            RunStatus::Failed
        } else if tables.iter().any(|t| t.status == TableStatus::Partial) {
            RunStatus::CompletedWithErrors
        } else {
            RunStatus::Completed
        };

        let result = MigrationResult {
            run_id,
            config_hash: self.config.hash(),
            status,
            started_at,
            completed_at: Utc::now(),
            duration_seconds: started.elapsed().as_secs_f64(),
            plan: plan.names().iter().map(|s| s.to_string()).collect(),
            rows_read: tables.iter().map(|t| t.rows_read).sum(),
            rows_written: tables.iter().map(|t| t.rows_written).sum(),
            tables,
            failed_tables,
            skipped_tables,
            report,
        };

        info!(
            "Migration {:?}: {} rows written in {:.1}s",
            result.status, result.rows_written, result.duration_seconds
        );
        Ok(result)
    }

    /// Reconcile without migrating.
    pub async fn reconcile(&self) -> Result<ValidationReport> {
        let plan = self.plan()?;
        self.reporter().reconcile(&plan).await
    }

    pub async fn close(&self) {
        self.source.close().await;
        self.target.close().await;
    }

    fn reporter(&self) -> ReconciliationReporter {
        ReconciliationReporter::new(
            Arc::clone(&self.source),
            Arc::clone(&self.target),
            self.config.reconciliation.clone(),
            self.config.migration.operation_timeout(),
        )
    }

    async fn bind_all(&self, plan: &MigrationPlan) -> Result<HashMap<String, ColumnBinding>> {
        let introspector = SchemaIntrospector::new(
            Arc::clone(&self.source),
            Arc::clone(&self.target),
            self.config.migration.operation_timeout(),
        );
        let mut bindings = HashMap::new();
        for spec in plan.tables() {
            if spec.seed_from_target {
                introspector.check_seed_table(spec).await?;
            } else {
                bindings.insert(spec.name.clone(), introspector.bind(spec).await?);
            }
        }
        Ok(bindings)
    }

    /// Run table tasks as their dependencies complete.
    async fn migrate_tables(
        &self,
        plan: &MigrationPlan,
        mut bindings: HashMap<String, ColumnBinding>,
        id_map: Arc<IdMap>,
        results: &mut HashMap<String, TableMigrationResult>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let migration = &self.config.migration;
        let workers = migration.get_workers().max(1);
        let failure_mode = migration.failure_mode;

        let writer = Arc::new(BatchWriter::new(
            Arc::clone(&self.target),
            WriterConfig {
                batch_size: migration.get_batch_size(),
                threshold: migration.error_threshold.clone(),
                timeout: migration.operation_timeout(),
            },
        ));
        let context = TaskContext {
            source: Arc::clone(&self.source),
            writer,
            id_map,
            normalizer: TimestampNormalizer::new(migration.reference_offset()?),
            policy: migration.reference_policy,
            read_ahead: migration.get_read_ahead_batches(),
            cancel: cancel.clone(),
        };

        let mut pending: Vec<&TableSpec> = plan.tables().iter().filter(|s| !s.seed_from_target).collect();
        let mut finished: HashSet<String> = results.keys().cloned().collect();
        let mut broken: HashSet<String> = HashSet::new();
        let mut running: JoinSet<(String, Result<TableMigrationResult>)> = JoinSet::new();
        let mut stop_reason: Option<String> = None;

        loop {
            if stop_reason.is_none() && cancel.is_cancelled() {
                info!("Cancellation requested, stopping new tables");
                stop_reason = Some("run cancelled".to_string());
            }

            if stop_reason.is_none() {
                let mut i = 0;
                while i < pending.len() && running.len() < workers {
                    let spec = pending[i];
                    let deps = spec.all_dependencies();
                    if let Some(dep) = deps.iter().find(|d| broken.contains(*d)) {
                        warn!("{}: skipped, dependency {} did not complete", spec.name, dep);
                        results.insert(
                            spec.name.clone(),
                            TableMigrationResult::skipped(
                                &spec.name,
                                format!("dependency {} did not complete", dep),
                            ),
                        );
                        broken.insert(spec.name.clone());
                        pending.remove(i);
                        continue;
                    }
                    if !deps.iter().all(|d| finished.contains(d)) {
                        i += 1;
                        continue;
                    }

                    let Some(binding) = bindings.remove(&spec.name) else {
                        return Err(MigrateError::table_failed(&spec.name, "table was not bound"));
                    };
                    let task = context.clone();
                    let spec_owned = spec.clone();
                    debug!("{}: starting", spec.name);
                    running.spawn(async move {
                        let name = spec_owned.name.clone();
                        (name, task.migrate(spec_owned, binding).await)
                    });
                    pending.remove(i);
                }
            }

            let Some(joined) = running.join_next().await else {
                break;
            };
            let (name, outcome) = joined
                .map_err(|e| MigrateError::TableMigrationFailed {
                    table: "<worker>".to_string(),
                    message: format!("table task panicked: {}", e),
                })?;

            let result = match outcome {
                Ok(result) => result,
                Err(MigrateError::Cancelled) => {
                    info!("{}: cancelled", name);
                    broken.insert(name.clone());
                    results.insert(name.clone(), TableMigrationResult::skipped(&name, "run cancelled"));
                    continue;
                }
                Err(e) => {
                    error!("{}: {}", name, e);
                    TableMigrationResult::failed(&name, &e)
                }
            };

            if result.is_failed() {
                broken.insert(name.clone());
                if failure_mode == FailureMode::Abort && stop_reason.is_none() {
                    warn!("{} failed, no further tables will start", name);
                    stop_reason = Some(format!("run aborted after {} failed", name));
                }
            } else {
                finished.insert(name.clone());
            }
            results.insert(name, result);
        }

        let reason = stop_reason.unwrap_or_else(|| "run stopped".to_string());
        for spec in pending {
            results.insert(spec.name.clone(), TableMigrationResult::skipped(&spec.name, reason.clone()));
        }

        if cancel.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }
        Ok(())
    }
}

/// Everything a table task needs, cloned into each task.
#[derive(Clone)]
struct TaskContext {
    source: Arc<dyn SourceStore>,
    writer: Arc<BatchWriter>,
    id_map: Arc<IdMap>,
    normalizer: TimestampNormalizer,
    policy: ReferencePolicy,
    read_ahead: usize,
    cancel: CancellationToken,
}

impl TaskContext {
    async fn migrate(self, spec: TableSpec, binding: ColumnBinding) -> Result<TableMigrationResult> {
        // Dependencies are complete, so their entries are final.
        let snapshot = self.id_map.snapshot(&spec.all_dependencies());
        let validator = ReferenceValidator::new(snapshot, self.policy);
        let transformer = RowTransformer::new(&spec, &binding, self.normalizer, validator);

        let batches = self.source.read_table(ReadOptions {
            table: spec.name.clone(),
            columns: binding.source_columns(),
            order_by: binding.source_key.clone(),
            batch_size: self.writer.batch_size(),
            read_ahead: self.read_ahead,
        });

        self.writer
            .write_table(&spec, &binding, &transformer, batches, &self.id_map, &self.cancel)
            .await
    }
}
