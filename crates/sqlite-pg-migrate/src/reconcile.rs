//! Post-migration reconciliation.
//!
//! Compares row counts per table, counts orphaned references for every
//! declared foreign key and runs configured representative queries against
//! the target.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{ReconciliationConfig, ReconciliationQuery};
use crate::core::traits::{with_timeout, ReferenceCheck, SourceStore, TargetStore};
use crate::error::Result;
use crate::planner::MigrationPlan;

/// Source and target row counts of one table.
#[derive(Debug, Clone, Serialize)]
pub struct TableCount {
    pub table: String,
    pub source_count: i64,
    pub target_count: i64,
    pub matched: bool,
}

/// Orphan count for one foreign key in the target.
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceCheckResult {
    pub table: String,
    pub column: String,
    pub references: String,
    pub non_null: i64,
    pub orphaned: i64,
    pub passed: bool,
}

/// Outcome of one representative query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryCheckResult {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub passed: bool,
}

/// Reconciliation report.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub generated_at: DateTime<Utc>,
    pub tables: Vec<TableCount>,
    pub references: Vec<ReferenceCheckResult>,
    pub queries: Vec<QueryCheckResult>,
    pub passed: bool,
}

impl ValidationReport {
    pub fn mismatched_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| !t.matched)
            .map(|t| t.table.as_str())
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Builds a [`ValidationReport`] for a migrated plan.
pub struct ReconciliationReporter {
    source: Arc<dyn SourceStore>,
    target: Arc<dyn TargetStore>,
    config: ReconciliationConfig,
    timeout: Duration,
}

impl ReconciliationReporter {
    /// Every count and query is bounded by `timeout`.
    pub fn new(
        source: Arc<dyn SourceStore>,
        target: Arc<dyn TargetStore>,
        config: ReconciliationConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            target,
            config,
            timeout,
        }
    }

    /// Reconcile every migrated table in the plan.
    ///
    /// Tables seeded from the target are not compared; their keys were never
    /// read from the source.
    pub async fn reconcile(&self, plan: &MigrationPlan) -> Result<ValidationReport> {
        let mut tables = Vec::new();
        for spec in plan.tables().iter().filter(|s| !s.seed_from_target) {
            let source_count =
                with_timeout("count source rows", self.timeout, self.source.count_rows(&spec.name))
                    .await?;
            let target_count = with_timeout(
                "count target rows",
                self.timeout,
                self.target.count_rows(spec.target_table()),
            )
            .await?;
            let matched = source_count == target_count;
            if matched {
                info!("{}: {} rows (match)", spec.name, source_count);
            } else {
                warn!(
                    "{}: source={} target={} (MISMATCH)",
                    spec.name, source_count, target_count
                );
            }
            tables.push(TableCount {
                table: spec.name.clone(),
                source_count,
                target_count,
                matched,
            });
        }

        let mut references = Vec::new();
        if self.config.check_references {
            for spec in plan.tables().iter().filter(|s| !s.seed_from_target) {
                for fk in &spec.foreign_keys {
                    let Some(referenced) = plan.get(&fk.references) else {
                        continue;
                    };
                    let check = ReferenceCheck {
                        table: spec.target_table().to_string(),
                        column: fk.column.clone(),
                        referenced_table: referenced.target_table().to_string(),
                        referenced_column: referenced.primary_key.clone(),
                    };
                    let count = with_timeout(
                        "count orphaned references",
                        self.timeout,
                        self.target.count_references(&check),
                    )
                    .await?;
                    let passed = count.orphaned == 0;
                    if !passed {
                        warn!(
                            "{}.{}: {} of {} references have no row in {}",
                            spec.name, fk.column, count.orphaned, count.non_null, fk.references
                        );
                    }
                    references.push(ReferenceCheckResult {
                        table: spec.name.clone(),
                        column: fk.column.clone(),
                        references: fk.references.clone(),
                        non_null: count.non_null,
                        orphaned: count.orphaned,
                        passed,
                    });
                }
            }
        }

        let mut queries = Vec::with_capacity(self.config.queries.len());
        for query in &self.config.queries {
            queries.push(self.run_query(plan, query).await);
        }

        let passed = tables.iter().all(|t| t.matched)
            && references.iter().all(|r| r.passed)
            && queries.iter().all(|q| q.passed);
        info!(
            "Reconciliation {}: {} tables, {} references, {} queries",
            if passed { "passed" } else { "found differences" },
            tables.len(),
            references.len(),
            queries.len()
        );

        Ok(ValidationReport {
            generated_at: Utc::now(),
            tables,
            references,
            queries,
            passed,
        })
    }

    async fn run_query(&self, plan: &MigrationPlan, query: &ReconciliationQuery) -> QueryCheckResult {
        let mut check = QueryCheckResult {
            name: query.name.clone(),
            rows: None,
            expected: None,
            error: None,
            passed: false,
        };

        let expected = match (&query.expect_count, &query.expect_rows_of) {
            (Some(n), _) => Ok(Some(*n)),
            (None, Some(table)) => {
                let target_table = plan.get(table).map_or(table.as_str(), |s| s.target_table());
                with_timeout("count target rows", self.timeout, self.target.count_rows(target_table))
                    .await
                    .map(Some)
            }
            (None, None) => Ok(None),
        };
        let rows = match expected {
            Ok(expected) => {
                check.expected = expected;
                with_timeout(
                    "run reconciliation query",
                    self.timeout,
                    self.target.query_count(&query.sql),
                )
                .await
            }
            Err(e) => Err(e),
        };

        match rows {
            Ok(rows) => {
                check.rows = Some(rows);
                check.passed = check.expected.map_or(true, |e| e == rows);
                if check.passed {
                    info!("query {}: {} rows", query.name, rows);
                } else {
                    warn!(
                        "query {}: {} rows, expected {}",
                        query.name,
                        rows,
                        check.expected.unwrap_or_default()
                    );
                }
            }
            Err(e) => {
                warn!("query {} failed: {}", query.name, e);
                check.error = Some(e.to_string());
            }
        }
        check
    }
}
