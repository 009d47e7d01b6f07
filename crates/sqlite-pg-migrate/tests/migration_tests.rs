//! End-to-end runs of the migration pipeline against in-memory stores.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use sqlite_pg_migrate::config::{ErrorThreshold, ReconciliationQuery};
use sqlite_pg_migrate::drivers::{MemoryStore, MemoryTable};
use sqlite_pg_migrate::{
    Config, FailureMode, MigrateError, Orchestrator, Row, RunStatus, SqlValue, TableSpec,
    TableStatus,
};
use tokio_util::sync::CancellationToken;

fn config(tables: Vec<TableSpec>) -> Config {
    let mut config = Config::from_yaml(
        r#"
source:
  path: ./production.db
target:
  host: localhost
  database: target_db
  user: postgres
tables:
  - name: placeholder
"#,
    )
    .unwrap();
    config.tables = tables;
    config
}

/// Two machines and three orders, one of which references a machine that
/// was never migrated.
fn factory() -> (Arc<MemoryStore>, Arc<MemoryStore>) {
    let source = MemoryStore::new("sqlite");
    source.create_table(MemoryTable::new("machines", &["id", "name"]).rows([
        Row::new().with("id", 1i64).with("name", "press"),
        Row::new().with("id", 2i64).with("name", "lathe"),
    ]));
    source.create_table(
        MemoryTable::new("production_orders", &["id", "machine_id", "started_at"]).rows([
            Row::new()
                .with("id", 10i64)
                .with("machine_id", 1i64)
                .with("started_at", "2024-03-01 08:00:00"),
            Row::new()
                .with("id", 11i64)
                .with("machine_id", 99i64)
                .with("started_at", "2024/03/01 09:30:00"),
            Row::new()
                .with("id", 12i64)
                .with("machine_id", 2i64)
                .with("started_at", "not a date"),
        ]),
    );

    let target = MemoryStore::new("postgres");
    target.create_table(MemoryTable::new("machines", &["id", "name"]).primary_key("id"));
    target.create_table(
        MemoryTable::new("production_orders", &["id", "machine_id", "started_at"])
            .typed("started_at", "timestamptz")
            .primary_key("id"),
    );
    (Arc::new(source), Arc::new(target))
}

fn factory_specs() -> Vec<TableSpec> {
    vec![
        TableSpec::new("production_orders")
            .foreign_key_to("machine_id", "machines")
            .timezone_column("started_at"),
        TableSpec::new("machines"),
    ]
}

fn target_row(target: &MemoryStore, table: &str, id: i64) -> Row {
    target
        .rows(table)
        .into_iter()
        .find(|r| r.get("id") == Some(&SqlValue::Int(id)))
        .unwrap()
}

#[tokio::test]
async fn test_parents_migrate_before_children() {
    let (source, target) = factory();
    let orchestrator = Orchestrator::with_stores(config(factory_specs()), source, target.clone());

    let result = orchestrator.run(CancellationToken::new()).await.unwrap();

    assert_eq!(result.plan, vec!["machines", "production_orders"]);
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(target.row_count("machines"), 2);
    assert_eq!(target.row_count("production_orders"), 3);
}

#[tokio::test]
async fn test_orphaned_reference_is_nulled() {
    let (source, target) = factory();
    let orchestrator = Orchestrator::with_stores(config(factory_specs()), source, target.clone());

    let result = orchestrator.run(CancellationToken::new()).await.unwrap();

    let orders = result.table("production_orders").unwrap();
    assert_eq!(orders.references_nulled, 1);
    assert_eq!(orders.rows_rejected, 0);
    assert_eq!(
        target_row(&target, "production_orders", 10).get("machine_id"),
        Some(&SqlValue::Int(1))
    );
    assert_eq!(
        target_row(&target, "production_orders", 11).get("machine_id"),
        Some(&SqlValue::Null)
    );

    let report = result.report.unwrap();
    assert!(report.passed);
    assert_eq!(report.references[0].non_null, 2);
    assert_eq!(report.references[0].orphaned, 0);
}

#[tokio::test]
async fn test_timestamps_normalized_to_utc() {
    let (source, target) = factory();
    let mut config = config(factory_specs());
    config.migration.reference_offset = "+02:00".to_string();
    let orchestrator = Orchestrator::with_stores(config, source, target.clone());

    let result = orchestrator.run(CancellationToken::new()).await.unwrap();

    assert_eq!(
        target_row(&target, "production_orders", 10).get("started_at"),
        Some(&SqlValue::Timestamp(Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap()))
    );
    assert_eq!(
        target_row(&target, "production_orders", 11).get("started_at"),
        Some(&SqlValue::Timestamp(Utc.with_ymd_and_hms(2024, 3, 1, 7, 30, 0).unwrap()))
    );
    assert_eq!(
        target_row(&target, "production_orders", 12).get("started_at"),
        Some(&SqlValue::Null)
    );
    assert_eq!(result.table("production_orders").unwrap().timestamps_unparsed, 1);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let (source, target) = factory();
    let orchestrator = Orchestrator::with_stores(config(factory_specs()), source, target.clone());

    orchestrator.run(CancellationToken::new()).await.unwrap();
    let second = orchestrator.run(CancellationToken::new()).await.unwrap();

    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(second.rows_written, 0);
    assert_eq!(second.table("machines").unwrap().rows_existing, 2);
    assert_eq!(second.table("production_orders").unwrap().rows_existing, 3);
    assert_eq!(target.row_count("machines"), 2);
    assert_eq!(target.row_count("production_orders"), 3);
    // The existing parent keys still validate references on the rerun.
    assert_eq!(
        target_row(&target, "production_orders", 10).get("machine_id"),
        Some(&SqlValue::Int(1))
    );
}

#[tokio::test]
async fn test_cycle_commits_nothing() {
    let (source, target) = factory();
    let specs = vec![
        TableSpec::new("production_orders").foreign_key_to("machine_id", "machines"),
        TableSpec::new("machines").depends_on("production_orders"),
    ];
    let orchestrator = Orchestrator::with_stores(config(specs), source, target.clone());

    let err = orchestrator.run(CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, MigrateError::CyclicDependency { .. }));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(target.commit_count(), 0);
    assert_eq!(target.row_count("machines"), 0);
}

#[tokio::test]
async fn test_unknown_target_column_stops_before_writing() {
    let (source, target) = factory();
    let specs = vec![TableSpec::new("machines").timezone_column("installed_at")];
    let orchestrator = Orchestrator::with_stores(config(specs), source, target.clone());

    let err = orchestrator.run(CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, MigrateError::UnknownColumn { .. }));
    assert_eq!(target.commit_count(), 0);
}

fn failing_plan() -> (Arc<MemoryStore>, Arc<MemoryStore>, Vec<TableSpec>) {
    let source = MemoryStore::new("sqlite");
    let target = MemoryStore::new("postgres");
    for name in ["a_broken", "b_child", "c_free"] {
        source.create_table(
            MemoryTable::new(name, &["id", "parent_id"])
                .row(Row::new().with("id", 1i64).with("parent_id", 1i64)),
        );
        target.create_table(MemoryTable::new(name, &["id", "parent_id"]).primary_key("id"));
    }
    target.fail_rows_where("a_broken", "id", SqlValue::Int(1));

    let specs = vec![
        TableSpec::new("a_broken"),
        TableSpec::new("b_child").foreign_key_to("parent_id", "a_broken"),
        TableSpec::new("c_free"),
    ];
    (Arc::new(source), Arc::new(target), specs)
}

fn strict(mut config: Config) -> Config {
    config.migration.error_threshold = ErrorThreshold {
        max_consecutive_failures: 1,
        ..ErrorThreshold::default()
    };
    config
}

#[tokio::test]
async fn test_abort_mode_stops_after_failure() {
    let (source, target, specs) = failing_plan();
    let orchestrator = Orchestrator::with_stores(strict(config(specs)), source, target.clone());

    let result = orchestrator.run(CancellationToken::new()).await.unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.failed_tables, vec!["a_broken"]);
    assert_eq!(result.table("b_child").unwrap().status, TableStatus::Skipped);
    assert_eq!(result.table("c_free").unwrap().status, TableStatus::Skipped);
    assert_eq!(target.row_count("b_child"), 0);
    assert_eq!(target.row_count("c_free"), 0);
}

#[tokio::test]
async fn test_best_effort_skips_only_dependents() {
    let (source, target, specs) = failing_plan();
    let mut config = strict(config(specs));
    config.migration.failure_mode = FailureMode::BestEffort;
    let orchestrator = Orchestrator::with_stores(config, source, target.clone());

    let result = orchestrator.run(CancellationToken::new()).await.unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.table("a_broken").unwrap().status, TableStatus::Failed);
    assert_eq!(result.table("b_child").unwrap().status, TableStatus::Skipped);
    assert_eq!(result.table("c_free").unwrap().status, TableStatus::Success);
    assert_eq!(result.skipped_tables, vec!["b_child"]);
    assert_eq!(target.row_count("c_free"), 1);
}

#[tokio::test]
async fn test_remapped_keys_translate_references() {
    let source = MemoryStore::new("sqlite");
    source.create_table(MemoryTable::new("customers", &["id", "email"]).rows([
        Row::new().with("id", 100i64).with("email", "ada@example.com"),
        Row::new().with("id", 200i64).with("email", "bob@example.com"),
    ]));
    source.create_table(MemoryTable::new("invoices", &["id", "customer_id"]).rows([
        Row::new().with("id", 1i64).with("customer_id", 200i64),
        Row::new().with("id", 2i64).with("customer_id", 300i64),
    ]));

    let target = Arc::new(MemoryStore::new("postgres"));
    target.create_table(
        MemoryTable::new("customers", &["id", "email"])
            .primary_key("id")
            .auto_increment()
            .unique("email"),
    );
    target.create_table(MemoryTable::new("invoices", &["id", "customer_id"]).primary_key("id"));

    let specs = vec![
        TableSpec::new("customers").remap_by("email"),
        TableSpec::new("invoices").foreign_key_to("customer_id", "customers"),
    ];
    let orchestrator = Orchestrator::with_stores(config(specs), Arc::new(source), target.clone());

    let result = orchestrator.run(CancellationToken::new()).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(target_row(&target, "customers", 2).get("email"), Some(&SqlValue::from("bob@example.com")));
    assert_eq!(target_row(&target, "invoices", 1).get("customer_id"), Some(&SqlValue::Int(2)));
    assert_eq!(target_row(&target, "invoices", 2).get("customer_id"), Some(&SqlValue::Null));
}

#[tokio::test]
async fn test_seeded_table_supplies_keys() {
    let source = MemoryStore::new("sqlite");
    source.create_table(MemoryTable::new("notes", &["id", "author_id"]).rows([
        Row::new().with("id", 1i64).with("author_id", 5i64),
        Row::new().with("id", 2i64).with("author_id", 6i64),
    ]));

    let target = Arc::new(MemoryStore::new("postgres"));
    target.create_table(
        MemoryTable::new("users", &["id"])
            .primary_key("id")
            .row(Row::new().with("id", 5i64)),
    );
    target.create_table(MemoryTable::new("notes", &["id", "author_id"]).primary_key("id"));

    let specs = vec![
        TableSpec::new("notes").foreign_key_to("author_id", "users"),
        TableSpec::new("users").seeded_from_target(),
    ];
    let orchestrator = Orchestrator::with_stores(config(specs), Arc::new(source), target.clone());

    let result = orchestrator.run(CancellationToken::new()).await.unwrap();

    assert_eq!(result.table("users").unwrap().status, TableStatus::Seeded);
    assert_eq!(target_row(&target, "notes", 1).get("author_id"), Some(&SqlValue::Int(5)));
    assert_eq!(target_row(&target, "notes", 2).get("author_id"), Some(&SqlValue::Null));
    // Seeded tables are not compared against the source.
    let report = result.report.unwrap();
    assert_eq!(report.tables.len(), 1);
    assert!(report.passed);
}

#[tokio::test]
async fn test_reconcile_queries() {
    let (source, target) = factory();
    target.register_query("SELECT * FROM machines", |tables| {
        tables.get("machines").map_or(0, |t| t.data().len() as i64)
    });
    let mut config = config(factory_specs());
    config.reconciliation.queries = vec![
        ReconciliationQuery {
            name: "all machines".to_string(),
            sql: "SELECT * FROM machines".to_string(),
            expect_rows_of: Some("machines".to_string()),
            expect_count: None,
        },
        ReconciliationQuery {
            name: "unregistered".to_string(),
            sql: "SELECT 1".to_string(),
            expect_rows_of: None,
            expect_count: Some(1),
        },
    ];
    let orchestrator = Orchestrator::with_stores(config, source, target);

    orchestrator.run(CancellationToken::new()).await.unwrap();
    let report = orchestrator.reconcile().await.unwrap();

    assert_eq!(report.queries[0].rows, Some(2));
    assert!(report.queries[0].passed);
    assert!(report.queries[1].error.is_some());
    assert!(!report.passed);
}

#[tokio::test]
async fn test_parallel_workers_respect_dependencies() {
    let source = MemoryStore::new("sqlite");
    let target = Arc::new(MemoryStore::new("postgres"));
    for name in ["root", "left", "right", "leaf"] {
        source.create_table(
            MemoryTable::new(name, &["id", "ref_a", "ref_b"])
                .rows((1..=20).map(|i| Row::new().with("id", i as i64).with("ref_a", i as i64).with("ref_b", i as i64))),
        );
        target.create_table(MemoryTable::new(name, &["id", "ref_a", "ref_b"]).primary_key("id"));
    }
    target.set_insert_delay(Some(Duration::from_millis(2)));

    let specs = vec![
        TableSpec::new("leaf")
            .foreign_key_to("ref_a", "left")
            .foreign_key_to("ref_b", "right"),
        TableSpec::new("left").foreign_key_to("ref_a", "root"),
        TableSpec::new("right").foreign_key_to("ref_a", "root"),
        TableSpec::new("root"),
    ];
    let mut config = config(specs);
    config.migration.workers = Some(3);
    config.migration.batch_size = Some(5);
    let orchestrator = Orchestrator::with_stores(config, Arc::new(source), target.clone());

    let result = orchestrator.run(CancellationToken::new()).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.plan.first().map(String::as_str), Some("root"));
    assert_eq!(result.plan.last().map(String::as_str), Some("leaf"));
    // Every reference resolved, so the parents were complete when each child ran.
    for table in &result.tables {
        assert_eq!(table.references_nulled, 0, "{}", table.table);
        assert_eq!(table.rows_written, 20);
    }
}

#[tokio::test]
async fn test_slow_inserts_fail_the_table() {
    let (source, target) = factory();
    target.set_insert_delay(Some(Duration::from_millis(1500)));
    let mut config = strict(config(factory_specs()));
    config.migration.operation_timeout_secs = Some(1);
    let orchestrator = Orchestrator::with_stores(config, source, target.clone());

    let result = orchestrator.run(CancellationToken::new()).await.unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    let machines = result.table("machines").unwrap();
    assert_eq!(machines.status, TableStatus::Failed);
    assert!(machines.rows_failed >= 1);
    assert!(machines.warnings.iter().any(|w| w.contains("timed out")));
    assert_eq!(result.table("production_orders").unwrap().status, TableStatus::Skipped);
    assert_eq!(target.commit_count(), 0);
    assert_eq!(target.row_count("machines"), 0);
}

#[tokio::test]
async fn test_stalled_reconciliation_does_not_hang() {
    let (source, target) = factory();
    target.stall("count_rows");
    let mut config = config(factory_specs());
    config.migration.operation_timeout_secs = Some(1);
    let orchestrator = Orchestrator::with_stores(config, source, target.clone());

    let result = tokio::time::timeout(Duration::from_secs(5), orchestrator.run(CancellationToken::new()))
        .await
        .expect("run should finish once the reconciliation count times out")
        .unwrap();

    // Every table was written; only the comparison is missing.
    assert!(result.tables.iter().all(|t| t.status == TableStatus::Success));
    assert_eq!(target.row_count("production_orders"), 3);
    assert!(result.report.is_none());
    assert_eq!(result.status, RunStatus::Failed);

    let err = orchestrator.reconcile().await.unwrap_err();
    assert!(matches!(err, MigrateError::Timeout { seconds: 1, .. }));
}

#[tokio::test]
async fn test_repairs_count_only_committed_rows() {
    let (source, target) = factory();
    // Order 11 carries the dangling machine reference.
    target.fail_rows_where("production_orders", "id", SqlValue::Int(11));
    let orchestrator = Orchestrator::with_stores(config(factory_specs()), source, target.clone());

    let result = orchestrator.run(CancellationToken::new()).await.unwrap();

    let orders = result.table("production_orders").unwrap();
    assert_eq!(orders.status, TableStatus::Partial);
    assert_eq!(orders.rows_failed, 1);
    assert_eq!(orders.references_nulled, 0);
    assert_eq!(orders.timestamps_unparsed, 1);
    assert_eq!(target.row_count("production_orders"), 2);
}
