//! sqlite-pg-migrate CLI - Dependency-ordered SQLite to PostgreSQL migration.

use clap::{Parser, Subcommand};
use sqlite_pg_migrate::{
    Config, MigrateError, MigrationResult, Orchestrator, RunStatus, TableStatus, ValidationReport,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "sqlite-pg-migrate")]
#[command(about = "Dependency-ordered SQLite to PostgreSQL migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Timeout in seconds for graceful shutdown (default: 60)
    #[arg(long, default_value = "60")]
    shutdown_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate every configured table
    Run {
        /// Override number of tables migrated concurrently
        #[arg(long)]
        workers: Option<usize>,

        /// Override rows per batch transaction
        #[arg(long)]
        batch_size: Option<usize>,

        /// Continue with independent tables after a table fails
        #[arg(long)]
        best_effort: bool,
    },

    /// Show the table migration order without connecting to any database
    Plan,

    /// Compare source and target without migrating
    Reconcile,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Plan => {
            let plan = sqlite_pg_migrate::planner::plan(&config.tables)?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&plan.names())?);
            } else {
                println!("Migration order:");
                for (i, spec) in plan.tables().iter().enumerate() {
                    let deps = spec.all_dependencies();
                    if deps.is_empty() {
                        println!("  {}. {}", i + 1, spec.name);
                    } else {
                        println!("  {}. {} (after {})", i + 1, spec.name, deps.join(", "));
                    }
                }
            }
        }

        Commands::Run {
            workers,
            batch_size,
            best_effort,
        } => {
            // Apply overrides
            if let Some(w) = workers {
                config.migration.workers = Some(w);
            }
            if let Some(b) = batch_size {
                config.migration.batch_size = Some(b);
            }
            if best_effort {
                config.migration.failure_mode = sqlite_pg_migrate::FailureMode::BestEffort;
            }
            config.validate()?;

            // Setup signal handling for graceful shutdown (SIGINT and SIGTERM)
            let cancel_token = setup_signal_handler(cli.shutdown_timeout);

            let orchestrator = Orchestrator::new(config).await?;
            let outcome = orchestrator.run(cancel_token).await;
            orchestrator.close().await;
            let result = outcome?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                print_result(&result);
            }

            if result.status == RunStatus::Failed {
                let incomplete: Vec<String> = result
                    .failed_tables
                    .iter()
                    .chain(&result.skipped_tables)
                    .cloned()
                    .collect();
                return Err(if incomplete.is_empty() {
                    MigrateError::TableMigrationFailed {
                        table: result
                            .report
                            .as_ref()
                            .map(|r| r.mismatched_tables().join(", "))
                            .unwrap_or_default(),
                        message: "reconciliation found differences".to_string(),
                    }
                } else {
                    MigrateError::TableMigrationFailed {
                        table: incomplete.join(", "),
                        message: "migration did not complete".to_string(),
                    }
                });
            }
        }

        Commands::Reconcile => {
            let orchestrator = Orchestrator::new(config).await?;
            let outcome = orchestrator.reconcile().await;
            orchestrator.close().await;
            let report = outcome?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                print_report(&report);
            }

            if !report.passed {
                return Err(MigrateError::TableMigrationFailed {
                    table: report.mismatched_tables().join(", "),
                    message: "reconciliation found differences".to_string(),
                });
            }
        }
    }

    Ok(())
}

fn print_result(result: &MigrationResult) {
    println!("\nMigration {}!", match result.status {
        RunStatus::Completed => "completed",
        RunStatus::CompletedWithErrors => "completed with errors",
        RunStatus::Failed => "failed",
    });
    println!("  Run ID: {}", result.run_id);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!("  Rows: {} read, {} written", result.rows_read, result.rows_written);
    for table in &result.tables {
        match table.status {
            TableStatus::Seeded => println!("  {}: seeded from target", table.table),
            TableStatus::Skipped => println!(
                "  {}: skipped ({})",
                table.table,
                table.error.as_deref().unwrap_or("not attempted")
            ),
            _ => println!(
                "  {}: {} written, {} existing, {} rejected, {} failed, {} references repaired",
                table.table,
                table.rows_written,
                table.rows_existing,
                table.rows_rejected,
                table.rows_failed,
                table.references_nulled + table.references_defaulted
            ),
        }
    }
    if !result.failed_tables.is_empty() {
        println!("  Failed tables: {:?}", result.failed_tables);
    }
    if let Some(report) = &result.report {
        print_report(report);
    }
}

fn print_report(report: &ValidationReport) {
    println!("\nReconciliation:");
    for count in &report.tables {
        println!(
            "  {} {}: source {}, target {}",
            if count.matched { "✓" } else { "✗" },
            count.table,
            count.source_count,
            count.target_count
        );
    }
    for check in &report.references {
        println!(
            "  {} {}.{}: {} orphaned of {}",
            if check.passed { "✓" } else { "✗" },
            check.table,
            check.column,
            check.orphaned,
            check.non_null
        );
    }
    for query in &report.queries {
        match &query.error {
            Some(err) => println!("  ✗ {}: {}", query.name, err),
            None => println!(
                "  {} {}: {} rows",
                if query.passed { "✓" } else { "✗" },
                query.name,
                query.rows.unwrap_or_default()
            ),
        }
    }
    println!("  Overall: {}", if report.passed { "PASSED" } else { "FAILED" });
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so --output-json stays parseable.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler(shutdown_timeout: u64) -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!(
                        "\nReceived {}. Finishing in-flight batches (timeout: {}s)...",
                        name, shutdown_timeout
                    );
                    token.cancel();
                    tokio::time::sleep(std::time::Duration::from_secs(shutdown_timeout)).await;
                    eprintln!("Shutdown timeout exceeded, exiting");
                    std::process::exit(130);
                });
            }
            Err(e) => warn!("Could not install {} handler: {}", name, e),
        }
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler(shutdown_timeout: u64) -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Finishing in-flight batches...");
            token.cancel();
            tokio::time::sleep(std::time::Duration::from_secs(shutdown_timeout)).await;
            std::process::exit(130);
        }
    });

    cancel_token
}
