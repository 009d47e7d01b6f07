//! CLI integration tests for sqlite-pg-migrate.
//!
//! These tests verify command-line argument parsing, help output,
//! the offline `plan` command and exit codes for configuration errors.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the sqlite-pg-migrate binary.
fn cmd() -> Command {
    Command::cargo_bin("sqlite-pg-migrate").unwrap()
}

fn config_file(tables: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"source:
  path: ./production.db
target:
  host: localhost
  database: target_db
  user: postgres
{}"#,
        tables
    )
    .unwrap();
    file
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("reconcile"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--workers"))
        .stdout(predicate::str::contains("--batch-size"))
        .stdout(predicate::str::contains("--best-effort"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sqlite-pg-migrate"));
}

#[test]
fn test_global_flag_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("[default: config.yaml]"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("[default: info]"))
        .stdout(predicate::str::contains("[default: 60]"))
        .stdout(predicate::str::contains("--output-json"));
}

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

// =============================================================================
// Plan Tests
// =============================================================================

#[test]
fn test_plan_orders_parents_first() {
    let file = config_file(
        r#"tables:
  - name: production_orders
    foreign_keys:
      - column: machine_id
        references: machines
  - name: machines
"#,
    );

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "plan"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1. machines"))
        .stdout(predicate::str::contains("2. production_orders (after machines)"));
}

#[test]
fn test_plan_json_output() {
    let file = config_file(
        r#"tables:
  - name: b
    depends_on: [a]
  - name: a
"#,
    );

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "--output-json", "plan"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""a",
  "b""#));
}

#[test]
fn test_plan_cycle_exits_with_code_3() {
    let file = config_file(
        r#"tables:
  - name: a
    depends_on: [b]
  - name: b
    depends_on: [a]
"#,
    );

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "plan"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Cyclic table dependency"));
}

// =============================================================================
// Exit Code Tests - Config Errors
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_1() {
    // Missing file is an IO error, not a config error
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "plan"])
        .assert()
        .code(1);
}

#[test]
fn test_invalid_yaml_exits_with_code_2() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "plan"])
        .assert()
        .code(2);
}

#[test]
fn test_missing_required_fields_exits_with_code_2() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "source:").unwrap();
    writeln!(file, "  path: ./production.db").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "plan"])
        .assert()
        .code(2);
}

#[test]
fn test_no_tables_exits_with_code_2() {
    let file = config_file("");

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "plan"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("at least one table"));
}

#[test]
fn test_zero_workers_override_exits_with_code_2() {
    let file = config_file("tables:\n  - name: machines\n");

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "run", "--workers", "0"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("migration.workers"));
}
