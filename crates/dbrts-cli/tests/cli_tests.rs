//! CLI integration tests for dbrts.
//!
//! These cover argument parsing, help output and the exit codes of
//! failures that happen before any database is contacted.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

/// Get a command for the dbrts binary.
fn cmd() -> Command {
    Command::cargo_bin("dbrts").unwrap()
}

fn endpoint_file(yaml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", yaml).unwrap();
    file
}

fn postgres_endpoint() -> NamedTempFile {
    endpoint_file(
        "database:\n  type: postgres\n  host: 127.0.0.1\n  port: 1\n  database: app\n  username: app\n",
    )
}

fn mongo_endpoint() -> NamedTempFile {
    endpoint_file("database:\n  type: mongo\n  host: 127.0.0.1\n  port: 1\n  database: app\n")
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
        .stdout(predicate::str::contains("transfer"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_transfer_subcommand_help() {
    cmd()
        .args(["transfer", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--source"))
        .stdout(predicate::str::contains("--target"))
        .stdout(predicate::str::contains("--schema-only"))
        .stdout(predicate::str::contains("--data-only"))
        .stdout(predicate::str::contains("--workers"))
        .stdout(predicate::str::contains("--pagination"))
        .stdout(predicate::str::contains("--output-json"));
}

#[test]
fn test_batch_size_default() {
    cmd()
        .args(["transfer", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--batch-size"))
        .stdout(predicate::str::contains("[default: 500]"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("dbrts"));
}

#[test]
fn test_log_flags_exist() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_no_subcommand_shows_usage() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn test_transfer_requires_endpoints() {
    cmd()
        .arg("transfer")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--source"));
}

#[test]
fn test_invalid_pagination_rejected() {
    let source = postgres_endpoint();
    let target = postgres_endpoint();
    cmd()
        .args(["transfer", "--pagination", "random", "-s"])
        .arg(source.path())
        .arg("-t")
        .arg(target.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid pagination"));
}

// =============================================================================
// Exit Codes for Errors Before Connecting
// =============================================================================

#[test]
fn test_cross_engine_refused_with_code_2() {
    let source = postgres_endpoint();
    let target = mongo_endpoint();

    cmd()
        .arg("transfer")
        .arg("--source")
        .arg(source.path())
        .arg("--target")
        .arg(target.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains(
            "cross-engine transfers are not supported between postgres and mongo",
        ));
}

#[test]
fn test_unsupported_engine_refused_with_code_2() {
    let source = endpoint_file("database:\n  type: mysql\n  host: h\n  database: app\n");
    let target = endpoint_file("database:\n  type: mysql\n  host: h\n  database: app\n");

    cmd()
        .arg("transfer")
        .arg("--source")
        .arg(source.path())
        .arg("--target")
        .arg(target.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("mysql"));
}

#[test]
fn test_invalid_yaml_exits_with_code_2() {
    let source = endpoint_file("database: [");
    let target = postgres_endpoint();

    cmd()
        .arg("transfer")
        .arg("--source")
        .arg(source.path())
        .arg("--target")
        .arg(target.path())
        .assert()
        .code(2);
}

#[test]
fn test_missing_required_field_exits_with_code_2() {
    let source = endpoint_file("database:\n  type: postgres\n  host: h\n");
    let target = postgres_endpoint();

    cmd()
        .arg("transfer")
        .arg("--source")
        .arg(source.path())
        .arg("--target")
        .arg(target.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("database.database is required"));
}

#[test]
fn test_zero_batch_size_exits_with_code_2() {
    let source = postgres_endpoint();
    let target = postgres_endpoint();

    cmd()
        .args(["transfer", "--batch-size", "0", "--source"])
        .arg(source.path())
        .arg("--target")
        .arg(target.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("batch_size"));
}

#[test]
fn test_missing_file_exits_with_code_1() {
    cmd()
        .args([
            "transfer",
            "--source",
            "does_not_exist.yaml",
            "--target",
            "does_not_exist.yaml",
        ])
        .assert()
        .code(1);
}

#[test]
fn test_health_check_requires_a_config() {
    cmd()
        .arg("health-check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}
