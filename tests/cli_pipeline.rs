//! End-to-end: generate -> ingest -> analyze / backtest / scan through the binary.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Workspace with a config pointing the store into the temp dir.
fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("store.db");
    std::fs::write(
        dir.path().join("rxsentinel.toml"),
        format!("[storage]\ndb_path = \"{}\"\n", db.display()),
    )
    .unwrap();
    dir
}

fn cmd(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("rxsentinel").unwrap();
    cmd.current_dir(dir)
        .env_remove("RXSENTINEL_CONFIG")
        .env("RUST_LOG", "warn")
        .arg("--config")
        .arg(dir.join("rxsentinel.toml"));
    cmd
}

fn seeded(dir: &Path) {
    cmd(dir)
        .args(["generate", "--out", "rx.csv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Rows: 1280"));
    cmd(dir)
        .args(["ingest", "--csv", "rx.csv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Ingested 1280 rows"));
}

#[test]
fn test_analyze_json_after_ingest() {
    let dir = workspace();
    seeded(dir.path());

    let out = cmd(dir.path())
        .args(["analyze", "--product", "Drug_A", "--region", "North", "--json"])
        .output()
        .unwrap();
    assert!(out.status.success());

    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["cohort"]["product"], "Drug_A");
    assert_eq!(report["price_per_unit"], 450.0);
    assert_eq!(report["anomalies"].as_array().unwrap().len(), 160);
}

#[test]
fn test_analyze_table_output() {
    let dir = workspace();
    seeded(dir.path());

    cmd(dir.path())
        .args(["analyze", "--product", "Drug_B", "--region", "East"])
        .assert()
        .success()
        .stdout(predicate::str::contains("=== Anomalies: Drug_B - East ==="))
        .stdout(predicate::str::contains("=== Impact Events ==="));
}

#[test]
fn test_backtest_prints_metrics() {
    let dir = workspace();
    seeded(dir.path());

    cmd(dir.path())
        .args(["backtest", "--product", "Drug_A", "--region", "South", "--price", "450"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Precision:"))
        .stdout(predicate::str::contains("Recall:"));
}

#[test]
fn test_scan_covers_catalog() {
    let dir = workspace();
    seeded(dir.path());

    let out = cmd(dir.path()).args(["scan", "--json"]).output().unwrap();
    assert!(out.status.success());
    let entries: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 8);
    assert!(entries.iter().all(|e| e["error"].is_null()));
}

#[test]
fn test_unknown_cohort_fails_cleanly() {
    let dir = workspace();
    seeded(dir.path());

    cmd(dir.path())
        .args(["analyze", "--product", "Drug_A", "--region", "Atlantis"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no observations found"));
}

#[test]
fn test_ingest_rejects_bad_csv_and_keeps_store() {
    let dir = workspace();
    seeded(dir.path());

    std::fs::write(
        dir.path().join("bad.csv"),
        "date,product,region,units,price_per_unit,revenue,event_type\n\
         2021-01-04,Drug_A,North,-3,450,0,none\n",
    )
    .unwrap();
    cmd(dir.path())
        .args(["ingest", "--csv", "bad.csv"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("negative units"));

    cmd(dir.path())
        .args(["analyze", "--product", "Drug_A", "--region", "North", "--json"])
        .assert()
        .success();
}
