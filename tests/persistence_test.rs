#![cfg(feature = "storage-rocksdb")]

use assert_cmd::cargo_bin;
use std::process::Command;
use tempfile::tempdir;

mod common;

#[test]
fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    // 1. First run: a completed payment
    let csv1 = common::command_file(&[
        "create,m1,order-1,100.00,USD,,,",
        "confirm,m1,order-1,,,PAYER-1,,",
    ])
    .unwrap();

    let mut cmd1 = Command::new(cargo_bin!());
    cmd1.arg(csv1.path()).arg("--db-path").arg(&db_path);

    let output1 = cmd1.output().expect("Failed to execute command");
    assert!(output1.status.success());
    let stdout1 = String::from_utf8_lossy(&output1.stdout);
    assert!(stdout1.contains("m1,USD,100.00,0.00"));

    // 2. Second run: the replayed create must not add pending funds again
    let csv2 = common::command_file(&[
        "create,m1,order-1,100.00,USD,,,",
        "create,m1,order-2,50.00,USD,,,",
    ])
    .unwrap();

    let mut cmd2 = Command::new(cargo_bin!());
    cmd2.arg(csv2.path()).arg("--db-path").arg(&db_path);

    let output2 = cmd2.output().expect("Failed to execute command");
    assert!(output2.status.success());
    let stdout2 = String::from_utf8_lossy(&output2.stdout);

    assert!(stdout2.contains("m1,USD,100.00,50.00"));
}
