mod common;

use common::get_stress_path;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn test_stress_run_reports_no_violations() {
    let config_dir = tempfile::tempdir().expect("Failed to create temp directory");

    let output = Command::new(get_stress_path())
        .args(["run", "--threads", "4", "--objects", "4", "--iterations", "50"])
        .env("COWFS_CONFIG_DIR", config_dir.path())
        .output()
        .expect("Failed to run cowfs-stress");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        output.status.success(),
        "stress run should succeed. stdout: {}, stderr: {}",
        stdout,
        stderr
    );

    let report: serde_json::Value =
        serde_json::from_str(&stdout).expect("stdout should be a JSON report");
    assert_eq!(report["violations"], serde_json::json!([]));
    assert_eq!(report["threads"], 4);
    assert_eq!(report["attach_calls"], 4);
    assert_eq!(report["evicted_at_unmount"], 4);
}

#[test]
fn test_stress_run_writes_json_output() {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let report_path = dir.path().join("report.json");

    let status = Command::new(get_stress_path())
        .args(["run", "--threads", "2", "--objects", "2", "--iterations", "10"])
        .arg("--json-output")
        .arg(&report_path)
        .env("COWFS_CONFIG_DIR", dir.path())
        .status()
        .expect("Failed to run cowfs-stress");
    assert!(status.success());

    let contents = std::fs::read_to_string(&report_path).expect("report should be written");
    let report: serde_json::Value = serde_json::from_str(&contents).unwrap();
    assert!(report["violations"].as_array().unwrap().is_empty());
}

#[test]
fn test_stress_run_rejects_invalid_config() {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let config_path = dir.path().join("bad.toml");
    std::fs::write(&config_path, "hold_table_size = 3\n").unwrap();

    let output = Command::new(get_stress_path())
        .arg("run")
        .arg("--config")
        .arg(&config_path)
        .output()
        .expect("Failed to run cowfs-stress");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        predicate::str::contains("power of two").eval(&stderr),
        "error should name the bad setting. stderr: {}",
        stderr
    );
}

#[test]
fn test_default_config_prints_toml() {
    let output = Command::new(get_stress_path())
        .arg("default-config")
        .output()
        .expect("Failed to run cowfs-stress");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let expected = predicate::str::contains("hold_table_size = 64")
        .and(predicate::str::contains("atime = true"))
        .and(predicate::str::contains("max_objects").not());
    assert!(expected.eval(&stdout), "unexpected default config: {}", stdout);
}
