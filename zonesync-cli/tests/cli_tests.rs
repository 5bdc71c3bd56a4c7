//! Tests for the zonesync binary
//!
//! These run the built executable and inspect stdout and written files.

use std::process::Command;
use tempfile::TempDir;

fn zonesync() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_zonesync"));
    command.env("RUST_LOG", "error");
    command
}

#[test]
fn test_diff_prints_delta_json() {
    let output = zonesync().args(["diff", "h1,h2", "h2,h3"]).output().unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let delta: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(delta["added"], serde_json::json!(["h3"]));
    assert_eq!(delta["removed"], serde_json::json!(["h1"]));
    assert_eq!(delta["modified"], serde_json::json!([]));
}

#[test]
fn test_diff_reads_cell_files() {
    let dir = TempDir::new().unwrap();
    let before = dir.path().join("before.json");
    let after = dir.path().join("after.txt");
    std::fs::write(&before, r#"["a", "b"]"#).unwrap();
    std::fs::write(&after, "a\nc\n").unwrap();

    let output = zonesync()
        .arg("diff")
        .arg(format!("@{}", before.display()))
        .arg(format!("@{}", after.display()))
        .output()
        .unwrap();
    assert!(output.status.success());

    let delta: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(delta["added"], serde_json::json!(["c"]));
    assert_eq!(delta["removed"], serde_json::json!(["b"]));
}

#[test]
fn test_init_config_writes_loadable_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("zonesync.toml");

    let status = zonesync().arg("init-config").arg(&path).status().unwrap();
    assert!(status.success());
    let config = zonesync_core::Config::from_file(&path).unwrap();
    assert_eq!(config, zonesync_core::Config::default());

    // Refuses to overwrite without --force
    let status = zonesync().arg("init-config").arg(&path).status().unwrap();
    assert!(!status.success());
    let status = zonesync().arg("init-config").arg(&path).arg("--force").status().unwrap();
    assert!(status.success());
}

#[test]
fn test_invalid_config_file_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[transport]\nreconnect_jitter = 4.0\n").unwrap();

    let output = zonesync()
        .arg("--config")
        .arg(&path)
        .args(["diff", "a", "b"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}
