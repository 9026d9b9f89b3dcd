mod common;

use std::process::Command;

use common::{TestConfig, assert_contains, assert_report_verdict, init_test_logging};

fn soak() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_soak"));
    for var in ["SOAK_TEST_TIMEOUT", "SOAK_HARASSERS", "SOAK_SMOKE", "SOAK_OUTPUT_DIR"] {
        cmd.env_remove(var);
    }
    cmd.env("SOAK_LOG_LEVEL", "warn");
    cmd
}

#[test]
fn test_help_lists_commands() {
    init_test_logging();
    test_log!("TEST START: test_help_lists_commands");

    let output = soak().arg("--help").output().expect("Failed to run soak --help");

    assert!(output.status.success(), "soak --help failed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_contains(&stdout, "Soak endurance test orchestrator");
    assert_contains(&stdout, "run");
    assert_contains(&stdout, "validate");
    test_log!("TEST PASS: test_help_lists_commands");
}

#[test]
fn test_validate_accepts_good_config() {
    init_test_logging();
    let config = TestConfig::mock();

    let output = soak()
        .args(["validate", "--config"])
        .arg(&config.path)
        .output()
        .expect("Failed to run soak validate");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "validate failed: {stdout}");
    assert_contains(&stdout, "Configuration OK: soak_cli");
}

#[test]
fn test_validate_reports_missing_pools() {
    init_test_logging();
    let config = TestConfig::with_jobs(3);

    let output = soak()
        .args(["validate", "--config"])
        .arg(&config.path)
        .output()
        .expect("Failed to run soak validate");

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_contains(&stderr, "SOAK-E003");
    assert_contains(&stderr, "not enough pools");
}

#[test]
fn test_validate_missing_file_fails() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();

    let output = soak()
        .args(["validate", "--config"])
        .arg(dir.path().join("absent.toml"))
        .output()
        .expect("Failed to run soak validate");

    assert!(!output.status.success());
    assert_contains(&String::from_utf8_lossy(&output.stderr), "failed to read");
}

#[test]
fn test_mock_smoke_run_writes_report() {
    init_test_logging();
    test_log!("TEST START: test_mock_smoke_run_writes_report");
    let config = TestConfig::mock();

    let output = soak()
        .args(["run", "--mock", "--smoke", "--json", "--config"])
        .arg(&config.path)
        .output()
        .expect("Failed to run soak run");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "run failed: {stdout}\n{stderr}");

    let report: serde_json::Value = serde_json::from_str(&stdout).expect("report is JSON");
    assert_eq!(report["verdict"], "passed");
    assert_eq!(report["passes_completed"], 1);
    assert_eq!(report["name"], "soak_cli");

    let written = assert_report_verdict(&config.output_dir(), "passed");
    assert_eq!(written["run_id"], report["run_id"]);
    test_log!("TEST PASS: test_mock_smoke_run_writes_report");
}

#[test]
fn test_run_refuses_slurm_without_storage_adapter() {
    init_test_logging();
    let config = TestConfig::slurm();

    let output = soak()
        .args(["run", "--smoke", "--config"])
        .arg(&config.path)
        .output()
        .expect("Failed to run soak run");

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_contains(&stderr, "SOAK-E003");
    assert_contains(&stderr, "storage control adapter");
    assert!(!config.output_dir().join("soak").exists());
}
