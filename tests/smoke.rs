//! Smoke tests -- verify the binary runs and key subcommands load.

use assert_cmd::Command;

#[test]
fn test_cli_help() {
    Command::cargo_bin("egressguard")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains(
            "Egress anomaly detection and remediation",
        ));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("egressguard")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("egressguard"));
}

#[test]
fn test_serve_subcommand_exists() {
    Command::cargo_bin("egressguard")
        .unwrap()
        .args(["serve", "--help"])
        .assert()
        .success();
}

#[test]
fn test_check_config_reports_policy() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("egressguard.toml");
    std::fs::write(
        &config_path,
        r#"
            [[policy.escalations]]
            after_incident_count = 1
            [policy.escalations.action]
            kind = "suspend_compute"
            duration_minutes = 10
        "#,
    )
    .unwrap();

    Command::cargo_bin("egressguard")
        .unwrap()
        .args(["--config", config_path.to_str().unwrap(), "check-config"])
        .assert()
        .success()
        .stdout(predicates::str::contains("escalation policy OK"));
}

#[test]
fn test_check_config_flags_empty_policy() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("egressguard.toml");
    std::fs::write(&config_path, "").unwrap();

    Command::cargo_bin("egressguard")
        .unwrap()
        .args(["--config", config_path.to_str().unwrap(), "check-config"])
        .assert()
        .success()
        .stdout(predicates::str::contains("remediation is disabled"));
}
