use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::process::Command;

/// Simulated faults surface as stable exit codes with an explanation.
#[rstest]
#[case::bright_chamber("MICROLOGGER_TEST_SIM_LIGHT", "400", &["optimize-gain"], 4, "Gain optimization failed")]
#[case::missing_rheostat("MICROLOGGER_TEST_SIM_DETACH", "0x2f", &["self-check"], 7, "I2C device 0x2f")]
#[case::stalled_rotor("MICROLOGGER_TEST_SIM_STALL", "1", &["stir", "start", "--follow-s", "30"], 8, "not turning")]
fn sim_faults_bubble_to_cli(
    #[case] var: &str,
    #[case] value: &str,
    #[case] args: &[&str],
    #[case] code: i32,
    #[case] needle: &str,
) {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("micrologger").unwrap();
    // no config file: stock settings
    cmd.current_dir(dir.path())
        .env(var, value)
        .args(["--log-level", "error"])
        .args(args);
    cmd.assert()
        .code(code)
        .stderr(predicate::str::contains(needle));
}

#[rstest]
fn self_check_prints_every_device_before_failing() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("micrologger")
        .unwrap()
        .current_dir(dir.path())
        .env("MICROLOGGER_TEST_SIM_DETACH", "2f")
        .args(["--log-level", "error", "self-check"])
        .assert()
        .code(7)
        .stdout(predicate::str::contains("beam"))
        .stdout(predicate::str::contains("ERROR (failed to connect)"));
}

#[rstest]
fn stalled_rotor_json_names_the_motor() {
    let dir = tempfile::tempdir().unwrap();
    let out = Command::cargo_bin("micrologger")
        .unwrap()
        .current_dir(dir.path())
        .env("MICROLOGGER_TEST_SIM_STALL", "1")
        .args(["--json", "--log-level", "error", "stir", "start", "--follow-s", "30"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(8));
    let stdout = String::from_utf8_lossy(&out.stdout);
    let err: serde_json::Value = serde_json::from_str(stdout.lines().last().unwrap()).unwrap();
    assert_eq!(err["reason"], "Motor");
    assert_eq!(err["details"]["error"], "motor not responding");
}
