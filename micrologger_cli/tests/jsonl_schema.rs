use assert_cmd::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    let toml = r#"
[optical_density]
# the run below is shorter than one read interval
read_interval_s = 200
"#;
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn json_lines(stdout: &[u8]) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|l| l.trim_start().starts_with('{'))
        .map(|l| serde_json::from_str(l).expect("stdout line is JSON"))
        .collect()
}

/// Validate the JSONL schema of a run that stirs and zeroes.
#[rstest]
fn jsonl_run_schema() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let out = Command::cargo_bin("micrologger")
        .unwrap()
        .arg("--json")
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .args(["run", "--duration-s", "30", "--status-every-s", "10", "--stir", "--zero"])
        .output()
        .unwrap();
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let lines = json_lines(&out.stdout);
    assert_eq!(lines.len(), 3, "{lines:?}");
    for (i, v) in lines.iter().enumerate() {
        assert_eq!(v["event"], "status");
        let t = v["t_ms"].as_u64().unwrap();
        assert!(t >= 10_000 * (i as u64 + 1), "{t}");
        assert!(v["stirrer"]["state"].is_string());
        assert!(v["stirrer"]["speed_rpm"].is_number());
        assert!(v["optical_density"]["status"].is_string());
    }
    let last = lines.last().unwrap();
    assert_eq!(last["stirrer"]["on"], true);
    assert!(last["optical_density"]["zero"]["signal"].as_f64().unwrap() > 0.0);
    assert!(last["optical_density"]["error"].is_null());
    assert!(last["optical_density"]["next_read_ms"].as_u64().is_some());
}

#[rstest]
fn jsonl_health_lists_devices() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let out = Command::cargo_bin("micrologger")
        .unwrap()
        .args(["--json", "--log-level", "error", "--config"])
        .arg(&cfg)
        .arg("health")
        .output()
        .unwrap();
    assert!(out.status.success());

    let lines = json_lines(&out.stdout);
    assert_eq!(lines.len(), 1);
    let v = &lines[0];
    assert_eq!(v["event"], "health");
    let devices = v["devices"].as_array().unwrap();
    let names: Vec<&str> = devices.iter().filter_map(|d| d["name"].as_str()).collect();
    assert_eq!(names, ["beam", "gain-coarse", "gain-fine"]);
    assert!(devices.iter().all(|d| d["connected"] == true));
    assert_eq!(v["stirrer"]["state"], "Off");
    assert!(v["optical_density"]["zero"].is_null());
}

/// Errors under --json come out as one structured object on stdout.
#[rstest]
fn jsonl_error_schema() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let out = Command::cargo_bin("micrologger")
        .unwrap()
        .args(["--json", "--log-level", "error", "--config"])
        .arg(&cfg)
        .arg("read")
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(6));

    let lines = json_lines(&out.stdout);
    let v = lines.last().expect("error object");
    assert_eq!(v["reason"], "FailedRead");
    assert!(v["message"].as_str().unwrap().starts_with("What happened:"));
}
