use micrologger_config::{OpticalDensityState, PersistedState, StirrerState, ZeroState, load_state, save_state};
use tempfile::tempdir;

fn sample_state() -> PersistedState {
    PersistedState {
        stirrer: Some(StirrerState {
            on: true,
            setpoint_rpm: 750.0,
            acceleration: 500.0,
            deceleration: 3000.0,
            vortex_speed_rpm: 3000.0,
            vortex_duration_s: 5,
        }),
        optical_density: Some(OpticalDensityState {
            read_interval_s: 200,
            vortex: false,
            stop_stirrer: true,
            gain_automatic: true,
            target_ppt: 920.0,
            gain_ohm: 187_165.35,
            zero: Some(ZeroState {
                signal: 3765.0,
                background: 29.5,
                timestamp_ms: 12_000,
            }),
        }),
    }
}

#[test]
fn missing_file_is_none() {
    let dir = tempdir().unwrap();
    assert_eq!(load_state(&dir.path().join("absent.toml")).unwrap(), None);
}

#[test]
fn saved_state_loads_back() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.toml");
    let state = sample_state();
    save_state(&path, &state).unwrap();
    assert!(!path.with_extension("tmp").exists());
    assert_eq!(load_state(&path).unwrap(), Some(state));
}

#[test]
fn partial_file_leaves_other_tables_unset() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.toml");
    std::fs::write(
        &path,
        "[stirrer]\non = false\nsetpoint_rpm = 300.0\nacceleration = 0.0\ndeceleration = 0.0\nvortex_speed_rpm = 1000.0\nvortex_duration_s = 2\n",
    )
    .unwrap();
    let state = load_state(&path).unwrap().unwrap();
    assert!(state.optical_density.is_none());
    assert_eq!(state.stirrer.map(|s| s.setpoint_rpm), Some(300.0));
}

#[test]
fn corrupt_file_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.toml");
    std::fs::write(&path, "[stirrer\n").unwrap();
    assert!(load_state(&path).is_err());
}

#[test]
fn save_creates_the_state_directory() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state").join("micrologger.toml");
    save_state(&path, &PersistedState::default()).unwrap();
    assert_eq!(load_state(&path).unwrap(), Some(PersistedState::default()));
}
