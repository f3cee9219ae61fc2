mod common;

use common::Rig;
use micrologger_config::{PersistedState, load_state, save_state};
use micrologger_core::{OdAction, StirrerAction, StirrerState};

#[test]
fn snapshot_survives_a_reboot() {
    let mut rig = Rig::new();
    rig.logger.set_stirrer_setpoint(800.0);
    rig.logger.stirrer_action(StirrerAction::Start);
    rig.logger.set_read_interval_s(600);
    rig.logger.od_action(OdAction::Zero).unwrap();
    assert!(rig.settle());
    let before = rig.logger.snapshot();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.toml");
    save_state(&path, &before).unwrap();
    let loaded = load_state(&path).unwrap().unwrap();
    assert_eq!(loaded, before);

    let mut rebooted = Rig::new();
    rebooted.logger.restore(&loaded);
    let od = rebooted.logger.optical_density();
    assert!(od.zero().valid);
    assert_eq!(od.zero().signal, rig.logger.optical_density().zero().signal);
    assert_eq!(od.gain().steps(), rig.logger.optical_density().gain().steps());
    assert_eq!(od.settings().read_interval_ms, 600_000);
    assert!(od.next_read_deadline().is_some());

    rebooted.run_for(2_000);
    let s = rebooted.logger.stirrer();
    assert_eq!(s.state(), StirrerState::Running);
    assert_eq!(s.speed(), 800.0);
    assert_eq!(rebooted.logger.snapshot(), before);
}

#[test]
fn restored_zero_reads_without_recalibrating() {
    let mut rig = Rig::new();
    rig.logger.od_action(OdAction::Zero).unwrap();
    assert!(rig.settle());
    let state = rig.logger.snapshot();

    let mut rebooted = Rig::new();
    rebooted.logger.restore(&state);
    rebooted.photometer.set_transmittance(0.5);
    rebooted.logger.od_action(OdAction::Read).unwrap();
    assert!(rebooted.settle());
    let reading = *rebooted.logger.optical_density().reading().unwrap();
    assert!((reading.od - 0.301).abs() < 0.005, "{reading:?}");
}

#[test]
fn empty_state_changes_nothing() {
    let mut rig = Rig::new();
    let before = rig.logger.snapshot();
    rig.logger.restore(&PersistedState::default());
    assert_eq!(rig.logger.snapshot(), before);
    assert!(!rig.logger.stirrer().is_on());
}
