mod common;

use common::Rig;
use micrologger_core::optical_density::Stage;
use micrologger_core::{
    InstrumentSettings, OdAction, OdStatus, StirrerAction, StirrerEvent, StirrerState,
};
use micrologger_hardware::PhotometerModel;

fn vortexing_rig() -> Rig {
    let mut settings = InstrumentSettings::default();
    settings.optical_density.vortex = true;
    Rig::with(PhotometerModel::default(), settings)
}

#[test]
fn zero_vortexes_then_stops_the_stirrer_and_hands_it_back() {
    let mut rig = vortexing_rig();
    rig.logger.stirrer_action(StirrerAction::Start);
    rig.run_to(1000);
    rig.logger.od_action(OdAction::Zero).unwrap();
    assert_eq!(rig.logger.stirrer().event(), Some(StirrerEvent::Vortexing));

    rig.run_to(8000);
    assert_eq!(rig.logger.stirrer().speed(), 3000.0);
    assert_eq!(rig.logger.optical_density().stage(), Stage::AwaitVortex);
    assert!(!rig.lights.is_paused());

    // vortex ends near 11.9 s, the stirrer then pauses for the measurement
    rig.run_to(13_200);
    let s = rig.logger.stirrer();
    assert_eq!(s.event(), Some(StirrerEvent::Paused));
    assert_eq!(s.state(), StirrerState::Off);
    assert_eq!(rig.logger.optical_density().status(), OdStatus::Optimizing);

    assert!(rig.settle());
    assert!(rig.logger.optical_density().zero().valid);
    rig.run_for(1500);
    let s = rig.logger.stirrer();
    assert_eq!(s.event(), None);
    assert_eq!(s.state(), StirrerState::Running);
    assert_eq!(s.speed(), 500.0);
    assert!(!rig.lights.is_paused());
}

#[test]
fn stirrer_left_running_when_not_stopped_for_reads() {
    let mut settings = InstrumentSettings::default();
    settings.optical_density.stop_stirrer = false;
    let mut rig = Rig::with(PhotometerModel::default(), settings);
    rig.logger.stirrer_action(StirrerAction::Start);
    rig.run_to(1000);
    rig.logger.od_action(OdAction::Zero).unwrap();
    assert!(rig.settle());
    let s = rig.logger.stirrer();
    assert_eq!(s.state(), StirrerState::Running);
    assert_eq!(s.event(), None);
    assert!(rig.logger.optical_density().zero().valid);
}

#[test]
fn a_new_sequence_supersedes_the_running_one() {
    let mut rig = Rig::new();
    rig.logger.od_action(OdAction::OptimizeGain).unwrap();
    rig.run_for(1100);
    assert!(rig.lights.is_paused());

    rig.logger.od_action(OdAction::Zero).unwrap();
    assert!(rig.settle());
    let od = rig.logger.optical_density();
    assert_eq!(od.error(), None);
    assert!(od.zero().valid);
    assert!(!rig.lights.is_paused());
    assert!(!od.beam().is_on());
}

#[test]
fn health_reflects_the_instrument() {
    let mut rig = Rig::new();
    rig.logger.stirrer_action(StirrerAction::Start);
    rig.logger.od_action(OdAction::Zero).unwrap();
    assert!(rig.settle());
    rig.run_for(2000);

    let h = rig.logger.health();
    assert!(h.stirrer_on);
    assert_eq!(h.stirrer_state, StirrerState::Running);
    assert_eq!(h.motor_error, None);
    assert_eq!(h.od_status, OdStatus::Idle);
    assert_eq!(h.od_error, None);
    assert!(h.zero.valid);
    assert!(h.next_read_ms.is_some_and(|t| t > h.now_ms));
    assert_eq!(h.devices.len(), 3);
}
