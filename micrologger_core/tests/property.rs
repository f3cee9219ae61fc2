mod common;

use common::{Rig, expected_counts};
use micrologger_core::util::from_ppt;
use micrologger_core::{InstrumentSettings, OdAction};
use micrologger_hardware::PhotometerModel;
use proptest::prelude::*;

fn config() -> ProptestConfig {
    ProptestConfig {
        cases: 12,
        ..ProptestConfig::default()
    }
}

proptest! {
    #![proptest_config(config())]

    /// The search lands on a step no neighbour improves on, whether or not
    /// the target is reachable.
    #[test]
    fn gain_search_settles_on_a_local_optimum(
        light in 5.0f64..60.0,
        target in 300.0f64..900.0,
    ) {
        let model = PhotometerModel { light_per_kohm: light, ..PhotometerModel::default() };
        let mut settings = InstrumentSettings::default();
        settings.optical_density.target_ppt = target;
        let mut rig = Rig::with(model.clone(), settings);

        rig.logger.od_action(OdAction::OptimizeGain).unwrap();
        prop_assert!(rig.settle());
        let od = rig.logger.optical_density();
        prop_assume!(od.error().is_none());

        let goal = from_ppt(target, model.adc_resolution);
        let dist = |steps: u16| (expected_counts(&model, steps, 1.0, true) - goal).abs();
        let chosen = od.gain().steps();
        let max = od.gain().max_steps();
        if chosen > 0 {
            prop_assert!(dist(chosen) <= dist(chosen - 1), "{chosen} vs below");
        }
        if chosen < max {
            prop_assert!(dist(chosen) <= dist(chosen + 1), "{chosen} vs above");
        }
        prop_assert!((od.gain_ohm() - od.gain().total_ohm()).abs() < 1e-9);
        prop_assert!(!od.beam().is_on());
    }

    /// Optical density tracks the sample's transmittance against the zero.
    #[test]
    fn optical_density_tracks_transmittance(t in 0.05f64..1.0) {
        let mut rig = Rig::new();
        rig.logger.od_action(OdAction::Zero).unwrap();
        prop_assert!(rig.settle());

        rig.photometer.set_transmittance(t);
        rig.logger.od_action(OdAction::Read).unwrap();
        prop_assert!(rig.settle());
        let reading = *rig.logger.optical_density().reading().unwrap();
        prop_assert!((reading.transmittance - t).abs() < 0.01, "{reading:?}");
        prop_assert!((reading.od + t.log10()).abs() < 0.02, "{reading:?}");
    }
}
