#![allow(dead_code)]

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use micrologger_core::{InstrumentSettings, LightsLatch, MicroLogger, SharedBus, run_until, run_until_idle};
use micrologger_hardware::{PhotometerModel, SimBus, SimDevice, SimMotor, SimPhotometer};
use micrologger_traits::ManualClock;

/// A fully simulated instrument on a manual clock.
pub struct Rig {
    pub clock: ManualClock,
    pub bus: Arc<Mutex<SimBus>>,
    pub motor: SimMotor,
    pub photometer: SimPhotometer,
    pub lights: LightsLatch,
    pub logger: MicroLogger,
}

impl Rig {
    pub fn new() -> Self {
        Self::with(PhotometerModel::default(), InstrumentSettings::default())
    }

    pub fn with(model: PhotometerModel, settings: InstrumentSettings) -> Self {
        let clock = ManualClock::new();
        let mut sim = SimBus::new()
            .with_device(model.beam_address, SimDevice::io_expander())
            .with_device(model.coarse_address, SimDevice::rheostat(0x7F));
        if let Some(fine) = model.fine_address {
            sim.attach(fine, SimDevice::rheostat(0x7F));
        }
        let bus = Arc::new(Mutex::new(sim));
        let motor = SimMotor::new(clock.clone());
        let photometer = SimPhotometer::new(Arc::clone(&bus), model);
        let lights = LightsLatch::new();
        let shared: SharedBus = bus.clone();
        let logger = MicroLogger::builder()
            .with_bus(shared)
            .with_motor(motor.drive(), motor.decoder())
            .with_signal(photometer.clone())
            .with_lights(lights.clone())
            .with_clock(Arc::new(clock.clone()))
            .with_settings(settings)
            .build()
            .expect("simulated instrument builds");
        Self {
            clock,
            bus,
            motor,
            photometer,
            lights,
            logger,
        }
    }

    /// Advance instrument time by `ms`, servicing everything that falls due.
    pub fn run_for(&mut self, ms: u64) -> u64 {
        let until = self.logger.now_ms() + ms;
        run_until(&mut self.logger, until, &AtomicBool::new(false))
    }

    /// Advance to an absolute instrument time.
    pub fn run_to(&mut self, until_ms: u64) -> u64 {
        run_until(&mut self.logger, until_ms, &AtomicBool::new(false))
    }

    pub fn settle(&mut self) -> bool {
        run_until_idle(&mut self.logger, 60_000, &AtomicBool::new(false))
    }
}

/// Counts the default simulated photometer produces at `steps` of gain and
/// transmittance `t`, mirroring the sim's arithmetic.
pub fn expected_counts(model: &PhotometerModel, steps: u16, t: f64, beam: bool) -> f64 {
    let per_step = model.rheostat_ohm / f64::from(model.rheostat_steps.max(1));
    let kohm = (model.base_ohm + f64::from(steps) * per_step) / 1000.0;
    let light = if beam { model.light_per_kohm * t } else { 0.0 };
    let level = model.dark_offset + kohm * (model.dark_per_kohm + light);
    level.clamp(0.0, f64::from(model.adc_resolution)).round()
}
