//! Type-state builder for [`MicroLogger`].
//!
//! The builder enforces at compile time that the bus, the motor and the
//! signal source are provided before `build()` is available. `try_build()` is
//! always available for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use micrologger_traits::{MonotonicClock, PulseCounter, PwmOutput, SignalSource};

use crate::calibration::Calibration;
use crate::config::InstrumentSettings;
use crate::devices::{BeamSwitch, Rheostat};
use crate::error::{BuildError, Result};
use crate::gain::GainStage;
use crate::i2c::{I2cLink, SharedBus, SharedClock};
use crate::instrument::{DynDecoder, DynDrive, DynLights, DynSignal, MicroLogger};
use crate::lights::{LightsControl, LightsLatch};
use crate::motor::MotorController;
use crate::optical_density::OpticalDensityPipeline;
use crate::signal::SignalReader;
use crate::stirrer::StirrerSupervisor;

impl MicroLogger {
    pub fn builder() -> MicroLoggerBuilder<Missing, Missing, Missing> {
        MicroLoggerBuilder::default()
    }
}

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

pub struct MicroLoggerBuilder<B, M, S> {
    bus: Option<SharedBus>,
    drive: Option<DynDrive>,
    decoder: Option<DynDecoder>,
    signal: Option<DynSignal>,
    lights: Option<DynLights>,
    clock: Option<SharedClock>,
    settings: Option<InstrumentSettings>,
    calibration: Option<Calibration>,
    _b: PhantomData<B>,
    _m: PhantomData<M>,
    _s: PhantomData<S>,
}

impl Default for MicroLoggerBuilder<Missing, Missing, Missing> {
    fn default() -> Self {
        Self {
            bus: None,
            drive: None,
            decoder: None,
            signal: None,
            lights: None,
            clock: None,
            settings: None,
            calibration: None,
            _b: PhantomData,
            _m: PhantomData,
            _s: PhantomData,
        }
    }
}

impl<B, M, S> MicroLoggerBuilder<B, M, S> {
    /// Fallible build available in any type-state; reports the first missing piece.
    pub fn try_build(self) -> Result<MicroLogger> {
        let bus = self
            .bus
            .ok_or_else(|| eyre::Report::new(BuildError::MissingBus))?;
        let drive = self
            .drive
            .ok_or_else(|| eyre::Report::new(BuildError::MissingDrive))?;
        let decoder = self
            .decoder
            .ok_or_else(|| eyre::Report::new(BuildError::MissingDecoder))?;
        let signal = self
            .signal
            .ok_or_else(|| eyre::Report::new(BuildError::MissingSignal))?;

        let settings = self.settings.unwrap_or_default();
        settings
            .validate()
            .map_err(|msg| eyre::Report::new(BuildError::InvalidConfig(msg)))?;

        let clock: SharedClock = self.clock.unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let calibration = self
            .calibration
            .unwrap_or_else(|| {
                Calibration::stock(micrologger_config::MotorCfg::default().pwm_resolution)
            });
        let lights = self
            .lights
            .unwrap_or_else(|| Box::new(LightsLatch::new()));

        Ok(assemble(
            bus,
            clock,
            drive,
            decoder,
            signal,
            lights,
            settings,
            calibration,
        ))
    }
}

#[allow(clippy::too_many_arguments)]
fn assemble(
    bus: SharedBus,
    clock: SharedClock,
    drive: DynDrive,
    decoder: DynDecoder,
    signal: DynSignal,
    lights: DynLights,
    settings: InstrumentSettings,
    calibration: Calibration,
) -> MicroLogger {
    let devices = settings.devices;
    let link = |address: u8, name: &'static str| {
        I2cLink::new(
            Arc::clone(&bus),
            Arc::clone(&clock),
            address,
            name,
            settings.link,
        )
    };

    let beam = BeamSwitch::new(link(devices.beam_expander, "beam"), devices.beam_pin);
    let coarse = Rheostat::new(
        link(devices.gain_coarse, "gain-coarse"),
        devices.rheostat_steps,
    );
    let fine = devices
        .gain_fine
        .map(|address| Rheostat::new(link(address, "gain-fine"), devices.rheostat_steps));
    let gain = GainStage::new(coarse, fine, settings.gain);

    let (notice_tx, notices) = crossbeam_channel::unbounded();
    let (request_tx, requests) = crossbeam_channel::unbounded();

    let od = OpticalDensityPipeline::new(
        beam,
        gain,
        SignalReader::new(signal, settings.signal),
        lights,
        settings.optical_density,
    )
    .with_requests(request_tx);
    let motor = MotorController::new(drive, decoder, calibration, settings.motor);
    let stirrer = StirrerSupervisor::new(motor, settings.stirrer).with_notices(notice_tx);

    let epoch = clock.now();
    tracing::debug!(
        beam = devices.beam_expander,
        gain_coarse = devices.gain_coarse,
        gain_fine = ?devices.gain_fine,
        "instrument assembled"
    );
    MicroLogger {
        clock,
        epoch,
        stirrer,
        od,
        notices,
        requests,
    }
}

/// Chainable setters that do not affect type-state.
impl<B, M, S> MicroLoggerBuilder<B, M, S> {
    pub fn with_settings(mut self, settings: InstrumentSettings) -> Self {
        self.settings = Some(settings);
        self
    }
    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = Some(calibration);
        self
    }
    /// Growth-light collaborator; defaults to a [`LightsLatch`].
    pub fn with_lights(mut self, lights: impl LightsControl + Send + 'static) -> Self {
        self.lights = Some(Box::new(lights));
        self
    }
    /// Provide a custom clock implementation; defaults to `MonotonicClock` when not provided.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }
}

// Setters that advance type-state
impl<M, S> MicroLoggerBuilder<Missing, M, S> {
    pub fn with_bus(self, bus: SharedBus) -> MicroLoggerBuilder<Set, M, S> {
        MicroLoggerBuilder {
            bus: Some(bus),
            drive: self.drive,
            decoder: self.decoder,
            signal: self.signal,
            lights: self.lights,
            clock: self.clock,
            settings: self.settings,
            calibration: self.calibration,
            _b: PhantomData,
            _m: PhantomData,
            _s: PhantomData,
        }
    }
}

impl<B, S> MicroLoggerBuilder<B, Missing, S> {
    pub fn with_motor(
        self,
        drive: impl PwmOutput + Send + 'static,
        decoder: impl PulseCounter + Send + 'static,
    ) -> MicroLoggerBuilder<B, Set, S> {
        MicroLoggerBuilder {
            bus: self.bus,
            drive: Some(Box::new(drive)),
            decoder: Some(Box::new(decoder)),
            signal: self.signal,
            lights: self.lights,
            clock: self.clock,
            settings: self.settings,
            calibration: self.calibration,
            _b: PhantomData,
            _m: PhantomData,
            _s: PhantomData,
        }
    }
}

impl<B, M> MicroLoggerBuilder<B, M, Missing> {
    pub fn with_signal(
        self,
        signal: impl SignalSource + Send + 'static,
    ) -> MicroLoggerBuilder<B, M, Set> {
        MicroLoggerBuilder {
            bus: self.bus,
            drive: self.drive,
            decoder: self.decoder,
            signal: Some(Box::new(signal)),
            lights: self.lights,
            clock: self.clock,
            settings: self.settings,
            calibration: self.calibration,
            _b: PhantomData,
            _m: PhantomData,
            _s: PhantomData,
        }
    }
}

impl MicroLoggerBuilder<Set, Set, Set> {
    /// Validate and build. Only available once bus, motor and signal are set.
    pub fn build(self) -> Result<MicroLogger> {
        self.try_build()
    }
}
