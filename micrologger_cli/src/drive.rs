//! Instrument assembly: config mapping, hardware selection and the command
//! loops that drive a `MicroLogger`.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use micrologger_config::{Config, PersistedState, load_calibration_csv, load_state, save_state};
use micrologger_core::error::{MicroLoggerError, MotorError, Report, Result};
use micrologger_core::{
    Calibration, InstrumentSettings, MicroLogger, OdAction, OdStatus, StirrerAction, StirrerState,
    run_until, run_until_idle,
};

use crate::cli::Commands;
use crate::report;

const MILLIS_PER_SEC: u64 = 1000;

/// Motor calibration from the configured CSV, or the stock table.
fn calibration(cfg: &Config) -> Result<Calibration> {
    let resolution = cfg.motor.pwm_resolution;
    match &cfg.motor.calibration_csv {
        Some(path) => {
            let fitted = load_calibration_csv(path, cfg.motor.calibration_segment_steps)?;
            let table = Calibration::try_from((&fitted, resolution)).map_err(Report::new)?;
            tracing::info!(path = %path.display(), segments = table.segments().len(), "motor calibration loaded");
            Ok(table)
        }
        None => Ok(Calibration::stock(resolution)),
    }
}

/// Assemble the instrument against simulated peripherals on a virtual clock.
///
/// A few `MICROLOGGER_TEST_SIM_*` variables shape the simulation so the CLI
/// can be exercised end to end.
#[cfg(not(all(feature = "hardware", target_os = "linux")))]
pub fn build_instrument(cfg: &Config) -> Result<MicroLogger> {
    use std::sync::{Arc, Mutex};

    use micrologger_core::SharedBus;
    use micrologger_hardware::{PhotometerModel, SimBus, SimDevice, SimMotor, SimPhotometer};
    use micrologger_traits::ManualClock;

    let model = PhotometerModel {
        beam_address: cfg.i2c.beam_expander,
        beam_pin: cfg.i2c.beam_pin,
        coarse_address: cfg.i2c.gain_coarse,
        fine_address: cfg.i2c.gain_fine,
        base_ohm: cfg.gain.base_ohm,
        rheostat_ohm: cfg.gain.rheostat_ohm,
        rheostat_steps: cfg.gain.rheostat_steps,
        adc_resolution: cfg.optical_density.adc_resolution,
        light_per_kohm: env_f64("MICROLOGGER_TEST_SIM_LIGHT")
            .unwrap_or(PhotometerModel::default().light_per_kohm),
        ..PhotometerModel::default()
    };

    let clock = ManualClock::new();
    let mut sim = SimBus::new()
        .with_device(model.beam_address, SimDevice::io_expander())
        .with_device(model.coarse_address, SimDevice::rheostat(0x7F));
    if let Some(fine) = model.fine_address {
        sim.attach(fine, SimDevice::rheostat(0x7F));
    }
    if let Some(addr) = std::env::var("MICROLOGGER_TEST_SIM_DETACH")
        .ok()
        .and_then(|s| u8::from_str_radix(s.trim().trim_start_matches("0x"), 16).ok())
    {
        sim.detach(addr);
    }
    let bus = Arc::new(Mutex::new(sim));

    let motor = SimMotor::new(clock.clone());
    if std::env::var("MICROLOGGER_TEST_SIM_STALL").is_ok() {
        motor.set_stalled(true);
    }
    let photometer = SimPhotometer::new(Arc::clone(&bus), model);
    if let Some(t) = env_f64("MICROLOGGER_TEST_SIM_TRANSMITTANCE") {
        photometer.set_transmittance(t);
    }

    let shared: SharedBus = bus;
    tracing::debug!("using simulated peripherals");
    MicroLogger::builder()
        .with_bus(shared)
        .with_motor(motor.drive(), motor.decoder())
        .with_signal(photometer)
        .with_clock(Arc::new(clock))
        .with_settings(InstrumentSettings::from(cfg))
        .with_calibration(calibration(cfg)?)
        .build()
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Assemble the instrument on the Raspberry Pi's I2C bus, PWM and GPIO.
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub fn build_instrument(cfg: &Config) -> Result<MicroLogger> {
    use std::sync::{Arc, Mutex};

    use eyre::WrapErr;
    use micrologger_core::SharedBus;
    use micrologger_hardware::I2cAdc;
    use micrologger_hardware::rpi::{GpioPulseCounter, RpiBus, RpiPwm};
    use micrologger_traits::MonotonicClock;

    let bus = Arc::new(Mutex::new(
        RpiBus::new(cfg.i2c.bus).wrap_err("open i2c bus")?,
    ));
    let adc = I2cAdc::new(Arc::clone(&bus), cfg.i2c.adc);
    let pwm = RpiPwm::new(
        cfg.motor.pwm_channel,
        cfg.motor.pwm_frequency_hz,
        cfg.motor.pwm_resolution,
    )
    .wrap_err("open motor pwm")?;
    let decoder = GpioPulseCounter::new(cfg.motor.decoder_pin).wrap_err("open decoder pin")?;

    let shared: SharedBus = bus;
    MicroLogger::builder()
        .with_bus(shared)
        .with_motor(pwm, decoder)
        .with_signal(adc)
        .with_clock(Arc::new(MonotonicClock::new()))
        .with_settings(InstrumentSettings::from(cfg))
        .with_calibration(calibration(cfg)?)
        .build()
}

// ── Persistence ──────────────────────────────────────────────────────────────

/// Keeps the on-disk snapshot in step with the instrument.
pub struct StateFile<'a> {
    path: Option<&'a Path>,
    last: Option<PersistedState>,
}

impl<'a> StateFile<'a> {
    /// Load the snapshot (if any) and apply it to `logger`.
    pub fn restore(path: Option<&'a Path>, logger: &mut MicroLogger) -> Result<Self> {
        let last = match path {
            Some(p) => load_state(p)?,
            None => None,
        };
        if let Some(state) = &last {
            logger.restore(state);
            tracing::info!(path = ?path, "persisted state restored");
        }
        Ok(Self { path, last })
    }

    /// Write the current snapshot when it changed since the last write.
    pub fn sync(&mut self, logger: &MicroLogger) -> Result<()> {
        let Some(path) = self.path else {
            return Ok(());
        };
        let now = logger.snapshot();
        if self.last.as_ref() != Some(&now) {
            save_state(path, &now)?;
            tracing::debug!(path = %path.display(), "persisted state saved");
            self.last = Some(now);
        }
        Ok(())
    }
}

// ── Commands ─────────────────────────────────────────────────────────────────

pub fn execute(
    logger: &mut MicroLogger,
    cmd: &Commands,
    state: &mut StateFile<'_>,
    stop: &AtomicBool,
) -> Result<()> {
    match *cmd {
        Commands::Run {
            duration_s,
            status_every_s,
            stir,
            zero,
        } => {
            if stir {
                logger.stirrer_action(StirrerAction::Start);
            }
            if zero {
                logger.od_action(OdAction::Zero)?;
            }
            let until = logger.now_ms() + duration_s.saturating_mul(MILLIS_PER_SEC);
            let every = status_every_s.max(1).saturating_mul(MILLIS_PER_SEC);
            tracing::info!(duration_s, stir, zero, "run start");
            loop {
                let next = (logger.now_ms() + every).min(until);
                let now = run_until(logger, next, stop);
                report::status(&logger.health());
                state.sync(logger)?;
                if now >= until || stop.load(Ordering::Relaxed) {
                    break;
                }
            }
            tracing::info!(interrupted = stop.load(Ordering::Relaxed), "run end");
            Ok(())
        }
        Commands::Stir {
            action,
            rpm,
            follow_s,
        } => {
            if let Some(rpm) = rpm {
                logger.set_stirrer_setpoint(rpm);
            }
            logger.stirrer_action(action.into());
            let until = logger.now_ms() + follow_s.saturating_mul(MILLIS_PER_SEC);
            run_until(logger, until, stop);
            let health = logger.health();
            report::stirrer(&health);
            if health.stirrer_state == StirrerState::Error {
                let e = health.motor_error.unwrap_or(MotorError::NoResponse);
                return Err(Report::new(MicroLoggerError::Motor(e)));
            }
            Ok(())
        }
        Commands::Zero { timeout_s } => {
            photometer(logger, OdAction::Zero, timeout_s, stop)?;
            report::zero(&logger.health());
            Ok(())
        }
        Commands::Read { timeout_s } => {
            photometer(logger, OdAction::Read, timeout_s, stop)?;
            report::reading(&logger.health());
            Ok(())
        }
        Commands::OptimizeGain { timeout_s } => {
            photometer(logger, OdAction::OptimizeGain, timeout_s, stop)?;
            report::gain(&logger.health(), logger.optical_density().gain().steps());
            Ok(())
        }
        Commands::SelfCheck => {
            let devices = logger.self_check();
            report::devices(&devices);
            let worst = devices
                .iter()
                .filter_map(|d| d.error.map(|e| (d.address, e)))
                .max_by_key(|(_, e)| e.severity());
            match worst {
                Some((address, error)) => Err(Report::new(MicroLoggerError::I2c { address, error })),
                None => Ok(()),
            }
        }
        Commands::Health => {
            logger.poll();
            report::health(&logger.health());
            Ok(())
        }
    }
}

/// Start an optical density sequence and wait for the pipeline to go idle.
fn photometer(logger: &mut MicroLogger, action: OdAction, timeout_s: u64, stop: &AtomicBool) -> Result<()> {
    // connect the devices before the sequence looks at them
    logger.poll();
    logger.od_action(action)?;
    let finished = run_until_idle(logger, timeout_s.saturating_mul(MILLIS_PER_SEC), stop);
    if !finished {
        if stop.load(Ordering::Relaxed) {
            eyre::bail!("interrupted before the photometer finished");
        }
        let status: OdStatus = logger.optical_density().status();
        eyre::bail!("timed out after {timeout_s} s waiting for the photometer ({status:?})");
    }
    match logger.optical_density().error() {
        Some(e) => Err(Report::new(MicroLoggerError::OpticalDensity(e))),
        None => Ok(()),
    }
}
