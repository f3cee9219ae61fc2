//! `From` implementations bridging `micrologger_config` types to the core's
//! runtime settings.

use std::time::Duration;

use crate::calibration::{Calibration, Segment};
use crate::config::{DeviceAddresses, InstrumentSettings};
use crate::error::BuildError;
use crate::gain::GainSettings;
use crate::i2c::LinkSettings;
use crate::motor::MotorSettings;
use crate::optical_density::OdSettings;
use crate::signal::SignalSettings;
use crate::stirrer::StirrerSettings;
use crate::util::MILLIS_PER_SEC;

// ── I2C ──────────────────────────────────────────────────────────────────────

impl From<&micrologger_config::I2cCfg> for LinkSettings {
    fn from(c: &micrologger_config::I2cCfg) -> Self {
        Self {
            max_response: Duration::from_millis(c.max_response_ms),
            poll_interval_ms: c.poll_interval_ms,
            auto_connect: c.auto_connect,
        }
    }
}

impl From<&micrologger_config::Config> for DeviceAddresses {
    fn from(c: &micrologger_config::Config) -> Self {
        Self {
            beam_expander: c.i2c.beam_expander,
            beam_pin: c.i2c.beam_pin,
            gain_coarse: c.i2c.gain_coarse,
            gain_fine: c.i2c.gain_fine,
            rheostat_steps: c.gain.rheostat_steps,
        }
    }
}

// ── Motor / stirrer ──────────────────────────────────────────────────────────

impl From<&micrologger_config::MotorCfg> for MotorSettings {
    fn from(c: &micrologger_config::MotorCfg) -> Self {
        Self {
            min_rpm: c.min_rpm,
            max_rpm: c.max_rpm,
            sample_interval_ms: c.sample_interval_ms,
            read_interval_ms: c.read_interval_ms,
            stable_cv: c.stable_cv,
            percentile_low: c.percentile_low,
            percentile_high: c.percentile_high,
        }
    }
}

impl From<&micrologger_config::StirrerCfg> for StirrerSettings {
    fn from(c: &micrologger_config::StirrerCfg) -> Self {
        Self {
            setpoint_rpm: c.setpoint_rpm,
            acceleration: c.acceleration,
            deceleration: c.deceleration,
            max_speed_rpm: c.max_speed_rpm,
            vortex_speed_rpm: c.vortex_speed_rpm,
            vortex_duration_ms: c.vortex_duration_s.saturating_mul(MILLIS_PER_SEC),
            ramp_tick_ms: c.ramp_tick_ms,
            restart_delay_ms: c.restart_delay_ms,
            max_restarts: c.max_restarts,
        }
    }
}

/// Fitted calibration table stretched over the configured PWM range.
impl TryFrom<(&micrologger_config::MotorCalibration, u16)> for Calibration {
    type Error = BuildError;

    fn try_from(
        (c, max_steps): (&micrologger_config::MotorCalibration, u16),
    ) -> Result<Self, Self::Error> {
        let segments = c
            .segments
            .iter()
            .map(|s| Segment {
                step_min: s.step_min,
                step_max: s.step_max,
                b: s.b,
                m: s.m,
            })
            .collect();
        Self::new(segments, max_steps)
    }
}

// ── Photometer ───────────────────────────────────────────────────────────────

impl From<&micrologger_config::OpticalDensityCfg> for SignalSettings {
    fn from(c: &micrologger_config::OpticalDensityCfg) -> Self {
        Self {
            adc_resolution: c.adc_resolution,
            sample_interval_ms: c.sample_interval_ms,
            saturation_ppt: c.saturation_ppt,
        }
    }
}

impl From<&micrologger_config::GainCfg> for GainSettings {
    fn from(c: &micrologger_config::GainCfg) -> Self {
        Self {
            base_ohm: c.base_ohm,
            rheostat_ohm: c.rheostat_ohm,
        }
    }
}

impl From<&micrologger_config::Config> for OdSettings {
    fn from(c: &micrologger_config::Config) -> Self {
        let od = &c.optical_density;
        Self {
            auto_read: od.auto_read,
            read_interval_ms: od.read_interval_s.saturating_mul(MILLIS_PER_SEC),
            vortex: od.vortex,
            stop_stirrer: od.stop_stirrer,
            settle_ms: od.settle_ms,
            warmup_ms: od.warmup_ms,
            signal_reads: od.signal_reads,
            automatic_gain: c.gain.automatic,
            target_ppt: c.gain.target_ppt,
            probe_steps: c.gain.probe_steps,
            gain_reads: c.gain.gain_reads,
            max_fine_steps: c.gain.max_fine_steps,
        }
    }
}

// ── Whole instrument ─────────────────────────────────────────────────────────

impl From<&micrologger_config::Config> for InstrumentSettings {
    fn from(c: &micrologger_config::Config) -> Self {
        Self {
            link: LinkSettings::from(&c.i2c),
            devices: DeviceAddresses::from(c),
            motor: MotorSettings::from(&c.motor),
            stirrer: StirrerSettings::from(&c.stirrer),
            signal: SignalSettings::from(&c.optical_density),
            gain: GainSettings::from(&c.gain),
            optical_density: OdSettings::from(c),
        }
    }
}
