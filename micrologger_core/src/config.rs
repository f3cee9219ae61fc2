//! Runtime settings for the whole instrument, grouped per component.

use crate::gain::GainSettings;
use crate::i2c::LinkSettings;
use crate::motor::MotorSettings;
use crate::optical_density::OdSettings;
use crate::signal::SignalSettings;
use crate::stirrer::StirrerSettings;

/// Where the photometer's I2C peripherals live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAddresses {
    pub beam_expander: u8,
    pub beam_pin: u8,
    pub gain_coarse: u8,
    /// Second rheostat in the cascade, if fitted.
    pub gain_fine: Option<u8>,
    pub rheostat_steps: u8,
}

impl Default for DeviceAddresses {
    fn default() -> Self {
        Self {
            beam_expander: 0x20,
            beam_pin: 0,
            gain_coarse: 0x2E,
            gain_fine: Some(0x2F),
            rheostat_steps: 127,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InstrumentSettings {
    pub link: LinkSettings,
    pub devices: DeviceAddresses,
    pub motor: MotorSettings,
    pub stirrer: StirrerSettings,
    pub signal: SignalSettings,
    pub gain: GainSettings,
    pub optical_density: OdSettings,
}

impl InstrumentSettings {
    /// Cross-field checks the component constructors rely on.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.link.poll_interval_ms == 0 {
            return Err("i2c poll interval must be >= 1 ms");
        }
        if self.devices.rheostat_steps == 0 {
            return Err("rheostat steps must be > 0");
        }
        if !(self.motor.min_rpm > 0.0 && self.motor.min_rpm < self.motor.max_rpm) {
            return Err("motor rpm range must satisfy 0 < min < max");
        }
        if self.motor.sample_interval_ms == 0 || self.motor.read_interval_ms < self.motor.sample_interval_ms {
            return Err("motor read interval must cover at least one sample");
        }
        if !(self.motor.percentile_low >= 0.0
            && self.motor.percentile_low < self.motor.percentile_high
            && self.motor.percentile_high <= 1.0)
        {
            return Err("motor percentile window must satisfy 0 <= low < high <= 1");
        }
        if self.stirrer.ramp_tick_ms == 0 {
            return Err("stirrer ramp tick must be >= 1 ms");
        }
        if self.signal.adc_resolution == 0 || self.signal.sample_interval_ms == 0 {
            return Err("signal sampling must be positive");
        }
        if self.optical_density.signal_reads == 0 || self.optical_density.gain_reads == 0 {
            return Err("signal read counts must be > 0");
        }
        if self.optical_density.probe_steps == 0 {
            return Err("gain probe steps must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(InstrumentSettings::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_inverted_percentile_window() {
        let mut s = InstrumentSettings::default();
        s.motor.percentile_low = 0.9;
        s.motor.percentile_high = 0.8;
        assert!(s.validate().is_err());
    }
}
