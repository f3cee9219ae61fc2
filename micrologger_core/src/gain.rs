//! Photodiode amplifier gain: a fixed base resistor in series with one or
//! two cascaded digital rheostats.

use crate::devices::Rheostat;
use crate::error::I2cError;
use crate::i2c::I2cDevice;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainSettings {
    pub base_ohm: f64,
    /// Full-scale resistance of each rheostat.
    pub rheostat_ohm: f64,
}

impl Default for GainSettings {
    fn default() -> Self {
        Self {
            base_ohm: 10_000.0,
            rheostat_ohm: 100_000.0,
        }
    }
}

/// Combined step count across the cascade. Steps fill the coarse rheostat
/// first; the remainder goes to the fine one.
#[derive(Debug)]
pub struct GainStage {
    coarse: Rheostat,
    fine: Option<Rheostat>,
    settings: GainSettings,
    steps: u16,
}

impl GainStage {
    pub fn new(coarse: Rheostat, fine: Option<Rheostat>, settings: GainSettings) -> Self {
        Self {
            coarse,
            fine,
            settings,
            steps: 0,
        }
    }

    fn per_rheostat(&self) -> u16 {
        u16::from(self.coarse.max_steps().max(1))
    }

    pub fn max_steps(&self) -> u16 {
        let per = self.per_rheostat();
        if self.fine.is_some() { per * 2 } else { per }
    }

    pub fn ohm_per_step(&self) -> f64 {
        self.settings.rheostat_ohm / f64::from(self.per_rheostat())
    }

    pub fn steps(&self) -> u16 {
        self.steps
    }

    pub fn total_ohm(&self) -> f64 {
        self.ohm_for_steps(self.steps)
    }

    pub fn ohm_for_steps(&self, steps: u16) -> f64 {
        self.settings.base_ohm + f64::from(steps) * self.ohm_per_step()
    }

    /// Nearest step count for a total resistance, clamped to the range.
    pub fn steps_for_ohm(&self, ohm: f64) -> u16 {
        let raw = ((ohm - self.settings.base_ohm) / self.ohm_per_step()).round();
        // clamped to the cascade range before narrowing
        raw.clamp(0.0, f64::from(self.max_steps())) as u16
    }

    /// Apply `steps` (clamped). Both rheostats are always attempted; the
    /// worse of their errors is returned.
    pub fn set_steps(&mut self, steps: u16) -> Result<(), I2cError> {
        let steps = steps.min(self.max_steps());
        let per = self.per_rheostat();
        let (coarse, fine) = if steps > per { (per, steps - per) } else { (steps, 0) };
        self.steps = steps;
        // both halves are bounded by the 7-bit wiper range
        let a = self.coarse.set_steps(u8::try_from(coarse).unwrap_or(u8::MAX)).err();
        let b = match self.fine.as_mut() {
            Some(f) => f.set_steps(u8::try_from(fine).unwrap_or(u8::MAX)).err(),
            None => None,
        };
        tracing::debug!(steps, ohm = self.total_ohm(), "gain set");
        I2cError::worst(a, b).map_or(Ok(()), Err)
    }

    pub fn set_ohm(&mut self, ohm: f64) -> Result<(), I2cError> {
        self.set_steps(self.steps_for_ohm(ohm))
    }

    /// Worst error currently recorded on either rheostat.
    pub fn error(&self) -> Option<I2cError> {
        I2cError::worst(
            self.coarse.link().error(),
            self.fine.as_ref().and_then(|f| f.link().error()),
        )
    }

    pub fn is_connected(&self) -> bool {
        self.coarse.link().is_connected() && self.fine.as_ref().is_none_or(|f| f.link().is_connected())
    }

    pub fn poll(&mut self, now_ms: u64) {
        self.coarse.poll(now_ms);
        if let Some(f) = self.fine.as_mut() {
            f.poll(now_ms);
        }
    }

    pub fn next_deadline(&self) -> Option<u64> {
        crate::timer::earliest([
            self.coarse.link().next_deadline(),
            self.fine.as_ref().and_then(|f| f.link().next_deadline()),
        ])
    }

    pub fn rheostats(&self) -> impl Iterator<Item = &Rheostat> {
        std::iter::once(&self.coarse).chain(self.fine.as_ref())
    }

    pub fn rheostats_mut(&mut self) -> impl Iterator<Item = &mut Rheostat> {
        std::iter::once(&mut self.coarse).chain(self.fine.as_mut())
    }
}
