//! Test and helper doubles for `micrologger_core`.

use std::collections::VecDeque;

use micrologger_traits::{PulseCounter, PwmOutput, SignalSource};

/// A drive that rejects every duty write.
pub struct FailingPwm;

impl PwmOutput for FailingPwm {
    fn set_duty(&mut self, _steps: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Err(Box::new(std::io::Error::other("pwm unavailable")))
    }
}

/// A drive that accepts every duty write and remembers the last.
#[derive(Debug, Default)]
pub struct NullPwm {
    pub last: Option<u16>,
}

impl PwmOutput for NullPwm {
    fn set_duty(&mut self, steps: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.last = Some(steps);
        Ok(())
    }
}

/// Pulse counts replayed in order; zero once exhausted.
#[derive(Debug, Default)]
pub struct ScriptedPulses {
    counts: VecDeque<u32>,
}

impl ScriptedPulses {
    pub fn new<I: IntoIterator<Item = u32>>(counts: I) -> Self {
        Self {
            counts: counts.into_iter().collect(),
        }
    }
}

impl PulseCounter for ScriptedPulses {
    fn take_pulses(&mut self) -> u32 {
        self.counts.pop_front().unwrap_or(0)
    }
}

/// A photodiode that always reads the same count.
#[derive(Debug, Clone, Copy)]
pub struct FixedSignal(pub u16);

impl SignalSource for FixedSignal {
    fn sample(&mut self) -> Result<u16, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.0)
    }
}
