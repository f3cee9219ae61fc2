pub mod bus;
pub mod clock;

pub use bus::{BusFault, I2cBus};
pub use clock::{Clock, ManualClock, MonotonicClock};

/// PWM drive for the stirrer motor, in raw duty steps.
pub trait PwmOutput {
    fn set_duty(&mut self, steps: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Hardware pulse counter on the motor's speed decoder output.
pub trait PulseCounter {
    /// Pulses counted since the previous call; the count restarts at zero.
    fn take_pulses(&mut self) -> u32;
}

/// Analog photodiode amplifier output.
pub trait SignalSource {
    /// One raw ADC sample in `0..=adc_resolution`.
    fn sample(&mut self) -> Result<u16, Box<dyn std::error::Error + Send + Sync>>;
}

impl<P: PwmOutput + ?Sized> PwmOutput for Box<P> {
    fn set_duty(&mut self, steps: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).set_duty(steps)
    }
}

impl<C: PulseCounter + ?Sized> PulseCounter for Box<C> {
    fn take_pulses(&mut self) -> u32 {
        (**self).take_pulses()
    }
}

impl<S: SignalSource + ?Sized> SignalSource for Box<S> {
    fn sample(&mut self) -> Result<u16, Box<dyn std::error::Error + Send + Sync>> {
        (**self).sample()
    }
}
