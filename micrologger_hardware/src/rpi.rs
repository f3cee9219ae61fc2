//! Raspberry Pi backends built on `rppal`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use micrologger_traits::{BusFault, I2cBus, PulseCounter, PwmOutput};
use rppal::gpio::{Gpio, InputPin, Trigger};
use rppal::i2c::I2c;
use rppal::pwm::{Channel, Polarity, Pwm};
use tracing::{debug, trace};

use crate::error::{HwError, Result};

/// Linux errno values reported by i2c-dev.
const EREMOTEIO: i32 = 121;
const ETIMEDOUT: i32 = 110;
const ENXIO: i32 = 6;

fn map_i2c(e: rppal::i2c::Error) -> BusFault {
    match e {
        rppal::i2c::Error::Io(io) => match io.raw_os_error() {
            Some(EREMOTEIO | ENXIO) => BusFault::Nack,
            Some(ETIMEDOUT) => BusFault::Timeout,
            _ => BusFault::Other(io.to_string()),
        },
        other => BusFault::Other(other.to_string()),
    }
}

/// `/dev/i2c-N` master.
pub struct RpiBus {
    i2c: I2c,
    selected: Option<u8>,
}

impl RpiBus {
    pub fn new(bus: u8) -> Result<Self> {
        let i2c = I2c::with_bus(bus).map_err(|e| HwError::Bus(map_i2c(e)))?;
        debug!(bus, "i2c bus opened");
        Ok(Self {
            i2c,
            selected: None,
        })
    }

    fn select(&mut self, address: u8) -> std::result::Result<(), BusFault> {
        if self.selected != Some(address) {
            self.i2c
                .set_slave_address(u16::from(address))
                .map_err(map_i2c)?;
            self.selected = Some(address);
        }
        Ok(())
    }
}

impl I2cBus for RpiBus {
    fn write(&mut self, address: u8, bytes: &[u8]) -> std::result::Result<(), BusFault> {
        self.select(address)?;
        if bytes.is_empty() {
            return self.i2c.smbus_quick_command(false).map_err(map_i2c);
        }
        let n = self.i2c.write(bytes).map_err(map_i2c)?;
        trace!(address, n, "i2c write");
        Ok(())
    }

    fn read(&mut self, address: u8, buf: &mut [u8]) -> std::result::Result<(), BusFault> {
        self.select(address)?;
        let n = self.i2c.read(buf).map_err(map_i2c)?;
        if n < buf.len() {
            return Err(BusFault::ShortRead {
                expected: buf.len(),
                received: n,
            });
        }
        Ok(())
    }

    fn write_read(
        &mut self,
        address: u8,
        bytes: &[u8],
        buf: &mut [u8],
    ) -> std::result::Result<(), BusFault> {
        self.select(address)?;
        self.i2c.write_read(bytes, buf).map_err(map_i2c)
    }
}

/// Hardware PWM channel driving the stirrer ESC.
pub struct RpiPwm {
    pwm: Pwm,
    resolution: u16,
}

impl RpiPwm {
    /// `channel` 0 or 1; duty is expressed in `resolution` steps.
    pub fn new(channel: u8, frequency_hz: f64, resolution: u16) -> Result<Self> {
        let channel = if channel == 0 { Channel::Pwm0 } else { Channel::Pwm1 };
        let pwm = Pwm::with_frequency(channel, frequency_hz, 0.0, Polarity::Normal, true)
            .map_err(|e| HwError::Pwm(e.to_string()))?;
        Ok(Self {
            pwm,
            resolution: resolution.max(1),
        })
    }
}

impl PwmOutput for RpiPwm {
    fn set_duty(&mut self, steps: u16) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let duty = f64::from(steps.min(self.resolution)) / f64::from(self.resolution);
        self.pwm
            .set_duty_cycle(duty)
            .map_err(|e| HwError::Pwm(e.to_string()))?;
        Ok(())
    }
}

/// Counts rising edges of the motor's speed output via a GPIO interrupt.
pub struct GpioPulseCounter {
    _pin: InputPin,
    count: Arc<AtomicU32>,
}

impl GpioPulseCounter {
    pub fn new(pin: u8) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let mut input = gpio
            .get(pin)
            .map_err(|e| HwError::Gpio(e.to_string()))?
            .into_input_pullup();
        let count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&count);
        input
            .set_async_interrupt(Trigger::RisingEdge, move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            })
            .map_err(|e| HwError::Gpio(e.to_string()))?;
        Ok(Self { _pin: input, count })
    }
}

impl PulseCounter for GpioPulseCounter {
    fn take_pulses(&mut self) -> u32 {
        self.count.swap(0, Ordering::Relaxed)
    }
}
