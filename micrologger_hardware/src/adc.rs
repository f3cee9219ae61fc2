//! 12-bit single-channel I2C ADC (MCP3221 register layout).

use std::sync::{Arc, Mutex};

use micrologger_traits::{BusFault, I2cBus, SignalSource};

use crate::error::HwError;

/// Reads the photodiode through a 12-bit ADC that returns its conversion as
/// two bytes, upper nibble first.
pub struct I2cAdc<B> {
    bus: Arc<Mutex<B>>,
    address: u8,
}

impl<B: I2cBus> I2cAdc<B> {
    pub fn new(bus: Arc<Mutex<B>>, address: u8) -> Self {
        Self { bus, address }
    }

    pub fn read_raw(&mut self) -> Result<u16, HwError> {
        let mut buf = [0u8; 2];
        let mut bus = self
            .bus
            .lock()
            .map_err(|_| HwError::Bus(BusFault::Other("bus lock poisoned".into())))?;
        bus.read(self.address, &mut buf)?;
        let value = (u16::from(buf[0] & 0x0F) << 8) | u16::from(buf[1]);
        tracing::trace!(address = self.address, value, "adc conversion");
        Ok(value)
    }
}

impl<B: I2cBus> SignalSource for I2cAdc<B> {
    fn sample(&mut self) -> Result<u16, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.read_raw()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBus([u8; 2]);

    impl I2cBus for FixedBus {
        fn write(&mut self, _address: u8, _bytes: &[u8]) -> Result<(), BusFault> {
            Ok(())
        }
        fn read(&mut self, _address: u8, buf: &mut [u8]) -> Result<(), BusFault> {
            buf.copy_from_slice(&self.0);
            Ok(())
        }
        fn write_read(&mut self, _a: u8, _w: &[u8], buf: &mut [u8]) -> Result<(), BusFault> {
            buf.copy_from_slice(&self.0);
            Ok(())
        }
    }

    #[test]
    fn masks_upper_nibble() {
        let bus = Arc::new(Mutex::new(FixedBus([0xFA, 0xBC])));
        let mut adc = I2cAdc::new(bus, 0x4D);
        assert_eq!(adc.sample().unwrap(), 0x0ABC);
    }
}
