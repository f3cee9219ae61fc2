//! Beam LED switched by one pin of an 8-bit I2C port expander.

use crate::error::I2cError;
use crate::i2c::{I2cDevice, I2cLink, LinkAction};

const OUTPUT_REG: u8 = 0x01;
const CONFIG_REG: u8 = 0x03;

#[derive(Debug)]
pub struct BeamSwitch {
    link: I2cLink,
    mask: u8,
    desired: bool,
    /// Pin level last confirmed on the chip; `None` until verified.
    applied: Option<bool>,
}

impl BeamSwitch {
    pub fn new(link: I2cLink, pin: u8) -> Self {
        Self {
            link,
            mask: 1 << (pin & 0x07),
            desired: false,
            applied: None,
        }
    }

    /// Desired beam state.
    pub fn is_on(&self) -> bool {
        self.desired
    }

    pub fn applied(&self) -> Option<bool> {
        self.applied
    }

    pub fn set_on(&mut self, on: bool) -> Result<(), I2cError> {
        self.desired = on;
        if self.applied == Some(on) && self.link.is_connected() {
            return Ok(());
        }
        self.dispatch(LinkAction::Write)
    }
}

impl I2cDevice for BeamSwitch {
    fn link(&self) -> &I2cLink {
        &self.link
    }

    fn link_mut(&mut self) -> &mut I2cLink {
        &mut self.link
    }

    fn write(&mut self) -> Result<(), I2cError> {
        let (mask, on) = (self.mask, self.desired);
        let level = self.link.transfer(I2cError::FailedWrite, |bus, a| {
            let mut out = [0u8];
            bus.write_read(a, &[OUTPUT_REG], &mut out)?;
            let latch = if on { out[0] | mask } else { out[0] & !mask };
            bus.write(a, &[OUTPUT_REG, latch])?;
            let mut cfg = [0u8];
            bus.write_read(a, &[CONFIG_REG], &mut cfg)?;
            if cfg[0] & mask != 0 {
                bus.write(a, &[CONFIG_REG, cfg[0] & !mask])?;
            }
            bus.write_read(a, &[OUTPUT_REG], &mut out)?;
            Ok(out[0] & mask != 0)
        })?;
        self.applied = Some(level);
        if level == on {
            tracing::debug!(address = self.link.address(), on, "beam switched");
            Ok(())
        } else {
            Err(I2cError::FailedCheck)
        }
    }

    fn read(&mut self) -> Result<(), I2cError> {
        let mask = self.mask;
        let level = self.link.transfer(I2cError::FailedRead, |bus, a| {
            let mut out = [0u8];
            bus.write_read(a, &[OUTPUT_REG], &mut out)?;
            let mut cfg = [0u8];
            bus.write_read(a, &[CONFIG_REG], &mut cfg)?;
            Ok(out[0] & mask != 0 && cfg[0] & mask == 0)
        })?;
        self.applied = Some(level);
        Ok(())
    }

    fn reset(&mut self) {
        self.applied = None;
    }

    fn in_sync(&self) -> bool {
        self.applied == Some(self.desired)
    }
}
