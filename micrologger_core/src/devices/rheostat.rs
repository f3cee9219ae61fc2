//! Single-wiper 7-bit digital rheostat.

use crate::error::I2cError;
use crate::i2c::{I2cDevice, I2cLink, LinkAction};

const WIPER_MASK: u8 = 0x7F;

/// Wiper position is written as one byte and verified by reading it back.
#[derive(Debug)]
pub struct Rheostat {
    link: I2cLink,
    max_steps: u8,
    desired: u8,
    /// Wiper position last confirmed on the chip.
    applied: Option<u8>,
}

impl Rheostat {
    pub fn new(link: I2cLink, max_steps: u8) -> Self {
        Self {
            link,
            max_steps: max_steps.min(WIPER_MASK),
            desired: 0,
            applied: None,
        }
    }

    pub fn max_steps(&self) -> u8 {
        self.max_steps
    }

    /// Desired wiper position.
    pub fn steps(&self) -> u8 {
        self.desired
    }

    pub fn applied(&self) -> Option<u8> {
        self.applied
    }

    /// Move the wiper, clamped to the step range. No bus traffic when the
    /// chip already holds the position.
    pub fn set_steps(&mut self, steps: u8) -> Result<(), I2cError> {
        self.desired = steps.min(self.max_steps);
        if self.applied == Some(self.desired) && self.link.is_connected() {
            return Ok(());
        }
        self.dispatch(LinkAction::Write)
    }
}

impl I2cDevice for Rheostat {
    fn link(&self) -> &I2cLink {
        &self.link
    }

    fn link_mut(&mut self) -> &mut I2cLink {
        &mut self.link
    }

    fn write(&mut self) -> Result<(), I2cError> {
        let value = self.desired & WIPER_MASK;
        let readback = self.link.transfer(I2cError::FailedWrite, |bus, a| {
            bus.write(a, &[value])?;
            let mut buf = [0u8];
            bus.read(a, &mut buf)?;
            Ok(buf[0] & WIPER_MASK)
        })?;
        self.applied = Some(readback);
        if readback == value {
            tracing::trace!(address = self.link.address(), steps = value, "wiper set");
            Ok(())
        } else {
            Err(I2cError::FailedCheck)
        }
    }

    fn read(&mut self) -> Result<(), I2cError> {
        let mut buf = [0u8];
        self.link
            .transfer(I2cError::FailedRead, |bus, a| bus.read(a, &mut buf))?;
        self.applied = Some(buf[0] & WIPER_MASK);
        Ok(())
    }

    fn reset(&mut self) {
        self.applied = None;
    }

    fn in_sync(&self) -> bool {
        self.applied == Some(self.desired)
    }
}
