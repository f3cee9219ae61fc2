//! I2C bus master seam.
//!
//! Implemented by the simulated bus and by the Linux `/dev/i2c-*` backend.
//! Every method is one complete transaction; callers hold the bus lock for
//! its duration so transactions from different devices never interleave.

use thiserror::Error;

/// Completion codes of a failed transaction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusFault {
    /// The addressed device did not acknowledge.
    #[error("no acknowledge from device")]
    Nack,
    /// The transaction did not complete within the bus timeout.
    #[error("bus timeout")]
    Timeout,
    /// Fewer bytes arrived than were requested.
    #[error("short read: expected {expected} bytes, received {received}")]
    ShortRead { expected: usize, received: usize },
    /// Any other controller-level failure.
    #[error("bus error: {0}")]
    Other(String),
}

pub trait I2cBus {
    /// Write `bytes` to the device at the 7-bit `address`. An empty slice is
    /// an address-only probe.
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusFault>;

    /// Read `buf.len()` bytes from the device.
    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), BusFault>;

    /// Write then read with a repeated start (register pointer, then data).
    fn write_read(&mut self, address: u8, bytes: &[u8], buf: &mut [u8]) -> Result<(), BusFault>;
}

impl<B: I2cBus + ?Sized> I2cBus for Box<B> {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusFault> {
        (**self).write(address, bytes)
    }

    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), BusFault> {
        (**self).read(address, buf)
    }

    fn write_read(&mut self, address: u8, bytes: &[u8], buf: &mut [u8]) -> Result<(), BusFault> {
        (**self).write_read(address, bytes, buf)
    }
}
