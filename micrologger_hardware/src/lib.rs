//! Peripheral backends for the micrologger.
//!
//! The `sim` module provides deterministic stand-ins for the I2C bus, the
//! stirrer motor and the photometer so the whole instrument can run on a
//! development machine. Enabling the `hardware` feature adds Raspberry Pi
//! backends built on `rppal`.

pub mod adc;
pub mod error;
pub mod sim;

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod rpi;

pub use adc::I2cAdc;
pub use error::HwError;
pub use sim::{PhotometerModel, SimBus, SimDecoder, SimDevice, SimMotor, SimMotorDrive, SimPhotometer};
