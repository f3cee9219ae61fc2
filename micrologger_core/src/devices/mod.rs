//! Register-level drivers for the photometer's I2C peripherals.

pub mod beam;
pub mod rheostat;

pub use beam::BeamSwitch;
pub use rheostat::Rheostat;
