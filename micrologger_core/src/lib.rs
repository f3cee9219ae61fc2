#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Bioreactor firmware core (hardware-agnostic).
//!
//! This crate drives a stirred culture vessel with an optical density
//! photometer. All hardware goes through the `micrologger_traits` seams:
//! `I2cBus`, `PwmOutput`, `PulseCounter`, `SignalSource` and `Clock`.
//!
//! ## Architecture
//!
//! - **I2C links**: per-device connection lifecycle and error bookkeeping (`i2c`, `devices`)
//! - **Statistics**: Welford running stats and an exact integer histogram (`stats`)
//! - **Motor**: closed-loop PWM control from decoder pulses (`motor`, `calibration`)
//! - **Stirrer**: ramps, vortex, pause and bounded restarts on top of the motor (`stirrer`)
//! - **Gain**: cascaded digital rheostats as one feedback resistor (`gain`)
//! - **Optical density**: zero, read and automatic gain sequences (`optical_density`, `signal`)
//! - **Instrument**: wiring, message routing and persistence (`instrument`, `builder`, `runner`)
//!
//! ## Time
//!
//! Components never read a clock. Every operation takes `now_ms`, the
//! milliseconds since the instrument was built, and exposes its earliest
//! pending deadline so a single loop can sleep exactly as long as needed.

pub mod builder;
pub mod calibration;
pub mod config;
pub mod conversions;
pub mod devices;
pub mod error;
pub mod gain;
pub mod hw_error;
pub mod i2c;
pub mod instrument;
pub mod lights;
pub mod mocks;
pub mod motor;
pub mod optical_density;
pub mod runner;
pub mod signal;
pub mod stats;
pub mod stirrer;
pub mod timer;
pub mod util;

pub use builder::{MicroLoggerBuilder, Missing, Set};
pub use calibration::{Calibration, Segment};
pub use config::{DeviceAddresses, InstrumentSettings};
pub use error::{BuildError, I2cError, MicroLoggerError, MotorError, OdError, Report, Result};
pub use gain::{GainSettings, GainStage};
pub use i2c::{DeviceHealth, I2cLink, LinkSettings, LinkStatus, SharedBus, SharedClock};
pub use instrument::{Health, MicroLogger};
pub use lights::{LightsControl, LightsLatch};
pub use motor::{MotorController, MotorSettings};
pub use optical_density::{
    OdAction, OdReading, OdSettings, OdStatus, OpticalDensityPipeline, ZeroReference,
};
pub use runner::{run_until, run_until_idle};
pub use signal::{SignalReader, SignalReading, SignalSettings};
pub use stats::{ExactHistogram, PercentileStats, RunningStats};
pub use stirrer::{
    StirrerAction, StirrerEvent, StirrerNotice, StirrerSettings, StirrerState, StirrerSupervisor,
};
pub use timer::Timer;
