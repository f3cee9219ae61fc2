//! Deterministic simulated peripherals.
//!
//! All simulated devices read time from an injected [`Clock`], so a
//! `ManualClock` shared with the scheduler makes every run reproducible.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use micrologger_traits::{BusFault, Clock, I2cBus, PulseCounter, PwmOutput, SignalSource};

use crate::error::HwError;

type DynClock = Arc<dyn Clock + Send + Sync>;

/// One device attached to the simulated bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimDevice {
    /// Single-wiper rheostat: a one byte write sets the wiper, a read returns it.
    Rheostat { wiper: u8, mask: u8 },
    /// Register-file device such as an 8-bit port expander. A write of
    /// `[reg]` moves the pointer, `[reg, value..]` stores values.
    Registers { regs: [u8; 8], pointer: u8 },
}

impl SimDevice {
    pub fn rheostat(mask: u8) -> Self {
        Self::Rheostat { wiper: 0, mask }
    }

    /// Port expander at power-on: outputs latched high, every pin an input.
    pub fn io_expander() -> Self {
        let mut regs = [0u8; 8];
        regs[1] = 0xFF;
        regs[3] = 0xFF;
        Self::Registers { regs, pointer: 0 }
    }

    fn write(&mut self, bytes: &[u8]) {
        match self {
            Self::Rheostat { wiper, mask } => {
                if let Some(b) = bytes.first() {
                    *wiper = b & *mask;
                }
            }
            Self::Registers { regs, pointer } => {
                let Some((reg, values)) = bytes.split_first() else {
                    return;
                };
                *pointer = reg & 0x07;
                for (i, v) in values.iter().enumerate() {
                    let idx = (usize::from(*pointer) + i) & 0x07;
                    // input port is read-only
                    if idx != 0 {
                        regs[idx] = *v;
                    }
                }
            }
        }
    }

    fn read(&self, buf: &mut [u8]) {
        match self {
            Self::Rheostat { wiper, .. } => {
                buf.fill(0);
                if let Some(first) = buf.first_mut() {
                    *first = *wiper;
                }
            }
            Self::Registers { regs, pointer } => {
                for (i, slot) in buf.iter_mut().enumerate() {
                    let idx = (usize::from(*pointer) + i) & 0x07;
                    *slot = if idx == 0 {
                        // pins configured as outputs read back their latch
                        regs[1] & !regs[3]
                    } else {
                        regs[idx]
                    };
                }
            }
        }
    }
}

/// In-memory I2C bus with scriptable faults.
#[derive(Default)]
pub struct SimBus {
    devices: BTreeMap<u8, SimDevice>,
    pending: BTreeMap<u8, VecDeque<BusFault>>,
    stuck: BTreeMap<u8, BusFault>,
    corrupt: BTreeSet<u8>,
    latency: Option<(DynClock, Duration)>,
    transactions: u64,
}

impl std::fmt::Debug for SimBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimBus")
            .field("devices", &self.devices)
            .field("transactions", &self.transactions)
            .finish_non_exhaustive()
    }
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, address: u8, device: SimDevice) -> Self {
        self.attach(address, device);
        self
    }

    pub fn attach(&mut self, address: u8, device: SimDevice) {
        self.devices.insert(address, device);
    }

    /// Remove a device; further transactions to it are not acknowledged.
    pub fn detach(&mut self, address: u8) -> Option<SimDevice> {
        self.devices.remove(&address)
    }

    /// Fail the next transaction addressed to `address` with `fault`.
    /// Multiple injections are consumed in order.
    pub fn inject_fault(&mut self, address: u8, fault: BusFault) {
        self.pending.entry(address).or_default().push_back(fault);
    }

    /// Fail every transaction to `address` until cleared with `None`.
    pub fn set_stuck(&mut self, address: u8, fault: Option<BusFault>) {
        match fault {
            Some(f) => {
                self.stuck.insert(address, f);
            }
            None => {
                self.stuck.remove(&address);
            }
        }
    }

    /// Flip the low bit of every byte read from `address`.
    pub fn set_corrupt_readback(&mut self, address: u8, corrupt: bool) {
        if corrupt {
            self.corrupt.insert(address);
        } else {
            self.corrupt.remove(&address);
        }
    }

    /// Every transaction sleeps `latency` on `clock` before completing.
    pub fn set_latency<C: Clock + Send + Sync + 'static>(&mut self, clock: C, latency: Duration) {
        self.latency = Some((Arc::new(clock), latency));
    }

    pub fn clear_latency(&mut self) {
        self.latency = None;
    }

    pub fn transactions(&self) -> u64 {
        self.transactions
    }

    pub fn device(&self, address: u8) -> Option<&SimDevice> {
        self.devices.get(&address)
    }

    pub fn wiper(&self, address: u8) -> Option<u8> {
        match self.devices.get(&address)? {
            SimDevice::Rheostat { wiper, .. } => Some(*wiper),
            SimDevice::Registers { .. } => None,
        }
    }

    pub fn register(&self, address: u8, reg: u8) -> Option<u8> {
        match self.devices.get(&address)? {
            SimDevice::Registers { regs, .. } => regs.get(usize::from(reg)).copied(),
            SimDevice::Rheostat { .. } => None,
        }
    }

    /// True when `pin` is configured as an output and latched high.
    pub fn pin_driven_high(&self, address: u8, pin: u8) -> bool {
        let mask = 1u8 << (pin & 0x07);
        match (self.register(address, 1), self.register(address, 3)) {
            (Some(out), Some(cfg)) => out & mask != 0 && cfg & mask == 0,
            _ => false,
        }
    }

    fn begin(&mut self, address: u8) -> Result<&mut SimDevice, BusFault> {
        self.transactions += 1;
        if let Some((clock, latency)) = &self.latency {
            clock.sleep(*latency);
        }
        if let Some(fault) = self.pending.get_mut(&address).and_then(VecDeque::pop_front) {
            tracing::trace!(address, %fault, "sim bus injected fault");
            return Err(fault);
        }
        if let Some(fault) = self.stuck.get(&address) {
            return Err(fault.clone());
        }
        self.devices.get_mut(&address).ok_or(BusFault::Nack)
    }

    fn finish_read(&self, address: u8, buf: &mut [u8]) {
        if self.corrupt.contains(&address) {
            for b in buf.iter_mut() {
                *b ^= 0x01;
            }
        }
    }
}

impl I2cBus for SimBus {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusFault> {
        self.begin(address)?.write(bytes);
        Ok(())
    }

    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), BusFault> {
        self.begin(address)?.read(buf);
        self.finish_read(address, buf);
        Ok(())
    }

    fn write_read(&mut self, address: u8, bytes: &[u8], buf: &mut [u8]) -> Result<(), BusFault> {
        let dev = self.begin(address)?;
        dev.write(bytes);
        dev.read(buf);
        self.finish_read(address, buf);
        Ok(())
    }
}

/// Piecewise linear drive curve `step = b + m * rpm` per step range.
#[derive(Debug, Clone, Copy)]
struct DriveSegment {
    step_min: u16,
    step_max: u16,
    b: f64,
    m: f64,
}

const DEFAULT_DRIVE: [DriveSegment; 4] = [
    DriveSegment { step_min: 0, step_max: 1000, b: 111.0, m: 0.693 },
    DriveSegment { step_min: 1000, step_max: 2000, b: 118.0, m: 0.688 },
    DriveSegment { step_min: 2000, step_max: 3000, b: 75.9, m: 0.702 },
    DriveSegment { step_min: 3000, step_max: 4096, b: 123.0, m: 0.691 },
];

#[derive(Debug)]
struct MotorState {
    duty: u16,
    speed_factor: f64,
    stalled: bool,
    last: Instant,
    accumulated: f64,
}

/// Brushless stirrer motor. The decoder emits `rpm * ms / 600` pulses.
///
/// The true speed follows the drive curve instantly; pulses accrue between
/// calls to [`SimDecoder::take_pulses`] at the speed in effect.
#[derive(Clone)]
pub struct SimMotor {
    clock: DynClock,
    state: Arc<Mutex<MotorState>>,
}

impl SimMotor {
    pub fn new<C: Clock + Send + Sync + 'static>(clock: C) -> Self {
        let last = clock.now();
        Self {
            clock: Arc::new(clock),
            state: Arc::new(Mutex::new(MotorState {
                duty: 0,
                speed_factor: 1.0,
                stalled: false,
                last,
                accumulated: 0.0,
            })),
        }
    }

    pub fn drive(&self) -> SimMotorDrive {
        SimMotorDrive(self.clone())
    }

    pub fn decoder(&self) -> SimDecoder {
        SimDecoder(self.clone())
    }

    /// Scale the true speed relative to the nominal drive curve.
    pub fn set_speed_factor(&self, factor: f64) {
        self.with_state(|s, now| {
            Self::accrue(s, now);
            s.speed_factor = factor.max(0.0);
        });
    }

    /// A stalled rotor emits no pulses regardless of drive.
    pub fn set_stalled(&self, stalled: bool) {
        self.with_state(|s, now| {
            Self::accrue(s, now);
            s.stalled = stalled;
        });
    }

    pub fn duty(&self) -> u16 {
        self.state.lock().map(|s| s.duty).unwrap_or(0)
    }

    pub fn true_rpm(&self) -> f64 {
        self.state.lock().map(|s| Self::rpm_of(&s)).unwrap_or(0.0)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MotorState, Instant) -> R) -> Option<R> {
        let now = self.clock.now();
        self.state.lock().ok().map(|mut s| f(&mut s, now))
    }

    fn rpm_of(s: &MotorState) -> f64 {
        if s.duty == 0 || s.stalled {
            return 0.0;
        }
        let seg = DEFAULT_DRIVE
            .iter()
            .find(|seg| s.duty >= seg.step_min && s.duty < seg.step_max)
            .unwrap_or(&DEFAULT_DRIVE[DEFAULT_DRIVE.len() - 1]);
        ((f64::from(s.duty) - seg.b) / seg.m).max(0.0) * s.speed_factor
    }

    fn accrue(s: &mut MotorState, now: Instant) {
        let dt_ms = now.saturating_duration_since(s.last).as_secs_f64() * 1000.0;
        s.accumulated += Self::rpm_of(s) * dt_ms / 600.0;
        s.last = now;
    }
}

/// PWM side of a [`SimMotor`].
pub struct SimMotorDrive(SimMotor);

impl PwmOutput for SimMotorDrive {
    fn set_duty(&mut self, steps: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.0.with_state(|s, now| {
            SimMotor::accrue(s, now);
            s.duty = steps;
        });
        Ok(())
    }
}

/// Decoder side of a [`SimMotor`].
pub struct SimDecoder(SimMotor);

impl PulseCounter for SimDecoder {
    fn take_pulses(&mut self) -> u32 {
        self.0
            .with_state(|s, now| {
                SimMotor::accrue(s, now);
                let whole = s.accumulated.floor();
                s.accumulated -= whole;
                // whole is non-negative and bounded by a single sample window
                whole as u32
            })
            .unwrap_or(0)
    }
}

/// Optical path parameters of the simulated photometer.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotometerModel {
    pub beam_address: u8,
    pub beam_pin: u8,
    pub coarse_address: u8,
    pub fine_address: Option<u8>,
    pub base_ohm: f64,
    pub rheostat_ohm: f64,
    pub rheostat_steps: u8,
    /// ADC counts per kOhm of gain with the beam on and a clear sample.
    pub light_per_kohm: f64,
    /// ADC counts per kOhm of gain from ambient light.
    pub dark_per_kohm: f64,
    /// Amplifier offset in ADC counts.
    pub dark_offset: f64,
    pub adc_resolution: u16,
}

impl Default for PhotometerModel {
    fn default() -> Self {
        Self {
            beam_address: 0x20,
            beam_pin: 0,
            coarse_address: 0x2E,
            fine_address: Some(0x2F),
            base_ohm: 10_000.0,
            rheostat_ohm: 100_000.0,
            rheostat_steps: 127,
            light_per_kohm: 20.0,
            dark_per_kohm: 0.05,
            dark_offset: 20.0,
            adc_resolution: 4095,
        }
    }
}

#[derive(Debug)]
struct PhotometerState {
    transmittance: f64,
    failing: bool,
}

/// Photodiode amplifier whose output follows the beam and gain devices on a
/// shared [`SimBus`].
#[derive(Clone)]
pub struct SimPhotometer {
    bus: Arc<Mutex<SimBus>>,
    model: PhotometerModel,
    state: Arc<Mutex<PhotometerState>>,
}

impl SimPhotometer {
    pub fn new(bus: Arc<Mutex<SimBus>>, model: PhotometerModel) -> Self {
        Self {
            bus,
            model,
            state: Arc::new(Mutex::new(PhotometerState {
                transmittance: 1.0,
                failing: false,
            })),
        }
    }

    /// Fraction of the beam that passes the sample, 0.0 to 1.0.
    pub fn set_transmittance(&self, t: f64) {
        if let Ok(mut s) = self.state.lock() {
            s.transmittance = t.clamp(0.0, 1.0);
        }
    }

    /// Make every sample fail, as an unplugged ADC would.
    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut s) = self.state.lock() {
            s.failing = failing;
        }
    }

    pub fn model(&self) -> &PhotometerModel {
        &self.model
    }

    /// Noise-free amplifier output for the current bus state.
    pub fn level(&self) -> Result<f64, HwError> {
        let (transmittance, failing) = self
            .state
            .lock()
            .map(|s| (s.transmittance, s.failing))
            .map_err(|_| HwError::Adc("photometer state poisoned".into()))?;
        if failing {
            return Err(HwError::Adc("no conversion".into()));
        }
        let bus = self
            .bus
            .lock()
            .map_err(|_| HwError::Adc("bus lock poisoned".into()))?;
        let m = &self.model;
        let per_step = m.rheostat_ohm / f64::from(m.rheostat_steps.max(1));
        let coarse = f64::from(bus.wiper(m.coarse_address).unwrap_or(0));
        let fine = m
            .fine_address
            .and_then(|a| bus.wiper(a))
            .map_or(0.0, f64::from);
        let kohm = (m.base_ohm + (coarse + fine) * per_step) / 1000.0;
        let beam = if bus.pin_driven_high(m.beam_address, m.beam_pin) {
            m.light_per_kohm * transmittance
        } else {
            0.0
        };
        let level = m.dark_offset + kohm * (m.dark_per_kohm + beam);
        Ok(level.clamp(0.0, f64::from(m.adc_resolution)))
    }
}

impl SignalSource for SimPhotometer {
    fn sample(&mut self) -> Result<u16, Box<dyn std::error::Error + Send + Sync>> {
        let level = self.level()?;
        // clamped to the adc range above
        Ok(level.round() as u16)
    }
}
